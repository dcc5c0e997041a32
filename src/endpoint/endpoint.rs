//! Sans-IO protocol endpoint.
//!
//! [`Endpoint`] holds all protocol state and never touches a socket or a
//! clock. The owner feeds it datagrams and timer expirations and drains
//! the datagrams and events it produces:
//!
//! ```text
//!   handle(now, remote, bytes) ─┐                 ┌─> poll_transmit()
//!   handle_timeout(now) ────────┼──> Endpoint ────┼─> poll_event()
//!   notify_resource_changed() ──┘                 └─> poll_timeout()
//! ```
//!
//! All state changes go through `&mut self`, so a single owner serializes
//! them; the runtime layer is one such owner.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use super::config::EndpointConfig;
use crate::core::{
    CoapError, CoapResult, CommunicationTimeoutError, ExchangeContext, OBSERVE_DEREGISTER,
    OBSERVE_REGISTER, ResourceHandler, ResourceSnapshot,
};
use crate::message::{Code, Message, MessageType, Token};
use crate::observe::{
    NotificationDispatcher, ObservationKey, ObservationRegistry, ObserveChange, Subscription,
    SubscriptionSet,
};
use crate::reliability::{ExchangeKey, ExchangeOwner, Inbound, ReliabilityEngine, Transmit};

/// Why an observation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The observer answered a notification with RST.
    Reset,
    /// The observer deregistered.
    Deregistered,
    /// The resource was removed.
    ResourceRemoved,
    /// The server ended a subscription with a final response.
    Ended {
        /// Code of the final response.
        code: Code,
    },
}

/// Something the application should know about.
#[derive(Debug, Clone)]
pub enum Event {
    /// Response to a request sent with [`Endpoint::request`].
    Response {
        /// Responding peer.
        remote: SocketAddr,
        /// Request token.
        token: Token,
        /// The response.
        response: Message,
    },
    /// Fresh notification for a subscription.
    Notification {
        /// Notifying server.
        remote: SocketAddr,
        /// Subscription token.
        token: Token,
        /// Observe sequence number.
        sequence: u32,
        /// The notification.
        notification: Message,
    },
    /// A peer started observing a local resource.
    ObservationRegistered {
        /// Observer.
        remote: SocketAddr,
        /// Registration token.
        token: Token,
        /// Observed resource.
        resource_path: String,
    },
    /// An observation or subscription ended.
    ObservationCancelled {
        /// The other side of the observation.
        remote: SocketAddr,
        /// Registration token.
        token: Token,
        /// Observed resource.
        resource_path: String,
        /// Why it ended.
        reason: CancelReason,
    },
    /// A peer rejected a request with RST.
    Rejected {
        /// Rejecting peer.
        remote: SocketAddr,
        /// Request token.
        token: Token,
    },
    /// A confirmable exchange got no reply.
    ExchangeFailed {
        /// Exchange details.
        context: ExchangeContext,
        /// The timeout.
        error: CommunicationTimeoutError,
    },
}

#[derive(Debug)]
struct OutstandingRequest {
    remote: SocketAddr,
    path: String,
    /// Confirmable exchange, until acknowledged.
    exchange: Option<ExchangeKey>,
    /// Observe registration.
    observe: bool,
    /// Forget the request if no response arrives by then.
    expires: Option<Instant>,
}

/// Protocol endpoint acting as server and client at once.
#[derive(Debug)]
pub struct Endpoint<H: ResourceHandler> {
    config: EndpointConfig,
    handler: H,
    engine: ReliabilityEngine,
    dispatcher: NotificationDispatcher,
    requests: HashMap<Token, OutstandingRequest>,
    subscriptions: SubscriptionSet,
    events: VecDeque<Event>,
}

impl<H: ResourceHandler> Endpoint<H> {
    /// Create an endpoint seeded from the OS.
    pub fn new(config: EndpointConfig, handler: H) -> CoapResult<Self> {
        Self::with_rng(config, handler, StdRng::from_entropy())
    }

    /// Create an endpoint with a fixed seed, for reproducible timing.
    pub fn with_seed(config: EndpointConfig, handler: H, seed: u64) -> CoapResult<Self> {
        Self::with_rng(config, handler, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: EndpointConfig, handler: H, rng: StdRng) -> CoapResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: ReliabilityEngine::with_rng(config.reliability.clone(), rng),
            dispatcher: NotificationDispatcher::new(config.notification_type),
            config,
            handler,
            requests: HashMap::new(),
            subscriptions: SubscriptionSet::new(),
            events: VecDeque::new(),
        })
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Resource handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Resource handler, for changing resource state.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Local resources' observers.
    pub fn observations(&self) -> &ObservationRegistry {
        self.dispatcher.registry()
    }

    /// Remote resources this endpoint observes.
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Reliability engine.
    pub fn engine(&self) -> &ReliabilityEngine {
        &self.engine
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Process a datagram from `remote`.
    ///
    /// Malformed datagrams, duplicates and unknown tokens are dropped here
    /// and never reach the caller.
    pub fn handle(&mut self, now: Instant, remote: SocketAddr, datagram: &[u8]) {
        if datagram.len() > self.config.max_message_size {
            debug!(%remote, len = datagram.len(), "oversized datagram dropped");
            return;
        }
        if let Err(e) = self.process(now, remote, datagram) {
            if e.is_silent_drop() {
                debug!(%remote, "dropped: {e}");
            } else {
                warn!(%remote, "message handling failed: {e}");
            }
        }
    }

    fn process(&mut self, now: Instant, remote: SocketAddr, datagram: &[u8]) -> CoapResult<()> {
        let message = Message::decode(datagram)?;
        trace!(
            %remote,
            kind = %message.message_type,
            code = %message.code,
            message_id = message.message_id,
            token = %message.token,
            "received"
        );

        match message.message_type {
            MessageType::Acknowledgement => self.on_ack(now, remote, message),
            MessageType::Reset => self.on_reset(now, remote, message),
            MessageType::Confirmable | MessageType::NonConfirmable => {
                self.on_message(now, remote, message)
            }
        }
    }

    fn on_ack(&mut self, now: Instant, remote: SocketAddr, message: Message) -> CoapResult<()> {
        let key = ExchangeKey::new(remote, message.message_id);
        let Some(exchange) = self.engine.on_ack(now, &key) else {
            return self.unmatched(key);
        };
        self.dispatcher.exchange_closed(&exchange);

        let ExchangeOwner::Request { token } = exchange.owner() else {
            return Ok(());
        };
        if message.is_empty() {
            // Separate response follows.
            let lifetime = self.config.reliability.exchange_lifetime;
            if let Some(request) = self.requests.get_mut(&token) {
                request.exchange = None;
                request.expires = Some(now + lifetime);
            }
            Ok(())
        } else if message.token == token {
            self.on_response(now, remote, message)
        } else {
            debug!(%key, "piggybacked response with foreign token ignored");
            Ok(())
        }
    }

    fn on_reset(&mut self, now: Instant, remote: SocketAddr, message: Message) -> CoapResult<()> {
        let key = ExchangeKey::new(remote, message.message_id);
        if let Some(exchange) = self.engine.on_reset(now, &key) {
            self.dispatcher.exchange_closed(&exchange);
            match exchange.owner() {
                ExchangeOwner::Notification(observation) => {
                    self.cancel_by_peer(now, observation, CancelReason::Reset);
                }
                ExchangeOwner::Request { token } => {
                    debug!(%key, %token, "request rejected");
                    self.requests.remove(&token);
                    self.events.push_back(Event::Rejected { remote, token });
                }
            }
            return Ok(());
        }

        if let Some(observation) = self.engine.tracker_mut().take_sent_non(&key) {
            self.cancel_by_peer(now, observation, CancelReason::Reset);
            return Ok(());
        }
        self.unmatched(key)
    }

    fn unmatched(&self, key: ExchangeKey) -> CoapResult<()> {
        if self.engine.is_duplicate(&key) {
            return Err(CoapError::DuplicateMessage {
                remote: key.remote,
                message_id: key.message_id,
            });
        }
        trace!(%key, "unmatched ACK/RST ignored");
        Ok(())
    }

    fn on_message(&mut self, now: Instant, remote: SocketAddr, message: Message) -> CoapResult<()> {
        let key = ExchangeKey::new(remote, message.message_id);
        let confirmable = message.message_type == MessageType::Confirmable;

        let cached = match self.engine.tracker().check_received(&key) {
            Inbound::New => None,
            Inbound::Duplicate { reply } => Some(reply.map(<[u8]>::to_vec)),
        };
        if let Some(reply) = cached {
            if confirmable && let Some(reply) = reply {
                trace!(%key, "answering duplicate from cache");
                self.engine.send(remote, reply);
            }
            return Err(CoapError::DuplicateMessage {
                remote,
                message_id: message.message_id,
            });
        }

        if message.is_request() {
            let response = self.on_request(now, remote, &message)?;
            return self.answer(now, key, Some(response));
        }

        if message.is_response() {
            let token = message.token;
            let known = self
                .requests
                .get(&token)
                .is_some_and(|request| request.remote == remote)
                || self.subscriptions.get_mut(remote, &token).is_some();
            let reply = match (confirmable, known) {
                (false, _) => None,
                (true, true) => Some(Message::empty_ack(message.message_id)),
                (true, false) => Some(Message::reset(message.message_id)),
            };
            self.answer(now, key, reply)?;
            if !known {
                return Err(CoapError::UnknownToken { remote, token });
            }
            return self.on_response(now, remote, message);
        }

        // Ping, or a code class this endpoint does not understand.
        let reply = confirmable.then(|| Message::reset(message.message_id));
        self.answer(now, key, reply)
    }

    /// Send a reply and remember it for duplicates of the message it answers.
    fn answer(&mut self, now: Instant, key: ExchangeKey, reply: Option<Message>) -> CoapResult<()> {
        let bytes = reply.map(|m| m.encode()).transpose()?;
        if let Some(bytes) = &bytes {
            self.engine.send(key.remote, bytes.clone());
        }
        self.engine.tracker_mut().record_received(key, bytes, now);
        Ok(())
    }

    fn on_request(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        request: &Message,
    ) -> CoapResult<Message> {
        let mut response = self.handler.on_request(request);
        let observable = self.handler.is_observable(&request.uri_path());
        let change = self.dispatcher.on_request(
            now,
            &mut self.engine,
            remote,
            request,
            &mut response,
            observable,
        );

        response.token = request.token;
        if request.message_type == MessageType::Confirmable {
            response.message_type = MessageType::Acknowledgement;
            response.message_id = request.message_id;
        } else {
            response.message_type = MessageType::NonConfirmable;
            response.message_id = self.engine.allocate_message_id(remote)?;
        }

        match change {
            Some(ObserveChange::Registered { key, resource_path }) => {
                self.events.push_back(Event::ObservationRegistered {
                    remote,
                    token: key.token,
                    resource_path,
                });
            }
            Some(ObserveChange::Deregistered(observation)) => {
                self.events.push_back(Event::ObservationCancelled {
                    remote,
                    token: observation.key().token,
                    resource_path: observation.resource_path().to_owned(),
                    reason: CancelReason::Deregistered,
                });
            }
            None => {}
        }
        Ok(response)
    }

    fn on_response(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        message: Message,
    ) -> CoapResult<()> {
        let token = message.token;

        if self
            .requests
            .get(&token)
            .is_some_and(|request| request.remote == remote)
            && let Some(request) = self.requests.remove(&token)
        {
            // A separate response also acknowledges the request.
            if let Some(exchange) = request.exchange
                && let Some(exchange) = self.engine.on_ack(now, &exchange)
            {
                self.dispatcher.exchange_closed(&exchange);
            }
            if request.observe
                && message.code.is_success()
                && let Some(sequence) = message.observe()
            {
                let mut subscription = Subscription::new(remote, token, request.path);
                subscription.accept(sequence, now);
                self.subscriptions.insert(subscription);
            }
            self.events.push_back(Event::Response {
                remote,
                token,
                response: message,
            });
            return Ok(());
        }

        let Some(subscription) = self.subscriptions.get_mut(remote, &token) else {
            return Err(CoapError::UnknownToken { remote, token });
        };
        let sequence = match message.observe() {
            Some(sequence) if message.code.is_success() => sequence,
            _ => {
                let resource_path = subscription.resource_path().to_owned();
                self.subscriptions.remove(&token);
                debug!(%remote, %token, code = %message.code, "subscription ended by server");
                self.events.push_back(Event::ObservationCancelled {
                    remote,
                    token,
                    resource_path,
                    reason: CancelReason::Ended { code: message.code },
                });
                return Ok(());
            }
        };

        if subscription.accept(sequence, now) {
            self.events.push_back(Event::Notification {
                remote,
                token,
                sequence,
                notification: message,
            });
        } else {
            trace!(%remote, %token, sequence, "stale notification dropped");
        }
        Ok(())
    }

    fn cancel_by_peer(&mut self, now: Instant, key: ObservationKey, reason: CancelReason) {
        if let Some(observation) = self.dispatcher.deregister(now, &mut self.engine, &key) {
            self.events.push_back(Event::ObservationCancelled {
                remote: key.remote,
                token: key.token,
                resource_path: observation.resource_path().to_owned(),
                reason,
            });
        }
    }

    /// Process expired timers.
    pub fn handle_timeout(&mut self, now: Instant) {
        for exchange in self.engine.handle_timeout(now) {
            self.dispatcher.exchange_closed(&exchange);
            let resource_path = match exchange.owner() {
                ExchangeOwner::Notification(key) => {
                    self.dispatcher.resource_path(&key).map(str::to_owned)
                }
                ExchangeOwner::Request { token } => {
                    self.requests.remove(&token).map(|request| request.path)
                }
            };
            let context = ExchangeContext {
                remote: exchange.remote(),
                message_id: exchange.message_id(),
                token: exchange.token(),
                resource_path,
            };
            let error = exchange.timeout_error();
            self.handler.on_exchange_failed(&context, &error);
            self.events.push_back(Event::ExchangeFailed { context, error });
        }
        self.requests
            .retain(|_, request| request.expires.is_none_or(|expires| expires > now));
    }

    // =========================================================================
    // Server operations
    // =========================================================================

    /// Notify every observer of `path` of a new resource state.
    ///
    /// Returns the number of notifications sent.
    pub fn notify_resource_changed(
        &mut self,
        now: Instant,
        path: &str,
        snapshot: &ResourceSnapshot,
    ) -> usize {
        self.dispatcher.resource_changed(now, &mut self.engine, path, snapshot)
    }

    /// Drop every observation of `path`.
    ///
    /// Observers receive a final 4.04 notification. Returns the number of
    /// observations removed.
    pub fn remove_resource(&mut self, now: Instant, path: &str) -> usize {
        let removed = self.dispatcher.remove_resource(now, &mut self.engine, path);
        for observation in &removed {
            let key = observation.key();
            self.events.push_back(Event::ObservationCancelled {
                remote: key.remote,
                token: key.token,
                resource_path: observation.resource_path().to_owned(),
                reason: CancelReason::ResourceRemoved,
            });
        }
        removed.len()
    }

    // =========================================================================
    // Client operations
    // =========================================================================

    /// Send a request to `remote`.
    ///
    /// A token is generated when the message has none and a message id is
    /// always assigned. Confirmable requests are retransmitted until
    /// acknowledged. The response arrives as [`Event::Response`].
    pub fn request(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        mut message: Message,
    ) -> CoapResult<Token> {
        if !message.is_request() {
            return Err(CoapError::InvalidRequest(format!(
                "code {} is not a request method",
                message.code
            )));
        }
        if message.token.is_empty() {
            message.token = Token::random(self.engine.rng());
        }
        message.message_id = self.engine.allocate_message_id(remote)?;
        let token = message.token;

        let (exchange, expires) = match message.message_type {
            MessageType::Confirmable => {
                let key = self.engine.transmit(
                    now,
                    remote,
                    &message,
                    ExchangeOwner::Request { token },
                    None,
                    None,
                )?;
                (Some(key), None)
            }
            MessageType::NonConfirmable => {
                self.engine.send(remote, message.encode()?);
                (None, Some(now + self.config.reliability.exchange_lifetime))
            }
            other => {
                return Err(CoapError::InvalidRequest(format!(
                    "requests cannot be sent as {other}"
                )));
            }
        };

        debug!(%remote, %token, path = %message.uri_path(), "request sent");
        self.requests.insert(
            token,
            OutstandingRequest {
                remote,
                path: message.uri_path(),
                exchange,
                observe: message.observe() == Some(OBSERVE_REGISTER),
                expires,
            },
        );
        Ok(token)
    }

    /// Register as observer of `path` on `remote`.
    ///
    /// Notifications arrive as [`Event::Notification`].
    pub fn observe(&mut self, now: Instant, remote: SocketAddr, path: &str) -> CoapResult<Token> {
        let mut message = Message::request(MessageType::Confirmable, Code::GET, path);
        message.set_observe(OBSERVE_REGISTER);
        self.request(now, remote, message)
    }

    /// Deregister the subscription with `token`.
    ///
    /// Returns `false` when there is no such subscription.
    pub fn cancel_observation(&mut self, now: Instant, token: Token) -> CoapResult<bool> {
        let Some(subscription) = self.subscriptions.remove(&token) else {
            return Ok(false);
        };
        let mut message =
            Message::request(MessageType::Confirmable, Code::GET, subscription.resource_path())
                .with_token(token);
        message.set_observe(OBSERVE_DEREGISTER);
        self.request(now, subscription.remote(), message)?;
        Ok(true)
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Next time [`handle_timeout`](Self::handle_timeout) should run.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.engine.poll_timeout()
    }

    /// Next datagram to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.engine.poll_transmit()
    }

    /// Next application event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoResources;
    use std::time::Duration;

    struct Counter {
        value: u32,
    }

    impl ResourceHandler for Counter {
        fn on_request(&mut self, request: &Message) -> Message {
            match (request.code, request.uri_path().as_str()) {
                (Code::GET, "counter") => {
                    Message::response(Code::CONTENT, self.value.to_string())
                }
                (_, "counter") => Message::response(Code::METHOD_NOT_ALLOWED, Vec::new()),
                _ => Message::response(Code::NOT_FOUND, Vec::new()),
            }
        }
    }

    fn server_addr() -> SocketAddr {
        "192.0.2.1:5683".parse().unwrap()
    }

    fn client_addr() -> SocketAddr {
        "192.0.2.2:40000".parse().unwrap()
    }

    fn config() -> EndpointConfig {
        EndpointConfig::builder().ack_random_factor(1.0).build().unwrap()
    }

    fn server() -> Endpoint<Counter> {
        Endpoint::with_seed(config(), Counter { value: 7 }, 1).unwrap()
    }

    fn client() -> Endpoint<NoResources> {
        Endpoint::with_seed(config(), NoResources, 2).unwrap()
    }

    fn transmits<H: ResourceHandler>(endpoint: &mut Endpoint<H>) -> Vec<Transmit> {
        std::iter::from_fn(|| endpoint.poll_transmit()).collect()
    }

    fn events<H: ResourceHandler>(endpoint: &mut Endpoint<H>) -> Vec<Event> {
        std::iter::from_fn(|| endpoint.poll_event()).collect()
    }

    fn deliver<A: ResourceHandler, B: ResourceHandler>(
        now: Instant,
        from: &mut Endpoint<A>,
        from_addr: SocketAddr,
        to: &mut Endpoint<B>,
    ) -> usize {
        let out = transmits(from);
        for transmit in &out {
            to.handle(now, from_addr, &transmit.contents);
        }
        out.len()
    }

    #[test]
    fn test_piggybacked_request_response() {
        let now = Instant::now();
        let mut server = server();
        let mut client = client();

        let request = Message::request(MessageType::Confirmable, Code::GET, "counter");
        let token = client.request(now, server_addr(), request).unwrap();
        assert_eq!(deliver(now, &mut client, client_addr(), &mut server), 1);
        assert_eq!(deliver(now, &mut server, server_addr(), &mut client), 1);

        let events = events(&mut client);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Response {
                token: t, response, ..
            } => {
                assert_eq!(*t, token);
                assert_eq!(response.message_type, MessageType::Acknowledgement);
                assert_eq!(response.payload, b"7");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(client.engine().tracker().live_count(), 0);
    }

    #[test]
    fn test_non_request_gets_non_response() {
        let now = Instant::now();
        let mut server = server();
        let mut client = client();

        let request = Message::request(MessageType::NonConfirmable, Code::GET, "counter");
        client.request(now, server_addr(), request).unwrap();
        deliver(now, &mut client, client_addr(), &mut server);

        let out = transmits(&mut server);
        let response = Message::decode(&out[0].contents).unwrap();
        assert_eq!(response.message_type, MessageType::NonConfirmable);

        client.handle(now, server_addr(), &out[0].contents);
        assert!(matches!(events(&mut client)[0], Event::Response { .. }));
    }

    #[test]
    fn test_duplicate_request_answered_from_cache() {
        let now = Instant::now();
        let mut server = server();
        let mut request = Message::request(MessageType::Confirmable, Code::GET, "counter")
            .with_token(Token::from_slice(&[1]).unwrap());
        request.message_id = 100;
        let bytes = request.encode().unwrap();

        server.handle(now, client_addr(), &bytes);
        let first = transmits(&mut server);
        server.handler_mut().value = 8;
        server.handle(now, client_addr(), &bytes);
        let second = transmits(&mut server);

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ping_answered_with_reset() {
        let now = Instant::now();
        let mut server = server();
        server.handle(now, client_addr(), &Message::ping(55).encode().unwrap());

        let out = transmits(&mut server);
        let reply = Message::decode(&out[0].contents).unwrap();
        assert_eq!(reply, Message::reset(55));
    }

    #[test]
    fn test_malformed_datagram_dropped() {
        let now = Instant::now();
        let mut server = server();
        server.handle(now, client_addr(), &[0x40, 0x01]);
        server.handle(now, client_addr(), &[0x40, 0x01, 0x00, 0x01, 0xFF]);
        assert!(transmits(&mut server).is_empty());
        assert!(events(&mut server).is_empty());
    }

    #[test]
    fn test_unknown_token_notification_rejected() {
        let now = Instant::now();
        let mut client = client();
        let mut notification = Message::new(MessageType::Confirmable, Code::CONTENT, 9)
            .with_token(Token::from_slice(&[0xEE]).unwrap())
            .with_payload(b"x".to_vec());
        notification.set_observe(3);

        client.handle(now, server_addr(), &notification.encode().unwrap());
        let out = transmits(&mut client);
        assert_eq!(Message::decode(&out[0].contents).unwrap(), Message::reset(9));
        assert!(events(&mut client).is_empty());
    }

    #[test]
    fn test_request_rejects_non_method() {
        let now = Instant::now();
        let mut client = client();
        let message = Message::response(Code::CONTENT, Vec::new());
        assert!(matches!(
            client.request(now, server_addr(), message),
            Err(CoapError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_request_timeout_reported() {
        let start = Instant::now();
        let mut client = client();
        let request = Message::request(MessageType::Confirmable, Code::GET, "counter");
        let token = client.request(start, server_addr(), request).unwrap();

        let mut now = start;
        while client.engine().pending_timers() > 0 {
            now = client.poll_timeout().unwrap();
            client.handle_timeout(now);
        }
        assert_eq!(now - start, Duration::from_secs(62));
        assert_eq!(transmits(&mut client).len(), 5);

        let events = events(&mut client);
        match &events[..] {
            [Event::ExchangeFailed { context, error }] => {
                assert_eq!(context.token, token);
                assert_eq!(context.resource_path.as_deref(), Some("counter"));
                assert_eq!(error.retransmissions, 4);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_observe_and_cancel() {
        let now = Instant::now();
        let mut server = server();
        let mut client = client();

        let token = client.observe(now, server_addr(), "counter").unwrap();
        deliver(now, &mut client, client_addr(), &mut server);
        assert!(matches!(
            events(&mut server)[..],
            [Event::ObservationRegistered { .. }]
        ));
        deliver(now, &mut server, server_addr(), &mut client);
        assert!(client.subscriptions().get(&token).is_some());
        events(&mut client);

        let snapshot = ResourceSnapshot::new(b"8".to_vec(), 8, Duration::from_secs(60));
        assert_eq!(server.notify_resource_changed(now, "counter", &snapshot), 1);
        deliver(now, &mut server, server_addr(), &mut client);
        match &events(&mut client)[..] {
            [Event::Notification { sequence, notification, .. }] => {
                assert_eq!(*sequence, 1);
                assert_eq!(notification.payload, b"8");
            }
            other => panic!("unexpected events {other:?}"),
        }
        // The client's empty ACK ends the notification exchange.
        deliver(now, &mut client, client_addr(), &mut server);
        assert_eq!(server.engine().tracker().live_count(), 0);

        assert!(client.cancel_observation(now, token).unwrap());
        deliver(now, &mut client, client_addr(), &mut server);
        assert!(server.observations().is_empty());
        assert!(matches!(
            events(&mut server)[..],
            [Event::ObservationCancelled {
                reason: CancelReason::Deregistered,
                ..
            }]
        ));
    }
}
