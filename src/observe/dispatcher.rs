//! Notification dispatch.
//!
//! Each resource change produces one notification per observer. A
//! confirmable notification gets a hard deadline of `now + max_age`; if the
//! previous notification of the same observation is still retransmitting it
//! is superseded first, and the new exchange continues its backoff
//! (RFC 7641 §4.5.1) instead of restarting it.

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::registry::{Observation, ObservationKey, ObservationRegistry, Registration};
use crate::core::{CoapResult, OBSERVE_DEREGISTER, OBSERVE_REGISTER, ResourceSnapshot};
use crate::endpoint::NotificationType;
use crate::message::{Code, Message, MessageType, OptionNumber, Token};
use crate::reliability::{Exchange, ExchangeKey, ExchangeOwner, ReliabilityEngine};

/// Observation change caused by a request.
#[derive(Debug, Clone)]
pub enum ObserveChange {
    /// A new observation was created.
    Registered {
        /// Observation key.
        key: ObservationKey,
        /// Observed resource.
        resource_path: String,
    },
    /// An observation was removed.
    Deregistered(Observation),
}

/// Builds notifications and hands them to the reliability engine.
#[derive(Debug)]
pub struct NotificationDispatcher {
    registry: ObservationRegistry,
    notification_type: NotificationType,
}

impl NotificationDispatcher {
    /// Create a dispatcher sending notifications of the given type.
    pub fn new(notification_type: NotificationType) -> Self {
        Self {
            registry: ObservationRegistry::new(),
            notification_type,
        }
    }

    /// Observation registry.
    pub fn registry(&self) -> &ObservationRegistry {
        &self.registry
    }

    /// Apply the Observe option of a request to the registry and its response.
    ///
    /// Only GET takes part in observation. Observe = 0 with a 2.xx response
    /// on an observable resource registers (or renews) and stamps the
    /// response with the sequence number. Observe = 1, an error response,
    /// or a GET without Observe reusing an observation's token removes it.
    pub fn on_request(
        &mut self,
        now: Instant,
        engine: &mut ReliabilityEngine,
        remote: SocketAddr,
        request: &Message,
        response: &mut Message,
        observable: bool,
    ) -> Option<ObserveChange> {
        response.remove_option(OptionNumber::Observe);
        if request.code != Code::GET {
            return None;
        }

        let key = ObservationKey::new(remote, request.token);
        let path = request.uri_path();

        if request.observe() == Some(OBSERVE_REGISTER)
            && response.code.is_success()
            && observable
        {
            let (outcome, observation) = self.registry.register(key, &path, now);
            response.set_observe(observation.sequence_number());
            debug!(
                observation = %key,
                resource = %path,
                sequence = observation.sequence_number(),
                ?outcome,
                "observe registration"
            );
            return match outcome {
                Registration::Created => Some(ObserveChange::Registered {
                    key,
                    resource_path: path,
                }),
                Registration::Renewed => None,
            };
        }

        if request.observe() == Some(OBSERVE_REGISTER) && !observable {
            trace!(resource = %path, "resource not observable");
        }
        if request.observe() == Some(OBSERVE_DEREGISTER) || self.registry.contains(&key) {
            return self
                .deregister(now, engine, &key)
                .map(ObserveChange::Deregistered);
        }
        None
    }

    /// Send a notification to every observer of `path`.
    ///
    /// Returns the number of notifications dispatched. Failures for single
    /// observers are logged and skipped.
    pub fn resource_changed(
        &mut self,
        now: Instant,
        engine: &mut ReliabilityEngine,
        path: &str,
        snapshot: &ResourceSnapshot,
    ) -> usize {
        let mut dispatched = 0;
        for key in self.registry.observers_of(path) {
            match self.notify(now, engine, key, snapshot) {
                Ok(()) => dispatched += 1,
                Err(e) => warn!(observation = %key, "notification not sent: {e}"),
            }
        }
        debug!(resource = path, version = snapshot.version, dispatched, "resource changed");
        dispatched
    }

    fn notify(
        &mut self,
        now: Instant,
        engine: &mut ReliabilityEngine,
        key: ObservationKey,
        snapshot: &ResourceSnapshot,
    ) -> CoapResult<()> {
        let Some(observation) = self.registry.get_mut(&key) else {
            return Ok(());
        };
        let owner = ExchangeOwner::Notification(key);

        let inherited = observation
            .pending_exchange()
            .and_then(|pending| engine.supersede(now, &pending, owner));
        observation.set_pending(None);
        if let Some(backoff) = inherited {
            debug!(
                observation = %key,
                retransmissions = backoff.retransmit_count(),
                "previous notification superseded"
            );
        }

        let message_type = self.notification_type.message_type();
        let message_id = engine.allocate_message_id(key.remote)?;
        let sequence = observation.next_sequence();
        let mut message = Message::new(message_type, Code::CONTENT, message_id)
            .with_token(key.token)
            .with_payload(snapshot.value.clone());
        message.set_observe(sequence);
        if let Some(format) = snapshot.content_format {
            message.set_content_format(format);
        }
        message.set_max_age(snapshot.max_age);

        match message_type {
            MessageType::Confirmable => {
                let exchange = engine.transmit(
                    now,
                    key.remote,
                    &message,
                    owner,
                    now.checked_add(snapshot.max_age),
                    inherited,
                )?;
                observation.set_pending(Some(exchange));
            }
            _ => {
                engine.send(key.remote, message.encode()?);
                engine.tracker_mut().record_sent_non(
                    ExchangeKey::new(key.remote, message_id),
                    key,
                    now,
                );
            }
        }
        observation.record_notification();
        trace!(observation = %key, sequence, message_id, "notification sent");
        Ok(())
    }

    /// Remove an observation, stopping its pending notification.
    pub fn deregister(
        &mut self,
        now: Instant,
        engine: &mut ReliabilityEngine,
        key: &ObservationKey,
    ) -> Option<Observation> {
        let observation = self.registry.remove(key)?;
        if let Some(pending) = observation.pending_exchange() {
            engine.supersede(now, &pending, ExchangeOwner::Notification(*key));
        }
        debug!(observation = %key, resource = observation.resource_path(), "observation removed");
        Some(observation)
    }

    /// Remove every observation of `path`, telling each observer with a
    /// final 4.04 notification.
    pub fn remove_resource(
        &mut self,
        now: Instant,
        engine: &mut ReliabilityEngine,
        path: &str,
    ) -> Vec<Observation> {
        let removed = self.registry.remove_resource(path);
        for observation in &removed {
            let key = observation.key();
            if let Some(pending) = observation.pending_exchange() {
                engine.supersede(now, &pending, ExchangeOwner::Notification(key));
            }
            if let Err(e) = send_not_found(engine, key.remote, key.token) {
                warn!(observation = %key, "final notification not sent: {e}");
            }
        }
        removed
    }

    /// Forget the pending exchange of the observation `exchange` belonged to.
    pub fn exchange_closed(&mut self, exchange: &Exchange) {
        let ExchangeOwner::Notification(key) = exchange.owner() else {
            return;
        };
        if let Some(observation) = self.registry.get_mut(&key)
            && observation.pending_exchange() == Some(exchange.key())
        {
            observation.set_pending(None);
        }
    }

    /// Resource observed by `key`.
    pub fn resource_path(&self, key: &ObservationKey) -> Option<&str> {
        self.registry.get(key).map(Observation::resource_path)
    }
}

fn send_not_found(
    engine: &mut ReliabilityEngine,
    remote: SocketAddr,
    token: Token,
) -> CoapResult<()> {
    let message_id = engine.allocate_message_id(remote)?;
    let message = Message::new(MessageType::NonConfirmable, Code::NOT_FOUND, message_id)
        .with_token(token);
    engine.send(remote, message.encode()?);
    Ok(())
}
