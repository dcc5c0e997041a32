//! A resource changes while its notification is still being retransmitted.
//!
//! The observer never acknowledges anything. With Max-Age 90 s every
//! notification must stop retransmitting before its Max-Age runs out, and a
//! notification replacing a retransmitting one continues its backoff.
//!
//! ```text
//!   observer                     server                    resource
//!      |---- GET Observe:0 -------->|                          |   0 s
//!      |<--- ACK Observe:0 ---------|                          |
//!      |                            |<-------- change ---------|   2 s
//!      |<--- CON Observe:1 ---------|                          |
//!      |<--- retransmission 1 ------|                          |  13.25 s
//!      |<--- retransmission 2 ------|                          |  35.75 s
//!      |                            |<-------- change ---------|  37 s
//!      |<--- CON Observe:2 ---------|                          |
//!      |<--- retransmission 3 ------|                          |  82 s
//!      |<--- retransmission 4 ------|                          | 126.999 s
//!      |                        timeout                        | 127 s
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ncoap::core::ExchangeContext;
use ncoap::endpoint::{EndpointConfig, Event};
use ncoap::{
    Code, CommunicationTimeoutError, Endpoint, Message, MessageType, ResourceHandler,
    ResourceSnapshot, Token,
};

const PATH: &str = "observable";
const MAX_AGE: Duration = Duration::from_secs(90);

/// Observable resource holding a status counter.
struct ObservableService {
    status: u32,
    failures: Vec<ExchangeContext>,
}

impl ObservableService {
    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot::new(
            format!("status {}", self.status).into_bytes(),
            u64::from(self.status),
            MAX_AGE,
        )
    }
}

impl ResourceHandler for ObservableService {
    fn on_request(&mut self, request: &Message) -> Message {
        if request.uri_path() != PATH {
            return Message::response(Code::NOT_FOUND, Vec::new());
        }
        let mut response = Message::response(Code::CONTENT, self.snapshot().value);
        response.set_max_age(MAX_AGE);
        response
    }

    fn on_exchange_failed(
        &mut self,
        context: &ExchangeContext,
        _error: &CommunicationTimeoutError,
    ) {
        self.failures.push(context.clone());
    }
}

/// Datagram as seen by the observer.
struct Received {
    at: Duration,
    bytes: Vec<u8>,
    message: Message,
}

/// Server endpoint driven on a virtual clock.
struct Harness {
    server: Endpoint<ObservableService>,
    start: Instant,
    now: Instant,
    received: Vec<Received>,
    events: Vec<(Duration, Event)>,
}

impl Harness {
    fn new() -> Self {
        let config = EndpointConfig::builder()
            .ack_timeout(Duration::from_millis(11_250))
            .ack_random_factor(1.0)
            .max_retransmit(4)
            .build()
            .unwrap();
        let service = ObservableService {
            status: 0,
            failures: Vec::new(),
        };
        let start = Instant::now();
        Self {
            server: Endpoint::with_seed(config, service, 7).unwrap(),
            start,
            now: start,
            received: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Run every timer up to `offset` after the start.
    fn advance_to(&mut self, offset: Duration) {
        let target = self.start + offset;
        while let Some(at) = self.server.poll_timeout() {
            if at > target {
                break;
            }
            self.now = self.now.max(at);
            self.server.handle_timeout(at);
            self.drain();
        }
        self.now = target;
    }

    fn deliver(&mut self, from: SocketAddr, message: &Message) {
        self.server.handle(self.now, from, &message.encode().unwrap());
        self.drain();
    }

    fn change_status(&mut self, status: u32) {
        self.server.handler_mut().status = status;
        let snapshot = self.server.handler().snapshot();
        let now = self.now;
        assert_eq!(self.server.notify_resource_changed(now, PATH, &snapshot), 1);
        self.drain();
    }

    fn drain(&mut self) {
        let at = self.now - self.start;
        while let Some(transmit) = self.server.poll_transmit() {
            let message = Message::decode(&transmit.contents).unwrap();
            self.received.push(Received {
                at,
                bytes: transmit.contents,
                message,
            });
        }
        while let Some(event) = self.server.poll_event() {
            self.events.push((at, event));
        }
    }
}

fn observer() -> SocketAddr {
    "192.0.2.50:5683".parse().unwrap()
}

fn token() -> Token {
    Token::from_slice(&[0x12, 0x23, 0x34]).unwrap()
}

fn run_scenario() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut harness = Harness::new();

    let mut registration = Message::request(MessageType::Confirmable, Code::GET, PATH)
        .with_token(token());
    registration.message_id = 12345;
    registration.set_observe(0);
    harness.deliver(observer(), &registration);

    harness.advance_to(Duration::from_secs(2));
    harness.change_status(1);

    harness.advance_to(Duration::from_secs(37));
    harness.change_status(2);

    harness.advance_to(Duration::from_secs(200));
    harness
}

#[test]
fn test_observer_receives_seven_messages() {
    let harness = run_scenario();
    assert_eq!(harness.received.len(), 7);
    assert!(harness.received.iter().all(|r| r.message.token == token()));
}

#[test]
fn test_first_message_is_ack_with_observe() {
    let harness = run_scenario();
    let first = &harness.received[0].message;
    assert_eq!(first.message_type, MessageType::Acknowledgement);
    assert_eq!(first.message_id, 12345);
    assert_eq!(first.code, Code::CONTENT);
    assert_eq!(first.observe(), Some(0));
}

#[test]
fn test_transmission_timeline() {
    let harness = run_scenario();
    let times: Vec<Duration> = harness.received.iter().map(|r| r.at).collect();
    assert_eq!(
        times,
        vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_millis(13_250),
            Duration::from_millis(35_750),
            Duration::from_secs(37),
            Duration::from_secs(82),
            Duration::from_millis(126_999),
        ]
    );
}

#[test]
fn test_last_retransmission_waits_for_max_age_but_not_beyond() {
    let harness = run_scenario();
    let last = harness.received.last().unwrap();
    assert!(last.at >= MAX_AGE);

    // Every notification goes out before its own Max-Age expires.
    let second_change = Duration::from_secs(37);
    for received in &harness.received[4..] {
        assert!(received.at < second_change + MAX_AGE);
    }
}

#[test]
fn test_retransmissions_are_identical_until_the_resource_changes() {
    let harness = run_scenario();
    let bytes: Vec<&[u8]> = harness.received[1..].iter().map(|r| &r.bytes[..]).collect();

    assert_eq!(bytes[0], bytes[1]);
    assert_eq!(bytes[1], bytes[2]);
    assert_ne!(bytes[2], bytes[3]);
    assert_eq!(bytes[3], bytes[4]);
    assert_eq!(bytes[4], bytes[5]);

    let payloads: Vec<&[u8]> = harness.received[1..]
        .iter()
        .map(|r| &r.message.payload[..])
        .collect();
    assert_eq!(payloads[0], b"status 1");
    assert_eq!(payloads[3], b"status 2");
}

#[test]
fn test_sequence_numbers_increase_with_each_notification() {
    let harness = run_scenario();
    let sequences: Vec<u32> = harness
        .received
        .iter()
        .map(|r| r.message.observe().unwrap())
        .collect();
    assert_eq!(sequences, vec![0, 1, 1, 1, 2, 2, 2]);

    // Distinct notifications carry strictly increasing numbers.
    let mut distinct = sequences.clone();
    distinct.dedup();
    assert!(distinct.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_superseded_notification_continues_backoff() {
    let harness = run_scenario();
    let gaps: Vec<Duration> = harness.received[4..]
        .windows(2)
        .map(|pair| pair[1].at - pair[0].at)
        .collect();

    // The replacement starts where the superseded one stopped: 45 s, not
    // a fresh 11.25 s. The next gap is shrunk to end before the deadline.
    assert_eq!(gaps[0], Duration::from_secs(45));
    assert_eq!(gaps[1], Duration::from_millis(44_999));
}

#[test]
fn test_timeout_reported_and_observation_kept() {
    let harness = run_scenario();

    let failures: Vec<_> = harness
        .events
        .iter()
        .filter_map(|(at, event)| match event {
            Event::ExchangeFailed { context, error } => Some((*at, context, error)),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    let (at, context, error) = failures[0];
    assert_eq!(at, Duration::from_secs(127));
    assert_eq!(context.resource_path.as_deref(), Some(PATH));
    assert_eq!(context.token, token());
    assert_eq!(error.retransmissions, 4);

    assert_eq!(harness.server.handler().failures.len(), 1);
    assert_eq!(harness.server.observations().len(), 1);
    assert_eq!(harness.server.engine().tracker().live_count(), 0);
}
