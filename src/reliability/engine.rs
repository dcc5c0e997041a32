//! Retransmission engine.
//!
//! The engine owns every retransmission timer. Timers live in an ordered
//! set keyed by fire time; completing an exchange removes its entry, so an
//! ACK processed before [`ReliabilityEngine::handle_timeout`] suppresses
//! the retransmission, and one processed after it finds the retransmission
//! already queued. Nothing is ever sent for an exchange after it completed.

use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, trace, warn};

use super::exchange::{Exchange, ExchangeKey, ExchangeOwner, ExchangeState};
use super::timing::Backoff;
use super::tracker::ExchangeTracker;
use crate::core::{CoapError, CoapResult};
use crate::endpoint::ReliabilityConfig;
use crate::message::{Message, MessageType};

/// A datagram ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Peer to send to.
    pub destination: SocketAddr,
    /// Encoded message.
    pub contents: Vec<u8>,
}

/// Drives confirmable exchanges through their lifecycle.
#[derive(Debug)]
pub struct ReliabilityEngine {
    config: ReliabilityConfig,
    tracker: ExchangeTracker,
    timers: BTreeSet<(Instant, ExchangeKey)>,
    transmits: VecDeque<Transmit>,
    rng: StdRng,
}

impl ReliabilityEngine {
    /// Create an engine seeded from the OS.
    pub fn new(config: ReliabilityConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create an engine with an explicit random source.
    pub fn with_rng(config: ReliabilityConfig, rng: StdRng) -> Self {
        Self {
            tracker: ExchangeTracker::new(config.exchange_lifetime),
            config,
            timers: BTreeSet::new(),
            transmits: VecDeque::new(),
            rng,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Exchange tracker.
    pub fn tracker(&self) -> &ExchangeTracker {
        &self.tracker
    }

    /// Exchange tracker, for the received-message window.
    pub fn tracker_mut(&mut self) -> &mut ExchangeTracker {
        &mut self.tracker
    }

    /// Random source shared with token generation.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Pick an unused message id towards `remote`.
    pub fn allocate_message_id(&mut self, remote: SocketAddr) -> CoapResult<u16> {
        self.tracker.allocate_id(remote, &mut self.rng)
    }

    /// Queue a datagram that needs no acknowledgement.
    pub fn send(&mut self, destination: SocketAddr, contents: Vec<u8>) {
        self.transmits.push_back(Transmit {
            destination,
            contents,
        });
    }

    /// Send a confirmable message and schedule its retransmissions.
    ///
    /// `inherited` continues the backoff of a superseded exchange instead of
    /// starting a fresh one, with its limit reset to `max_retransmit`.
    /// `hard_deadline` bounds every retransmission.
    pub fn transmit(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        message: &Message,
        owner: ExchangeOwner,
        hard_deadline: Option<Instant>,
        inherited: Option<Backoff>,
    ) -> CoapResult<ExchangeKey> {
        debug_assert_eq!(message.message_type, MessageType::Confirmable);

        let key = ExchangeKey::new(remote, message.message_id);
        if self.tracker.match_incoming(&key).is_some() {
            return Err(CoapError::DuplicateExchange {
                remote,
                message_id: message.message_id,
            });
        }

        let bytes = message.encode()?;
        let mut backoff = match inherited {
            Some(backoff) => backoff.inherit(self.config.max_retransmit),
            None => Backoff::initial(&self.config, &mut self.rng),
        };
        let next_deadline = backoff.next_fire(
            now,
            hard_deadline,
            self.config.deadline_guard,
            self.config.min_retransmit_timeout,
        );

        self.tracker.register(Exchange {
            key,
            token: message.token,
            owner,
            bytes: bytes.clone(),
            state: ExchangeState::Scheduled,
            backoff,
            next_deadline,
            hard_deadline,
            first_sent: now,
        })?;
        self.timers.insert((next_deadline, key));
        self.send(remote, bytes);

        trace!(
            %key,
            token = %message.token,
            retransmissions = backoff.retransmit_count(),
            timeout = ?backoff.current_timeout(),
            "confirmable sent"
        );
        Ok(key)
    }

    /// Process expired timers.
    ///
    /// Retransmits exchanges with budget and time left and returns the ones
    /// that timed out. Also expires deduplication entries.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Exchange> {
        let guard = self.config.deadline_guard;
        let min_timeout = self.config.min_retransmit_timeout;
        let mut timed_out = Vec::new();

        while let Some(&(at, key)) = self.timers.first() {
            if at > now {
                break;
            }
            self.timers.pop_first();

            let Some(exchange) = self.tracker.get_mut(&key) else {
                continue;
            };
            let before_deadline = exchange.hard_deadline.is_none_or(|d| now < d);

            if !exchange.backoff.is_exhausted() && before_deadline {
                exchange.backoff.on_retransmit();
                exchange.state = ExchangeState::Retransmitting;
                exchange.next_deadline = exchange
                    .backoff
                    .next_fire(now, exchange.hard_deadline, guard, min_timeout);
                debug!(
                    %key,
                    attempt = exchange.backoff.retransmit_count(),
                    next = ?(exchange.next_deadline - now),
                    "retransmitting"
                );
                self.timers.insert((exchange.next_deadline, key));
                self.transmits.push_back(Transmit {
                    destination: key.remote,
                    contents: exchange.bytes.clone(),
                });
            } else if let Some(exchange) = self.tracker.complete(&key, ExchangeState::TimedOut, now)
            {
                warn!(
                    %key,
                    token = %exchange.token,
                    retransmissions = exchange.retransmit_count(),
                    "exchange timed out"
                );
                timed_out.push(exchange);
            }
        }

        self.tracker.prune(now);
        timed_out
    }

    /// Match an ACK; returns the acknowledged exchange.
    pub fn on_ack(&mut self, now: Instant, key: &ExchangeKey) -> Option<Exchange> {
        self.finish(now, key, ExchangeState::Acknowledged)
    }

    /// Match a RST; returns the rejected exchange.
    pub fn on_reset(&mut self, now: Instant, key: &ExchangeKey) -> Option<Exchange> {
        self.finish(now, key, ExchangeState::Reset)
    }

    /// Stop an exchange owned by `owner` without reporting an error.
    ///
    /// Returns its backoff progress, or `None` when the exchange is no longer
    /// live or belongs to someone else. Bytes already sent stay sent.
    pub fn supersede(
        &mut self,
        now: Instant,
        key: &ExchangeKey,
        owner: ExchangeOwner,
    ) -> Option<Backoff> {
        if self.tracker.match_incoming(key)?.owner != owner {
            return None;
        }
        self.finish(now, key, ExchangeState::Superseded)
            .map(|exchange| exchange.backoff)
    }

    fn finish(
        &mut self,
        now: Instant,
        key: &ExchangeKey,
        state: ExchangeState,
    ) -> Option<Exchange> {
        let exchange = self.tracker.complete(key, state, now)?;
        self.timers.remove(&(exchange.next_deadline, *key));
        trace!(%key, ?state, retransmissions = exchange.retransmit_count(), "exchange closed");
        Some(exchange)
    }

    /// Check if an unmatched message with this key is a known duplicate.
    pub fn is_duplicate(&self, key: &ExchangeKey) -> bool {
        self.tracker.is_duplicate(key)
    }

    /// Next time [`handle_timeout`](Self::handle_timeout) should run.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let timer = self.timers.first().map(|(at, _)| *at);
        match (timer, self.tracker.next_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Next datagram to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Number of scheduled retransmission timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}
