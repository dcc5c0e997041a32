//! Exchange tracking and deduplication.
//!
//! The tracker keeps three windows keyed by (peer, message id):
//!
//! - live exchanges this endpoint is retransmitting,
//! - completed exchanges, remembered for `exchange_lifetime` so late
//!   ACK/RST duplicates are recognised and their ids are not reused,
//! - message ids received from peers, with the reply that was sent, so a
//!   retransmitted CON is answered from cache instead of processed again.
//!
//! Non-confirmable notifications are remembered as well, so a RST naming
//! one can still cancel its observation.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::trace;

use super::exchange::{Exchange, ExchangeKey, ExchangeState};
use crate::core::{CoapError, CoapResult};
use crate::observe::ObservationKey;

/// Which window an expiry entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Completed,
    Received,
    SentNon,
}

#[derive(Debug)]
struct Received {
    expires: Instant,
    reply: Option<Vec<u8>>,
}

/// Result of looking up a received message id.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Not seen within the exchange lifetime.
    New,
    /// Seen before; `reply` is what was sent back then.
    Duplicate {
        /// Cached reply bytes.
        reply: Option<&'a [u8]>,
    },
}

/// Owns live exchanges and the deduplication windows.
#[derive(Debug)]
pub struct ExchangeTracker {
    live: HashMap<ExchangeKey, Exchange>,
    completed: HashMap<ExchangeKey, Instant>,
    received: HashMap<ExchangeKey, Received>,
    sent_non: HashMap<ExchangeKey, (ObservationKey, Instant)>,
    next_id: HashMap<SocketAddr, u16>,
    /// Insertion order equals expiry order since the lifetime is fixed.
    expiries: VecDeque<(Instant, Window, ExchangeKey)>,
    lifetime: Duration,
}

impl ExchangeTracker {
    /// Create a tracker remembering completed ids for `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            live: HashMap::new(),
            completed: HashMap::new(),
            received: HashMap::new(),
            sent_non: HashMap::new(),
            next_id: HashMap::new(),
            expiries: VecDeque::new(),
            lifetime,
        }
    }

    /// Pick a message id for a new message to `remote`.
    ///
    /// Ids start at a random value per peer and count upwards, skipping ids
    /// that are live or still inside the completed window.
    pub fn allocate_id<R: Rng + ?Sized>(
        &mut self,
        remote: SocketAddr,
        rng: &mut R,
    ) -> CoapResult<u16> {
        let next = self
            .next_id
            .entry(remote)
            .or_insert_with(|| rng.gen_range(0..=u16::MAX));

        for _ in 0..=u32::from(u16::MAX) {
            let id = *next;
            *next = next.wrapping_add(1);
            let key = ExchangeKey::new(remote, id);
            if !self.live.contains_key(&key)
                && !self.completed.contains_key(&key)
                && !self.sent_non.contains_key(&key)
            {
                return Ok(id);
            }
        }
        Err(CoapError::MessageIdsExhausted(remote))
    }

    /// Start tracking a live exchange.
    pub fn register(&mut self, exchange: Exchange) -> CoapResult<()> {
        let key = exchange.key;
        if self.live.contains_key(&key) {
            return Err(CoapError::DuplicateExchange {
                remote: key.remote,
                message_id: key.message_id,
            });
        }
        self.completed.remove(&key);
        self.live.insert(key, exchange);
        Ok(())
    }

    /// Live exchange for an incoming ACK/RST, if any.
    pub fn match_incoming(&self, key: &ExchangeKey) -> Option<&Exchange> {
        self.live.get(key)
    }

    pub(super) fn get_mut(&mut self, key: &ExchangeKey) -> Option<&mut Exchange> {
        self.live.get_mut(key)
    }

    /// Move a live exchange into the completed window.
    ///
    /// Returns the exchange the first time; later calls return `None`.
    pub fn complete(
        &mut self,
        key: &ExchangeKey,
        state: ExchangeState,
        now: Instant,
    ) -> Option<Exchange> {
        let mut exchange = self.live.remove(key)?;
        exchange.state = state;
        let expires = now + self.lifetime;
        self.completed.insert(*key, expires);
        self.expiries.push_back((expires, Window::Completed, *key));
        Some(exchange)
    }

    /// Check if a message with this key was already handled.
    ///
    /// True inside the completed window, or while live with at least one
    /// retransmission sent.
    pub fn is_duplicate(&self, key: &ExchangeKey) -> bool {
        self.completed.contains_key(key)
            || self
                .live
                .get(key)
                .is_some_and(|e| e.retransmit_count() > 0)
    }

    /// Look up a message id received from a peer.
    pub fn check_received(&self, key: &ExchangeKey) -> Inbound<'_> {
        match self.received.get(key) {
            Some(received) => Inbound::Duplicate {
                reply: received.reply.as_deref(),
            },
            None => Inbound::New,
        }
    }

    /// Remember a received message id and the reply sent for it.
    pub fn record_received(&mut self, key: ExchangeKey, reply: Option<Vec<u8>>, now: Instant) {
        let expires = now + self.lifetime;
        self.received.insert(key, Received { expires, reply });
        self.expiries.push_back((expires, Window::Received, key));
    }

    /// Remember a non-confirmable notification.
    pub fn record_sent_non(&mut self, key: ExchangeKey, observation: ObservationKey, now: Instant) {
        let expires = now + self.lifetime;
        self.sent_non.insert(key, (observation, expires));
        self.expiries.push_back((expires, Window::SentNon, key));
    }

    /// Observation of a non-confirmable notification named by a RST.
    pub fn take_sent_non(&mut self, key: &ExchangeKey) -> Option<ObservationKey> {
        self.sent_non.remove(key).map(|(observation, _)| observation)
    }

    /// Drop window entries that expired at or before `now`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&(expires, window, key)) = self.expiries.front() {
            if expires > now {
                break;
            }
            self.expiries.pop_front();

            // Entries refreshed since this one was queued stay.
            let removed = match window {
                Window::Completed => remove_if(&mut self.completed, &key, |e| *e == expires),
                Window::Received => remove_if(&mut self.received, &key, |r| r.expires == expires),
                Window::SentNon => remove_if(&mut self.sent_non, &key, |(_, e)| *e == expires),
            };
            if removed {
                trace!(%key, ?window, "window entry expired");
            }
        }
    }

    /// Earliest window expiry.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.expiries.front().map(|(expires, _, _)| *expires)
    }

    /// Live exchanges.
    pub fn live(&self) -> impl Iterator<Item = &Exchange> {
        self.live.values()
    }

    /// Number of live exchanges.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of remembered message ids across all windows.
    pub fn remembered_count(&self) -> usize {
        self.completed.len() + self.received.len() + self.sent_non.len()
    }
}

fn remove_if<V>(
    map: &mut HashMap<ExchangeKey, V>,
    key: &ExchangeKey,
    matches: impl FnOnce(&V) -> bool,
) -> bool {
    if map.get(key).is_some_and(matches) {
        map.remove(key);
        true
    } else {
        false
    }
}
