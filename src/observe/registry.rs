//! Server-side observation bookkeeping.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::core::OBSERVE_SEQUENCE_MODULUS;
use crate::message::Token;
use crate::reliability::ExchangeKey;

/// Identifies an observation: the observer and the token it registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationKey {
    /// Observer address.
    pub remote: SocketAddr,
    /// Registration token.
    pub token: Token,
}

impl ObservationKey {
    /// Create a key.
    pub fn new(remote: SocketAddr, token: Token) -> Self {
        Self { remote, token }
    }
}

impl fmt::Display for ObservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.token)
    }
}

/// One observer of one resource.
#[derive(Debug, Clone)]
pub struct Observation {
    key: ObservationKey,
    resource_path: String,
    sequence_number: u32,
    /// Exchange carrying the latest confirmable notification. Only an
    /// identifier: the exchange may end without the observation noticing,
    /// so users check it is still live.
    pending_exchange: Option<ExchangeKey>,
    registered_at: Instant,
    notifications: u64,
}

impl Observation {
    fn new(key: ObservationKey, resource_path: String, now: Instant) -> Self {
        Self {
            key,
            resource_path,
            sequence_number: 0,
            pending_exchange: None,
            registered_at: now,
            notifications: 0,
        }
    }

    /// Observation key.
    pub fn key(&self) -> ObservationKey {
        self.key
    }

    /// Observed resource.
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Sequence number of the latest response or notification.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Exchange of the latest confirmable notification, if still tracked.
    pub fn pending_exchange(&self) -> Option<ExchangeKey> {
        self.pending_exchange
    }

    /// When the observer first registered.
    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Notifications dispatched so far.
    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    /// Advance the sequence number, wrapping at 2^24.
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence_number = (self.sequence_number + 1) % OBSERVE_SEQUENCE_MODULUS;
        self.sequence_number
    }

    pub(super) fn set_pending(&mut self, exchange: Option<ExchangeKey>) {
        self.pending_exchange = exchange;
    }

    pub(super) fn record_notification(&mut self) {
        self.notifications += 1;
    }
}

/// Outcome of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new observation was created.
    Created,
    /// An existing observation was refreshed.
    Renewed,
}

/// All observations, indexed by key and by resource.
#[derive(Debug, Default)]
pub struct ObservationRegistry {
    observations: HashMap<ObservationKey, Observation>,
    by_resource: HashMap<String, BTreeSet<ObservationKey>>,
}

impl ObservationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as observer of `path`.
    ///
    /// A fresh observation starts at sequence number 0. Re-registering the
    /// same key continues the existing observation with the next sequence
    /// number; if the path differs the observation moves to the new path.
    pub fn register(
        &mut self,
        key: ObservationKey,
        path: &str,
        now: Instant,
    ) -> (Registration, &mut Observation) {
        match self.observations.entry(key) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                if existing.resource_path != path {
                    let old = std::mem::replace(&mut existing.resource_path, path.to_owned());
                    unindex(&mut self.by_resource, &old, &key);
                    self.by_resource
                        .entry(path.to_owned())
                        .or_default()
                        .insert(key);
                }
                existing.next_sequence();
                (Registration::Renewed, existing)
            }
            Entry::Vacant(entry) => {
                self.by_resource
                    .entry(path.to_owned())
                    .or_default()
                    .insert(key);
                let created = entry.insert(Observation::new(key, path.to_owned(), now));
                (Registration::Created, created)
            }
        }
    }

    /// Remove an observation.
    pub fn remove(&mut self, key: &ObservationKey) -> Option<Observation> {
        let observation = self.observations.remove(key)?;
        unindex(&mut self.by_resource, &observation.resource_path, key);
        Some(observation)
    }

    /// Remove every observation of `path`.
    pub fn remove_resource(&mut self, path: &str) -> Vec<Observation> {
        self.by_resource
            .remove(path)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| self.observations.remove(&key))
            .collect()
    }

    /// Look up an observation.
    pub fn get(&self, key: &ObservationKey) -> Option<&Observation> {
        self.observations.get(key)
    }

    /// Look up an observation for modification.
    pub fn get_mut(&mut self, key: &ObservationKey) -> Option<&mut Observation> {
        self.observations.get_mut(key)
    }

    /// Check if `key` observes something.
    pub fn contains(&self, key: &ObservationKey) -> bool {
        self.observations.contains_key(key)
    }

    /// Observers of `path` in key order.
    pub fn observers_of(&self, path: &str) -> Vec<ObservationKey> {
        self.by_resource
            .get(path)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Check if there are no observations.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

fn unindex(
    by_resource: &mut HashMap<String, BTreeSet<ObservationKey>>,
    path: &str,
    key: &ObservationKey,
) {
    if let Some(keys) = by_resource.get_mut(path) {
        keys.remove(key);
        if keys.is_empty() {
            by_resource.remove(path);
        }
    }
}
