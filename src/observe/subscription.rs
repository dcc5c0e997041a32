//! Client-side observation state.
//!
//! Notifications may be reordered by the network; the freshness rule of
//! RFC 7641 §3.4 decides whether a notification replaces the one seen last.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::core::{OBSERVE_REORDER_WINDOW, OBSERVE_SEQUENCE_HALF};
use crate::message::Token;

/// Check if notification `(v2, t2)` is newer than `(v1, t1)`.
///
/// Sequence numbers are compared in the 24-bit serial number space; a
/// notification arriving more than 128 seconds after the previous one is
/// newer regardless of its number.
pub fn is_fresher(v1: u32, t1: Instant, v2: u32, t2: Instant) -> bool {
    (v1 < v2 && v2 - v1 < OBSERVE_SEQUENCE_HALF)
        || (v1 > v2 && v1 - v2 > OBSERVE_SEQUENCE_HALF)
        || t2 > t1 + OBSERVE_REORDER_WINDOW
}

/// An observation this endpoint registered with a server.
#[derive(Debug, Clone)]
pub struct Subscription {
    remote: SocketAddr,
    token: Token,
    resource_path: String,
    last: Option<(u32, Instant)>,
    notifications: u64,
}

impl Subscription {
    /// Create a subscription awaiting its first notification.
    pub fn new(remote: SocketAddr, token: Token, resource_path: impl Into<String>) -> Self {
        Self {
            remote,
            token,
            resource_path: resource_path.into(),
            last: None,
            notifications: 0,
        }
    }

    /// Server address.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Registration token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Observed resource.
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Sequence number of the freshest notification seen.
    pub fn last_sequence(&self) -> Option<u32> {
        self.last.map(|(sequence, _)| sequence)
    }

    /// Fresh notifications accepted so far.
    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    /// Record a notification; returns `false` if it is stale.
    pub fn accept(&mut self, sequence: u32, now: Instant) -> bool {
        if let Some((v1, t1)) = self.last
            && !is_fresher(v1, t1, sequence, now)
        {
            return false;
        }
        self.last = Some((sequence, now));
        self.notifications += 1;
        true
    }
}

/// Subscriptions keyed by token.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    by_token: HashMap<Token, Subscription>,
}

impl SubscriptionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription, replacing one with the same token.
    pub fn insert(&mut self, subscription: Subscription) -> Option<Subscription> {
        self.by_token.insert(subscription.token, subscription)
    }

    /// Remove a subscription.
    pub fn remove(&mut self, token: &Token) -> Option<Subscription> {
        self.by_token.remove(token)
    }

    /// Subscription for `token` from `remote`.
    pub fn get_mut(&mut self, remote: SocketAddr, token: &Token) -> Option<&mut Subscription> {
        self.by_token
            .get_mut(token)
            .filter(|subscription| subscription.remote == remote)
    }

    /// Subscription for `token`.
    pub fn get(&self, token: &Token) -> Option<&Subscription> {
        self.by_token.get(token)
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Check if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OBSERVE_SEQUENCE_MODULUS;
    use std::time::Duration;

    #[test]
    fn test_freshness_in_order() {
        let t = Instant::now();
        assert!(is_fresher(1, t, 2, t));
        assert!(!is_fresher(2, t, 1, t));
        assert!(!is_fresher(5, t, 5, t));
    }

    #[test]
    fn test_freshness_wraparound() {
        let t = Instant::now();
        let last = OBSERVE_SEQUENCE_MODULUS - 1;
        assert!(is_fresher(last, t, 0, t));
        assert!(!is_fresher(0, t, last, t));
    }

    #[test]
    fn test_freshness_after_reorder_window() {
        let t = Instant::now();
        let later = t + OBSERVE_REORDER_WINDOW + Duration::from_secs(1);
        assert!(is_fresher(10, t, 3, later));
    }

    #[test]
    fn test_accept_drops_stale() {
        let now = Instant::now();
        let remote: SocketAddr = "192.0.2.1:5683".parse().unwrap();
        let mut subscription = Subscription::new(remote, Token::EMPTY, "temp");

        assert!(subscription.accept(0, now));
        assert!(subscription.accept(2, now));
        assert!(!subscription.accept(1, now));
        assert_eq!(subscription.last_sequence(), Some(2));
        assert_eq!(subscription.notifications(), 2);
    }

    #[test]
    fn test_set_checks_remote() {
        let remote: SocketAddr = "192.0.2.1:5683".parse().unwrap();
        let other: SocketAddr = "192.0.2.2:5683".parse().unwrap();
        let token = Token::from_slice(&[7]).unwrap();
        let mut set = SubscriptionSet::new();
        set.insert(Subscription::new(remote, token, "temp"));

        assert!(set.get_mut(remote, &token).is_some());
        assert!(set.get_mut(other, &token).is_none());
        assert!(set.remove(&token).is_some());
        assert!(set.is_empty());
    }
}
