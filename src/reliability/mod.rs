//! Reliability layer: confirmable exchanges, retransmission and deduplication.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Endpoint / Notification Dispatcher  │
//! ├─────────────────────────────────────────┤
//! │          Reliability Engine             │  ← This module
//! │   timers, backoff, ACK/RST matching     │
//! ├─────────────────────────────────────────┤
//! │           Exchange Tracker              │
//! │   live exchanges, dedup windows, ids    │
//! ├─────────────────────────────────────────┤
//! │             Wire Codec                  │
//! └─────────────────────────────────────────┘
//! ```

mod engine;
mod exchange;
mod timing;
mod tracker;

pub use engine::{ReliabilityEngine, Transmit};
pub use exchange::{Exchange, ExchangeKey, ExchangeOwner, ExchangeState};
pub use timing::Backoff;
pub use tracker::{ExchangeTracker, Inbound};
