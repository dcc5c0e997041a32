//! Observe extension (RFC 7641).
//!
//! Server side: the [`ObservationRegistry`] records who observes which
//! resource, and the [`NotificationDispatcher`] turns resource changes into
//! notifications with max-age bounded retransmission. Client side:
//! [`SubscriptionSet`] tracks registrations and filters stale notifications.

mod dispatcher;
mod registry;
mod subscription;

pub use dispatcher::{NotificationDispatcher, ObserveChange};
pub use registry::{Observation, ObservationKey, ObservationRegistry, Registration};
pub use subscription::{Subscription, SubscriptionSet, is_fresher};
