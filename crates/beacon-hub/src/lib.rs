//! Live build-event distribution for Beacon.
//!
//! Turns store change notifications into per-subscriber event streams:
//! - the feed of all active jobs visible to a principal
//! - updates of a single job
//! - console output of a single job
//!
//! Late subscribers replay everything recorded so far before receiving live
//! events, and each entity's history is queried at most once while it is
//! being watched.

pub mod access;
pub mod backoff;
pub mod bridge;
pub mod cache;
pub mod channel;
pub mod feed;
pub mod hub;
pub mod single_flight;
pub mod sources;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use access::{Access, AccessGate};
pub use backoff::Backoff;
pub use bridge::{BridgeState, ChangeSink, NotificationBridge};
pub use cache::EntityEventCache;
pub use channel::{Bootstrap, EntityChannel, StreamSource};
pub use feed::JobFeed;
pub use hub::{DistributionHub, HubHandle, HubStats};
pub use single_flight::SingleFlight;
pub use sources::{ConsoleEvents, JobEvents};
pub use subscription::{SubscriberId, Subscription};
