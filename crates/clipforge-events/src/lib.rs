//! Per-job progress event fan-out.
//!
//! Each job gets a bounded ring of its most recent events plus a broadcast
//! channel for live subscribers. A new subscriber receives the latest ring
//! entry as a snapshot, then the live tail. Delivery is best-effort within
//! the process; a subscriber that lags behind the channel capacity observes
//! a lag marker and must resubscribe to resynchronize from the snapshot.

mod bus;

pub use bus::{EventBus, Subscription, DEFAULT_RING_SIZE};
