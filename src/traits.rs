//! External-collaborator traits (spec.md §4.2/§4.3). Narrow seams the engine
//! depends on; concrete platform wiring is out of scope (see Non-goals) and
//! lives in a host binary such as `demos/tokio-client`.
//!
//! Grounded in the teacher's `NtpUdpSocket`/`NtpTimestampGenerator` split
//! (`sntpc`'s `traits.rs`/`types.rs`): one trait per external capability,
//! generalized from "a socket and a clock" to the three collaborators the
//! spec names.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ReachabilityStatus, ServerHost};
use crate::error::Result;

/// A source of monotonic uptime, decoupled from wall-clock time so tests can
/// advance it independently (spec.md §4.9, boundary behaviors B1-B4).
pub trait MonotonicClock: Send + Sync {
    fn uptime(&self) -> Duration;
}

/// [`MonotonicClock`] backed by [`std::time::Instant`].
#[derive(Debug)]
pub struct StdMonotonicClock {
    start: std::time::Instant,
}

impl Default for StdMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StdMonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        StdMonotonicClock {
            start: std::time::Instant::now(),
        }
    }
}

impl MonotonicClock for StdMonotonicClock {
    fn uptime(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Reports transitions in network reachability so the engine can trigger an
/// immediate re-poll (spec.md §4.6, event `reachability_changed`).
#[async_trait]
pub trait ReachabilityWatcher: Send + Sync {
    /// Current reachability, sampled once.
    async fn current(&self) -> ReachabilityStatus;

    /// Block until reachability changes from `previous`, then return the
    /// new status.
    async fn changed(&self, previous: ReachabilityStatus) -> ReachabilityStatus;
}

/// Resolves configured [`ServerHost`]s to socket addresses (spec.md §4.3).
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve one host to however many addresses DNS returns for it.
    async fn resolve(&self, host: &ServerHost) -> Result<Vec<std::net::SocketAddr>>;
}
