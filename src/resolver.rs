//! Host resolution (spec.md §4.3): turn the configured pool of
//! [`ServerHost`]s into socket addresses, bounded by `max_servers` and
//! cancellable mid-flight.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::ServerHost;
use crate::error::{Error, Result};
use crate::traits::Resolver;
use crate::{debug, warn};

/// Drives a [`Resolver`] over a pool of hosts, stopping early once
/// `max_servers` addresses have been collected or [`cancel`](Self::cancel)
/// has been called.
pub struct HostResolution {
    stopped: Arc<AtomicBool>,
}

impl HostResolution {
    #[must_use]
    pub fn new() -> Self {
        HostResolution {
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that, when dropped or told to cancel, stops a running
    /// [`resolve_all`](Self::resolve_all) after its current host attempt.
    #[must_use]
    pub fn canceller(&self) -> ResolutionCanceller {
        ResolutionCanceller {
            stopped: self.stopped.clone(),
        }
    }

    /// Resolve `hosts` in order, collecting up to `max_servers` addresses.
    /// Returns [`Error::CannotFindHost`] if every host failed to resolve,
    /// or [`Error::DnsLookupFailed`] is propagated from the last failure
    /// when at least one lookup was attempted but none returned anything.
    pub async fn resolve_all(
        &self,
        resolver: &dyn Resolver,
        hosts: &[ServerHost],
        max_servers: usize,
    ) -> Result<Vec<SocketAddr>> {
        let mut addresses = Vec::new();
        let mut any_attempted = false;

        for host in hosts {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            if addresses.len() >= max_servers {
                break;
            }

            any_attempted = true;
            match resolver.resolve(host).await {
                Ok(resolved) => {
                    debug!("resolved {} -> {} address(es)", host.0, resolved.len());
                    for addr in resolved {
                        if addresses.len() >= max_servers {
                            break;
                        }
                        addresses.push(addr);
                    }
                }
                Err(e) => {
                    warn!("resolving {} failed: {e}", host.0);
                    continue;
                }
            }
        }

        if addresses.is_empty() {
            return Err(if any_attempted {
                Error::DnsLookupFailed
            } else {
                Error::CannotFindHost
            });
        }

        Ok(addresses)
    }
}

impl Default for HostResolution {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation handle for an in-flight [`HostResolution`].
#[derive(Clone)]
pub struct ResolutionCanceller {
    stopped: Arc<AtomicBool>,
}

impl ResolutionCanceller {
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
