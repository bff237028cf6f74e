//! Error taxonomy for the sampling engine and its external collaborators.

/// Errors surfaced by the sampling engine, a single connection, or the resolver.
///
/// Mirrors the taxonomy in the design: packet-level validation failures are
/// local to a connection and may be retried; resolver and reachability
/// failures are fatal to a round.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// No host in the pool could be resolved to an address.
    #[error("no configured host could be resolved")]
    CannotFindHost,
    /// DNS lookup failed for every host tried.
    #[error("DNS lookup failed")]
    DnsLookupFailed,
    /// A per-attempt or per-round timeout elapsed before a response arrived.
    #[error("request timed out")]
    TimedOut,
    /// The device is known to be offline; no I/O was attempted.
    #[error("network is offline")]
    Offline,
    /// A datagram was received but failed wire decoding or validation.
    #[error("bad server response")]
    BadServerResponse,
    /// The pool finished without a single validated sample.
    #[error("no valid packet accepted from any server")]
    NoValidPacket,
    /// Sending or receiving on the UDP socket failed.
    #[error("network error")]
    Network,
}

/// Errors from constructing a [`crate::domain::Config`].
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{field} must be positive")]
    MustBePositive { field: &'static str },
    #[error("max_concurrency must be at least 1")]
    MaxConcurrencyTooSmall,
    #[error("samples_per_address must be at least 1")]
    SamplesPerAddressTooSmall,
}

/// Result alias used throughout the engine.
pub type Result<T> = core::result::Result<T, Error>;
