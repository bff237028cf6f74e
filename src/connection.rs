//! A single NTP connection (spec.md §4.4): one resolved address, retried up
//! to `max_retries` times with a per-attempt timeout, producing at most one
//! validated [`Sample`].
//!
//! Grounded directly in the teacher's `NtpUdpSocket` trait and
//! `send_request`/`process_response` free functions (`async_impl.rs`),
//! generalized from "run once" into a connection that owns its own
//! retry/timeout state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::traits::MonotonicClock;
use crate::types::{decode_response, encode_request, NtpTime64};
use crate::validator::validate;
use crate::Sample;

/// The teacher's I/O seam, reused verbatim: anything that can send and
/// receive a datagram to/from a fixed peer address.
#[async_trait]
pub trait NtpUdpSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
}

/// Run a single exchange against `address`, retrying up to `max_retries`
/// times, each attempt bounded by `timeout`. Returns the first accepted
/// [`Sample`], or the last error encountered if every attempt failed.
pub async fn query_once(
    socket: &dyn NtpUdpSocket,
    clock: &dyn MonotonicClock,
    address: SocketAddr,
    timeout: Duration,
    max_retries: u32,
) -> Result<Sample> {
    let mut last_err = Error::TimedOut;

    for _attempt in 0..=max_retries {
        match attempt(socket, clock, address, timeout).await {
            Ok(sample) => return Ok(sample),
            // spec.md §4.4/§7: a timed-out attempt is never retried by the
            // connection itself — a slow/unreachable server gets exactly one
            // attempt regardless of `max_retries`.
            Err(Error::TimedOut) => return Err(Error::TimedOut),
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}

async fn attempt(
    socket: &dyn NtpUdpSocket,
    clock: &dyn MonotonicClock,
    address: SocketAddr,
    timeout: Duration,
) -> Result<Sample> {
    let start_time_ms = unix_now_ms();
    let request_ticks = clock.uptime();
    let transmit = NtpTime64::from_unix(start_time_ms / 1000, (start_time_ms % 1000) * 1000);
    let request = encode_request(transmit);

    let exchange = async {
        socket.send_to(&request, address).await?;
        let mut buf = [0u8; 48];
        let (len, from) = socket.recv_from(&mut buf).await?;
        if from != address || len != buf.len() {
            return Err(Error::BadServerResponse);
        }
        decode_response(&buf)
    };

    let packet = match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::TimedOut),
    };

    let response_ticks = clock.uptime();
    let response_time_ms = start_time_ms + (response_ticks.saturating_sub(request_ticks)).as_millis() as i64;

    validate(
        packet,
        start_time_ms,
        request_ticks,
        response_ticks,
        response_time_ms,
        address,
    )
}

fn unix_now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// [`NtpUdpSocket`] backed by [`tokio::net::UdpSocket`], connected to a
/// single peer at construction time.
pub struct TokioUdpSocket(tokio::net::UdpSocket);

impl TokioUdpSocket {
    pub async fn connect(peer: SocketAddr) -> std::io::Result<Self> {
        let local_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = tokio::net::UdpSocket::bind(local_addr).await?;
        socket.connect(peer).await?;
        Ok(TokioUdpSocket(socket))
    }
}

#[async_trait]
impl NtpUdpSocket for TokioUdpSocket {
    async fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> Result<usize> {
        self.0.send(buf).await.map_err(|_| Error::Network)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let len = self.0.recv(buf).await.map_err(|_| Error::Network)?;
        let peer = self.0.peer_addr().map_err(|_| Error::Network)?;
        Ok((len, peer))
    }
}

/// Dyn-friendly wrapper used by the pool so every attempt can share a
/// `Arc<dyn NtpUdpSocket>` factory without generics leaking upward.
pub type SharedSocket = Arc<dyn NtpUdpSocket>;
