//! Connection pool (spec.md §4.5): runs `addresses.len() *
//! samples_per_address` connection attempts with bounded concurrency,
//! fanning every outcome into a single channel.
//!
//! Grounded in `mydriatech-fragtale`'s `TrustedTime::run` poll loop
//! (`other_examples/9ff3c816_*`): `tokio::spawn` per unit of work plus a
//! channel for fan-in, generalized here with a `Semaphore` to cap
//! concurrency instead of fragtale's single background task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::connection::{query_once, NtpUdpSocket, TokioUdpSocket};
use crate::error::Error;
use crate::traits::MonotonicClock;
use crate::Sample;
use crate::{debug, error};

/// One attempt's outcome, tagged with the address it targeted.
pub type QueryOutcome = (SocketAddr, Result<Sample, Error>);

/// Run the whole round: for every address, `samples_per_address` concurrent
/// attempts, overall concurrency capped at `max_concurrency`. Every outcome
/// is sent on the returned channel as attempts complete; the channel closes
/// once all attempts have reported. The returned handles let a caller abort
/// every in-flight attempt, e.g. when the round is torn down mid-flight.
pub fn run_round(
    addresses: Vec<SocketAddr>,
    samples_per_address: usize,
    max_concurrency: usize,
    timeout: Duration,
    max_retries: u32,
    clock: Arc<dyn MonotonicClock>,
) -> (mpsc::UnboundedReceiver<QueryOutcome>, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut handles = Vec::with_capacity(addresses.len() * samples_per_address);

    for address in addresses {
        for _ in 0..samples_per_address {
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let clock = clock.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                debug!("querying {address}");
                let outcome = run_one_attempt(address, timeout, max_retries, clock.as_ref()).await;
                if let Err(e) = &outcome {
                    error!("attempt against {address} failed: {e}");
                }
                let _ = tx.send((address, outcome));
            }));
        }
    }

    (rx, handles)
}

async fn run_one_attempt(
    address: SocketAddr,
    timeout: Duration,
    max_retries: u32,
    clock: &dyn MonotonicClock,
) -> Result<Sample, Error> {
    let socket: Box<dyn NtpUdpSocket> = match TokioUdpSocket::connect(address).await {
        Ok(socket) => Box::new(socket),
        Err(_) => return Err(Error::Network),
    };
    query_once(socket.as_ref(), clock, address, timeout, max_retries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StdMonotonicClock;
    use tokio::net::UdpSocket;

    async fn spawn_echo_responder() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local_addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 48];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let request = crate::types::decode_response(&buf[..len]).unwrap();
                let now_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .as_millis() as i64;
                let now = crate::types::NtpTime64::from_unix(now_ms / 1000, (now_ms % 1000) * 1000);
                let packet = crate::types::NtpPacket {
                    mode: 4,
                    stratum: 1,
                    originate_time: request.transmit_time,
                    receive_time: now,
                    transmit_time: now,
                    ..Default::default()
                };
                let reply = crate::types::encode_packet(&packet);
                let _ = socket.send_to(&reply, peer).await;
            }
        });

        local_addr
    }

    #[tokio::test]
    async fn s4_concurrent_round_collects_all_outcomes() {
        let addr1 = spawn_echo_responder().await;
        let addr2 = spawn_echo_responder().await;

        let clock: Arc<dyn MonotonicClock> = Arc::new(StdMonotonicClock::new());
        let (mut rx, handles) = run_round(
            vec![addr1, addr2],
            2,
            4,
            Duration::from_secs(2),
            0,
            clock,
        );
        assert_eq!(handles.len(), 4);

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    }

    #[tokio::test]
    async fn aborting_handles_stops_in_flight_attempts() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        // never replies: every attempt blocks until its timeout.
        tokio::spawn(async move {
            let mut buf = [0u8; 48];
            while socket.recv_from(&mut buf).await.is_ok() {}
        });

        let clock: Arc<dyn MonotonicClock> = Arc::new(StdMonotonicClock::new());
        let (mut rx, handles) = run_round(vec![addr], 2, 4, Duration::from_secs(30), 0, clock);
        assert_eq!(handles.len(), 2);

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        // the channel closes once every sender (owned by an aborted task)
        // is gone, without ever producing an outcome for the 30s timeout.
        assert!(rx.recv().await.is_none());
    }
}
