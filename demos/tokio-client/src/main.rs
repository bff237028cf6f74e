//! Host driver: wires the engine to real DNS and a network that's always
//! considered reachable, and prints `now()` once a reference is available.
//!
//! Grounded in the teacher's own `tokio::net::lookup_host` use
//! (`async_impl.rs`) for the resolver adapter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use truetime::{
    Client, Config, ReachabilityStatus, ReachabilityWatcher, Resolver, ServerHost,
    StdMonotonicClock,
};

struct TokioResolver;

#[async_trait]
impl Resolver for TokioResolver {
    async fn resolve(&self, host: &ServerHost) -> truetime::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host.0.as_str(), 123))
            .await
            .map_err(|_| truetime::Error::DnsLookupFailed)?;
        Ok(addrs.collect())
    }
}

struct AlwaysReachable;

#[async_trait]
impl ReachabilityWatcher for AlwaysReachable {
    async fn current(&self) -> ReachabilityStatus {
        ReachabilityStatus::ReachableWifi
    }

    async fn changed(&self, _previous: ReachabilityStatus) -> ReachabilityStatus {
        std::future::pending().await
    }
}

#[tokio::main]
async fn main() {
    simple_logger::SimpleLogger::new().init().ok();

    let client = Client::spawn(
        Config::default(),
        Arc::new(StdMonotonicClock::new()),
        Arc::new(TokioResolver),
        Arc::new(AlwaysReachable),
    );

    client.start(vec![
        ServerHost::from("pool.ntp.org"),
        ServerHost::from("time.google.com"),
    ]);

    match tokio::time::timeout(Duration::from_secs(10), client.first()).await {
        Ok(Ok(now_ms)) => println!("true time: {now_ms} ms since epoch"),
        Ok(Err(e)) => eprintln!("failed to sample true time: {e}"),
        Err(_) => eprintln!("timed out waiting for the first sample"),
    }
}
