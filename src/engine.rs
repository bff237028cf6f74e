//! Engine state machine (spec.md §4.6): a single actor task owning all
//! mutable state, serialising every state mutation the way spec.md §5
//! describes ("a single-threaded cooperative serialisation domain on top of
//! a multi-threaded runtime").
//!
//! Grounded in the `mydriatech-fragtale` `TrustedTime::run` poll loop
//! (`other_examples/9ff3c816_*`) for the spawn-a-task-and-react-to-events
//! shape, generalized from its single linear poll into the full
//! start/pause/reachability/timer state machine spec.md names.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::{Config, FrozenTime, ReachabilityStatus, ServerHost};
use crate::error::{Error, Result};
use crate::pool::{run_round, QueryOutcome};
use crate::reference::ReferenceCell;
use crate::resolver::HostResolution;
use crate::selector::select_best;
use crate::traits::{MonotonicClock, ReachabilityWatcher, Resolver};
use crate::Sample;
use crate::{debug, trace};

/// Engine status, unchanged from spec.md §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Stopped,
    Running,
    WaitingForNetwork,
    Polling,
}

/// A notification that the reference cell was updated with a new sample.
#[derive(Debug, Clone)]
pub enum TrueTimeEvent {
    Updated { sample_size: usize },
}

type CompletionSender = oneshot::Sender<Result<i64>>;

enum EngineEvent {
    Start {
        hosts: Vec<ServerHost>,
    },
    Pause,
    Reachability(ReachabilityStatus),
    /// Resolution finished and the pool was launched against
    /// `addresses.len() * samples_per_address` connection attempts — the
    /// only place `outstanding` is set, so it always matches the pool's own
    /// `expected` count (spec.md invariant I1).
    RoundStarted {
        expected: usize,
        handles: Vec<JoinHandle<()>>,
    },
    SampleOutcome(QueryOutcome),
    RoundFinished,
    PollTimerFired,
    FetchIfNeeded {
        first: Option<CompletionSender>,
        completion: Option<CompletionSender>,
    },
}

/// Public, cheaply cloneable handle to a running engine. Every method sends
/// onto the actor's event channel and returns immediately, per spec.md §5's
/// Suspension Points rule.
#[derive(Clone)]
pub struct Client {
    events: mpsc::UnboundedSender<EngineEvent>,
    reference: ReferenceCell,
    updates: broadcast::Sender<TrueTimeEvent>,
}

impl Client {
    /// Spawn the engine actor and return a handle to it.
    pub fn spawn(
        config: Config,
        clock: Arc<dyn MonotonicClock>,
        resolver: Arc<dyn Resolver>,
        reachability: Arc<dyn ReachabilityWatcher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (updates_tx, _) = broadcast::channel(16);
        let reference = ReferenceCell::new(clock.clone());

        let actor = Engine {
            status: EngineStatus::Stopped,
            config,
            clock,
            resolver,
            reachability,
            hosts: Vec::new(),
            samples: HashMap::new(),
            completed_count: 0,
            finished: false,
            resolving: false,
            outstanding: 0,
            pending_first: Vec::new(),
            pending_completion: Vec::new(),
            reference: reference.clone(),
            updates: updates_tx.clone(),
            events: tx.clone(),
            resolution_cancel: None,
            round_task: None,
            attempt_handles: Vec::new(),
        };

        tokio::spawn(actor.run(rx));

        Client {
            events: tx,
            reference,
            updates: updates_tx,
        }
    }

    pub fn start(&self, hosts: Vec<ServerHost>) {
        let _ = self.events.send(EngineEvent::Start { hosts });
    }

    pub fn pause(&self) {
        let _ = self.events.send(EngineEvent::Pause);
    }

    pub fn reachability_changed(&self, status: ReachabilityStatus) {
        let _ = self.events.send(EngineEvent::Reachability(status));
    }

    /// Current best estimate of wall time, or `None` before the first
    /// accepted sample.
    #[must_use]
    pub fn now(&self) -> Option<i64> {
        self.reference.now()
    }

    /// Subscribe to `TrueTimeUpdated` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TrueTimeEvent> {
        self.updates.subscribe()
    }

    /// Resolve with the first accepted sample's time, waiting if none has
    /// arrived yet (spec.md §4.6 `fetch_if_needed`, `first` half).
    pub async fn first(&self) -> Result<i64> {
        let (tx, rx) = oneshot::channel();
        let _ = self.events.send(EngineEvent::FetchIfNeeded {
            first: Some(tx),
            completion: None,
        });
        rx.await.unwrap_or(Err(Error::Network))
    }

    /// Resolve once the current round has fully completed (spec.md §4.6
    /// `fetch_if_needed`, `completion` half).
    pub async fn completion(&self) -> Result<i64> {
        let (tx, rx) = oneshot::channel();
        let _ = self.events.send(EngineEvent::FetchIfNeeded {
            first: None,
            completion: Some(tx),
        });
        rx.await.unwrap_or(Err(Error::Network))
    }
}

struct Engine {
    status: EngineStatus,
    config: Config,
    clock: Arc<dyn MonotonicClock>,
    resolver: Arc<dyn Resolver>,
    reachability: Arc<dyn ReachabilityWatcher>,
    hosts: Vec<ServerHost>,
    samples: HashMap<SocketAddr, Vec<Sample>>,
    /// Every attempt that reached a terminal state this round, accepted or
    /// not. `sample_size` reports this, not the accepted-only count — the
    /// source this engine is modelled on counts all completed attempts.
    completed_count: usize,
    finished: bool,
    /// Set the moment a round is spawned, cleared once resolution either
    /// succeeds (`RoundStarted`) or fails (`RoundFinished`) — guards
    /// `maybe_start_round` against a second round firing while the first is
    /// still resolving, before `outstanding` itself has a real count.
    resolving: bool,
    outstanding: usize,
    pending_first: Vec<CompletionSender>,
    pending_completion: Vec<CompletionSender>,
    reference: ReferenceCell,
    updates: broadcast::Sender<TrueTimeEvent>,
    events: mpsc::UnboundedSender<EngineEvent>,
    resolution_cancel: Option<crate::resolver::ResolutionCanceller>,
    /// Handle to the task driving resolution + the pool for the current
    /// round, so it can be aborted outright on teardown.
    round_task: Option<JoinHandle<()>>,
    /// Handles to the pool's individual connection-attempt tasks for the
    /// current round, so in-flight UDP exchanges stop immediately on
    /// teardown instead of lingering until they time out on their own.
    attempt_handles: Vec<JoinHandle<()>>,
}

impl Engine {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
        let mut poll_timer: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            let timer_fires = async {
                match &mut poll_timer {
                    Some(sleep) => sleep.as_mut().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => self.handle(event, &mut poll_timer),
                        None => break,
                    }
                }
                () = timer_fires => {
                    poll_timer = None;
                    self.handle(EngineEvent::PollTimerFired, &mut poll_timer);
                }
            }
        }
    }

    fn handle(
        &mut self,
        event: EngineEvent,
        poll_timer: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>,
    ) {
        match event {
            EngineEvent::Start { hosts } => {
                debug!("starting pool with hosts: {hosts:?}");
                self.hosts = hosts;
                self.status = EngineStatus::Running;
                if self.reference.get().is_some() {
                    self.arm_poll_timer(poll_timer);
                }
                self.spawn_reachability_watch();
                self.maybe_start_round();
            }
            EngineEvent::Pause => {
                self.tear_down_round();
                self.status = EngineStatus::Stopped;
                *poll_timer = None;
                // B3: a round in flight when paused delivers no more
                // callbacks. Dropping the senders resolves any caller
                // already waiting with a closed channel rather than
                // carrying them over to whatever round runs after a
                // later `start()`.
                self.pending_first.clear();
                self.pending_completion.clear();
            }
            EngineEvent::Reachability(status) => {
                debug!("reachability changed: {status:?}");
                if status.is_reachable() {
                    self.status = EngineStatus::Running;
                    self.maybe_start_round();
                } else {
                    *poll_timer = None;
                    self.tear_down_round();
                    self.status = EngineStatus::WaitingForNetwork;
                    self.deliver_completion(Err(Error::Offline));
                }
            }
            EngineEvent::RoundStarted { expected, handles } => {
                self.resolving = false;
                self.outstanding = expected;
                self.attempt_handles = handles;
            }
            EngineEvent::SampleOutcome((address, outcome)) => {
                trace!("sample outcome from {address}: {outcome:?}");
                self.outstanding = self.outstanding.saturating_sub(1);
                self.completed_count += 1;
                if let Ok(sample) = outcome {
                    let is_first_in_round = self.samples.values().flatten().next().is_none();
                    self.samples.entry(address).or_default().push(sample);
                    if is_first_in_round {
                        self.on_first_sample(sample);
                    }
                }
                if self.outstanding == 0 {
                    let _ = self.events.send(EngineEvent::RoundFinished);
                }
            }
            EngineEvent::RoundFinished => {
                self.resolving = false;
                self.attempt_handles.clear();
                let best = self
                    .samples
                    .values()
                    .flatten()
                    .copied()
                    .collect::<Vec<_>>();
                let best = select_best(&best);
                // A round torn down by `pause()`/offline may still have a
                // `RoundFinished` already queued behind the event that
                // caused the teardown; don't let it resurrect a status the
                // teardown just set (spec.md invariant I4).
                let torn_down =
                    self.status == EngineStatus::Stopped || self.status == EngineStatus::WaitingForNetwork;
                match best {
                    Some(sample) => {
                        debug!(
                            "round selected {} offset={}ms delay={}ms",
                            sample.address, sample.offset_ms, sample.delay_ms
                        );
                        self.reference.set(FrozenTime {
                            wall_time_ms: sample.response_time_ms + sample.offset_ms,
                            uptime_at_response: self.clock.uptime(),
                            sample_size: self.completed_count,
                        });
                        self.finished = true;
                        let now = self.reference.now().unwrap_or(sample.response_time_ms);
                        self.deliver_completion(Ok(now));
                        let _ = self.updates.send(TrueTimeEvent::Updated {
                            sample_size: self.completed_count,
                        });
                        if !torn_down {
                            self.arm_poll_timer(poll_timer);
                            self.status = EngineStatus::Running;
                        }
                    }
                    None => {
                        debug!("round finished with no accepted sample");
                        self.deliver_completion(Err(Error::NoValidPacket));
                        if !torn_down {
                            self.status = EngineStatus::Running;
                        }
                    }
                }
            }
            EngineEvent::PollTimerFired => {
                self.finished = false;
                self.samples.clear();
                self.completed_count = 0;
                if self.status != EngineStatus::WaitingForNetwork {
                    self.maybe_start_round();
                }
            }
            EngineEvent::FetchIfNeeded { first, completion } => {
                if self.status == EngineStatus::WaitingForNetwork {
                    // B4: offline callers get `Offline` immediately, never a
                    // stale reference and never a wait.
                    if let Some(tx) = first {
                        let _ = tx.send(Err(Error::Offline));
                    }
                    if let Some(tx) = completion {
                        let _ = tx.send(Err(Error::Offline));
                    }
                } else if let Some(now) = self.reference.now() {
                    if let Some(tx) = first {
                        let _ = tx.send(Ok(now));
                    }
                    if self.finished {
                        if let Some(tx) = completion {
                            let _ = tx.send(Ok(now));
                        }
                    } else if let Some(tx) = completion {
                        self.pending_completion.push(tx);
                    }
                } else {
                    if let Some(tx) = first {
                        self.pending_first.push(tx);
                    }
                    if let Some(tx) = completion {
                        self.pending_completion.push(tx);
                    }
                    self.maybe_start_round();
                }
            }
        }
    }

    /// Spawn a task that forwards reachability transitions back onto this
    /// actor's event channel, one `changed()` call at a time.
    fn spawn_reachability_watch(&self) {
        let reachability = self.reachability.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut previous = reachability.current().await;
            let _ = events.send(EngineEvent::Reachability(previous));
            loop {
                let status = reachability.changed(previous).await;
                previous = status;
                if events.send(EngineEvent::Reachability(status)).is_err() {
                    break;
                }
            }
        });
    }

    /// The first accepted sample of a round. If this is the very first
    /// reference the engine has ever had, set a provisional reference from
    /// this one sample and publish `TrueTimeUpdated` (spec.md §4.6,
    /// "transition from no reference to first reference present") — the
    /// full selector result still overwrites it once the round finishes.
    /// Otherwise just wake any `first` waiters from the reference already
    /// in place.
    fn on_first_sample(&mut self, sample: Sample) {
        if self.reference.get().is_none() {
            self.reference.set(FrozenTime {
                wall_time_ms: sample.response_time_ms + sample.offset_ms,
                uptime_at_response: self.clock.uptime(),
                sample_size: self.completed_count,
            });
            let _ = self.updates.send(TrueTimeEvent::Updated {
                sample_size: self.completed_count,
            });
        }
        if let Some(now) = self.reference.now() {
            for tx in self.pending_first.drain(..) {
                let _ = tx.send(Ok(now));
            }
        }
    }

    fn maybe_start_round(&mut self) {
        if self.outstanding > 0 || self.resolving || self.finished || self.hosts.is_empty() {
            return;
        }
        if self.status == EngineStatus::WaitingForNetwork {
            return;
        }

        self.status = EngineStatus::Polling;
        self.resolving = true;
        self.samples.clear();
        self.completed_count = 0;
        let resolver = self.resolver.clone();
        let hosts = self.hosts.clone();
        let max_servers = self.config.max_servers;
        let samples_per_address = self.config.samples_per_address;
        let max_concurrency = self.config.max_concurrency;
        let timeout = self.config.timeout;
        let max_retries = self.config.max_retries;
        let clock = self.clock.clone();
        let events = self.events.clone();

        let resolution = HostResolution::new();
        self.resolution_cancel = Some(resolution.canceller());

        let round_task = tokio::spawn(async move {
            let addresses = match resolution.resolve_all(resolver.as_ref(), &hosts, max_servers).await {
                Ok(addresses) => addresses,
                Err(_) => {
                    let _ = events.send(EngineEvent::RoundFinished);
                    return;
                }
            };
            debug!("resolved {} address(es)", addresses.len());

            // Set `outstanding` from the addresses actually resolved, not
            // the host count the caller configured: one host can resolve to
            // several addresses, and the pool's own `expected` count below
            // is always in terms of addresses (spec.md invariant I1).
            let expected = addresses.len() * samples_per_address;
            let (mut rx, handles) = run_round(
                addresses,
                samples_per_address,
                max_concurrency,
                timeout,
                max_retries,
                clock,
            );
            let _ = events.send(EngineEvent::RoundStarted { expected, handles });

            let mut delivered = 0usize;
            while let Some(outcome) = rx.recv().await {
                delivered += 1;
                let _ = events.send(EngineEvent::SampleOutcome(outcome));
                if delivered == expected {
                    break;
                }
            }
        });

        self.round_task = Some(round_task);
    }

    fn tear_down_round(&mut self) {
        if let Some(cancel) = self.resolution_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.round_task.take() {
            task.abort();
        }
        for handle in self.attempt_handles.drain(..) {
            handle.abort();
        }
        self.resolving = false;
        self.outstanding = 0;
    }

    fn deliver_completion(&mut self, result: Result<i64>) {
        for tx in self.pending_completion.drain(..) {
            let _ = tx.send(result);
        }
    }

    fn arm_poll_timer(&self, poll_timer: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>) {
        let age = self.reference.age().unwrap_or(Duration::ZERO);
        let remaining = self.config.poll_interval.saturating_sub(age);
        *poll_timer = Some(Box::pin(tokio::time::sleep(remaining)));
    }
}
