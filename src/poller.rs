//! Background polling of the remote player.
//!
//! The poller owns its own thread and talks to the frame loop only through a
//! [`SnapshotCell`] (latest result wins, never queued) and a [`PollHealth`]
//! made of atomics. Nothing here ever blocks the frame loop.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use arc_swap::ArcSwapOption;

use crate::{
    config::PollerConfig,
    remote::{ApiError, FailureKind, PlaybackApi, PlaybackSnapshot, RawPlayback, SnapshotUpdate},
};

/// Single-slot handoff of the most recent poll result.
#[derive(Default)]
pub struct SnapshotCell {
    slot: ArcSwapOption<SnapshotUpdate>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `update` unless the cell already holds the same or a newer
    /// generation. Returns whether the update was stored.
    pub fn publish(&self, update: SnapshotUpdate) -> bool {
        let update = Arc::new(update);
        let mut stored = false;
        self.slot.rcu(|current| match current {
            Some(existing) if existing.generation >= update.generation => {
                stored = false;
                Some(Arc::clone(existing))
            }
            _ => {
                stored = true;
                Some(Arc::clone(&update))
            }
        });
        stored
    }

    pub fn latest(&self) -> Option<Arc<SnapshotUpdate>> {
        self.slot.load_full()
    }
}

/// Consecutive-miss bookkeeping shared with the frame loop.
#[derive(Default)]
pub struct PollHealth {
    misses: AtomicU32,
    stale: AtomicBool,
    last_failure: AtomicU8,
}

impl PollHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this success ended a stale period.
    pub fn record_success(&self) -> bool {
        self.misses.store(0, Ordering::Release);
        self.last_failure.store(0, Ordering::Release);
        self.stale.swap(false, Ordering::AcqRel)
    }

    /// Returns true when this miss made the poller stale.
    pub fn record_miss(&self, kind: FailureKind, stale_after: u32) -> bool {
        self.last_failure.store(kind as u8, Ordering::Release);
        let misses = self.misses.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if misses >= stale_after.max(1) {
            !self.stale.swap(true, Ordering::AcqRel)
        } else {
            false
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub fn misses(&self) -> u32 {
        self.misses.load(Ordering::Acquire)
    }

    pub fn last_failure(&self) -> Option<FailureKind> {
        FailureKind::from_u8(self.last_failure.load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            interval: config.interval(),
            max: config.max_backoff(),
            failures: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << self.failures.min(16);
        self.interval.saturating_mul(factor).min(self.max)
    }

    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

enum PollerCommand {
    Refresh,
    Reconfigure(PollerConfig),
    Shutdown,
}

/// Control side of a running poller. Dropping it stops the thread.
pub struct PollerHandle {
    commands: Sender<PollerCommand>,
    stopping: Arc<AtomicBool>,
}

impl PollerHandle {
    pub fn spawn(
        api: Arc<dyn PlaybackApi>,
        config: PollerConfig,
        cell: Arc<SnapshotCell>,
        health: Arc<PollHealth>,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let thread_stopping = Arc::clone(&stopping);

        thread::Builder::new()
            .name("snapshot-poller".to_string())
            .spawn(move || {
                let mut poll = PollLoop::new(api, config, cell, health);
                let mut delay = Duration::ZERO;
                loop {
                    match rx.recv_timeout(delay) {
                        Ok(PollerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            break
                        }
                        Ok(PollerCommand::Reconfigure(config)) => {
                            delay = poll.reconfigure(config);
                            continue;
                        }
                        Ok(PollerCommand::Refresh) | Err(RecvTimeoutError::Timeout) => {}
                    }

                    if thread_stopping.load(Ordering::Acquire) {
                        break;
                    }
                    delay = poll.poll_once(&thread_stopping);
                }
                log::debug!("Snapshot poller stopped");
            })
            .context("Failed to start the snapshot poller thread")?;

        Ok(Self {
            commands: tx,
            stopping,
        })
    }

    /// Polls again right away instead of waiting for the next cycle.
    pub fn refresh(&self) {
        let _ = self.commands.send(PollerCommand::Refresh);
    }

    pub fn reconfigure(&self, config: PollerConfig) {
        let _ = self.commands.send(PollerCommand::Reconfigure(config));
    }

    /// Signals the thread and returns without waiting. A request that is in
    /// flight is abandoned and its result is dropped.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.commands.send(PollerCommand::Shutdown);
    }

    pub fn refresher(&self) -> PollerRefresher {
        PollerRefresher {
            commands: self.commands.clone(),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable trigger for an immediate poll, handed to the command dispatcher.
#[derive(Clone)]
pub struct PollerRefresher {
    commands: Sender<PollerCommand>,
}

impl PollerRefresher {
    pub fn refresh(&self) {
        let _ = self.commands.send(PollerCommand::Refresh);
    }
}

struct PollLoop {
    api: Arc<dyn PlaybackApi>,
    config: PollerConfig,
    cell: Arc<SnapshotCell>,
    health: Arc<PollHealth>,
    backoff: Backoff,
    generation: u64,
}

impl PollLoop {
    fn new(
        api: Arc<dyn PlaybackApi>,
        config: PollerConfig,
        cell: Arc<SnapshotCell>,
        health: Arc<PollHealth>,
    ) -> Self {
        let backoff = Backoff::new(&config);
        Self {
            api,
            config,
            cell,
            health,
            backoff,
            generation: 0,
        }
    }

    fn reconfigure(&mut self, config: PollerConfig) -> Duration {
        let failures = self.backoff.failures();
        self.backoff = Backoff::new(&config);
        for _ in 0..failures {
            self.backoff.fail();
        }
        self.config = config;
        self.backoff.delay()
    }

    fn poll_once(&mut self, stopping: &AtomicBool) -> Duration {
        self.generation += 1;
        let generation = self.generation;
        let requested_at = Instant::now();
        let result = self.api.get_snapshot();
        if stopping.load(Ordering::Acquire) {
            return Duration::ZERO;
        }
        self.handle_result(result, generation, requested_at, Instant::now())
    }

    /// Applies one poll result and returns how long to wait before the next.
    fn handle_result(
        &mut self,
        result: Result<Option<RawPlayback>, ApiError>,
        generation: u64,
        requested_at: Instant,
        fetched_at: Instant,
    ) -> Duration {
        match result {
            Ok(raw) => {
                let snapshot = match raw {
                    None => None,
                    Some(raw) => match PlaybackSnapshot::from_raw(raw, requested_at, fetched_at) {
                        Ok(snapshot) => Some(snapshot),
                        Err(err) => {
                            log::warn!("Discarding playback state: {err}");
                            self.record_miss(FailureKind::Malformed);
                            return self.backoff.interval();
                        }
                    },
                };

                self.cell.publish(SnapshotUpdate {
                    generation,
                    requested_at,
                    snapshot,
                });
                if self.health.record_success() {
                    log::info!("Playback state recovered");
                }
                self.backoff.reset();
                self.backoff.delay()
            }
            Err(err) => {
                if self.backoff.failures() == 0 {
                    log::warn!("Playback poll failed: {err}");
                } else {
                    log::debug!(
                        "Playback poll failed ({} in a row): {err}",
                        self.backoff.failures() + 1
                    );
                }
                self.record_miss(err.kind());
                self.backoff.fail();

                let delay = self.backoff.delay();
                match err {
                    ApiError::RateLimited {
                        retry_after: Some(wait),
                    } => delay.max(wait),
                    _ => delay,
                }
            }
        }
    }

    fn record_miss(&self, kind: FailureKind) {
        let threshold = self.config.stale_after_misses();
        if self.health.record_miss(kind, threshold) {
            log::warn!(
                "No playback state for {threshold} polls; holding the current spin"
            );
        }
    }
}
