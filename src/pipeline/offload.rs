//! Async offload: one background task per node at a lower cadence.
//!
//! A node owns an [`AsyncTask`] and calls [`AsyncTask::step`] from its tick.
//! The step never blocks:
//!
//! 1. A finished task's result is handed back exactly once.
//! 2. When idle and the async period has elapsed, a new task is launched
//!    with a fresh input snapshot.
//! 3. When still busy and the period has elapsed again, the frame is dropped
//!    for async purposes and an overload warning is logged.
//!
//! At most one task is in flight. Dropping the `AsyncTask` joins the worker
//! and discards its result.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Counters for one node's async worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncStats {
    pub launches: u64,
    /// Results handed back to the owner.
    pub integrated: u64,
    /// Launch opportunities skipped because a task was still running.
    pub dropped: u64,
    /// Tasks that panicked or could not be spawned.
    pub failed: u64,
    /// Results discarded after a reset.
    pub discarded: u64,
    /// Total worker time in microseconds.
    pub busy_us: u64,
}

/// What happened during one [`AsyncTask::step`].
#[derive(Debug)]
pub struct AsyncStep<R> {
    /// Result of a task that completed since the previous step.
    pub result: Option<R>,
    pub launched: bool,
    pub dropped: bool,
}

impl<R> Default for AsyncStep<R> {
    fn default() -> Self {
        Self {
            result: None,
            launched: false,
            dropped: false,
        }
    }
}

struct InFlight<R> {
    handle: JoinHandle<()>,
    rx: Receiver<R>,
    started: Instant,
    /// Result must not be integrated (owner was reset).
    stale: bool,
}

/// A node's background worker slot.
pub struct AsyncTask<R: Send + 'static> {
    name: String,
    rate_hz: f64,
    last_launch: Option<Duration>,
    in_flight: Option<InFlight<R>>,
    stats: AsyncStats,
}

impl<R: Send + 'static> AsyncTask<R> {
    /// `rate_hz <= 0` launches whenever the worker is idle.
    pub fn new(name: impl Into<String>, rate_hz: f64) -> Self {
        Self {
            name: name.into(),
            rate_hz,
            last_launch: None,
            in_flight: None,
            stats: AsyncStats::default(),
        }
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    pub fn set_rate_hz(&mut self, rate_hz: f64) {
        self.rate_hz = rate_hz;
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn stats(&self) -> AsyncStats {
        self.stats
    }

    fn period_elapsed(&self, now: Duration) -> bool {
        match self.last_launch {
            None => true,
            Some(_) if self.rate_hz <= 0.0 => true,
            Some(last) => now.saturating_sub(last).as_secs_f64() * self.rate_hz >= 1.0,
        }
    }

    /// Collect a finished task, if any. Never blocks on a running one.
    fn collect(&mut self) -> Option<R> {
        let flight = self.in_flight.as_ref()?;
        let outcome = match flight.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => None,
        };
        let flight = self.in_flight.take()?;
        self.stats.busy_us += flight.started.elapsed().as_micros() as u64;
        // The sender is gone, so the worker is already returning.
        let _ = flight.handle.join();
        match outcome {
            Some(_) if flight.stale => {
                self.stats.discarded += 1;
                None
            }
            Some(result) => {
                self.stats.integrated += 1;
                Some(result)
            }
            None => {
                tracing::warn!("Async task '{}' failed without a result", self.name);
                self.stats.failed += 1;
                None
            }
        }
    }

    /// Advance the worker. `now` is the owner's clock; `make_work` is only
    /// called when a launch happens and should capture the input snapshot.
    pub fn step<F>(&mut self, now: Duration, make_work: impl FnOnce() -> F) -> AsyncStep<R>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let mut step = AsyncStep {
            result: self.collect(),
            ..AsyncStep::default()
        };

        if !self.period_elapsed(now) {
            return step;
        }

        if self.in_flight.is_some() {
            tracing::warn!(
                "Async task '{}' still running after its period, dropping frame",
                self.name
            );
            self.stats.dropped += 1;
            self.last_launch = Some(now);
            step.dropped = true;
            return step;
        }

        let work = make_work();
        let (tx, rx) = bounded(1);
        let spawned = std::thread::Builder::new()
            .name(format!("async-{}", self.name))
            .spawn(move || {
                let result = work();
                let _ = tx.send(result);
            });
        self.last_launch = Some(now);
        match spawned {
            Ok(handle) => {
                self.in_flight = Some(InFlight {
                    handle,
                    rx,
                    started: Instant::now(),
                    stale: false,
                });
                self.stats.launches += 1;
                step.launched = true;
            }
            Err(e) => {
                tracing::warn!("Failed to spawn async task '{}': {}", self.name, e);
                self.stats.failed += 1;
            }
        }
        step
    }

    /// Forget launch timing; a running task's result will be discarded.
    pub fn reset(&mut self) {
        self.last_launch = None;
        if let Some(flight) = &mut self.in_flight {
            flight.stale = true;
        }
    }
}

impl<R: Send + 'static> Drop for AsyncTask<R> {
    fn drop(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            if flight.handle.join().is_err() {
                tracing::warn!("Async task '{}' panicked during teardown", self.name);
            }
        }
    }
}
