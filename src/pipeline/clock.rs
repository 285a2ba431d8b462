//! Real-time pacing.
//!
//! [`ClockSchedule`] is the pure pacing arithmetic shared by the central
//! driver and by per-node clocks: it compensates for the time a tick took so
//! the average rate matches the target, and reports an overrun when a tick
//! took a full period or more. It never schedules catch-up ticks.
//!
//! [`NodeClock`] runs a tick body on its own named thread at a target rate.
//! It is stopped through a channel and always joined, never detached.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What to do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockWait {
    /// Sleep this long before the next tick.
    Wait(Duration),
    /// Tick again immediately. `overrun` is how far the tick ran past its
    /// period, when it did.
    FireNow { overrun: Option<Duration> },
}

#[derive(Debug, Clone)]
pub struct ClockSchedule {
    period: Option<Duration>,
    next: Instant,
}

impl ClockSchedule {
    /// `rate_hz <= 0` (fast mode) never waits.
    pub fn new(rate_hz: f64, start: Instant) -> Self {
        let period = (rate_hz > 0.0 && rate_hz.is_finite())
            .then(|| Duration::from_secs_f64(1.0 / rate_hz));
        Self {
            period,
            next: start,
        }
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Called once per tick with the tick's start time and the current time.
    pub fn after_tick(&mut self, tick_start: Instant, now: Instant) -> ClockWait {
        let Some(period) = self.period else {
            return ClockWait::FireNow { overrun: None };
        };
        self.next += period;
        if now < self.next {
            return ClockWait::Wait(self.next - now);
        }
        let took = now.saturating_duration_since(tick_start);
        let overrun = (took >= period).then(|| took - period);
        // Re-anchor instead of bursting to catch up.
        self.next = now;
        ClockWait::FireNow { overrun }
    }
}

/// Returned by a clock's tick body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    Continue,
    Stop,
}

/// A supervised per-node clock thread.
pub struct NodeClock {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl NodeClock {
    /// Spawn a clock thread. `body` receives the 1-based tick number;
    /// `on_overrun` receives the tick number and how late it ran.
    pub fn spawn<F, O>(name: &str, rate_hz: f64, mut body: F, mut on_overrun: O) -> std::io::Result<Self>
    where
        F: FnMut(u64) -> ClockTick + Send + 'static,
        O: FnMut(u64, Duration) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name(format!("clock-{}", name))
            .spawn(move || {
                let mut schedule = ClockSchedule::new(rate_hz, Instant::now());
                let mut tick = 0u64;
                loop {
                    let started = Instant::now();
                    tick += 1;
                    if body(tick) == ClockTick::Stop {
                        break;
                    }
                    let wait = match schedule.after_tick(started, Instant::now()) {
                        ClockWait::Wait(d) => d,
                        ClockWait::FireNow { overrun } => {
                            if let Some(late) = overrun {
                                on_overrun(tick, late);
                            }
                            Duration::ZERO
                        }
                    };
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        tracing::debug!("Started clock '{}' at {} Hz", name, rate_hz);
        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread has exited on its own (body returned `Stop`).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the thread and join it. Idempotent.
    pub fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Clock '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for NodeClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_schedule_compensates_tick_time() {
        let t0 = Instant::now();
        let mut schedule = ClockSchedule::new(20.0, t0);
        assert_eq!(schedule.period(), Some(ms(50)));
        assert_eq!(schedule.after_tick(t0, t0 + ms(10)), ClockWait::Wait(ms(40)));
        // Next tick started late by 5ms; the deadline stays on the grid.
        let t1 = t0 + ms(55);
        assert_eq!(schedule.after_tick(t1, t1 + ms(20)), ClockWait::Wait(ms(25)));
    }

    #[test]
    fn test_schedule_overrun_fires_immediately() {
        let t0 = Instant::now();
        let mut schedule = ClockSchedule::new(20.0, t0);
        assert_eq!(
            schedule.after_tick(t0, t0 + ms(70)),
            ClockWait::FireNow {
                overrun: Some(ms(20))
            }
        );
        // Re-anchored at the overrun: one full period for the next tick.
        let t1 = t0 + ms(70);
        assert_eq!(schedule.after_tick(t1, t1 + ms(5)), ClockWait::Wait(ms(45)));
    }

    #[test]
    fn test_schedule_late_start_is_not_overrun() {
        let t0 = Instant::now();
        let mut schedule = ClockSchedule::new(20.0, t0);
        // Tick itself took 10ms but started 45ms late.
        let start = t0 + ms(45);
        assert_eq!(
            schedule.after_tick(start, start + ms(10)),
            ClockWait::FireNow { overrun: None }
        );
    }

    #[test]
    fn test_fast_mode_never_waits() {
        let t0 = Instant::now();
        let mut schedule = ClockSchedule::new(0.0, t0);
        assert_eq!(schedule.period(), None);
        assert_eq!(
            schedule.after_tick(t0, t0 + ms(1)),
            ClockWait::FireNow { overrun: None }
        );
    }

    #[test]
    fn test_node_clock_stops_and_joins() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);
        let mut clock = NodeClock::spawn(
            "test",
            200.0,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                ClockTick::Continue
            },
            |_, _| {},
        )
        .unwrap();
        std::thread::sleep(ms(50));
        clock.stop();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected a few ticks, got {}", seen);
        std::thread::sleep(ms(20));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(clock.is_finished());
    }

    #[test]
    fn test_node_clock_body_can_stop() {
        let mut clock = NodeClock::spawn(
            "three",
            0.0,
            |tick| {
                if tick >= 3 {
                    ClockTick::Stop
                } else {
                    ClockTick::Continue
                }
            },
            |_, _| {},
        )
        .unwrap();
        while !clock.is_finished() {
            std::thread::sleep(ms(1));
        }
        clock.stop();
    }
}
