//! Runtime node cell: the per-node lock and the containment boundary.
//!
//! A `NodeCell` wraps one node with everything the engine tracks about it.
//! Mutable state (the behaviour and its ports) sits behind one reader/writer
//! lock. A tick holds the writer lock for the whole pull-process-push body;
//! commands take the same lock. Statistics live behind a separate mutex so
//! reading them never waits for a tick.

use crate::context::Context;
use crate::pipeline::error::NodeError;
use crate::pipeline::id::{NodeId, Timestamp};
use crate::pipeline::node::{NodeBehavior, TickContext};
use crate::pipeline::offload::AsyncStats;
use crate::pipeline::port::{InputPort, OutputPort};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Per-tick state machine: `Ready → Running → {Completed | Recovered | Fatal}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickState {
    #[default]
    Ready,
    Running,
    Completed,
    Recovered,
    Fatal,
}

/// How one tick ended, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// Non-fatal error or panic, contained.
    Recovered(String),
    /// The node reported end of stream.
    StreamEnded,
    /// The node declared a fatal error.
    Fatal(String),
    /// The node is paused.
    Skipped,
}

impl TickOutcome {
    /// Whether dependents should be ticked after this outcome.
    pub fn triggers_dependents(&self) -> bool {
        matches!(self, TickOutcome::Completed | TickOutcome::Recovered(_))
    }
}

/// Counters and timings for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub ticks: u64,
    pub completed: u64,
    pub recovered: u64,
    pub stream_ended: u64,
    pub skipped: u64,
    pub fatal: u64,
    pub clock_overruns: u64,
    pub total_time: Duration,
    pub max_time: Duration,
    pub last_time: Duration,
    pub last_state: TickState,
    pub last_error: Option<String>,
    /// A clean tick happened since `last_error`.
    pub has_recovered: bool,
    pub async_stats: Option<AsyncStats>,
}

/// Mutable node state guarded by the node lock.
pub struct NodeState {
    pub behavior: Box<dyn NodeBehavior>,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    /// Timestamp of the last tick; ticks never go below it.
    pub last_timestamp: Timestamp,
}

/// Static facts fixed at graph build.
#[derive(Debug, Clone)]
pub struct CellInfo {
    pub id: NodeId,
    pub name: String,
    pub type_name: String,
    pub self_driven: bool,
    pub is_input: bool,
    /// Own clock rate when on a real-time clock.
    pub rate_hz: Option<f64>,
    /// Runs on its own clock instead of the central driver.
    pub real_time: bool,
}

pub struct NodeCell {
    pub info: CellInfo,
    pub master: Option<usize>,
    pub dependents: Vec<usize>,
    pub primary_input: Option<usize>,
    state: RwLock<NodeState>,
    stats: Mutex<NodeStats>,
    paused: AtomicBool,
    ended: AtomicBool,
}

/// Clock readings for one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    pub cycle: u64,
    /// Time since the pipeline was created.
    pub elapsed: Duration,
}

/// Result of [`NodeCell::tick`].
#[derive(Debug, Clone)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Async frames dropped during this tick.
    pub async_dropped: u64,
    /// This tick was the node's first end of stream.
    pub ended_now: bool,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl NodeCell {
    pub fn new(info: CellInfo, state: NodeState) -> Self {
        Self {
            info,
            master: None,
            dependents: Vec::new(),
            primary_input: None,
            state: RwLock::new(state),
            stats: Mutex::new(NodeStats::default()),
            paused: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.info.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Shared access for pure reads (snapshots, `get:` commands).
    pub fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        self.state.read()
    }

    /// Exclusive access for commands that mutate.
    pub fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.state.write()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.lock().clone()
    }

    pub fn record_overrun(&self) {
        self.stats.lock().clock_overruns += 1;
    }

    /// Reset processing state and port buffers.
    pub fn reset(&self) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.behavior.reset();
        for input in &mut state.inputs {
            input.clear();
        }
        for output in &mut state.outputs {
            output.clear();
        }
        state.last_timestamp = 0;
        self.ended.store(false, Ordering::Release);
        let mut stats = self.stats.lock();
        stats.last_state = TickState::Ready;
        stats.last_error = None;
        stats.has_recovered = false;
    }

    /// One tick: pull, process, push, inside the containment boundary.
    ///
    /// Holds the writer lock for the body and releases it before returning,
    /// so dependents always run after the lock is released.
    pub fn tick(&self, clock: TickClock, context: &Context) -> TickReport {
        if self.is_paused() {
            self.stats.lock().skipped += 1;
            return TickReport {
                outcome: TickOutcome::Skipped,
                async_dropped: 0,
                ended_now: false,
            };
        }

        self.stats.lock().last_state = TickState::Running;
        let started = Instant::now();

        let (result, async_stats) = {
            let mut guard = self.state.write();
            let NodeState {
                behavior,
                inputs,
                outputs,
                last_timestamp,
            } = &mut *guard;

            for input in inputs.iter_mut() {
                input.propagate(|port, src, dst| behavior.convert_input(port, src, dst));
            }

            let base = if self.info.self_driven {
                clock.elapsed.as_millis() as Timestamp
            } else {
                self.primary_input
                    .and_then(|i| inputs.get(i))
                    .map_or(*last_timestamp, InputPort::timestamp)
            };
            let timestamp = base.max(*last_timestamp);

            let mut ctx = TickContext::new(
                inputs,
                outputs,
                context,
                timestamp,
                clock.cycle,
                clock.elapsed,
            );
            let result = panic::catch_unwind(AssertUnwindSafe(|| behavior.tick(&mut ctx)));
            *last_timestamp = ctx.timestamp().max(*last_timestamp);
            (result, behavior.async_stats())
        };

        let outcome = match result {
            Ok(Ok(())) => TickOutcome::Completed,
            Ok(Err(NodeError::StreamEnded)) => TickOutcome::StreamEnded,
            Ok(Err(e)) if e.is_fatal() => TickOutcome::Fatal(e.to_string()),
            Ok(Err(e)) => TickOutcome::Recovered(e.to_string()),
            Err(payload) => {
                TickOutcome::Recovered(format!("panicked: {}", panic_message(payload.as_ref())))
            }
        };

        let elapsed = started.elapsed();
        let mut ended_now = false;
        let mut stats = self.stats.lock();
        let previous_dropped = stats.async_stats.map_or(0, |s| s.dropped);
        stats.ticks += 1;
        stats.total_time += elapsed;
        stats.max_time = stats.max_time.max(elapsed);
        stats.last_time = elapsed;
        stats.async_stats = async_stats;
        match &outcome {
            TickOutcome::Completed => {
                stats.completed += 1;
                stats.last_state = TickState::Completed;
                if stats.last_error.is_some() {
                    stats.has_recovered = true;
                }
            }
            TickOutcome::Recovered(message) => {
                stats.recovered += 1;
                stats.last_state = TickState::Recovered;
                stats.last_error = Some(message.clone());
                stats.has_recovered = false;
                tracing::warn!(
                    node_id = %self.info.id,
                    node = %self.info.name,
                    cycle = clock.cycle,
                    "Node tick failed, continuing: {}",
                    message
                );
            }
            TickOutcome::StreamEnded => {
                stats.stream_ended += 1;
                stats.last_state = TickState::Completed;
                ended_now = !self.ended.swap(true, Ordering::AcqRel);
                if ended_now {
                    tracing::info!(
                        node_id = %self.info.id,
                        node = %self.info.name,
                        cycle = clock.cycle,
                        "End of stream"
                    );
                }
            }
            TickOutcome::Fatal(message) => {
                stats.fatal += 1;
                stats.last_state = TickState::Fatal;
                stats.last_error = Some(message.clone());
                stats.has_recovered = false;
                tracing::error!(
                    node_id = %self.info.id,
                    node = %self.info.name,
                    cycle = clock.cycle,
                    "Fatal node error: {}",
                    message
                );
            }
            TickOutcome::Skipped => {}
        }
        let async_dropped = async_stats
            .map_or(0, |s| s.dropped)
            .saturating_sub(previous_dropped);

        TickReport {
            outcome,
            async_dropped,
            ended_now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::packet::Payload;
    use crate::pipeline::port::{PortDescriptor, PortKind};

    static PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", PortKind::State)];

    /// Fails on chosen ticks, otherwise pushes a state.
    struct Flaky {
        calls: u32,
        fail_on: Vec<u32>,
        panic_on: Option<u32>,
    }

    impl NodeBehavior for Flaky {
        fn type_name(&self) -> &str {
            "Flaky"
        }

        fn ports(&self) -> &[PortDescriptor] {
            PORTS
        }

        fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
            self.calls += 1;
            if self.panic_on == Some(self.calls) {
                panic!("boom at {}", self.calls);
            }
            if self.fail_on.contains(&self.calls) {
                return Err(NodeError::failed("flaky"));
            }
            ctx.push("out", Payload::State(true))
        }
    }

    fn cell(fail_on: Vec<u32>, panic_on: Option<u32>) -> NodeCell {
        let behavior = Box::new(Flaky {
            calls: 0,
            fail_on,
            panic_on,
        });
        NodeCell::new(
            CellInfo {
                id: NodeId(1),
                name: "flaky".into(),
                type_name: "Flaky".into(),
                self_driven: true,
                is_input: false,
                rate_hz: None,
                real_time: false,
            },
            NodeState {
                behavior,
                inputs: Vec::new(),
                outputs: vec![OutputPort::new(PORTS[0])],
                last_timestamp: 0,
            },
        )
    }

    fn clock(cycle: u64, ms: u64) -> TickClock {
        TickClock {
            cycle,
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_recovered_then_has_recovered() {
        let cell = cell(vec![2], None);
        let ctx = Context::default();
        assert_eq!(cell.tick(clock(1, 0), &ctx).outcome, TickOutcome::Completed);
        assert!(matches!(
            cell.tick(clock(2, 10), &ctx).outcome,
            TickOutcome::Recovered(_)
        ));
        let stats = cell.stats();
        assert_eq!(stats.last_state, TickState::Recovered);
        assert!(!stats.has_recovered);

        assert_eq!(cell.tick(clock(3, 20), &ctx).outcome, TickOutcome::Completed);
        let stats = cell.stats();
        assert!(stats.has_recovered);
        assert_eq!(stats.last_error.as_deref(), Some("flaky"));
        assert_eq!((stats.ticks, stats.completed, stats.recovered), (3, 2, 1));
    }

    #[test]
    fn test_panic_is_contained_and_lock_released() {
        let cell = cell(vec![], Some(1));
        let ctx = Context::default();
        match cell.tick(clock(1, 0), &ctx).outcome {
            TickOutcome::Recovered(msg) => assert!(msg.contains("boom at 1")),
            other => panic!("expected Recovered, got {:?}", other),
        }
        assert!(cell.state.try_write().is_some());
        assert_eq!(cell.tick(clock(2, 5), &ctx).outcome, TickOutcome::Completed);
    }

    #[test]
    fn test_paused_cell_is_skipped() {
        let cell = cell(vec![], None);
        cell.set_paused(true);
        let ctx = Context::default();
        assert_eq!(cell.tick(clock(1, 0), &ctx).outcome, TickOutcome::Skipped);
        assert_eq!(cell.stats().skipped, 1);
        assert_eq!(cell.stats().ticks, 0);
    }

    #[test]
    fn test_self_driven_timestamp_from_clock() {
        let cell = cell(vec![], None);
        let ctx = Context::default();
        cell.tick(clock(1, 40), &ctx);
        assert_eq!(cell.read().outputs[0].timestamp(), 40);
        // The clock reading can lag; timestamps still never decrease.
        cell.tick(clock(2, 30), &ctx);
        assert_eq!(cell.read().outputs[0].timestamp(), 40);
    }

    #[test]
    fn test_reset_clears_ports() {
        let cell = cell(vec![], None);
        let ctx = Context::default();
        cell.tick(clock(1, 40), &ctx);
        cell.reset();
        assert_eq!(cell.read().last_timestamp, 0);
        assert_eq!(cell.read().outputs[0].read().payload, Payload::Empty);
        cell.tick(clock(2, 5), &ctx);
        assert_eq!(cell.read().outputs[0].timestamp(), 5);
    }
}
