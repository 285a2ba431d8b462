//! Pipeline executor: the central driver loop and the per-node clocks.
//!
//! Each central cycle:
//! 1. Try to take the graph lock without blocking; skip the cycle if busy.
//! 2. Tick every centrally driven root, then its dependents depth-first in
//!    registration order.
//! 3. Stop when every input source has ended.
//!
//! Roots marked real-time run the same subtree tick on their own
//! [`NodeClock`] thread instead. All clock threads are joined when the
//! pipeline stops or is dropped.

use crate::config::{ExecutionOptions, PipelineConfig};
use crate::context::Context;
use crate::pipeline::builder::{Graph, GraphBuilder};
use crate::pipeline::cell::{NodeCell, TickClock, TickOutcome};
use crate::pipeline::clock::{ClockSchedule, ClockTick, ClockWait, NodeClock};
use crate::pipeline::command::PipelineHandle;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::event::{EventBus, PipelineEvent};
use crate::pipeline::id::NodeId;
use crate::pipeline::plan::MasterPlan;
use crate::pipeline::registry::NodeRegistry;
use crate::pipeline::snapshot::{GraphSnapshot, NodeSnapshot, NodeTimings, Statistics};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often `run` checks on a pipeline driven only by clocks.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Result of one attempt at a central cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran; carries its number.
    Completed(u64),
    /// The graph lock was busy.
    Skipped,
    /// The pipeline is paused.
    Paused,
    /// The continue flag is down.
    Stopped,
}

#[derive(Debug, Clone)]
struct FatalRecord {
    node: String,
    cycle: u64,
    message: String,
}

impl From<&FatalRecord> for PipelineError {
    fn from(record: &FatalRecord) -> Self {
        PipelineError::Fatal {
            node: record.node.clone(),
            cycle: record.cycle,
            message: record.message.clone(),
        }
    }
}

/// State shared by the driver, the clock threads and every handle.
pub(crate) struct Shared {
    pub name: String,
    pub cells: Vec<NodeCell>,
    pub index: HashMap<NodeId, usize>,
    pub plan: MasterPlan,
    pub context: Context,
    pub options: ExecutionOptions,
    /// Held for writing by the driver for a whole pass, for reading by commands.
    pub graph_lock: RwLock<()>,
    /// Global continue flag.
    pub running: AtomicBool,
    pub paused: AtomicBool,
    /// `stop` was requested from outside.
    pub stop_requested: AtomicBool,
    pub cycles: AtomicU64,
    pub skipped_cycles: AtomicU64,
    pub epoch: Instant,
    pub events: EventBus,
    fatal: Mutex<Option<FatalRecord>>,
}

impl Shared {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn lookup(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Roots ticked by the central driver rather than their own clock.
    fn central_roots(&self) -> usize {
        self.plan
            .roots
            .iter()
            .filter(|&&r| !self.cells[r].info.real_time)
            .count()
    }

    /// Clear the continue flag. Returns `true` on the first call.
    pub fn halt(&self, reason: &str) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        if was_running {
            tracing::info!("Pipeline '{}' stopping: {}", self.name, reason);
            self.events.emit(PipelineEvent::Stopped);
        }
        was_running
    }

    fn fatal_error(&self) -> Option<PipelineError> {
        self.fatal.lock().as_ref().map(PipelineError::from)
    }

    fn clock(&self, cycle: u64) -> TickClock {
        TickClock {
            cycle,
            elapsed: self.epoch.elapsed(),
        }
    }

    /// One central cycle.
    pub fn run_cycle(&self, respect_pause: bool) -> PipelineResult<CycleOutcome> {
        if !self.is_running() {
            return Ok(CycleOutcome::Stopped);
        }
        let Some(_pass) = self.graph_lock.try_write() else {
            let skipped = self.skipped_cycles.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::warn!(
                "Scheduler too slow: graph busy, skipping cycle ({} skipped so far)",
                skipped
            );
            self.events.emit(PipelineEvent::CycleSkipped {
                skipped_total: skipped,
            });
            return Ok(CycleOutcome::Skipped);
        };
        if respect_pause && self.paused.load(Ordering::Acquire) {
            return Ok(CycleOutcome::Paused);
        }

        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        for &root in &self.plan.roots {
            if self.cells[root].info.real_time {
                continue;
            }
            self.tick_tree(root, cycle)?;
        }
        self.check_end_of_stream();
        Ok(CycleOutcome::Completed(cycle))
    }

    /// Tick `root` and, depth-first, every dependent whose master completed.
    fn tick_tree(&self, root: usize, cycle: u64) -> PipelineResult<()> {
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let cell = &self.cells[idx];
            let report = cell.tick(self.clock(cycle), &self.context);

            if report.async_dropped > 0 {
                self.events.emit(PipelineEvent::AsyncDropped {
                    node: cell.id(),
                    dropped: report.async_dropped,
                });
            }
            if report.ended_now {
                self.events
                    .emit(PipelineEvent::StreamEnded { node: cell.id() });
            }
            match &report.outcome {
                TickOutcome::Recovered(message) => {
                    self.events.emit(PipelineEvent::NodeRecovered {
                        node: cell.id(),
                        cycle,
                        message: message.clone(),
                    });
                }
                TickOutcome::Fatal(message) => {
                    return Err(self.fail(cell, cycle, message));
                }
                _ => {}
            }

            if report.outcome.triggers_dependents() {
                stack.extend(cell.dependents.iter().rev());
            }
        }
        Ok(())
    }

    fn fail(&self, cell: &NodeCell, cycle: u64, message: &str) -> PipelineError {
        let record = FatalRecord {
            node: cell.name().to_string(),
            cycle,
            message: message.to_string(),
        };
        let error = PipelineError::from(&record);
        self.fatal.lock().get_or_insert(record);
        self.events.emit(PipelineEvent::NodeFatal {
            node: cell.id(),
            cycle,
            message: message.to_string(),
        });
        self.halt("fatal node error");
        error
    }

    /// Stop once every input source has reported end of stream.
    fn check_end_of_stream(&self) {
        let mut sources = self
            .cells
            .iter()
            .filter(|c| c.info.self_driven && c.info.is_input)
            .peekable();
        if sources.peek().is_none() {
            return;
        }
        if sources.all(NodeCell::has_ended) {
            self.halt("all input sources ended");
        }
    }

    /// Body of a real-time clock tick for `root`.
    fn clock_tick(&self, root: usize, tick: u64) -> ClockTick {
        if !self.is_running() {
            return ClockTick::Stop;
        }
        if self.paused.load(Ordering::Acquire) {
            return ClockTick::Continue;
        }
        if self.tick_tree(root, tick).is_err() {
            return ClockTick::Stop;
        }
        self.check_end_of_stream();
        if self.is_running() {
            ClockTick::Continue
        } else {
            ClockTick::Stop
        }
    }

    fn clock_overrun(&self, root: usize, tick: u64, late_by: Duration) {
        let cell = &self.cells[root];
        cell.record_overrun();
        tracing::warn!(
            node_id = %cell.id(),
            node = %cell.name(),
            "Clock overrun at tick {}: {:?} late",
            tick,
            late_by
        );
        self.events.emit(PipelineEvent::ClockOverrun {
            node: cell.id(),
            tick,
            late_by_us: late_by.as_micros() as u64,
        });
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes: Vec<NodeSnapshot> = self
            .cells
            .iter()
            .map(|cell| NodeSnapshot::capture(cell, &self.cells))
            .collect();
        let edges = GraphSnapshot::edges_of(&self.cells, &nodes);
        GraphSnapshot {
            name: self.name.clone(),
            job_id: self.context.job_id.clone(),
            taken_at: chrono::Utc::now(),
            running: self.is_running(),
            paused: self.paused.load(Ordering::Acquire),
            cycles: self.cycles.load(Ordering::Acquire),
            skipped_cycles: self.skipped_cycles.load(Ordering::Acquire),
            plan: self.plan.stats.clone(),
            nodes,
            edges,
        }
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            name: self.name.clone(),
            generated_at: chrono::Utc::now(),
            uptime_ms: self.epoch.elapsed().as_millis() as u64,
            cycles: self.cycles.load(Ordering::Acquire),
            skipped_cycles: self.skipped_cycles.load(Ordering::Acquire),
            nodes: self.cells.iter().map(NodeTimings::capture).collect(),
        }
    }
}

/// A running (or ready to run) pipeline.
pub struct Pipeline {
    shared: Arc<Shared>,
    clocks: Vec<NodeClock>,
    started: bool,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, graph: Graph, options: ExecutionOptions) -> Self {
        let Graph {
            cells,
            index,
            plan,
            context,
        } = graph;
        let shared = Shared {
            name: name.into(),
            cells,
            index,
            plan,
            context,
            options,
            graph_lock: RwLock::new(()),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            skipped_cycles: AtomicU64::new(0),
            epoch: Instant::now(),
            events: EventBus::default(),
            fatal: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            clocks: Vec::new(),
            started: false,
        }
    }

    /// Build the graph described by `config` and wrap it in a pipeline.
    pub fn from_config(config: &PipelineConfig, registry: &NodeRegistry) -> PipelineResult<Self> {
        let graph = GraphBuilder::from_config(config, registry)?;
        Ok(Self::new(config.name.clone(), graph, config.options.clone()))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(Arc::clone(&self.shared))
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    pub fn skipped_cycles(&self) -> u64 {
        self.shared.skipped_cycles.load(Ordering::Acquire)
    }

    /// Spawn a clock for every real-time root.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.started {
            return Err(PipelineError::AlreadyStarted);
        }
        self.started = true;

        let shared = Arc::clone(&self.shared);
        for &root in &shared.plan.roots {
            let cell = &shared.cells[root];
            if !cell.info.real_time {
                continue;
            }
            let rate = if shared.options.real_time {
                cell.info.rate_hz.unwrap_or(shared.options.tick_rate_hz)
            } else {
                0.0
            };
            let body = Arc::clone(&shared);
            let overrun = Arc::clone(&shared);
            let clock = NodeClock::spawn(
                cell.name(),
                rate,
                move |tick| body.clock_tick(root, tick),
                move |tick, late_by| overrun.clock_overrun(root, tick, late_by),
            );
            match clock {
                Ok(clock) => {
                    tracing::info!("Started clock for '{}' at {} Hz", cell.name(), rate);
                    self.clocks.push(clock);
                }
                Err(e) => {
                    shared.halt("clock spawn failed");
                    self.stop_clocks();
                    return Err(PipelineError::ThreadSpawn(e));
                }
            }
        }

        tracing::info!(
            "Pipeline '{}' started: {} nodes, {} central roots, {} clocks",
            self.shared.name,
            self.shared.cells.len(),
            self.shared.central_roots(),
            self.clocks.len()
        );
        Ok(())
    }

    /// One central cycle. Honours pause and the graph lock.
    pub fn run_cycle(&self) -> PipelineResult<CycleOutcome> {
        self.shared.run_cycle(true)
    }

    /// Exactly one central cycle, even while paused.
    pub fn step(&self) -> PipelineResult<CycleOutcome> {
        self.shared.run_cycle(false)
    }

    /// Drive central cycles until stopped, `max_cycles` is reached, every
    /// source has ended, or a node fails fatally.
    ///
    /// When every root runs on its own clock there is nothing to drive:
    /// `run` only waits for the clocks, and `max_cycles` does not apply.
    pub fn run(&mut self) -> PipelineResult<Statistics> {
        if !self.started {
            self.start()?;
        }
        let result = if self.shared.central_roots() == 0 {
            self.wait_for_clocks()
        } else {
            self.drive()
        };

        self.shared.halt("run finished");
        self.stop_clocks();
        let statistics = self.shared.statistics();
        tracing::info!(
            "Pipeline '{}' finished after {} cycles ({} skipped)",
            self.shared.name,
            statistics.cycles,
            statistics.skipped_cycles
        );
        result.map(|()| statistics)
    }

    fn wait_for_clocks(&self) -> PipelineResult<()> {
        tracing::info!(
            "Pipeline '{}' has no central roots, waiting on {} clocks",
            self.shared.name,
            self.clocks.len()
        );
        while self.is_running() && !self.clocks.iter().all(NodeClock::is_finished) {
            std::thread::sleep(IDLE_POLL);
        }
        match self.shared.fatal_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drive(&self) -> PipelineResult<()> {
        let options = &self.shared.options;
        let rate = if options.real_time {
            options.tick_rate_hz
        } else {
            0.0
        };
        let max_cycles = options.max_cycles;
        let mut schedule = ClockSchedule::new(rate, Instant::now());
        tracing::info!(
            "Running pipeline '{}' ({:?}, {} Hz, max cycles {:?})",
            self.shared.name,
            options.mode,
            rate,
            max_cycles
        );

        loop {
            if max_cycles.is_some_and(|max| self.cycles() >= max) {
                break Ok(());
            }
            let tick_start = Instant::now();
            match self.shared.run_cycle(true) {
                Ok(CycleOutcome::Stopped) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
            if let Some(e) = self.shared.fatal_error() {
                break Err(e);
            }
            if !self.is_running() {
                break Ok(());
            }
            if let ClockWait::Wait(delay) = schedule.after_tick(tick_start, Instant::now()) {
                std::thread::sleep(delay);
            }
        }
    }

    /// Clear the continue flag and join every clock.
    pub fn stop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.halt("stop requested");
        self.stop_clocks();
    }

    fn stop_clocks(&mut self) {
        for mut clock in self.clocks.drain(..) {
            clock.stop();
            tracing::debug!("Clock '{}' joined", clock.name());
        }
    }

    pub fn status(&self) -> GraphSnapshot {
        self.shared.snapshot()
    }

    pub fn statistics(&self) -> Statistics {
        self.shared.statistics()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.stop_clocks();
    }
}
