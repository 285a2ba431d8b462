//! Out-of-band command channel into a running pipeline.
//!
//! A [`PipelineHandle`] is cheap to clone and can be used from any thread.
//! Every node command takes the graph lock for reading (so the driver skips
//! its cycle instead of waiting) and then the node's own lock: the reader
//! lock for pure reads, the writer lock for anything that mutates. Guards
//! are scoped, so every exit path releases them.

use crate::pipeline::cell::NodeCell;
use crate::pipeline::error::CommandError;
use crate::pipeline::event::PipelineEvent;
use crate::pipeline::executor::Shared;
use crate::pipeline::id::NodeId;
use crate::pipeline::packet::ParamValue;
use crate::pipeline::snapshot::{GraphSnapshot, NodeSnapshot, NodeTimings, Statistics};
use crossbeam_channel::Receiver;
use parking_lot::RwLockReadGuard;
use serde_json::{json, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Guard returned by [`PipelineHandle::lock_graph`].
pub type GraphGuard<'a> = RwLockReadGuard<'a, ()>;

/// A parsed node command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction<'a> {
    Pause,
    Resume,
    Reset,
    Status,
    Statistics,
    /// `set:<key>`
    Set(&'a str),
    /// `get:<key>`
    Get(&'a str),
    /// Anything else is forwarded to the node.
    Custom(&'a str),
}

impl<'a> NodeAction<'a> {
    pub fn parse(action: &'a str) -> Result<Self, CommandError> {
        let action = action.trim();
        if action.is_empty() {
            return Err(CommandError::UnknownAction(String::new()));
        }
        if let Some(key) = action.strip_prefix("set:") {
            return Self::key(key, action).map(NodeAction::Set);
        }
        if let Some(key) = action.strip_prefix("get:") {
            return Self::key(key, action).map(NodeAction::Get);
        }
        Ok(match action {
            "pause" => NodeAction::Pause,
            "resume" => NodeAction::Resume,
            "reset" => NodeAction::Reset,
            "status" => NodeAction::Status,
            "statistics" | "stats" => NodeAction::Statistics,
            other => NodeAction::Custom(other),
        })
    }

    fn key(key: &'a str, action: &str) -> Result<&'a str, CommandError> {
        let key = key.trim();
        if key.is_empty() {
            Err(CommandError::UnknownAction(action.to_string()))
        } else {
            Ok(key)
        }
    }

    /// Whether the action changes node state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            NodeAction::Status | NodeAction::Statistics | NodeAction::Get(_)
        )
    }
}

fn contained<T>(
    cell: &NodeCell,
    f: impl FnOnce() -> Result<T, CommandError>,
) -> Result<T, CommandError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(node_id = %cell.id(), node = %cell.name(), "Command panicked");
            Err(CommandError::Rejected(format!(
                "node '{}' panicked while handling the command",
                cell.name()
            )))
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Rejected(e.to_string()))
}

#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    pub fn skipped_cycles(&self) -> u64 {
        self.shared.skipped_cycles.load(Ordering::Acquire)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.shared
            .cells
            .iter()
            .find(|c| c.name() == name)
            .map(NodeCell::id)
    }

    /// Run `action` on node `node`.
    ///
    /// Built-in actions: `pause`, `resume`, `reset`, `status`, `statistics`,
    /// `set:<key>`, `get:<key>`. Anything else goes to the node's
    /// `on_command`.
    pub fn send_command(
        &self,
        node: NodeId,
        action: &str,
        value: ParamValue,
    ) -> Result<Value, CommandError> {
        let action = NodeAction::parse(action)?;
        if action.is_mutating() && self.shared.stop_requested.load(Ordering::Acquire) {
            return Err(CommandError::Stopped);
        }
        let idx = self
            .shared
            .lookup(node)
            .ok_or_else(|| CommandError::UnknownNode(node.to_string()))?;

        let _graph = self.shared.graph_lock.read();
        let cell = &self.shared.cells[idx];
        tracing::debug!(node_id = %cell.id(), node = %cell.name(), "Command {:?}", action);

        match action {
            NodeAction::Pause | NodeAction::Resume => {
                let paused = action == NodeAction::Pause;
                cell.set_paused(paused);
                tracing::info!("Node '{}' {}", cell.name(), if paused { "paused" } else { "resumed" });
                self.shared.events.emit(PipelineEvent::Paused {
                    node: Some(cell.id()),
                    paused,
                });
                Ok(json!({ "paused": paused }))
            }
            NodeAction::Reset => {
                contained(cell, || {
                    cell.reset();
                    Ok(())
                })?;
                tracing::info!("Node '{}' reset", cell.name());
                Ok(Value::Null)
            }
            NodeAction::Status => to_json(&NodeSnapshot::capture(cell, &self.shared.cells)),
            NodeAction::Statistics => to_json(&NodeTimings::capture(cell)),
            NodeAction::Set(key) => {
                contained(cell, || cell.write().behavior.set_param(key, &value))?;
                tracing::info!("Node '{}': {} = {:?}", cell.name(), key, value);
                Ok(value.to_json())
            }
            NodeAction::Get(key) => cell
                .read()
                .behavior
                .param(key)
                .map(|v| v.to_json())
                .ok_or_else(|| CommandError::UnknownParam(key.to_string())),
            NodeAction::Custom(name) => {
                contained(cell, || cell.write().behavior.on_command(name, &value))
            }
        }
    }

    pub fn send_command_by_name(
        &self,
        node: &str,
        action: &str,
        value: ParamValue,
    ) -> Result<Value, CommandError> {
        let id = self
            .node_id(node)
            .ok_or_else(|| CommandError::UnknownNode(node.to_string()))?;
        self.send_command(id, action, value)
    }

    /// Pause or resume the whole pipeline.
    pub fn pause(&self, paused: bool) {
        if self.shared.paused.swap(paused, Ordering::AcqRel) != paused {
            tracing::info!(
                "Pipeline '{}' {}",
                self.shared.name,
                if paused { "paused" } else { "resumed" }
            );
            self.shared
                .events
                .emit(PipelineEvent::Paused { node: None, paused });
        }
    }

    /// Consistent snapshot of every node, taken under the graph lock.
    pub fn status(&self) -> GraphSnapshot {
        let _graph = self.shared.graph_lock.read();
        self.shared.snapshot()
    }

    pub fn statistics(&self) -> Statistics {
        self.shared.statistics()
    }

    /// Clear the global continue flag. The driver returns after the
    /// current cycle and clocks stop at their next period.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.halt("stop requested");
    }

    /// Reset every node, optionally leaving input sources untouched.
    pub fn reset(&self, include_inputs: bool) -> Result<(), CommandError> {
        if self.shared.stop_requested.load(Ordering::Acquire) {
            return Err(CommandError::Stopped);
        }
        let _graph = self.shared.graph_lock.read();
        let mut count = 0;
        for cell in &self.shared.cells {
            if !include_inputs && cell.info.is_input {
                continue;
            }
            contained(cell, || {
                cell.reset();
                Ok(())
            })?;
            count += 1;
        }
        tracing::info!(
            "Reset {} nodes{}",
            count,
            if include_inputs { "" } else { " (inputs kept)" }
        );
        Ok(())
    }

    /// Hold the graph lock. While the guard lives every central cycle is
    /// skipped.
    pub fn lock_graph(&self) -> GraphGuard<'_> {
        self.shared.graph_lock.read()
    }

    /// Subscribe to pipeline events.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .finish()
    }
}
