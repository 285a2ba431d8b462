//! Serializable views of a running pipeline.
//!
//! `GraphSnapshot` is what `status` returns: per-node state plus every
//! port's last timestamp and connection. `Statistics` carries the per-node
//! timings. Both are plain data and can be written to disk for diagnostics.

use crate::pipeline::cell::{NodeCell, TickState};
use crate::pipeline::id::{NodeId, Timestamp};
use crate::pipeline::offload::AsyncStats;
use crate::pipeline::plan::PlanStats;
use crate::pipeline::port::PortKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: String,
}

/// Snapshot of a single port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub name: String,
    pub kind: PortKind,
    pub timestamp: Timestamp,
    /// Source of an input; always `None` for outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PortRef>,
}

/// Snapshot of a single pipeline node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub type_name: String,
    pub self_driven: bool,
    pub real_time: bool,
    pub is_input: bool,
    pub master: Option<NodeId>,
    pub dependents: Vec<NodeId>,
    pub paused: bool,
    pub ended: bool,
    pub last_state: TickState,
    pub has_recovered: bool,
    pub last_error: Option<String>,
    /// Whatever the node reports about itself.
    pub state: serde_json::Value,
    pub inputs: Vec<PortSnapshot>,
    pub outputs: Vec<PortSnapshot>,
}

impl NodeSnapshot {
    /// Takes the node's reader lock for the duration of the copy.
    pub(crate) fn capture(cell: &NodeCell, cells: &[NodeCell]) -> Self {
        let stats = cell.stats();
        let guard = cell.read();

        let inputs = guard
            .inputs
            .iter()
            .map(|input| PortSnapshot {
                name: input.name().to_string(),
                kind: input.descriptor.kind,
                timestamp: input.timestamp(),
                source: input.connection().map(|conn| PortRef {
                    node: conn.source_node,
                    port: conn.source_port.to_string(),
                }),
            })
            .collect();
        let outputs = guard
            .outputs
            .iter()
            .map(|output| PortSnapshot {
                name: output.name().to_string(),
                kind: output.descriptor.kind,
                timestamp: output.timestamp(),
                source: None,
            })
            .collect();

        Self {
            id: cell.id(),
            name: cell.name().to_string(),
            type_name: cell.info.type_name.clone(),
            self_driven: cell.info.self_driven,
            real_time: cell.info.real_time,
            is_input: cell.info.is_input,
            master: cell.master.map(|m| cells[m].id()),
            dependents: cell.dependents.iter().map(|&d| cells[d].id()).collect(),
            paused: cell.is_paused(),
            ended: cell.has_ended(),
            last_state: stats.last_state,
            has_recovered: stats.has_recovered,
            last_error: stats.last_error,
            state: guard.behavior.state(),
            inputs,
            outputs,
        }
    }

    pub fn input(&self, name: &str) -> Option<&PortSnapshot> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSnapshot> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Snapshot of a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub from_node: NodeId,
    pub from_port: String,
    pub to_node: NodeId,
    pub to_port: String,
    /// This edge is the target's master edge.
    pub primary: bool,
}

/// Complete observable state of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub name: String,
    pub job_id: String,
    pub taken_at: DateTime<Utc>,
    pub running: bool,
    pub paused: bool,
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub plan: PlanStats,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl GraphSnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Edges derived from the input bindings of `nodes`.
    pub(crate) fn edges_of(cells: &[NodeCell], nodes: &[NodeSnapshot]) -> Vec<EdgeSnapshot> {
        let mut edges = Vec::new();
        for (cell, node) in cells.iter().zip(nodes) {
            for (idx, input) in node.inputs.iter().enumerate() {
                if let Some(source) = &input.source {
                    edges.push(EdgeSnapshot {
                        from_node: source.node,
                        from_port: source.port.clone(),
                        to_node: node.id,
                        to_port: input.name.clone(),
                        primary: cell.primary_input == Some(idx),
                    });
                }
            }
        }
        edges
    }
}

/// Timing and outcome counters of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTimings {
    pub id: NodeId,
    pub name: String,
    pub ticks: u64,
    pub completed: u64,
    pub recovered: u64,
    pub stream_ended: u64,
    /// Ticks skipped while paused.
    pub skipped: u64,
    pub fatal: u64,
    pub clock_overruns: u64,
    pub total_tick_us: u64,
    pub mean_tick_us: u64,
    pub max_tick_us: u64,
    pub last_tick_us: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_stats: Option<AsyncStats>,
}

impl NodeTimings {
    pub(crate) fn capture(cell: &NodeCell) -> Self {
        let stats = cell.stats();
        let total_tick_us = stats.total_time.as_micros() as u64;
        Self {
            id: cell.id(),
            name: cell.name().to_string(),
            ticks: stats.ticks,
            completed: stats.completed,
            recovered: stats.recovered,
            stream_ended: stats.stream_ended,
            skipped: stats.skipped,
            fatal: stats.fatal,
            clock_overruns: stats.clock_overruns,
            total_tick_us,
            mean_tick_us: total_tick_us.checked_div(stats.ticks).unwrap_or(0),
            max_tick_us: stats.max_time.as_micros() as u64,
            last_tick_us: stats.last_time.as_micros() as u64,
            async_stats: stats.async_stats,
        }
    }
}

/// Per-node timings plus pipeline-level counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub name: String,
    pub generated_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub nodes: Vec<NodeTimings>,
}

impl Statistics {
    pub fn node(&self, name: &str) -> Option<&NodeTimings> {
        self.nodes.iter().find(|n| n.name == name)
    }
}
