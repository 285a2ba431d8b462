//! Graph construction and finalization.
//!
//! Nodes are added first, then connected, then `finalize` resolves masters
//! and freezes the graph into runtime cells. Nothing is connected after
//! finalization; a failed finalization leaves no graph behind.

use crate::config::{ExecutionMode, NodeDescriptor, PipelineConfig};
use crate::context::Context;
use crate::pipeline::cell::{CellInfo, NodeCell, NodeState};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::node::NodeBehavior;
use crate::pipeline::plan::MasterPlan;
use crate::pipeline::port::{self, InputPort, OutputPort, PortDirection};
use crate::pipeline::registry::NodeRegistry;
use crate::pipeline::resolver::{MasterResolver, ResolveNode};
use std::collections::HashMap;

/// Scheduling options that belong to a configured node rather than its type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOptions {
    /// Self-driven regardless of type.
    pub auto_process: bool,
    /// Own clock rate.
    pub fps: Option<f64>,
    pub primary_input: Option<String>,
    /// Overrides the context's default discipline.
    pub clock: Option<ExecutionMode>,
}

impl From<&NodeDescriptor> for NodeOptions {
    fn from(desc: &NodeDescriptor) -> Self {
        Self {
            auto_process: desc.auto_process,
            fps: desc.fps,
            primary_input: desc.primary_input.clone(),
            clock: desc.clock,
        }
    }
}

struct PendingNode {
    id: NodeId,
    name: String,
    behavior: Box<dyn NodeBehavior>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    options: NodeOptions,
}

impl PendingNode {
    fn is_self_driven(&self) -> bool {
        self.behavior.is_always_self_driven() || self.options.auto_process
    }
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

pub struct GraphBuilder {
    context: Context,
    nodes: Vec<PendingNode>,
    index: HashMap<NodeId, usize>,
    finalized: bool,
}

impl GraphBuilder {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            nodes: Vec::new(),
            index: HashMap::new(),
            finalized: false,
        }
    }

    /// Build, connect and finalize every node of `config`.
    pub fn from_config(config: &PipelineConfig, registry: &NodeRegistry) -> PipelineResult<Graph> {
        let mut builder = Self::new(Context::from_config(config));
        for desc in &config.nodes {
            builder.add_descriptor(desc, registry)?;
        }
        for desc in &config.nodes {
            for binding in &desc.inputs {
                builder.connect(
                    binding.source_node,
                    &binding.source_port,
                    desc.id,
                    &binding.port,
                )?;
            }
        }
        builder.finalize()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Instantiate a configured node. Its input bindings are not applied.
    pub fn add_descriptor(
        &mut self,
        desc: &NodeDescriptor,
        registry: &NodeRegistry,
    ) -> PipelineResult<NodeId> {
        self.check_new(desc.id, &desc.name)?;
        let behavior = registry.create(desc, &self.context)?;
        self.add_node_with(desc.id, &desc.name, behavior, NodeOptions::from(desc))
    }

    pub fn add_node(
        &mut self,
        id: NodeId,
        name: &str,
        behavior: Box<dyn NodeBehavior>,
    ) -> PipelineResult<NodeId> {
        self.add_node_with(id, name, behavior, NodeOptions::default())
    }

    pub fn add_node_with(
        &mut self,
        id: NodeId,
        name: &str,
        behavior: Box<dyn NodeBehavior>,
        options: NodeOptions,
    ) -> PipelineResult<NodeId> {
        self.check_new(id, name)?;
        if let Some(fps) = options.fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(PipelineError::InvalidParam {
                    node: name.to_string(),
                    message: format!("fps must be positive, got {}", fps),
                });
            }
        }

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for desc in behavior.ports() {
            match desc.direction {
                PortDirection::Input => {
                    inputs.push(InputPort::new(*desc, behavior.prepare_input(desc)))
                }
                PortDirection::Output => outputs.push(OutputPort::new(*desc)),
            }
        }

        tracing::debug!(
            "Added node {} '{}' ({}, {} inputs, {} outputs)",
            id,
            name,
            behavior.type_name(),
            inputs.len(),
            outputs.len()
        );
        self.index.insert(id, self.nodes.len());
        self.nodes.push(PendingNode {
            id,
            name: name.to_string(),
            behavior,
            inputs,
            outputs,
            options,
        });
        Ok(id)
    }

    fn check_new(&self, id: NodeId, name: &str) -> PipelineResult<()> {
        if self.finalized {
            return Err(PipelineError::GraphFinalized);
        }
        if self.index.contains_key(&id) {
            return Err(PipelineError::DuplicateId(id));
        }
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(PipelineError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn lookup(&self, id: NodeId) -> PipelineResult<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or_else(|| PipelineError::UnknownNode(id.to_string()))
    }

    /// Bind output `from_port` of `from` to input `to_port` of `to`.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: &str,
        to: NodeId,
        to_port: &str,
    ) -> PipelineResult<()> {
        if self.finalized {
            return Err(PipelineError::GraphFinalized);
        }
        let src = self.lookup(from)?;
        let dst = self.lookup(to)?;

        let out_idx = self.nodes[src]
            .outputs
            .iter()
            .position(|p| p.name() == from_port)
            .ok_or_else(|| PipelineError::UnknownPort {
                node: self.nodes[src].name.clone(),
                port: from_port.to_string(),
            })?;
        let in_idx = self.nodes[dst]
            .inputs
            .iter()
            .position(|p| p.name() == to_port)
            .ok_or_else(|| PipelineError::UnknownPort {
                node: self.nodes[dst].name.clone(),
                port: to_port.to_string(),
            })?;
        let label = format!("{}.{}", self.nodes[dst].name, to_port);

        if src == dst {
            let node = &mut self.nodes[src];
            port::connect(
                from,
                &mut node.outputs[out_idx],
                &mut node.inputs[in_idx],
                &label,
            )?;
        } else {
            let (source, target) = pair_mut(&mut self.nodes, src, dst);
            port::connect(
                from,
                &mut source.outputs[out_idx],
                &mut target.inputs[in_idx],
                &label,
            )?;
        }

        tracing::debug!(
            "Connected {}.{} -> {}",
            self.nodes[src].name,
            from_port,
            label
        );
        Ok(())
    }

    /// Resolve masters and freeze the graph.
    pub fn finalize(&mut self) -> PipelineResult<Graph> {
        if self.finalized {
            return Err(PipelineError::GraphFinalized);
        }

        let plan = {
            let resolve_nodes: Vec<ResolveNode<'_>> = self
                .nodes
                .iter()
                .map(|node| ResolveNode {
                    name: &node.name,
                    self_driven: node.is_self_driven(),
                    inputs: node
                        .inputs
                        .iter()
                        .map(|input| {
                            let source = input
                                .connection()
                                .and_then(|conn| self.index.get(&conn.source_node).copied());
                            (input.name(), source)
                        })
                        .collect(),
                    primary_override: node
                        .options
                        .primary_input
                        .as_deref()
                        .or_else(|| node.behavior.primary_input()),
                })
                .collect();
            MasterResolver::resolve(&resolve_nodes)?
        };

        self.finalized = true;
        let default_mode = if self.context.centralized {
            ExecutionMode::Centralized
        } else {
            ExecutionMode::RealTime
        };

        let cells: Vec<NodeCell> = std::mem::take(&mut self.nodes)
            .into_iter()
            .enumerate()
            .map(|(idx, node)| {
                let self_driven = node.is_self_driven();
                let mode = node.options.clock.unwrap_or(default_mode);
                let info = CellInfo {
                    id: node.id,
                    name: node.name,
                    type_name: node.behavior.type_name().to_string(),
                    self_driven,
                    is_input: node.behavior.is_input(),
                    rate_hz: node.options.fps.or_else(|| node.behavior.rate_hz()),
                    real_time: self_driven && mode == ExecutionMode::RealTime,
                };
                let mut cell = NodeCell::new(
                    info,
                    NodeState {
                        behavior: node.behavior,
                        inputs: node.inputs,
                        outputs: node.outputs,
                        last_timestamp: 0,
                    },
                );
                cell.master = plan.masters[idx];
                cell.dependents = plan.dependents[idx].clone();
                cell.primary_input = plan.primary_inputs[idx];
                cell
            })
            .collect();

        let graph = Graph {
            cells,
            index: std::mem::take(&mut self.index),
            plan,
            context: self.context.clone(),
        };
        tracing::info!(
            "Graph finalized: {} nodes, {} self-driven ({} on own clocks), depth {}",
            graph.len(),
            graph.plan.roots.len(),
            graph.cells.iter().filter(|c| c.info.real_time).count(),
            graph.plan.stats.max_depth
        );
        Ok(graph)
    }
}

/// A finalized graph: runtime cells plus the resolved master plan.
pub struct Graph {
    pub(crate) cells: Vec<NodeCell>,
    pub(crate) index: HashMap<NodeId, usize>,
    pub(crate) plan: MasterPlan,
    pub(crate) context: Context,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn plan(&self) -> &MasterPlan {
        &self.plan
    }

    /// Node ids in configuration order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.cells.iter().map(NodeCell::id)
    }

    pub fn id_by_name(&self, name: &str) -> Option<NodeId> {
        self.cells.iter().find(|c| c.name() == name).map(NodeCell::id)
    }

    fn cell(&self, id: NodeId) -> Option<&NodeCell> {
        self.index.get(&id).map(|&idx| &self.cells[idx])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn is_self_driven(&self, id: NodeId) -> bool {
        self.cell(id).is_some_and(|c| c.info.self_driven)
    }

    pub fn master_of(&self, id: NodeId) -> Option<NodeId> {
        let master = self.cell(id)?.master?;
        Some(self.cells[master].id())
    }

    /// Dependents of `id` in registration order.
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.cell(id)
            .map(|c| c.dependents.iter().map(|&d| self.cells[d].id()).collect())
            .unwrap_or_default()
    }

    /// Self-driven nodes in configuration order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.plan.roots.iter().map(|&r| self.cells[r].id()).collect()
    }

    /// Name of the input port that drives `id`.
    pub fn primary_input_of(&self, id: NodeId) -> Option<String> {
        let cell = self.cell(id)?;
        let idx = cell.primary_input?;
        cell.read().inputs.get(idx).map(|p| p.name().to_string())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.cells.iter().map(NodeCell::name).collect::<Vec<_>>())
            .field("plan", &self.plan)
            .finish()
    }
}
