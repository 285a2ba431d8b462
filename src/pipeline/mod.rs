//! Node graph orchestration engine.
//!
//! Nodes with typed ports are connected into a graph, every node is assigned
//! the upstream "master" whose completion triggers it, and the graph is then
//! run frame by frame.
//!
//! # Architecture
//!
//! ```text
//! [FrameSource] ──► [Threshold] ──► [StateSink]
//!       │
//!       └─────────► [BlobDetector] ─ ─ ► (async worker)
//! ```
//!
//! # Design
//!
//! - **Master resolution**: fixed-point propagation in configuration order;
//!   self-driven nodes are roots, everything else hangs below its primary
//!   input's source.
//! - **Two clocks**: a central driver ticks every root once per cycle, or a
//!   root runs on its own real-time clock thread. Dependents always run
//!   right after their master, depth-first.
//! - **One lock per node**: a tick holds the node's writer lock; commands
//!   take the same lock. The driver holds a graph lock per pass and skips
//!   the cycle instead of blocking when a command holds it.
//! - **Contained failures**: errors and panics in a tick are caught per node;
//!   only a node-declared fatal error stops the pipeline.

pub mod builder;
pub mod cell;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod executor;
pub mod id;
pub mod node;
pub mod node_type;
pub mod nodes;
pub mod offload;
pub mod packet;
pub mod plan;
pub mod port;
pub mod registry;
pub mod resolver;
pub mod snapshot;

pub use builder::{Graph, GraphBuilder, NodeOptions};
pub use cell::{TickOutcome, TickState};
pub use command::{GraphGuard, NodeAction, PipelineHandle};
pub use error::{CommandError, NodeError, PipelineError, PipelineResult};
pub use event::PipelineEvent;
pub use executor::{CycleOutcome, Pipeline};
pub use id::{NodeId, Timestamp};
pub use node::{NodeBehavior, TickContext};
pub use node_type::BuiltinNodeType;
pub use offload::{AsyncStats, AsyncStep, AsyncTask};
pub use packet::{DetectedObject, EventRecord, Image, ParamValue, Params, Payload};
pub use plan::{MasterPlan, PlanStats};
pub use port::{PortDescriptor, PortDirection, PortKind};
pub use registry::NodeRegistry;
pub use snapshot::{GraphSnapshot, NodeSnapshot, NodeTimings, Statistics};
