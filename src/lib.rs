//! # framepipe: frame-by-frame node pipelines
//!
//! Composes independently written processing nodes into a directed graph and
//! runs it repeatedly, frame by frame, with real-time pacing.
//!
//! ## Architecture
//!
//! - **Config**: declarative pipeline files (TOML or JSON) listing nodes and
//!   their input bindings
//! - **Graph**: nodes, typed ports and connections, with a resolved master
//!   for every node
//! - **Scheduling**: a central driver and optional per-node real-time clocks
//! - **Async offload**: heavy node work on a background worker at its own rate
//! - **Commands**: a thread-safe handle to pause, inspect and tune a running
//!   pipeline
//!
//! ## Example
//!
//! ```no_run
//! use framepipe::{NodeDescriptor, NodeRegistry, Pipeline, PipelineConfig};
//!
//! fn main() -> framepipe::Result<()> {
//!     let config = PipelineConfig::new("motion")
//!         .with_node(NodeDescriptor::new("FrameSource", 1, "camera").param("frames", 300i64))
//!         .with_node(NodeDescriptor::new("Threshold", 2, "binarize").input("in", 1, "out"))
//!         .with_node(NodeDescriptor::new("StateSink", 3, "sink").input("in", 2, "out"));
//!
//!     let mut pipeline = Pipeline::from_config(&config, &NodeRegistry::with_builtins())?;
//!     let handle = pipeline.handle();
//!     let stats = pipeline.run()?;
//!     println!("{} cycles, sink state: {:?}", stats.cycles, handle.status().node("sink"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{ExecutionMode, ExecutionOptions, NodeDescriptor, PipelineConfig};
pub use context::Context;
pub use error::{FramepipeError, Result, ResultExt};
pub use pipeline::{
    CommandError, CycleOutcome, GraphBuilder, GraphSnapshot, NodeBehavior, NodeError, NodeId,
    NodeRegistry, Pipeline, PipelineError, PipelineEvent, PipelineHandle, Statistics,
    TickContext,
};
