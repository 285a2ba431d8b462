//! Built-in node types.
//!
//! This module defines the node types that can be instantiated by name from
//! a pipeline file without registering anything.

use crate::config::NodeDescriptor;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::NodeBehavior;
use crate::pipeline::nodes::{BlobDetectorNode, FrameSourceNode, StateSinkNode, ThresholdNode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Types of nodes available without registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinNodeType {
    // Sources
    /// Synthetic frame source.
    FrameSource,

    // Transforms
    /// Image binarisation.
    Threshold,
    /// Asynchronous blob detection.
    BlobDetector,

    // Sinks
    /// Records what reached the end of the chain.
    StateSink,
}

impl BuiltinNodeType {
    /// Name used in pipeline files.
    pub fn type_name(&self) -> &'static str {
        match self {
            BuiltinNodeType::FrameSource => "FrameSource",
            BuiltinNodeType::Threshold => "Threshold",
            BuiltinNodeType::BlobDetector => "BlobDetector",
            BuiltinNodeType::StateSink => "StateSink",
        }
    }

    /// Get the display name for this node type.
    pub fn display_name(&self) -> &'static str {
        match self {
            BuiltinNodeType::FrameSource => "Frame Source",
            BuiltinNodeType::Threshold => "Threshold",
            BuiltinNodeType::BlobDetector => "Blob Detector",
            BuiltinNodeType::StateSink => "State Sink",
        }
    }

    /// Get all built-in node types.
    pub fn all() -> &'static [BuiltinNodeType] {
        &[
            BuiltinNodeType::FrameSource,
            BuiltinNodeType::Threshold,
            BuiltinNodeType::BlobDetector,
            BuiltinNodeType::StateSink,
        ]
    }

    /// Check if this node type is a capture source.
    pub fn is_source(&self) -> bool {
        matches!(self, BuiltinNodeType::FrameSource)
    }

    /// Get a detailed description of what this node does.
    pub fn description(&self) -> &'static str {
        match self {
            BuiltinNodeType::FrameSource =>
                "Generates synthetic grayscale frames.\n\
                 Always self-driven; paces itself at `fps`.\n\
                 Ends the stream after `frames` frames.",

            BuiltinNodeType::Threshold =>
                "Binarises frames at `threshold`.\n\
                 Optional working resolution (`work_width`, `work_height`).\n\
                 Threshold can be changed while running.",

            BuiltinNodeType::BlobDetector =>
                "Finds bounding boxes of foreground regions.\n\
                 Detection runs in the background at `detection_fps`.\n\
                 Drops frames instead of queueing when overloaded.",

            BuiltinNodeType::StateSink =>
                "Records the timestamps that reached it.\n\
                 Publishes whether the last frame had foreground.\n\
                 History is bounded by `capacity`.",
        }
    }

    /// Construct a node of this type from its descriptor.
    pub fn create(&self, desc: &NodeDescriptor) -> PipelineResult<Box<dyn NodeBehavior>> {
        Ok(match self {
            BuiltinNodeType::FrameSource => Box::new(FrameSourceNode::from_descriptor(desc)?),
            BuiltinNodeType::Threshold => Box::new(ThresholdNode::from_descriptor(desc)?),
            BuiltinNodeType::BlobDetector => Box::new(BlobDetectorNode::from_descriptor(desc)?),
            BuiltinNodeType::StateSink => Box::new(StateSinkNode::from_descriptor(desc)?),
        })
    }
}

impl FromStr for BuiltinNodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinNodeType::all()
            .iter()
            .copied()
            .find(|t| t.type_name() == s)
            .ok_or_else(|| format!("unknown built-in node type '{}'", s))
    }
}

impl std::fmt::Display for BuiltinNodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
