//! Configuration module for framepipe
//!
//! A pipeline file describes the global execution options, the run context
//! and an ordered list of node descriptors. Node order matters: it is the
//! iteration order of master resolution and of the central driver.
//!
//! # Formats
//!
//! - `*.toml` - parsed with `toml`
//! - anything else - parsed as JSON
//!
//! # Example
//!
//! ```toml
//! name = "motion"
//!
//! [options]
//! mode = "centralized"
//! tick_rate_hz = 30.0
//!
//! [[nodes]]
//! type = "FrameSource"
//! id = 1
//! name = "camera"
//! params = { fps = 30.0, frames = 300 }
//!
//! [[nodes]]
//! type = "Threshold"
//! id = 2
//! name = "binarize"
//! inputs = [{ port = "in", source_node = 1, source_port = "out" }]
//! ```

use crate::error::{FramepipeError, Result, ResultExt};
use crate::pipeline::id::NodeId;
use crate::pipeline::packet::{ParamValue, Params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default central tick rate in Hz
pub const DEFAULT_TICK_RATE_HZ: f64 = 30.0;

/// Current configuration file version
pub const CONFIG_VERSION: u32 = 1;

/// Scheduling discipline for self-driven nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One driver loop ticks every self-driven node once per cycle.
    #[default]
    Centralized,
    /// Each self-driven node runs on its own clock thread.
    RealTime,
}

/// Global execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Rate of the central driver
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: f64,

    /// `false` is fast mode: no pacing delays anywhere
    #[serde(default = "default_true")]
    pub real_time: bool,

    /// Stop after this many central cycles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,
}

fn default_tick_rate() -> f64 {
    DEFAULT_TICK_RATE_HZ
}

fn default_true() -> bool {
    true
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            real_time: true,
            max_cycles: None,
        }
    }
}

/// Run context settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Generated from the start time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            job_id: None,
        }
    }
}

/// Source of one input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub port: String,
    pub source_node: NodeId,
    pub source_port: String,
}

/// One configured node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,

    pub id: NodeId,

    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputBinding>,

    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,

    /// Make this node self-driven regardless of its type
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_process: bool,

    /// Own clock rate for a self-driven node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Which input drives this node (defaults to the first connected one)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_input: Option<String>,

    /// Per-node override of the global scheduling discipline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<ExecutionMode>,
}

impl NodeDescriptor {
    pub fn new(node_type: impl Into<String>, id: u32, name: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            id: NodeId(id),
            name: name.into(),
            inputs: Vec::new(),
            params: Params::new(),
            auto_process: false,
            fps: None,
            primary_input: None,
            clock: None,
        }
    }

    /// Bind `port` to `source_port` of node `source_node`.
    pub fn input(mut self, port: &str, source_node: u32, source_port: &str) -> Self {
        self.inputs.push(InputBinding {
            port: port.to_string(),
            source_node: NodeId(source_node),
            source_port: source_port.to_string(),
        });
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn auto_process(mut self, fps: Option<f64>) -> Self {
        self.auto_process = true;
        self.fps = fps;
        self
    }

    pub fn primary(mut self, port: &str) -> Self {
        self.primary_input = Some(port.to_string());
        self
    }

    pub fn clock(mut self, mode: ExecutionMode) -> Self {
        self.clock = Some(mode);
        self
    }
}

/// A complete pipeline file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default = "default_pipeline_name")]
    pub name: String,

    #[serde(default)]
    pub options: ExecutionOptions,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            name: default_pipeline_name(),
            options: ExecutionOptions::default(),
            context: ContextConfig::default(),
            nodes: Vec::new(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_node(mut self, node: NodeDescriptor) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FramepipeError::Config(format!("Failed to parse TOML pipeline: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| FramepipeError::Config(format!("Failed to parse JSON pipeline: {}", e)))
    }

    /// Load a pipeline file; the format follows the extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(FramepipeError::from)
            .with_context(|| format!("Failed to read pipeline file {:?}", path))?;

        let config = if is_toml(path) {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }?;
        config.validate()?;
        tracing::info!(
            "Loaded pipeline '{}' ({} nodes) from {:?}",
            config.name,
            config.nodes.len(),
            path
        );
        Ok(config)
    }

    /// Save a pipeline file; the format follows the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(FramepipeError::from)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| FramepipeError::Serialization(format!("Failed to serialize pipeline: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| FramepipeError::Serialization(format!("Failed to serialize pipeline: {}", e)))?
        };

        std::fs::write(path, content)
            .map_err(FramepipeError::from)
            .with_context(|| format!("Failed to write pipeline file {:?}", path))
    }

    /// File-level checks. Graph-level checks (unique ids, port kinds,
    /// resolvability) happen when the graph is built.
    pub fn validate(&self) -> Result<()> {
        if self.version > CONFIG_VERSION {
            return Err(FramepipeError::Config(format!(
                "Unsupported pipeline version {} (max {})",
                self.version, CONFIG_VERSION
            )));
        }
        if !(self.options.tick_rate_hz.is_finite() && self.options.tick_rate_hz >= 0.0) {
            return Err(FramepipeError::Config(format!(
                "Invalid tick_rate_hz {}",
                self.options.tick_rate_hz
            )));
        }
        if let Some(node) = self
            .nodes
            .iter()
            .find(|n| n.fps.is_some_and(|fps| !(fps.is_finite() && fps >= 0.0)))
        {
            return Err(FramepipeError::Config(format!(
                "Invalid fps for node '{}'",
                node.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "motion"

[options]
mode = "real_time"
tick_rate_hz = 25.0
max_cycles = 100

[context]
output_dir = "/tmp/out"
job_id = "run-1"

[[nodes]]
type = "FrameSource"
id = 1
name = "camera"
params = { fps = 30.0, frames = 300 }

[[nodes]]
type = "Threshold"
id = 2
name = "binarize"
inputs = [{ port = "in", source_node = 1, source_port = "out" }]
params = { threshold = 128 }
"#;

    #[test]
    fn test_parse_toml() {
        let config = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.options.mode, ExecutionMode::RealTime);
        assert_eq!(config.options.max_cycles, Some(100));
        assert!(config.options.real_time);
        assert_eq!(config.context.job_id.as_deref(), Some("run-1"));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].inputs[0].source_node, NodeId(1));
        assert_eq!(config.nodes[0].params.f64_or("fps", 0.0), 30.0);
        assert_eq!(config.nodes[1].params.u64_or("threshold", 0), 128);
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_json_str(r#"{"nodes": []}"#).unwrap();
        assert_eq!(config.name, "pipeline");
        assert_eq!(config.options.mode, ExecutionMode::Centralized);
        assert_eq!(config.options.tick_rate_hz, DEFAULT_TICK_RATE_HZ);
        assert_eq!(config.context.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_descriptor_builder() {
        let node = NodeDescriptor::new("Threshold", 2, "binarize")
            .input("in", 1, "out")
            .param("threshold", 90i64)
            .primary("in");
        assert_eq!(node.inputs.len(), 1);
        assert_eq!(node.primary_input.as_deref(), Some("in"));
        assert!(!node.auto_process);
    }

    #[test]
    fn test_json_uses_type_key() {
        let node = NodeDescriptor::new("StateSink", 3, "sink");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "StateSink");
        assert!(json.get("auto_process").is_none());
    }

    #[test]
    fn test_validate_rejects_future_version() {
        let config = PipelineConfig {
            version: CONFIG_VERSION + 1,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_fps() {
        let config = PipelineConfig::new("bad")
            .with_node(NodeDescriptor::new("FrameSource", 1, "cam").auto_process(Some(-1.0)));
        assert!(config.validate().is_err());
    }
}
