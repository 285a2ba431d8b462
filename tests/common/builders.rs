//! Test data builders for pipeline configurations and graphs

use framepipe::config::ExecutionOptions;
use framepipe::{NodeDescriptor, NodeRegistry, Pipeline, PipelineConfig};

/// Builder for the canonical source → filter → sink chain
pub struct ChainBuilder {
    fps: f64,
    frames: Option<u64>,
    threshold: i64,
    options: ExecutionOptions,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            fps: 30.0,
            frames: None,
            threshold: 100,
            options: ExecutionOptions {
                real_time: false,
                ..ExecutionOptions::default()
            },
        }
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn frames(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(self) -> PipelineConfig {
        let mut source = NodeDescriptor::new("FrameSource", 1, "source").param("fps", self.fps);
        if let Some(frames) = self.frames {
            source = source.param("frames", frames as i64);
        }
        let mut config = PipelineConfig::new("chain")
            .with_node(source)
            .with_node(
                NodeDescriptor::new("Threshold", 2, "filter")
                    .param("threshold", self.threshold)
                    .input("in", 1, "out"),
            )
            .with_node(NodeDescriptor::new("StateSink", 3, "sink").input("in", 2, "out"));
        config.options = self.options;
        config
    }

    pub fn build(self) -> Pipeline {
        Pipeline::from_config(&self.config(), &NodeRegistry::with_builtins())
            .expect("chain config is valid")
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
