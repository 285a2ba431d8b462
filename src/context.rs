//! Explicit run context.
//!
//! Built once from configuration and passed by reference into graph
//! construction and into every tick. There is no process-wide state.

use crate::config::{ExecutionMode, PipelineConfig};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Where nodes may write their output.
    pub output_dir: PathBuf,
    /// Identifier of this run.
    pub job_id: String,
    /// Default scheduling discipline is the central driver.
    pub centralized: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            job_id: String::from("default"),
            centralized: true,
        }
    }
}

impl Context {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let job_id = config
            .context
            .job_id
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
        Self {
            output_dir: config.context.output_dir.clone(),
            job_id,
            centralized: config.options.mode == ExecutionMode::Centralized,
        }
    }

    /// Path for a node output file under this job.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(&self.job_id).join(file_name)
    }
}
