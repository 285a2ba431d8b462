//! ThresholdNode — binarises frames.
//!
//! Pixels strictly above `threshold` become 255, everything else 0. When a
//! working resolution is configured (`work_width` / `work_height`), incoming
//! frames are resampled into it while propagating, before the tick runs.

use crate::config::NodeDescriptor;
use crate::pipeline::error::{CommandError, NodeError, PipelineError, PipelineResult};
use crate::pipeline::node::{NodeBehavior, TickContext};
use crate::pipeline::packet::{Image, ParamValue, Payload};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde_json::json;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Image),
    PortDescriptor::output("out", PortKind::Image),
];

pub struct ThresholdNode {
    threshold: u8,
    working_size: Option<(u32, u32)>,
    frames: u64,
    foreground_ratio: f64,
}

impl ThresholdNode {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            working_size: None,
            frames: 0,
            foreground_ratio: 0.0,
        }
    }

    pub fn with_working_size(mut self, width: u32, height: u32) -> Self {
        self.working_size = Some((width, height));
        self
    }

    pub fn from_descriptor(desc: &NodeDescriptor) -> PipelineResult<Self> {
        let params = &desc.params;
        let threshold = params.u64_or("threshold", 128);
        let threshold = u8::try_from(threshold).map_err(|_| PipelineError::InvalidParam {
            node: desc.name.clone(),
            message: format!("threshold {} out of range 0..=255", threshold),
        })?;
        let mut node = Self::new(threshold);
        match (params.u64_or("work_width", 0), params.u64_or("work_height", 0)) {
            (0, 0) => {}
            (w, h) if w > 0 && h > 0 && w <= u32::MAX as u64 && h <= u32::MAX as u64 => {
                node.working_size = Some((w as u32, h as u32));
            }
            (w, h) => {
                return Err(PipelineError::InvalidParam {
                    node: desc.name.clone(),
                    message: format!("invalid working size {}x{}", w, h),
                })
            }
        }
        Ok(node)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

impl NodeBehavior for ThresholdNode {
    fn type_name(&self) -> &str {
        "Threshold"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        let Some(frame) = ctx.input("in")?.as_image() else {
            // Upstream has not produced a frame yet.
            return Ok(());
        };
        let threshold = self.threshold;
        let mut lit = 0usize;
        ctx.write("out", |slot| {
            let reusable = matches!(slot, Payload::Image(img) if img.same_geometry(frame));
            if !reusable {
                *slot = Payload::Image(Image::new(frame.width, frame.height, frame.channels));
            }
            if let Payload::Image(out) = slot {
                for (dst, &src) in out.data_mut().iter_mut().zip(frame.data()) {
                    *dst = if src > threshold { 255 } else { 0 };
                    lit += usize::from(src > threshold);
                }
            }
        })?;
        self.frames += 1;
        self.foreground_ratio = if frame.is_empty() {
            0.0
        } else {
            lit as f64 / frame.data().len() as f64
        };
        Ok(())
    }

    fn reset(&mut self) {
        self.frames = 0;
        self.foreground_ratio = 0.0;
    }

    fn prepare_input(&self, port: &PortDescriptor) -> Payload {
        match self.working_size {
            Some((w, h)) if port.name == "in" => Payload::Image(Image::new(w, h, 1)),
            _ => Payload::Empty,
        }
    }

    fn set_param(&mut self, key: &str, value: &ParamValue) -> Result<(), CommandError> {
        match key {
            "threshold" => {
                let v = value
                    .as_int()
                    .ok_or_else(|| CommandError::invalid(key, "expected an integer"))?;
                self.threshold = u8::try_from(v)
                    .map_err(|_| CommandError::invalid(key, format!("{} out of range 0..=255", v)))?;
                tracing::debug!("Threshold set to {}", self.threshold);
                Ok(())
            }
            _ => Err(CommandError::UnknownParam(key.to_string())),
        }
    }

    fn param(&self, key: &str) -> Option<ParamValue> {
        match key {
            "threshold" => Some(ParamValue::Int(self.threshold as i64)),
            _ => None,
        }
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "threshold": self.threshold,
            "frames": self.frames,
            "foreground_ratio": self.foreground_ratio,
        })
    }
}
