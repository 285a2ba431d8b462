//! FrameSource — synthetic capture source.
//!
//! Produces grayscale frames with a bright square sweeping over a dark
//! background. Always self-driven. Frames are stamped with their recording
//! time (`frame_index * 1000 / fps`), so timestamps are independent of how
//! fast the pipeline actually runs.

use crate::config::NodeDescriptor;
use crate::pipeline::error::{CommandError, NodeError, PipelineError, PipelineResult};
use crate::pipeline::id::Timestamp;
use crate::pipeline::node::{NodeBehavior, TickContext};
use crate::pipeline::packet::{Image, ParamValue, Payload};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde_json::json;

static PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", PortKind::Image)];

const BACKGROUND: u8 = 20;
const FOREGROUND: u8 = 220;
const SQUARE: u32 = 8;

pub struct FrameSourceNode {
    width: u32,
    height: u32,
    fps: f64,
    /// Stop after this many frames.
    frame_limit: Option<u64>,
    frame_index: u64,
}

impl FrameSourceNode {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            frame_limit: None,
            frame_index: 0,
        }
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn from_descriptor(desc: &NodeDescriptor) -> PipelineResult<Self> {
        let params = &desc.params;
        let width = params.u64_or("width", 64);
        let height = params.u64_or("height", 48);
        let fps = params.f64_or("fps", 30.0);
        if width == 0 || height == 0 || width > u32::MAX as u64 || height > u32::MAX as u64 {
            return Err(PipelineError::InvalidParam {
                node: desc.name.clone(),
                message: format!("invalid frame size {}x{}", width, height),
            });
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(PipelineError::InvalidParam {
                node: desc.name.clone(),
                message: format!("fps must be positive, got {}", fps),
            });
        }
        let mut node = Self::new(width as u32, height as u32, fps);
        if let Some(frames) = params.get("frames").and_then(ParamValue::as_int) {
            let limit = u64::try_from(frames).map_err(|_| PipelineError::InvalidParam {
                node: desc.name.clone(),
                message: format!("frames must not be negative, got {}", frames),
            })?;
            node.frame_limit = Some(limit);
        }
        Ok(node)
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn frame_timestamp(&self) -> Timestamp {
        (self.frame_index as f64 * 1000.0 / self.fps).round() as Timestamp
    }

    fn render(&self, img: &mut Image) {
        let span = self.width.saturating_sub(SQUARE).max(1);
        let x0 = (self.frame_index as u32 % span).min(self.width.saturating_sub(1));
        let y0 = self.height.saturating_sub(SQUARE) / 2;
        let width = img.width;
        for (i, px) in img.data_mut().iter_mut().enumerate() {
            let (x, y) = (i as u32 % width, i as u32 / width);
            let inside = (x0..x0 + SQUARE).contains(&x) && (y0..y0 + SQUARE).contains(&y);
            *px = if inside { FOREGROUND } else { BACKGROUND };
        }
    }
}

impl NodeBehavior for FrameSourceNode {
    fn type_name(&self) -> &str {
        "FrameSource"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        if self.frame_limit.is_some_and(|limit| self.frame_index >= limit) {
            return Err(NodeError::StreamEnded);
        }
        ctx.set_timestamp(self.frame_timestamp());
        let (width, height) = (self.width, self.height);
        ctx.write("out", |slot| {
            let reusable = matches!(slot, Payload::Image(img)
                if img.width == width && img.height == height && img.channels == 1);
            if !reusable {
                *slot = Payload::Image(Image::new(width, height, 1));
            }
            if let Payload::Image(img) = slot {
                self.render(img);
            }
        })?;
        self.frame_index += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.frame_index = 0;
    }

    fn is_always_self_driven(&self) -> bool {
        true
    }

    fn is_input(&self) -> bool {
        true
    }

    fn rate_hz(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn set_param(&mut self, key: &str, value: &ParamValue) -> Result<(), CommandError> {
        match key {
            "frames" => {
                let frames = value
                    .as_int()
                    .ok_or_else(|| CommandError::invalid(key, "expected an integer"))?;
                let limit = u64::try_from(frames)
                    .map_err(|_| CommandError::invalid(key, "must not be negative"))?;
                self.frame_limit = Some(limit);
                Ok(())
            }
            _ => Err(CommandError::UnknownParam(key.to_string())),
        }
    }

    fn param(&self, key: &str) -> Option<ParamValue> {
        match key {
            "fps" => Some(ParamValue::Float(self.fps)),
            "width" => Some(ParamValue::Int(self.width as i64)),
            "height" => Some(ParamValue::Int(self.height as i64)),
            "frames" => self.frame_limit.map(|f| ParamValue::Int(f as i64)),
            _ => None,
        }
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "frame": self.frame_index,
            "fps": self.fps,
            "frames": self.frame_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::pipeline::port::OutputPort;
    use std::time::Duration;

    fn tick(node: &mut FrameSourceNode, outputs: &mut [OutputPort]) -> Result<Timestamp, NodeError> {
        let context = Context::default();
        let mut ctx = TickContext::new(&[], outputs, &context, 0, 1, Duration::ZERO);
        node.tick(&mut ctx)?;
        Ok(ctx.timestamp())
    }

    #[test]
    fn test_frames_stamped_with_recording_time() {
        let mut node = FrameSourceNode::new(16, 16, 30.0);
        let mut outputs = vec![OutputPort::new(PORTS[0])];
        let stamps: Vec<_> = (0..4).map(|_| tick(&mut node, &mut outputs).unwrap()).collect();
        assert_eq!(stamps, vec![0, 33, 67, 100]);
        assert_eq!(outputs[0].timestamp(), 100);
    }

    #[test]
    fn test_frame_has_foreground_square() {
        let mut node = FrameSourceNode::new(32, 16, 10.0);
        let mut outputs = vec![OutputPort::new(PORTS[0])];
        tick(&mut node, &mut outputs).unwrap();
        let buf = outputs[0].read();
        let img = buf.payload.as_image().unwrap();
        let bright = img.data().iter().filter(|&&v| v == FOREGROUND).count();
        assert_eq!(bright, (SQUARE * SQUARE) as usize);
    }

    #[test]
    fn test_frame_limit_ends_stream() {
        let mut node = FrameSourceNode::new(8, 8, 10.0).with_frame_limit(2);
        let mut outputs = vec![OutputPort::new(PORTS[0])];
        assert!(tick(&mut node, &mut outputs).is_ok());
        assert!(tick(&mut node, &mut outputs).is_ok());
        assert_eq!(tick(&mut node, &mut outputs), Err(NodeError::StreamEnded));
        node.reset();
        assert!(tick(&mut node, &mut outputs).is_err(), "output timestamps never go back");
    }

    #[test]
    fn test_descriptor_validation() {
        let desc = NodeDescriptor::new("FrameSource", 1, "cam").param("fps", 0.0);
        assert!(FrameSourceNode::from_descriptor(&desc).is_err());
        let desc = NodeDescriptor::new("FrameSource", 1, "cam").param("frames", 5i64);
        let node = FrameSourceNode::from_descriptor(&desc).unwrap();
        assert_eq!(node.param("frames"), Some(ParamValue::Int(5)));
    }

    #[test]
    fn test_negative_frame_limit_is_rejected() {
        let desc = NodeDescriptor::new("FrameSource", 1, "cam").param("frames", -1i64);
        assert!(matches!(
            FrameSourceNode::from_descriptor(&desc),
            Err(PipelineError::InvalidParam { node, .. }) if node == "cam"
        ));

        let mut node = FrameSourceNode::new(8, 8, 10.0).with_frame_limit(3);
        assert!(matches!(
            node.set_param("frames", &ParamValue::Int(-2)),
            Err(CommandError::InvalidValue { .. })
        ));
        assert_eq!(node.param("frames"), Some(ParamValue::Int(3)));
    }
}
