//! BlobDetectorNode — bounding boxes of foreground regions.
//!
//! Detection runs on an [`AsyncTask`] at `detection_fps`, slower than the
//! pipeline. Every tick publishes the most recently integrated object list,
//! so downstream nodes see results at most one async period stale.

use crate::config::NodeDescriptor;
use crate::pipeline::error::{CommandError, NodeError, PipelineError, PipelineResult};
use crate::pipeline::node::{NodeBehavior, TickContext};
use crate::pipeline::offload::{AsyncStats, AsyncTask};
use crate::pipeline::packet::{DetectedObject, Image, ParamValue, Payload};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde_json::json;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Image),
    PortDescriptor::output("objects", PortKind::ObjectList),
];

pub struct BlobDetectorNode {
    min_area: u32,
    worker: AsyncTask<Vec<DetectedObject>>,
    objects: Vec<DetectedObject>,
}

impl BlobDetectorNode {
    pub fn new(name: &str, detection_fps: f64, min_area: u32) -> Self {
        Self {
            min_area,
            worker: AsyncTask::new(name, detection_fps),
            objects: Vec::new(),
        }
    }

    pub fn from_descriptor(desc: &NodeDescriptor) -> PipelineResult<Self> {
        let fps = desc.params.f64_or("detection_fps", 5.0);
        if !fps.is_finite() || fps < 0.0 {
            return Err(PipelineError::InvalidParam {
                node: desc.name.clone(),
                message: format!("detection_fps must be >= 0, got {}", fps),
            });
        }
        let min_area = desc.params.u64_or("min_area", 4).min(u32::MAX as u64) as u32;
        Ok(Self::new(&desc.name, fps, min_area))
    }

    pub fn objects(&self) -> &[DetectedObject] {
        &self.objects
    }
}

/// 4-connected components of non-zero pixels (first channel).
pub fn detect_blobs(img: &Image, min_area: u32) -> Vec<DetectedObject> {
    let (w, h) = (img.width as usize, img.height as usize);
    let mut seen = vec![false; w * h];
    let mut objects = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if seen[start] || img.pixel((start % w) as u32, (start / w) as u32, 0) == 0 {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0, 0);
        let mut area = 0u32;

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            area += 1;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];
            for n in neighbours.into_iter().flatten() {
                if !seen[n] && img.pixel((n % w) as u32, (n / w) as u32, 0) != 0 {
                    seen[n] = true;
                    stack.push(n);
                }
            }
        }

        if area >= min_area {
            let width = (max_x - min_x + 1) as u32;
            let height = (max_y - min_y + 1) as u32;
            objects.push(DetectedObject {
                id: objects.len() as u32,
                x: min_x as u32,
                y: min_y as u32,
                width,
                height,
                score: area as f64 / (width * height) as f64,
            });
        }
    }
    objects
}

impl NodeBehavior for BlobDetectorNode {
    fn type_name(&self) -> &str {
        "BlobDetector"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        if let Some(frame) = ctx.input("in")?.as_image() {
            let min_area = self.min_area;
            let step = self.worker.step(ctx.elapsed(), || {
                let snapshot = frame.clone();
                move || detect_blobs(&snapshot, min_area)
            });
            if let Some(objects) = step.result {
                self.objects = objects;
            }
        }
        ctx.write("objects", |slot| match slot {
            Payload::Objects(current) => current.clone_from(&self.objects),
            other => *other = Payload::Objects(self.objects.clone()),
        })
    }

    fn reset(&mut self) {
        self.worker.reset();
        self.objects.clear();
    }

    fn set_param(&mut self, key: &str, value: &ParamValue) -> Result<(), CommandError> {
        match key {
            "detection_fps" => {
                let fps = value
                    .as_float()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .ok_or_else(|| CommandError::invalid(key, "expected a non-negative number"))?;
                self.worker.set_rate_hz(fps);
                Ok(())
            }
            "min_area" => {
                let area = value
                    .as_int()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| CommandError::invalid(key, "expected a non-negative integer"))?;
                self.min_area = area;
                Ok(())
            }
            _ => Err(CommandError::UnknownParam(key.to_string())),
        }
    }

    fn param(&self, key: &str) -> Option<ParamValue> {
        match key {
            "detection_fps" => Some(ParamValue::Float(self.worker.rate_hz())),
            "min_area" => Some(ParamValue::Int(self.min_area as i64)),
            _ => None,
        }
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "objects": self.objects,
            "busy": self.worker.is_running(),
        })
    }

    fn async_stats(&self) -> Option<AsyncStats> {
        Some(self.worker.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_separate_blobs() {
        // Two 2x2 squares and one single pixel.
        let img = Image::from_fn(8, 4, |x, y| {
            let a = x < 2 && y < 2;
            let b = (5..7).contains(&x) && (1..3).contains(&y);
            let speck = x == 3 && y == 3;
            if a || b || speck {
                255
            } else {
                0
            }
        });
        let objects = detect_blobs(&img, 2);
        assert_eq!(objects.len(), 2);
        assert_eq!((objects[0].x, objects[0].y, objects[0].width), (0, 0, 2));
        assert_eq!((objects[1].x, objects[1].y, objects[1].height), (5, 1, 2));
        assert_eq!(objects[1].score, 1.0);
        assert_eq!(objects[1].id, 1);
    }

    #[test]
    fn test_l_shape_score() {
        let img = Image::from_fn(2, 2, |x, y| if x == 1 && y == 1 { 0 } else { 9 });
        let objects = detect_blobs(&img, 1);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].score, 0.75);
    }

    #[test]
    fn test_empty_image() {
        assert!(detect_blobs(&Image::default(), 1).is_empty());
    }
}
