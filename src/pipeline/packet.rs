//! Data carried through connections, and parameter values sent to nodes.
//!
//! Buffers are owned value types. A connection copies the upstream output
//! into the downstream input on every propagate; no node keeps a reference
//! into another node's buffer past one tick.

use crate::pipeline::id::Timestamp;
use crate::pipeline::port::PortKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An 8-bit image with interleaved channels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    data: Vec<u8>,
}

impl Image {
    /// Create a zero-filled image.
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self {
            width,
            height,
            channels,
            data: vec![0; len],
        }
    }

    /// Create a single-channel image from a per-pixel function.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let mut img = Self::new(width, height, 1);
        for y in 0..height {
            for x in 0..width {
                img.data[(y * width + x) as usize] = f(x, y);
            }
        }
        img
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel value of channel `c` at (x, y).
    #[inline]
    pub fn pixel(&self, x: u32, y: u32, c: u8) -> u8 {
        let idx = ((y * self.width + x) * self.channels as u32 + c as u32) as usize;
        self.data[idx]
    }

    /// Mean over all samples, 0 for an empty image.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    #[inline]
    pub fn same_geometry(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }

    /// Resample `src` into `self`'s geometry (nearest neighbour, channel
    /// averaging or replication as needed). `self` keeps its allocation.
    pub fn fit_from(&mut self, src: &Image) {
        if self.same_geometry(src) {
            self.data.copy_from_slice(&src.data);
            return;
        }
        if src.is_empty() || self.is_empty() {
            self.data.iter_mut().for_each(|v| *v = 0);
            return;
        }
        let (dw, dh, dc) = (self.width, self.height, self.channels);
        for y in 0..dh {
            let sy = (y as u64 * src.height as u64 / dh as u64) as u32;
            for x in 0..dw {
                let sx = (x as u64 * src.width as u64 / dw as u64) as u32;
                let gray = if src.channels == 1 {
                    src.pixel(sx, sy, 0)
                } else {
                    let sum: u32 = (0..src.channels).map(|c| src.pixel(sx, sy, c) as u32).sum();
                    (sum / src.channels as u32) as u8
                };
                for c in 0..dc {
                    let value = if src.channels == dc { src.pixel(sx, sy, c) } else { gray };
                    let idx = ((y * dw + x) * dc as u32 + c as u32) as usize;
                    self.data[idx] = value;
                }
            }
        }
    }
}

/// An object found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f64,
}

/// A discrete event raised by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub label: String,
    pub timestamp: Timestamp,
    pub object_id: Option<u32>,
}

/// The buffer carried by a port.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// Nothing written yet.
    #[default]
    Empty,
    Image(Image),
    Objects(Vec<DetectedObject>),
    State(bool),
    Event(Option<EventRecord>),
}

impl Payload {
    /// The port kind this payload belongs to, `None` for `Empty`.
    pub fn kind(&self) -> Option<PortKind> {
        match self {
            Payload::Empty => None,
            Payload::Image(_) => Some(PortKind::Image),
            Payload::Objects(_) => Some(PortKind::ObjectList),
            Payload::State(_) => Some(PortKind::State),
            Payload::Event(_) => Some(PortKind::Event),
        }
    }

    /// Whether this payload may be written to a port of `kind`.
    pub fn fits(&self, kind: PortKind) -> bool {
        self.kind().map_or(true, |k| k == kind)
    }

    /// Default convert-fit: copy `src` into `self`, resampling images into
    /// a pre-sized destination and reusing allocations where possible.
    pub fn fit_from(&mut self, src: &Payload) {
        match (self, src) {
            (Payload::Image(dst), Payload::Image(img)) if !dst.is_empty() => dst.fit_from(img),
            (Payload::Objects(dst), Payload::Objects(objs)) => dst.clone_from(objs),
            (dst, src) => dst.clone_from(src),
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Payload::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn as_objects(&self) -> Option<&[DetectedObject]> {
        match self {
            Payload::Objects(objs) => Some(objs),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<bool> {
        match self {
            Payload::State(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventRecord> {
        match self {
            Payload::Event(ev) => ev.as_ref(),
            _ => None,
        }
    }
}

/// Parameter and command values sent to nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers are accepted where floats are expected.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Bool(v) => serde_json::Value::from(*v),
            ParamValue::Int(v) => serde_json::Value::from(*v),
            ParamValue::Float(v) => serde_json::Value::from(*v),
            ParamValue::String(v) => serde_json::Value::from(v.as_str()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

/// Named parameters of a node, as read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(ParamValue::as_float).unwrap_or(default)
    }

    /// Negative values fall back to `default`.
    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key)
            .and_then(ParamValue::as_int)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(ParamValue::as_bool).unwrap_or(default)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(ParamValue::as_str).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}
