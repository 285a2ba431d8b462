//! Ports and connections.
//!
//! Each node declares its ports via a static `PortDescriptor` array. At build
//! time every descriptor becomes a runtime port:
//!
//! - `OutputPort` owns a shared buffer (`Arc<RwLock<PortBuffer>>`) written by
//!   the owning node during its tick.
//! - `InputPort` owns its own buffer plus at most one `Connection` to an
//!   upstream output buffer. `propagate` copies upstream into local.
//!
//! Lock order is always node lock → port buffer lock, never the reverse.

use crate::pipeline::error::{NodeError, PipelineError};
use crate::pipeline::id::{NodeId, Timestamp};
use crate::pipeline::packet::Payload;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The kind of data flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortKind {
    /// Frames.
    Image,
    /// Detected or tracked objects.
    ObjectList,
    /// Scalar state (e.g. motion / no motion).
    State,
    /// Discrete events.
    Event,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Image => "image",
            PortKind::ObjectList => "object-list",
            PortKind::State => "state",
            PortKind::Event => "event",
        };
        f.write_str(name)
    }
}

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Static descriptor for a node's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: &'static str,
    pub direction: PortDirection,
    pub kind: PortKind,
    /// Reading this input while unconnected is a `NotConnected` error.
    pub required: bool,
}

impl PortDescriptor {
    pub const fn input(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            kind,
            required: true,
        }
    }

    pub const fn optional_input(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            kind,
            required: false,
        }
    }

    pub const fn output(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            kind,
            required: false,
        }
    }
}

/// Payload plus the logical timestamp of its last update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortBuffer {
    pub payload: Payload,
    pub timestamp: Timestamp,
}

pub type SharedBuffer = Arc<RwLock<PortBuffer>>;

/// Runtime output port. Fans out to any number of inputs.
#[derive(Debug)]
pub struct OutputPort {
    pub descriptor: PortDescriptor,
    buffer: SharedBuffer,
    fanout: usize,
    written: bool,
}

impl OutputPort {
    pub fn new(descriptor: PortDescriptor) -> Self {
        Self {
            descriptor,
            buffer: Arc::new(RwLock::new(PortBuffer::default())),
            fanout: 0,
            written: false,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn timestamp(&self) -> Timestamp {
        self.buffer.read().timestamp
    }

    /// Number of inputs reading this output.
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Clone of the current buffer (for snapshots and tests).
    pub fn read(&self) -> PortBuffer {
        self.buffer.read().clone()
    }

    /// Replace the buffer content and stamp it. Timestamps never decrease.
    pub fn publish(&mut self, payload: Payload, timestamp: Timestamp) -> Result<(), NodeError> {
        self.write_with(timestamp, |slot| *slot = payload)
    }

    /// Write in place (reusing the existing allocation) and stamp.
    pub fn write_with(
        &mut self,
        timestamp: Timestamp,
        f: impl FnOnce(&mut Payload),
    ) -> Result<(), NodeError> {
        let mut buf = self.buffer.write();
        if self.written && timestamp < buf.timestamp {
            return Err(NodeError::TimestampRegression {
                port: self.descriptor.name.to_string(),
                previous: buf.timestamp,
                attempted: timestamp,
            });
        }
        f(&mut buf.payload);
        if !buf.payload.fits(self.descriptor.kind) {
            buf.payload = Payload::Empty;
            return Err(NodeError::PayloadMismatch {
                port: self.descriptor.name.to_string(),
                expected: self.descriptor.kind,
            });
        }
        buf.timestamp = timestamp;
        self.written = true;
        Ok(())
    }

    /// Forget the previous content (used by reset).
    pub fn clear(&mut self) {
        *self.buffer.write() = PortBuffer::default();
        self.written = false;
    }
}

/// A directed edge from an upstream output buffer into one input.
#[derive(Debug, Clone)]
pub struct Connection {
    pub source_node: NodeId,
    pub source_port: &'static str,
    source: SharedBuffer,
}

/// Runtime input port.
#[derive(Debug)]
pub struct InputPort {
    pub descriptor: PortDescriptor,
    buffer: PortBuffer,
    connection: Option<Connection>,
}

impl InputPort {
    /// `template` pre-sizes the local buffer (e.g. a working resolution).
    pub fn new(descriptor: PortDescriptor, template: Payload) -> Self {
        Self {
            descriptor,
            buffer: PortBuffer {
                payload: template,
                timestamp: 0,
            },
            connection: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.buffer.payload
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.buffer.timestamp
    }

    /// Copy the upstream buffer into this input through `convert` and take
    /// over its timestamp. Returns `false` when unconnected.
    pub fn propagate(&mut self, convert: impl FnOnce(&PortDescriptor, &Payload, &mut Payload)) -> bool {
        let Some(conn) = &self.connection else {
            return false;
        };
        let src = conn.source.read();
        convert(&self.descriptor, &src.payload, &mut self.buffer.payload);
        self.buffer.timestamp = src.timestamp;
        true
    }

    pub fn clear(&mut self) {
        self.buffer.timestamp = 0;
        if let Payload::Image(img) = &mut self.buffer.payload {
            img.data_mut().iter_mut().for_each(|v| *v = 0);
        } else {
            self.buffer.payload = Payload::Empty;
        }
    }
}

/// Bind `output` (owned by `source_node`) to `input`.
///
/// Fails with `KindMismatch` when the declared kinds differ and with
/// `AlreadyBound` when the input already has a source.
pub fn connect(
    source_node: NodeId,
    output: &mut OutputPort,
    input: &mut InputPort,
    input_label: &str,
) -> Result<(), PipelineError> {
    if output.descriptor.kind != input.descriptor.kind {
        return Err(PipelineError::KindMismatch {
            from: format!("{}.{}", source_node, output.descriptor.name),
            from_kind: output.descriptor.kind,
            to: input_label.to_string(),
            to_kind: input.descriptor.kind,
        });
    }
    if input.connection.is_some() {
        return Err(PipelineError::AlreadyBound(input_label.to_string()));
    }
    input.connection = Some(Connection {
        source_node,
        source_port: output.descriptor.name,
        source: Arc::clone(&output.buffer),
    });
    output.fanout += 1;
    Ok(())
}
