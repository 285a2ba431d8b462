//! Node abstraction for the pipeline.
//!
//! Every node type implements [`NodeBehavior`]. The engine owns the node's
//! ports and hands them to the node once per tick through a [`TickContext`].
//! Nodes never see other nodes; all data arrives through input ports that the
//! engine has already propagated.

use crate::context::Context;
use crate::pipeline::error::{CommandError, NodeError};
use crate::pipeline::id::Timestamp;
use crate::pipeline::offload::AsyncStats;
use crate::pipeline::packet::{ParamValue, Payload};
use crate::pipeline::port::{InputPort, OutputPort, PortDescriptor};
use std::time::Duration;

static EMPTY: Payload = Payload::Empty;

/// Capability interface every node type implements.
pub trait NodeBehavior: Send + Sync {
    /// Registered type name of this node.
    fn type_name(&self) -> &str;

    /// Port descriptors for this node.
    fn ports(&self) -> &[PortDescriptor];

    /// Pull-process-push. Inputs are already propagated when this is called.
    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError>;

    /// Drop all processing state, keep parameters.
    fn reset(&mut self) {}

    /// Capture sources and similar nodes never accept a master.
    fn is_always_self_driven(&self) -> bool {
        false
    }

    /// Whether this node is an input source (its end of stream counts
    /// towards stopping the pipeline).
    fn is_input(&self) -> bool {
        false
    }

    /// Override for which input drives this node.
    fn primary_input(&self) -> Option<&str> {
        None
    }

    /// Own clock rate when running on a real-time clock.
    fn rate_hz(&self) -> Option<f64> {
        None
    }

    /// Initial buffer for an input port, e.g. a pre-sized working image.
    fn prepare_input(&self, _port: &PortDescriptor) -> Payload {
        Payload::Empty
    }

    /// Copy an upstream buffer into this node's representation.
    fn convert_input(&self, _port: &PortDescriptor, src: &Payload, dst: &mut Payload) {
        dst.fit_from(src);
    }

    fn set_param(&mut self, key: &str, _value: &ParamValue) -> Result<(), CommandError> {
        Err(CommandError::UnknownParam(key.to_string()))
    }

    fn param(&self, _key: &str) -> Option<ParamValue> {
        None
    }

    /// Node-specific commands not handled by the engine.
    fn on_command(
        &mut self,
        action: &str,
        _value: &ParamValue,
    ) -> Result<serde_json::Value, CommandError> {
        Err(CommandError::UnknownAction(action.to_string()))
    }

    /// Observable processing state for snapshots.
    fn state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn async_stats(&self) -> Option<AsyncStats> {
        None
    }
}

/// Context passed to [`NodeBehavior::tick`].
///
/// Input references live for the whole tick (`'a`), so a node can hold an
/// input while it pushes outputs.
pub struct TickContext<'a> {
    inputs: &'a [InputPort],
    outputs: &'a mut [OutputPort],
    context: &'a Context,
    timestamp: Timestamp,
    cycle: u64,
    elapsed: Duration,
}

impl<'a> TickContext<'a> {
    pub fn new(
        inputs: &'a [InputPort],
        outputs: &'a mut [OutputPort],
        context: &'a Context,
        timestamp: Timestamp,
        cycle: u64,
        elapsed: Duration,
    ) -> Self {
        Self {
            inputs,
            outputs,
            context,
            timestamp,
            cycle,
            elapsed,
        }
    }

    fn find_input(&self, name: &str) -> Result<&'a InputPort, NodeError> {
        let inputs: &'a [InputPort] = self.inputs;
        inputs
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| NodeError::UnknownPort {
                port: name.to_string(),
            })
    }

    /// Latest data on an input. Required inputs must be connected; an
    /// unconnected optional input reads as `Payload::Empty`.
    pub fn input(&self, name: &str) -> Result<&'a Payload, NodeError> {
        let port = self.find_input(name)?;
        if port.is_connected() {
            Ok(port.payload())
        } else if port.descriptor.required {
            Err(NodeError::NotConnected {
                port: name.to_string(),
            })
        } else {
            Ok(&EMPTY)
        }
    }

    /// Latest data on an input, `None` when unknown or unconnected.
    pub fn try_input(&self, name: &str) -> Option<&'a Payload> {
        self.find_input(name)
            .ok()
            .filter(|p| p.is_connected())
            .map(InputPort::payload)
    }

    pub fn input_timestamp(&self, name: &str) -> Option<Timestamp> {
        self.find_input(name)
            .ok()
            .filter(|p| p.is_connected())
            .map(InputPort::timestamp)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.find_input(name).map_or(false, InputPort::is_connected)
    }

    fn find_output(&mut self, name: &str) -> Result<&mut OutputPort, NodeError> {
        self.outputs
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| NodeError::UnknownPort {
                port: name.to_string(),
            })
    }

    /// Publish `payload` on an output, stamped with the tick timestamp.
    pub fn push(&mut self, name: &str, payload: Payload) -> Result<(), NodeError> {
        let timestamp = self.timestamp;
        self.find_output(name)?.publish(payload, timestamp)
    }

    /// Write an output in place, stamped with the tick timestamp.
    pub fn write(&mut self, name: &str, f: impl FnOnce(&mut Payload)) -> Result<(), NodeError> {
        let timestamp = self.timestamp;
        self.find_output(name)?.write_with(timestamp, f)
    }

    /// Logical timestamp of this tick.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Sources stamp their own frames (e.g. recording time).
    #[inline]
    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    #[inline]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Wall time since the pipeline was created.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[inline]
    pub fn context(&self) -> &'a Context {
        self.context
    }
}
