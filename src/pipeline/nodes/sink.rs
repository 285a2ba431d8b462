//! StateSink — terminal node that records what reached it.
//!
//! Keeps the timestamps of the frames it received (bounded by `capacity`)
//! and publishes whether the latest frame had any foreground pixel.

use crate::config::NodeDescriptor;
use crate::pipeline::error::{CommandError, NodeError, PipelineResult};
use crate::pipeline::id::Timestamp;
use crate::pipeline::node::{NodeBehavior, TickContext};
use crate::pipeline::packet::{ParamValue, Payload};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde_json::json;
use std::collections::VecDeque;

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Image),
    PortDescriptor::output("state", PortKind::State),
];

const DEFAULT_CAPACITY: usize = 1024;

pub struct StateSinkNode {
    capacity: usize,
    history: VecDeque<Timestamp>,
    received: u64,
    active: bool,
}

impl StateSinkNode {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: VecDeque::new(),
            received: 0,
            active: false,
        }
    }

    pub fn from_descriptor(desc: &NodeDescriptor) -> PipelineResult<Self> {
        let capacity = desc.params.u64_or("capacity", DEFAULT_CAPACITY as u64);
        Ok(Self::new(usize::try_from(capacity).unwrap_or(DEFAULT_CAPACITY)))
    }

    /// Timestamps received, oldest first.
    pub fn history(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.history.iter().copied()
    }
}

impl NodeBehavior for StateSinkNode {
    fn type_name(&self) -> &str {
        "StateSink"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        let Some(frame) = ctx.input("in")?.as_image() else {
            return Ok(());
        };
        self.active = frame.data().iter().any(|&v| v > 0);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(ctx.timestamp());
        self.received += 1;
        ctx.push("state", Payload::State(self.active))
    }

    fn reset(&mut self) {
        self.history.clear();
        self.received = 0;
        self.active = false;
    }

    fn param(&self, key: &str) -> Option<ParamValue> {
        match key {
            "capacity" => Some(ParamValue::Int(self.capacity as i64)),
            _ => None,
        }
    }

    fn on_command(
        &mut self,
        action: &str,
        _value: &ParamValue,
    ) -> Result<serde_json::Value, CommandError> {
        match action {
            "history" => Ok(json!(self.history)),
            "clear" => {
                self.history.clear();
                Ok(serde_json::Value::Null)
            }
            _ => Err(CommandError::UnknownAction(action.to_string())),
        }
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "received": self.received,
            "active": self.active,
            "last": self.history.back(),
        })
    }
}
