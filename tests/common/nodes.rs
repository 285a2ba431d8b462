//! Node behaviours used only by the integration tests

use framepipe::pipeline::{Image, PortDescriptor, PortKind, Payload, Timestamp};
use framepipe::{NodeBehavior, NodeError, TickContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One recorded tick: (cycle, primary timestamp, aux timestamp)
pub type Tick = (u64, Timestamp, Option<Timestamp>);

pub type TickLog = Arc<Mutex<Vec<Tick>>>;

pub fn tick_log() -> TickLog {
    Arc::new(Mutex::new(Vec::new()))
}

static PASS_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("in", PortKind::Image),
    PortDescriptor::optional_input("aux", PortKind::Image),
    PortDescriptor::output("out", PortKind::Image),
];

/// Copies `in` to `out` and logs what it saw.
pub struct Recorder {
    log: TickLog,
}

impl Recorder {
    pub fn new(log: TickLog) -> Self {
        Self { log }
    }
}

impl NodeBehavior for Recorder {
    fn type_name(&self) -> &str {
        "Recorder"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PASS_PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        let input = ctx.input("in")?;
        self.log.lock().push((
            ctx.cycle(),
            ctx.timestamp(),
            ctx.input_timestamp("aux"),
        ));
        if input.as_image().is_some() {
            ctx.write("out", |slot| slot.fit_from(input))?;
        }
        Ok(())
    }
}

/// Fails every tick, optionally by panicking.
pub struct Failing {
    pub panic: bool,
}

impl NodeBehavior for Failing {
    fn type_name(&self) -> &str {
        "Failing"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PASS_PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        if self.panic {
            panic!("exploded at cycle {}", ctx.cycle());
        }
        Err(NodeError::failed("always fails"))
    }
}

/// Fails on the listed cycles only.
pub struct Intermittent {
    pub fail_on: Vec<u64>,
}

impl NodeBehavior for Intermittent {
    fn type_name(&self) -> &str {
        "Intermittent"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PASS_PORTS
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        if self.fail_on.contains(&ctx.cycle()) {
            return Err(NodeError::failed(format!("glitch at {}", ctx.cycle())));
        }
        Ok(())
    }
}

static SOURCE_PORTS: &[PortDescriptor] = &[PortDescriptor::output("out", PortKind::Image)];

/// Self-driven source that sleeps in every tick.
pub struct SlowSource {
    pub delay: Duration,
    pub frames: u64,
    produced: u64,
}

impl SlowSource {
    pub fn new(delay: Duration, frames: u64) -> Self {
        Self {
            delay,
            frames,
            produced: 0,
        }
    }
}

impl NodeBehavior for SlowSource {
    fn type_name(&self) -> &str {
        "SlowSource"
    }

    fn ports(&self) -> &[PortDescriptor] {
        SOURCE_PORTS
    }

    fn is_always_self_driven(&self) -> bool {
        true
    }

    fn is_input(&self) -> bool {
        true
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), NodeError> {
        if self.produced >= self.frames {
            return Err(NodeError::StreamEnded);
        }
        std::thread::sleep(self.delay);
        self.produced += 1;
        ctx.set_timestamp(self.produced * 10);
        ctx.push("out", Payload::Image(Image::new(2, 2, 1)))
    }

    fn reset(&mut self) {
        self.produced = 0;
    }
}
