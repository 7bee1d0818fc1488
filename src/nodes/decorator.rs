//! Nodes with exactly one child that alter how, when or whether it runs.

use crate::{
    context::Context,
    convert::{ConvertFromString, SharedQueue},
    error::{Error, Result},
    nodes::{entry_sequence_id, CachedScript},
    port::{PortSpec, PortValue, PortsList},
    script,
    timer_queue::{Activation, TimerQueue},
    Lazy, NodeStatus, Symbol,
};
use std::time::Duration;
use tracing::debug;

static NUM_CYCLES: Lazy<Symbol> = Lazy::new(|| "num_cycles".into());
static NUM_ATTEMPTS: Lazy<Symbol> = Lazy::new(|| "num_attempts".into());
static THEN_SKIP: Lazy<Symbol> = Lazy::new(|| "then_skip".into());
static DELAY_MSEC: Lazy<Symbol> = Lazy::new(|| "delay_msec".into());
static MSEC: Lazy<Symbol> = Lazy::new(|| "msec".into());
static IF: Lazy<Symbol> = Lazy::new(|| "if".into());
static ELSE: Lazy<Symbol> = Lazy::new(|| "else".into());
static ENTRY: Lazy<Symbol> = Lazy::new(|| "entry".into());
static QUEUE: Lazy<Symbol> = Lazy::new(|| "queue".into());
static VALUE: Lazy<Symbol> = Lazy::new(|| "value".into());
static IF_EMPTY: Lazy<Symbol> = Lazy::new(|| "if_empty".into());

pub enum DecoratorNode {
    /// Swaps `Success` and `Failure`.
    Inverter,
    ForceSuccess,
    ForceFailure,
    /// Restarts the child after every success until it fails.
    KeepRunningUntilFailure,
    Repeat(Loop),
    /// Restarts the child after a failure, up to `num_attempts` times.
    Retry(Loop),
    RunOnce(RunOnce),
    Delay(Delay),
    Timeout(Timeout),
    /// Ticks the child only when the `if` script holds, else returns `else`.
    Precondition(Precondition),
    /// Ticks the child only if the blackboard `entry` was written since the
    /// last time it looked.
    EntryUpdated(EntryUpdated),
    /// Pops the front of `queue` into `value` and ticks the child with it,
    /// until the queue is empty.
    LoopQueue(QueueLoop),
    /// Boundary of a blackboard scope. Passes the child's status through.
    Subtree,
}

/// Counter shared by [`DecoratorNode::Repeat`] and [`DecoratorNode::Retry`].
/// `-1` loops forever.
#[derive(Default)]
pub struct Loop {
    fixed: Option<i32>,
    count: i32,
    all_skipped: bool,
}

#[derive(Default)]
pub struct RunOnce {
    already_ticked: bool,
    returned: NodeStatus,
}

#[derive(Default)]
pub struct Delay {
    fixed: Option<u64>,
    started: bool,
    activation: Activation,
    timers: TimerQueue,
}

#[derive(Default)]
pub struct Timeout {
    fixed: Option<u64>,
    started: bool,
    timer: Option<u64>,
    activation: Activation,
    timers: TimerQueue,
}

#[derive(Default)]
pub struct Precondition {
    script: CachedScript,
}

pub struct EntryUpdated {
    /// `Skipped` for SkipUnlessUpdated, `Running` for WaitValueUpdate.
    if_not_updated: NodeStatus,
    sequence_id: u64,
    child_running: bool,
}

pub struct QueueLoop {
    name: &'static str,
    queue: Box<dyn QueueSource>,
    child_running: bool,
}

/// The typed half of a [`QueueLoop`].
trait QueueSource {
    fn provided_ports(&self) -> PortsList;

    /// Moves the front element to the `value` port. Returns false if the
    /// queue is empty.
    fn pop_front(&mut self, ctx: &Context, restart: bool) -> Result<bool>;
}

struct TypedQueue<T> {
    current: Option<SharedQueue<T>>,
}

impl DecoratorNode {
    /// Repeats the child `num_cycles` times, read from the port.
    pub fn repeat() -> Self {
        Self::Repeat(Loop::default())
    }

    pub fn repeat_n(num_cycles: i32) -> Self {
        Self::Repeat(Loop {
            fixed: Some(num_cycles),
            ..Loop::default()
        })
    }

    pub fn retry() -> Self {
        Self::Retry(Loop::default())
    }

    pub fn retry_n(num_attempts: i32) -> Self {
        Self::Retry(Loop {
            fixed: Some(num_attempts),
            ..Loop::default()
        })
    }

    pub fn run_once() -> Self {
        Self::RunOnce(RunOnce::default())
    }

    pub fn delay() -> Self {
        Self::Delay(Delay::default())
    }

    pub fn delay_ms(msec: u64) -> Self {
        Self::Delay(Delay {
            fixed: Some(msec),
            ..Delay::default()
        })
    }

    pub fn timeout() -> Self {
        Self::Timeout(Timeout::default())
    }

    pub fn timeout_ms(msec: u64) -> Self {
        Self::Timeout(Timeout {
            fixed: Some(msec),
            ..Timeout::default()
        })
    }

    pub fn precondition() -> Self {
        Self::Precondition(Precondition::default())
    }

    /// Returns `Skipped` while `entry` has not been written.
    pub fn skip_unless_updated() -> Self {
        Self::EntryUpdated(EntryUpdated::new(NodeStatus::Skipped))
    }

    /// Returns `Running` while `entry` has not been written.
    pub fn wait_value_update() -> Self {
        Self::EntryUpdated(EntryUpdated::new(NodeStatus::Running))
    }

    /// Loops over a `;`-separated literal or a [`SharedQueue`] in the
    /// blackboard. Elements are removed from a shared queue as they are used.
    pub fn loop_queue<T>(registration_name: &'static str) -> Self
    where
        T: ConvertFromString + Clone + Send + Sync + 'static,
    {
        Self::LoopQueue(QueueLoop {
            name: registration_name,
            queue: Box::new(TypedQueue::<T> { current: None }),
            child_running: false,
        })
    }

    pub fn loop_int() -> Self {
        Self::loop_queue::<i32>("LoopInt")
    }

    pub fn loop_bool() -> Self {
        Self::loop_queue::<bool>("LoopBool")
    }

    pub fn loop_double() -> Self {
        Self::loop_queue::<f64>("LoopDouble")
    }

    pub fn loop_string() -> Self {
        Self::loop_queue::<String>("LoopString")
    }

    pub fn registration_name(&self) -> &'static str {
        match self {
            Self::Inverter => "Inverter",
            Self::ForceSuccess => "ForceSuccess",
            Self::ForceFailure => "ForceFailure",
            Self::KeepRunningUntilFailure => "KeepRunningUntilFailure",
            Self::Repeat(_) => "Repeat",
            Self::Retry(_) => "RetryUntilSuccessful",
            Self::RunOnce(_) => "RunOnce",
            Self::Delay(_) => "Delay",
            Self::Timeout(_) => "Timeout",
            Self::Precondition(_) => "Precondition",
            Self::EntryUpdated(state) if state.if_not_updated == NodeStatus::Skipped => {
                "SkipUnlessUpdated"
            }
            Self::EntryUpdated(_) => "WaitValueUpdate",
            Self::LoopQueue(state) => state.name,
            Self::Subtree => "SubTree",
        }
    }

    pub fn provided_ports(&self) -> PortsList {
        match self {
            Self::Repeat(_) => vec![PortSpec::input::<i32>(*NUM_CYCLES)
                .with_description("Repeat a successful child up to N times. Use -1 to create an infinite loop.")],
            Self::Retry(_) => vec![PortSpec::input::<i32>(*NUM_ATTEMPTS)
                .with_description("Execute again a failing child up to N times. Use -1 to create an infinite loop.")],
            Self::RunOnce(_) => vec![PortSpec::input::<bool>(*THEN_SKIP)
                .with_default(true)
                .with_description("If true, skip after the first execution, otherwise return the status of the first execution.")],
            Self::Delay(_) => vec![PortSpec::input::<u64>(*DELAY_MSEC)
                .with_description("Tick the child after a few milliseconds")],
            Self::Timeout(_) => vec![PortSpec::input::<u64>(*MSEC)
                .with_description("After a certain amount of time, halt() the child if it is still running.")],
            Self::Precondition(_) => vec![
                PortSpec::input::<String>(*IF),
                PortSpec::input::<NodeStatus>(*ELSE)
                    .with_default(NodeStatus::Failure)
                    .with_description("Return status if condition is false"),
            ],
            Self::EntryUpdated(_) => vec![PortSpec::new_in(*ENTRY)
                .with_description("Entry to check")],
            Self::LoopQueue(state) => state.queue.provided_ports(),
            _ => vec![],
        }
    }

    pub(crate) fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        match self {
            Self::Inverter => {
                ctx.set_status(NodeStatus::Running)?;
                Ok(match ctx.tick_child(0)? {
                    NodeStatus::Success => NodeStatus::Failure,
                    NodeStatus::Failure => NodeStatus::Success,
                    status => status,
                })
            }
            Self::ForceSuccess | Self::ForceFailure => {
                ctx.set_status(NodeStatus::Running)?;
                let status = ctx.tick_child(0)?;
                if !status.is_completed() {
                    return Ok(status);
                }
                Ok(if matches!(self, Self::ForceSuccess) {
                    NodeStatus::Success
                } else {
                    NodeStatus::Failure
                })
            }
            Self::KeepRunningUntilFailure => {
                ctx.set_status(NodeStatus::Running)?;
                match ctx.tick_child(0)? {
                    NodeStatus::Failure => Ok(NodeStatus::Failure),
                    NodeStatus::Success => {
                        ctx.reset_child(0)?;
                        Ok(NodeStatus::Running)
                    }
                    _ => Ok(NodeStatus::Running),
                }
            }
            Self::Repeat(state) => state.tick(ctx, NUM_CYCLES.as_str(), NodeStatus::Success),
            Self::Retry(state) => state.tick(ctx, NUM_ATTEMPTS.as_str(), NodeStatus::Failure),
            Self::RunOnce(state) => state.tick(ctx),
            Self::Delay(state) => state.tick(ctx),
            Self::Timeout(state) => state.tick(ctx),
            Self::Precondition(state) => state.tick(ctx),
            Self::EntryUpdated(state) => state.tick(ctx),
            Self::LoopQueue(state) => state.tick(ctx),
            Self::Subtree => {
                ctx.set_status(NodeStatus::Running)?;
                ctx.tick_child(0)
            }
        }
    }

    pub(crate) fn halt(&mut self, ctx: &mut Context) -> Result<()> {
        match self {
            Self::Repeat(state) | Self::Retry(state) => state.count = 0,
            Self::Delay(state) => {
                state.started = false;
                state.activation.invalidate();
                state.timers.cancel_all();
            }
            Self::Timeout(state) => {
                state.started = false;
                state.timer = None;
                state.activation.invalidate();
                state.timers.cancel_all();
            }
            Self::EntryUpdated(state) => state.child_running = false,
            Self::LoopQueue(state) => state.child_running = false,
            _ => {}
        }
        ctx.halt_child(0)
    }
}

impl Loop {
    /// `again` is the child status that triggers another round: `Success`
    /// for Repeat, `Failure` for Retry.
    fn tick(&mut self, ctx: &mut Context, port: &str, again: NodeStatus) -> Result<NodeStatus> {
        let limit = match self.fixed {
            Some(limit) => limit,
            None => ctx.get_input::<i32>(port)?,
        };
        let in_range = |count: i32| count < limit || limit == -1;
        let mut do_loop = in_range(self.count);

        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;

        while do_loop {
            let prev = ctx.child_status(0)?;
            let status = ctx.tick_child(0)?;
            self.all_skipped &= status == NodeStatus::Skipped;

            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Skipped => {
                    // Keep the counter so that the loop resumes where it was
                    ctx.halt_child(0)?;
                    return Ok(NodeStatus::Skipped);
                }
                NodeStatus::Idle => {
                    return Err(Error::logic(format!(
                        "[{}]: a child should not return IDLE",
                        ctx.name()
                    )))
                }
                status if status == again => {
                    self.count += 1;
                    do_loop = in_range(self.count);
                    ctx.halt_child(0)?;
                    // Give the driver a chance to interrupt between rounds
                    if prev == NodeStatus::Idle && do_loop {
                        ctx.emit_wake_up();
                        return Ok(NodeStatus::Running);
                    }
                }
                status => {
                    self.count = 0;
                    ctx.halt_child(0)?;
                    return Ok(status);
                }
            }
        }

        self.count = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            again
        })
    }
}

impl RunOnce {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let skip: bool = ctx.get_input(THEN_SKIP.as_str())?;
        if self.already_ticked {
            return Ok(if skip {
                NodeStatus::Skipped
            } else {
                self.returned
            });
        }

        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            self.already_ticked = true;
            self.returned = status;
        }
        Ok(status)
    }
}

impl Delay {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let msec = match self.fixed {
            Some(msec) => msec,
            None => ctx.get_input::<u64>(DELAY_MSEC.as_str())?,
        };

        if !self.started {
            self.started = true;
            let id = self.activation.start();
            ctx.set_status(NodeStatus::Running)?;

            let activation = self.activation.clone();
            let wake_up = ctx.wake_up_signal();
            self.timers.add(Duration::from_millis(msec), move |aborted| {
                if !aborted && activation.fire(id) {
                    wake_up.emit_signal();
                }
            })?;
        }

        if !self.activation.has_fired() {
            return Ok(NodeStatus::Running);
        }
        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            self.started = false;
        }
        Ok(status)
    }
}

impl Timeout {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let msec = match self.fixed {
            Some(msec) => msec,
            None => ctx.get_input::<u64>(MSEC.as_str())?,
        };

        if !self.started {
            self.started = true;
            let id = self.activation.start();
            ctx.set_status(NodeStatus::Running)?;

            if msec > 0 {
                let activation = self.activation.clone();
                let wake_up = ctx.wake_up_signal();
                self.timer = Some(self.timers.add(Duration::from_millis(msec), move |aborted| {
                    if !aborted && activation.fire(id) {
                        wake_up.emit_signal();
                    }
                })?);
            }
        }

        if self.activation.has_fired() {
            debug!(node = %ctx.name(), msec, "timed out, halting child");
            self.started = false;
            self.timer = None;
            ctx.halt_child(0)?;
            return Ok(NodeStatus::Failure);
        }

        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            self.started = false;
            if let Some(timer) = self.timer.take() {
                self.timers.cancel(timer);
            }
        }
        Ok(status)
    }
}

impl Precondition {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let otherwise: NodeStatus = ctx.get_input(ELSE.as_str())?;
        let holds = script::is_truthy(&self.script.eval(ctx, IF.as_str())?)?;
        if !holds {
            return Ok(otherwise);
        }
        ctx.set_status(NodeStatus::Running)?;
        ctx.tick_child(0)
    }
}

impl EntryUpdated {
    fn new(if_not_updated: NodeStatus) -> Self {
        Self {
            if_not_updated,
            sequence_id: 0,
            child_running: false,
        }
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        if !self.child_running {
            match entry_sequence_id(ctx, ENTRY.as_str())? {
                Some(current) if current != self.sequence_id => self.sequence_id = current,
                _ => return Ok(self.if_not_updated),
            }
        }
        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        self.child_running = status == NodeStatus::Running;
        Ok(status)
    }
}

impl QueueLoop {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let restart = ctx.status() == NodeStatus::Idle;
        if restart {
            self.child_running = false;
        }
        if !self.child_running && !self.queue.pop_front(ctx, restart)? {
            return ctx.get_input(IF_EMPTY.as_str());
        }

        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        self.child_running = status == NodeStatus::Running;
        match status {
            NodeStatus::Failure => Ok(NodeStatus::Failure),
            NodeStatus::Running => Ok(NodeStatus::Running),
            _ => {
                ctx.emit_wake_up();
                Ok(NodeStatus::Running)
            }
        }
    }
}

impl<T> QueueSource for TypedQueue<T>
where
    T: ConvertFromString + Clone + Send + Sync + 'static,
{
    fn provided_ports(&self) -> PortsList {
        vec![
            PortSpec::inout::<SharedQueue<T>>(*QUEUE),
            PortSpec::input::<NodeStatus>(*IF_EMPTY)
                .with_default(NodeStatus::Success)
                .with_description("Status to return if the queue is empty: SUCCESS, FAILURE, SKIPPED"),
            PortSpec::output::<T>(*VALUE),
        ]
    }

    fn pop_front(&mut self, ctx: &Context, restart: bool) -> Result<bool> {
        let raw = ctx.config().raw_input(QUEUE.as_str())?;
        let literal = matches!(PortValue::parse(QUEUE.as_str(), &raw), PortValue::Literal(_));
        // A literal is read once per activation, a shared queue on every pop
        if restart || !literal || self.current.is_none() {
            self.current = Some(ctx.get_input::<SharedQueue<T>>(QUEUE.as_str())?);
        }
        let front = match &self.current {
            Some(queue) => queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front(),
            None => None,
        };
        match front {
            Some(value) => {
                ctx.set_output(VALUE.as_str(), value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
