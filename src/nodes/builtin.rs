//! Leaves that every tree can use without defining its own nodes.

use super::{action::StatefulActionNode, entry_sequence_id, CachedScript};
use crate::{
    context::Context,
    error::{Error, Result},
    port::{blackboard_pointer, PortSpec, PortsList},
    script,
    timer_queue::{Activation, TimerQueue},
    Any, BehaviorNode, Lazy, NodeStatus, Symbol,
};
use std::time::Duration;

static VALUE: Lazy<Symbol> = Lazy::new(|| "value".into());
static OUTPUT_KEY: Lazy<Symbol> = Lazy::new(|| "output_key".into());
static KEY: Lazy<Symbol> = Lazy::new(|| "key".into());
static MSEC: Lazy<Symbol> = Lazy::new(|| "msec".into());
static CODE: Lazy<Symbol> = Lazy::new(|| "code".into());
static ENTRY: Lazy<Symbol> = Lazy::new(|| "entry".into());

pub struct AlwaysSuccess;

impl BehaviorNode for AlwaysSuccess {
    fn tick(&mut self, _ctx: &mut Context) -> Result<NodeStatus> {
        Ok(NodeStatus::Success)
    }
}

pub struct AlwaysFailure;

impl BehaviorNode for AlwaysFailure {
    fn tick(&mut self, _ctx: &mut Context) -> Result<NodeStatus> {
        Ok(NodeStatus::Failure)
    }
}

/// Writes `value` to the entry named by `output_key`. A `{key}` value copies
/// that entry, keeping its type.
pub struct SetBlackboard;

impl BehaviorNode for SetBlackboard {
    fn provided_ports(&self) -> PortsList {
        vec![
            PortSpec::new_in(*VALUE).with_description(
                "Value to be written into the output_key. It can be a literal or a {key}",
            ),
            PortSpec::new_inout(*OUTPUT_KEY)
                .with_description("Name of the blackboard entry where the value should be written"),
        ]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let raw_key = ctx.config().raw_input(OUTPUT_KEY.as_str())?;
        let output_key = blackboard_pointer(&raw_key).unwrap_or(raw_key.as_str());
        let raw_value = ctx.config().raw_input(VALUE.as_str())?;
        let bb = ctx.blackboard();

        let value = match blackboard_pointer(&raw_value) {
            Some(input_key) => {
                let src = bb.get_entry(input_key).ok_or_else(|| {
                    Error::runtime(format!(
                        "can't find the entry [{}] referred by [value]",
                        input_key
                    ))
                })?;
                if bb.get_entry(output_key).is_none() {
                    bb.create_entry(output_key, src.type_info())?;
                }
                src.value()
            }
            None => Any::new(raw_value.clone()),
        };
        if value.is_empty() {
            return Ok(NodeStatus::Failure);
        }
        bb.set(output_key, value)?;
        Ok(NodeStatus::Success)
    }
}

pub struct UnsetBlackboard;

impl BehaviorNode for UnsetBlackboard {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::input::<String>(*KEY).with_description("Key of the entry to remove")]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let key: String = ctx.get_input(KEY.as_str())?;
        ctx.blackboard().unset(&key);
        Ok(NodeStatus::Success)
    }
}

/// Succeeds if `entry` was written since the previous tick of this node.
#[derive(Default)]
pub struct WasEntryUpdated {
    sequence_id: u64,
}

impl BehaviorNode for WasEntryUpdated {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::new_in(*ENTRY).with_description("Entry to check")]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let Some(current) = entry_sequence_id(ctx, ENTRY.as_str())? else {
            return Ok(NodeStatus::Failure);
        };
        let previous = std::mem::replace(&mut self.sequence_id, current);
        Ok(if previous != current {
            NodeStatus::Success
        } else {
            NodeStatus::Failure
        })
    }
}

/// Returns `Running` for `msec` milliseconds without blocking the tree.
#[derive(Default)]
pub struct Sleep {
    timers: TimerQueue,
    timer: Option<u64>,
    activation: Activation,
}

impl StatefulActionNode for Sleep {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::input::<u64>(*MSEC)]
    }

    fn on_start(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let msec: u64 = ctx.get_input(MSEC.as_str())?;
        if msec == 0 {
            return Ok(NodeStatus::Success);
        }
        let id = self.activation.start();
        let activation = self.activation.clone();
        let wake_up = ctx.wake_up_signal();
        self.timer = Some(self.timers.add(Duration::from_millis(msec), move |aborted| {
            if !aborted && activation.fire(id) {
                wake_up.emit_signal();
            }
        })?);
        Ok(NodeStatus::Running)
    }

    fn on_running(&mut self, _ctx: &mut Context) -> Result<NodeStatus> {
        if self.activation.has_fired() {
            self.timer = None;
            Ok(NodeStatus::Success)
        } else {
            Ok(NodeStatus::Running)
        }
    }

    fn on_halted(&mut self, _ctx: &mut Context) -> Result<()> {
        self.activation.invalidate();
        if let Some(timer) = self.timer.take() {
            self.timers.cancel(timer);
        }
        Ok(())
    }
}

/// Succeeds when the script in `code` evaluates to true.
#[derive(Default)]
pub struct ScriptCondition {
    script: CachedScript,
}

impl BehaviorNode for ScriptCondition {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::input::<String>(*CODE)
            .with_description("Script that must return a boolean")]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let result = self.script.eval(ctx, CODE.as_str())?;
        Ok(if script::is_truthy(&result)? {
            NodeStatus::Success
        } else {
            NodeStatus::Failure
        })
    }
}

/// Runs the script in `code` for its side effects on the blackboard.
#[derive(Default)]
pub struct ScriptAction {
    script: CachedScript,
}

impl BehaviorNode for ScriptAction {
    fn provided_ports(&self) -> PortsList {
        vec![PortSpec::input::<String>(*CODE).with_description("Piece of code that can be parsed")]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        self.script.eval(ctx, CODE.as_str())?;
        Ok(NodeStatus::Success)
    }

    fn registration_name(&self) -> String {
        "Script".to_owned()
    }
}
