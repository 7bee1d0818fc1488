//! Composite nodes deciding which children to tick and how to combine their
//! results.

use crate::{
    context::Context,
    error::{Error, Result},
    port::{PortSpec, PortsList},
    script::ScriptingEnums,
    Lazy, NodeStatus, NumChildren, Symbol,
};
use std::collections::BTreeSet;

static MAX_FAILURES: Lazy<Symbol> = Lazy::new(|| "max_failures".into());
static SUCCESS_COUNT: Lazy<Symbol> = Lazy::new(|| "success_count".into());
static FAILURE_COUNT: Lazy<Symbol> = Lazy::new(|| "failure_count".into());
static VARIABLE: Lazy<Symbol> = Lazy::new(|| "variable".into());

pub enum ControlNode {
    Sequence(Cursor),
    SequenceWithMemory(Cursor),
    Fallback(Cursor),
    ReactiveSequence(Reactive),
    ReactiveFallback(Reactive),
    ParallelAll(ParallelAll),
    Parallel(Parallel),
    IfThenElse(IfThenElse),
    WhileDoElse,
    Switch(Switch),
}

/// Resume position of the sequential composites.
#[derive(Default)]
pub struct Cursor {
    asynch: bool,
    current: usize,
    all_skipped: bool,
}

#[derive(Default)]
pub struct Reactive {
    running_child: Option<usize>,
}

#[derive(Default)]
pub struct ParallelAll {
    completed: BTreeSet<usize>,
    failures: usize,
}

#[derive(Default)]
pub struct Parallel {
    /// `(success_count, failure_count)` given at construction instead of ports.
    fixed: Option<(i32, i32)>,
    completed: BTreeSet<usize>,
    successes: usize,
    failures: usize,
}

#[derive(Default)]
pub struct IfThenElse {
    child_idx: usize,
}

pub struct Switch {
    cases: usize,
    running_child: Option<usize>,
}

impl ControlNode {
    pub fn sequence() -> Self {
        Self::Sequence(Cursor::default())
    }

    /// Yields `Running` after a child succeeds from `Idle`, so that the tree
    /// can be interrupted between children.
    pub fn async_sequence() -> Self {
        Self::Sequence(Cursor {
            asynch: true,
            ..Cursor::default()
        })
    }

    pub fn sequence_with_memory() -> Self {
        Self::SequenceWithMemory(Cursor {
            asynch: true,
            ..Cursor::default()
        })
    }

    pub fn fallback() -> Self {
        Self::Fallback(Cursor::default())
    }

    pub fn async_fallback() -> Self {
        Self::Fallback(Cursor {
            asynch: true,
            ..Cursor::default()
        })
    }

    pub fn reactive_sequence() -> Self {
        Self::ReactiveSequence(Reactive::default())
    }

    pub fn reactive_fallback() -> Self {
        Self::ReactiveFallback(Reactive::default())
    }

    pub fn parallel_all() -> Self {
        Self::ParallelAll(ParallelAll::default())
    }

    /// Thresholds come from the `success_count` and `failure_count` ports.
    pub fn parallel() -> Self {
        Self::Parallel(Parallel::default())
    }

    pub fn parallel_with(success_count: i32, failure_count: i32) -> Self {
        Self::Parallel(Parallel {
            fixed: Some((success_count, failure_count)),
            ..Parallel::default()
        })
    }

    pub fn if_then_else() -> Self {
        Self::IfThenElse(IfThenElse::default())
    }

    pub fn while_do_else() -> Self {
        Self::WhileDoElse
    }

    /// `cases` case ports plus a default child.
    pub fn switch(cases: usize) -> Self {
        Self::Switch(Switch {
            cases,
            running_child: None,
        })
    }

    pub fn registration_name(&self) -> &'static str {
        match self {
            Self::Sequence(cursor) if cursor.asynch => "AsyncSequence",
            Self::Sequence(_) => "Sequence",
            Self::SequenceWithMemory(_) => "SequenceWithMemory",
            Self::Fallback(cursor) if cursor.asynch => "AsyncFallback",
            Self::Fallback(_) => "Fallback",
            Self::ReactiveSequence(_) => "ReactiveSequence",
            Self::ReactiveFallback(_) => "ReactiveFallback",
            Self::ParallelAll(_) => "ParallelAll",
            Self::Parallel(_) => "Parallel",
            Self::IfThenElse(_) => "IfThenElse",
            Self::WhileDoElse => "WhileDoElse",
            Self::Switch(_) => "Switch",
        }
    }

    pub fn provided_ports(&self) -> PortsList {
        match self {
            Self::ParallelAll(_) => vec![PortSpec::input::<i32>(*MAX_FAILURES)
                .with_default(1)
                .with_description(
                    "If the number of children returning FAILURE exceeds this value, ParallelAll returns FAILURE",
                )],
            Self::Parallel(_) => vec![
                PortSpec::input::<i32>(*SUCCESS_COUNT)
                    .with_default(-1)
                    .with_description("number of children that need to succeed to trigger a SUCCESS"),
                PortSpec::input::<i32>(*FAILURE_COUNT)
                    .with_default(1)
                    .with_description("number of children that need to fail to trigger a FAILURE"),
            ],
            Self::Switch(switch) => std::iter::once(PortSpec::input::<String>(*VARIABLE))
                .chain((1..=switch.cases).map(|i| PortSpec::input::<String>(case_port(i))))
                .collect(),
            _ => vec![],
        }
    }

    pub fn max_children(&self) -> NumChildren {
        match self {
            Self::IfThenElse(_) | Self::WhileDoElse => NumChildren::Finite(3),
            Self::Switch(switch) => NumChildren::Finite(switch.cases + 1),
            _ => NumChildren::Infinite,
        }
    }

    pub(crate) fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        match self {
            Self::Sequence(cursor) => cursor.tick(ctx, NodeStatus::Success, false),
            Self::SequenceWithMemory(cursor) => cursor.tick(ctx, NodeStatus::Success, true),
            Self::Fallback(cursor) => cursor.tick(ctx, NodeStatus::Failure, false),
            Self::ReactiveSequence(state) => state.tick(ctx, NodeStatus::Failure),
            Self::ReactiveFallback(state) => state.tick(ctx, NodeStatus::Success),
            Self::ParallelAll(state) => state.tick(ctx),
            Self::Parallel(state) => state.tick(ctx),
            Self::IfThenElse(state) => state.tick(ctx),
            Self::WhileDoElse => tick_while_do_else(ctx),
            Self::Switch(state) => state.tick(ctx),
        }
    }

    pub(crate) fn halt(&mut self, ctx: &mut Context) -> Result<()> {
        match self {
            Self::Sequence(cursor) | Self::Fallback(cursor) => cursor.current = 0,
            // Progress survives a halt
            Self::SequenceWithMemory(_) => {}
            Self::ReactiveSequence(state) | Self::ReactiveFallback(state) => {
                state.running_child = None
            }
            Self::ParallelAll(state) => {
                state.completed.clear();
                state.failures = 0;
            }
            Self::Parallel(state) => state.clear(),
            Self::IfThenElse(state) => state.child_idx = 0,
            Self::WhileDoElse => {}
            Self::Switch(state) => state.running_child = None,
        }
        ctx.halt_children()
    }
}

fn idle_error(ctx: &Context) -> Error {
    Error::logic(format!("[{}]: a child should not return IDLE", ctx.name()))
}

fn case_port(index: usize) -> Symbol {
    format!("case_{}", index).into()
}

/// Negative values count back from the number of children: `-1` means all.
fn threshold(value: i32, children: usize) -> usize {
    if value < 0 {
        (children as i64 + value as i64 + 1).max(0) as usize
    } else {
        value as usize
    }
}

impl Cursor {
    /// `advance` moves on to the next child, the opposite status stops the
    /// composite. With `memory`, a stop keeps the cursor where it was.
    fn tick(&mut self, ctx: &mut Context, advance: NodeStatus, memory: bool) -> Result<NodeStatus> {
        let children = ctx.children_count();
        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;

        while self.current < children {
            let prev = ctx.child_status(self.current)?;
            let status = ctx.tick_child(self.current)?;
            self.all_skipped &= status == NodeStatus::Skipped;

            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Skipped => self.current += 1,
                NodeStatus::Idle => return Err(idle_error(ctx)),
                status if status == advance => {
                    self.current += 1;
                    if self.asynch && prev == NodeStatus::Idle && self.current < children {
                        ctx.emit_wake_up();
                        return Ok(NodeStatus::Running);
                    }
                }
                status => {
                    if memory {
                        ctx.halt_children_from(self.current)?;
                    } else {
                        ctx.halt_children()?;
                        self.current = 0;
                    }
                    return Ok(status);
                }
            }
        }

        ctx.halt_children()?;
        self.current = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            advance
        })
    }
}

impl Reactive {
    /// Re-evaluates every child from the first one; `stop` ends the
    /// composite early.
    fn tick(&mut self, ctx: &mut Context, stop: NodeStatus) -> Result<NodeStatus> {
        let children = ctx.children_count();
        let mut all_skipped = true;
        if ctx.status() == NodeStatus::Idle {
            self.running_child = None;
        }
        ctx.set_status(NodeStatus::Running)?;

        for index in 0..children {
            let status = ctx.tick_child(index)?;
            all_skipped &= status == NodeStatus::Skipped;

            match status {
                NodeStatus::Running => {
                    for other in (0..children).filter(|&i| i != index) {
                        ctx.halt_child(other)?;
                    }
                    match self.running_child {
                        None => self.running_child = Some(index),
                        Some(prev)
                            if prev != index && ctx.tree_config().throw_if_multiple_running =>
                        {
                            return Err(Error::logic(format!(
                                "[{}]: only a single child can return RUNNING. \
                                 This check can be disabled with TreeConfig::throw_if_multiple_running",
                                ctx.name()
                            )));
                        }
                        Some(_) => {}
                    }
                    return Ok(NodeStatus::Running);
                }
                NodeStatus::Skipped => ctx.halt_child(index)?,
                NodeStatus::Idle => return Err(idle_error(ctx)),
                status if status == stop => {
                    ctx.halt_children()?;
                    return Ok(stop);
                }
                _ => {}
            }
        }

        ctx.halt_children()?;
        Ok(if all_skipped {
            NodeStatus::Skipped
        } else if stop == NodeStatus::Failure {
            NodeStatus::Success
        } else {
            NodeStatus::Failure
        })
    }
}

impl ParallelAll {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let max_failures: i32 = ctx.get_input(MAX_FAILURES.as_str())?;
        let children = ctx.children_count();
        let failure_threshold = threshold(max_failures, children);
        if children < failure_threshold {
            return Err(Error::logic(
                "Number of children is less than threshold. Can never fail.",
            ));
        }
        ctx.set_status(NodeStatus::Running)?;

        let mut skipped = 0;
        for index in 0..children {
            if self.completed.contains(&index) {
                continue;
            }
            match ctx.tick_child(index)? {
                NodeStatus::Success => {
                    self.completed.insert(index);
                }
                NodeStatus::Failure => {
                    self.completed.insert(index);
                    self.failures += 1;
                }
                NodeStatus::Running => {}
                NodeStatus::Skipped => skipped += 1,
                NodeStatus::Idle => return Err(idle_error(ctx)),
            }
        }

        if skipped == children {
            return Ok(NodeStatus::Skipped);
        }
        if skipped + self.completed.len() >= children {
            ctx.halt_children()?;
            self.completed.clear();
            let status = if self.failures >= failure_threshold {
                NodeStatus::Failure
            } else {
                NodeStatus::Success
            };
            self.failures = 0;
            return Ok(status);
        }
        Ok(NodeStatus::Running)
    }
}

impl Parallel {
    fn clear(&mut self) {
        self.completed.clear();
        self.successes = 0;
        self.failures = 0;
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let (success_count, failure_count) = match self.fixed {
            Some(fixed) => fixed,
            None => (
                ctx.get_input::<i32>(SUCCESS_COUNT.as_str())?,
                ctx.get_input::<i32>(FAILURE_COUNT.as_str())?,
            ),
        };
        let children = ctx.children_count();
        let required_successes = threshold(success_count, children);
        let required_failures = threshold(failure_count, children);
        if children < required_successes {
            return Err(Error::logic(
                "Number of children is less than threshold. Can never succeed.",
            ));
        }
        if children < required_failures {
            return Err(Error::logic(
                "Number of children is less than threshold. Can never fail.",
            ));
        }
        ctx.set_status(NodeStatus::Running)?;

        let mut skipped = 0;
        for index in 0..children {
            if !self.completed.contains(&index) {
                match ctx.tick_child(index)? {
                    NodeStatus::Skipped => skipped += 1,
                    NodeStatus::Success => {
                        self.completed.insert(index);
                        self.successes += 1;
                    }
                    NodeStatus::Failure => {
                        self.completed.insert(index);
                        self.failures += 1;
                    }
                    NodeStatus::Running => {}
                    NodeStatus::Idle => return Err(idle_error(ctx)),
                }
            }

            if self.successes >= required_successes
                || (success_count < 0 && self.successes + skipped >= required_successes)
            {
                self.clear();
                ctx.halt_children()?;
                return Ok(NodeStatus::Success);
            }
            // Fail as soon as success is out of reach
            if children - self.failures < required_successes || self.failures == required_failures {
                self.clear();
                ctx.halt_children()?;
                return Ok(NodeStatus::Failure);
            }
        }

        Ok(if skipped == children {
            NodeStatus::Skipped
        } else {
            NodeStatus::Running
        })
    }
}

fn check_branch_count(ctx: &Context) -> Result<usize> {
    let children = ctx.children_count();
    if children != 2 && children != 3 {
        return Err(Error::logic(format!(
            "[{}] must have either 2 or 3 children, found {}",
            ctx.name(),
            children
        )));
    }
    Ok(children)
}

impl IfThenElse {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        let children = check_branch_count(ctx)?;
        ctx.set_status(NodeStatus::Running)?;

        if self.child_idx == 0 {
            match ctx.tick_child(0)? {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Success => self.child_idx = 1,
                NodeStatus::Failure if children == 3 => self.child_idx = 2,
                NodeStatus::Failure => {
                    ctx.halt_children()?;
                    return Ok(NodeStatus::Failure);
                }
                NodeStatus::Skipped => return Ok(NodeStatus::Skipped),
                NodeStatus::Idle => return Err(idle_error(ctx)),
            }
        }

        let status = ctx.tick_child(self.child_idx)?;
        if status == NodeStatus::Running {
            return Ok(NodeStatus::Running);
        }
        ctx.halt_children()?;
        self.child_idx = 0;
        Ok(status)
    }
}

fn tick_while_do_else(ctx: &mut Context) -> Result<NodeStatus> {
    let children = check_branch_count(ctx)?;
    ctx.set_status(NodeStatus::Running)?;

    let status = match ctx.tick_child(0)? {
        NodeStatus::Running => return Ok(NodeStatus::Running),
        NodeStatus::Success => {
            if children == 3 {
                ctx.halt_child(2)?;
            }
            ctx.tick_child(1)?
        }
        NodeStatus::Failure if children == 3 => {
            ctx.halt_child(1)?;
            ctx.tick_child(2)?
        }
        NodeStatus::Failure => NodeStatus::Failure,
        NodeStatus::Skipped => NodeStatus::Skipped,
        NodeStatus::Idle => return Err(idle_error(ctx)),
    };

    if status == NodeStatus::Running {
        return Ok(NodeStatus::Running);
    }
    ctx.halt_children()?;
    Ok(status)
}

/// String equality first, then integers (enum names resolved through
/// `enums`), then reals within `f32::EPSILON`.
pub(crate) fn switch_case_matches(variable: &str, case: &str, enums: Option<&ScriptingEnums>) -> bool {
    if variable == case {
        return true;
    }
    let as_int = |text: &str| {
        enums
            .and_then(|enums| enums.get(text.trim()))
            .map(|&value| value as i64)
            .or_else(|| text.trim().parse::<i64>().ok())
    };
    if let (Some(lhs), Some(rhs)) = (as_int(variable), as_int(case)) {
        return lhs == rhs;
    }
    match (variable.trim().parse::<f64>(), case.trim().parse::<f64>()) {
        (Ok(lhs), Ok(rhs)) => (lhs - rhs).abs() <= f32::EPSILON as f64,
        _ => false,
    }
}

impl Switch {
    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        if ctx.children_count() != self.cases + 1 {
            return Err(Error::logic(
                "Wrong number of children in Switch; must be (num_cases + default)",
            ));
        }

        let mut selected = self.cases;
        // No variable selects the default child
        if let Ok(variable) = ctx.get_input::<String>(VARIABLE.as_str()) {
            let enums = ctx.config().enums.clone();
            for index in 0..self.cases {
                let Ok(case) = ctx.get_input::<String>(case_port(index + 1).as_str()) else {
                    continue;
                };
                if switch_case_matches(&variable, &case, enums.as_deref()) {
                    selected = index;
                    break;
                }
            }
        }

        if let Some(running) = self.running_child {
            if running != selected {
                ctx.halt_child(running)?;
            }
        }

        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(selected)?;
        match status {
            NodeStatus::Skipped => {
                self.running_child = None;
                Ok(NodeStatus::Skipped)
            }
            NodeStatus::Running => {
                self.running_child = Some(selected);
                Ok(NodeStatus::Running)
            }
            _ => {
                ctx.halt_children()?;
                self.running_child = None;
                Ok(status)
            }
        }
    }
}
