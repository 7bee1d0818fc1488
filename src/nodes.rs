//! The node kinds a tree is made of and the library of built-in behaviors.

pub mod action;
pub mod builtin;
pub mod control;
pub mod decorator;

use crate::{
    context::Context,
    error::{Error, Result},
    port::{PortValue, PortsList},
    script::ScriptFunction,
    BehaviorNode, NodeStatus, NumChildren,
};
use action::{
    ActionNode, CoroAction, StatefulAction, StatefulActionNode, ThreadedAction,
    ThreadedActionNode,
};
use control::ControlNode;
use decorator::DecoratorNode;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Action,
    Condition,
    Control,
    Decorator,
    Subtree,
}

impl NodeType {
    /// Kinds that wrap exactly one child.
    pub fn is_decorator(self) -> bool {
        matches!(self, NodeType::Decorator | NodeType::Subtree)
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(match self {
            NodeType::Action => "Action",
            NodeType::Condition => "Condition",
            NodeType::Control => "Control",
            NodeType::Decorator => "Decorator",
            NodeType::Subtree => "SubTree",
        })
    }
}

/// The behavior held by a tree node.
pub enum NodeKind {
    /// Completes within a tick and has no side effects on the world.
    Condition(Box<dyn BehaviorNode>),
    Action(ActionNode),
    Decorator(DecoratorNode),
    Control(ControlNode),
}

impl NodeKind {
    pub fn condition(node: impl BehaviorNode + 'static) -> Self {
        Self::Condition(Box::new(node))
    }

    /// A synchronous action.
    pub fn action(node: impl BehaviorNode + 'static) -> Self {
        Self::Action(ActionNode::Sync(Box::new(node)))
    }

    pub fn stateful(node: impl StatefulActionNode + 'static) -> Self {
        Self::Action(ActionNode::Stateful(StatefulAction::new(node)))
    }

    pub fn threaded(node: impl ThreadedActionNode) -> Self {
        Self::Action(ActionNode::Threaded(ThreadedAction::new(node)))
    }

    pub fn coro(action: CoroAction) -> Self {
        Self::Action(ActionNode::Coro(action))
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Condition(_) => NodeType::Condition,
            Self::Action(_) => NodeType::Action,
            Self::Decorator(DecoratorNode::Subtree) => NodeType::Subtree,
            Self::Decorator(_) => NodeType::Decorator,
            Self::Control(_) => NodeType::Control,
        }
    }

    pub fn registration_name(&self) -> String {
        match self {
            Self::Condition(node) => node.registration_name(),
            Self::Action(node) => node.registration_name(),
            Self::Decorator(node) => node.registration_name().to_owned(),
            Self::Control(node) => node.registration_name().to_owned(),
        }
    }

    pub fn provided_ports(&self) -> PortsList {
        match self {
            Self::Condition(node) => node.provided_ports(),
            Self::Action(node) => node.provided_ports(),
            Self::Decorator(node) => node.provided_ports(),
            Self::Control(node) => node.provided_ports(),
        }
    }

    pub fn max_children(&self) -> NumChildren {
        match self {
            Self::Condition(_) | Self::Action(_) => NumChildren::Finite(0),
            Self::Decorator(_) => NumChildren::Finite(1),
            Self::Control(node) => node.max_children(),
        }
    }

    pub(crate) fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
        match self {
            Self::Condition(node) => {
                let status = node.tick(ctx)?;
                if status == NodeStatus::Running {
                    return Err(Error::logic(format!(
                        "condition [{}] returned RUNNING",
                        ctx.name()
                    )));
                }
                Ok(status)
            }
            Self::Action(node) => node.tick(ctx),
            Self::Decorator(node) => node.tick(ctx),
            Self::Control(node) => node.tick(ctx),
        }
    }

    pub(crate) fn halt(&mut self, ctx: &mut Context) -> Result<()> {
        match self {
            Self::Condition(_) => Ok(()),
            Self::Action(node) => node.halt(ctx),
            Self::Decorator(node) => node.halt(ctx),
            Self::Control(node) => node.halt(ctx),
        }
    }
}

impl From<ActionNode> for NodeKind {
    fn from(node: ActionNode) -> Self {
        Self::Action(node)
    }
}

impl From<DecoratorNode> for NodeKind {
    fn from(node: DecoratorNode) -> Self {
        Self::Decorator(node)
    }
}

impl From<ControlNode> for NodeKind {
    fn from(node: ControlNode) -> Self {
        Self::Control(node)
    }
}

/// Write counter of the blackboard entry that `port` names, either as
/// `{key}` or as a plain key. `None` if there is no such entry.
pub(crate) fn entry_sequence_id(ctx: &Context, port: &str) -> Result<Option<u64>> {
    let raw = ctx.config().raw_input(port)?;
    let key = match PortValue::parse(port, &raw) {
        PortValue::Pointer(key) | PortValue::Literal(key) => key,
    };
    Ok(ctx
        .blackboard()
        .get_entry(key)
        .map(|entry| entry.lock().sequence_id))
}

/// A script read from a port, parsed again only when its text changes.
#[derive(Default)]
pub(crate) struct CachedScript {
    text: String,
    function: Option<ScriptFunction>,
}

impl CachedScript {
    pub fn get(&mut self, ctx: &Context, text: String) -> Result<ScriptFunction> {
        match &self.function {
            Some(function) if self.text == text => Ok(function.clone()),
            _ => {
                let function = ctx.parse_script(&text)?;
                self.text = text;
                self.function = Some(function.clone());
                Ok(function)
            }
        }
    }

    /// Reads `port` and evaluates it.
    pub fn eval(&mut self, ctx: &Context, port: &str) -> Result<crate::Any> {
        let text: String = ctx.get_input(port)?;
        let function = self.get(ctx, text)?;
        ctx.eval_script(&function)
    }
}
