//! # behavior-tree-core (Rust crate)
//!
//! A behavior tree execution engine: reactive control logic that is ticked
//! repeatedly until it reaches a terminal outcome.
//!
//!
//! ## Overview
//!
//! This is an implementation of behavior tree in Rust, inspired by [BehaviorTreeCPP](https://github.com/BehaviorTree/BehaviorTree.CPP.git).
//!
//! A behavior tree is an extension to finite state machines that makes describing transitional behavior easier.
//! See [BehaviorTreeCPP's documentation](https://www.behaviortree.dev/) for the thorough introduction to the idea.
//!
//! The crate covers the execution side only: node kinds and their tick/halt
//! state machine, the control and decorator library, asynchronous leaves
//! (stateful, thread-backed and coroutine-backed), and a scoped, type-checked
//! blackboard. Trees are put together in code with [`BehaviorNodeContainer`];
//! there is no file format.
//!
//!
//! ## How it looks like
//!
//! First, you define a leaf by implementing [`BehaviorNode`].
//! Ports are declared up front and read through the [`Context`].
//!
//! ```rust
//! use behavior_tree_core::*;
//!
//! struct PrintArm;
//!
//! impl BehaviorNode for PrintArm {
//!     fn provided_ports(&self) -> Vec<PortSpec> {
//!         vec![PortSpec::input::<String>("arm")]
//!     }
//!
//!     fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus> {
//!         let arm: String = ctx.get_input("arm")?;
//!         println!("Got {}", arm);
//!         Ok(NodeStatus::Success)
//!     }
//! }
//! ```
//!
//! Then, you put together a tree.
//! Note that the second argument of `new` is the port remapping of the node.
//! A value in braces, like `{left}`, points to a blackboard entry; anything
//! else is a literal.
//!
//! ```rust
//! # use behavior_tree_core::*;
//! # struct PrintArm;
//! # impl BehaviorNode for PrintArm {
//! #     fn provided_ports(&self) -> Vec<PortSpec> { vec![PortSpec::input::<String>("arm")] }
//! #     fn tick(&mut self, _: &mut Context) -> Result<NodeStatus> { Ok(NodeStatus::Success) }
//! # }
//! let mut root = BehaviorNodeContainer::new_node(ControlNode::sequence());
//! root.add_child(BehaviorNodeContainer::new(
//!     NodeKind::action(PrintArm),
//!     hash_map!("arm" => "{left}"),
//! ))
//! .unwrap();
//! root.add_child(BehaviorNodeContainer::new(
//!     NodeKind::action(PrintArm),
//!     hash_map!("arm" => "rightArm"),
//! ))
//! .unwrap();
//!
//! let tree = Tree::new(root).unwrap();
//! tree.root_blackboard().set("left", "leftArm".to_string()).unwrap();
//! ```
//!
//! and tick it.
//!
//! ```rust
//! # use behavior_tree_core::*;
//! # let mut tree = Tree::new(BehaviorNodeContainer::new_node(NodeKind::action(AlwaysSuccess))).unwrap();
//! let status = tree.tick_while_running(std::time::Duration::from_millis(10)).unwrap();
//! assert_eq!(status, NodeStatus::Success);
//! ```
//!
//!
//! ## Asynchronous leaves
//!
//! A leaf that needs more than one tick has three options:
//!
//! * [`StatefulActionNode`]: `on_start`, `on_running` and `on_halted` callbacks,
//!   with the node polling whatever it started.
//! * [`ThreadedActionNode`]: the body runs on a background thread and the node
//!   reports `Running` until the thread is done. Halting blocks until the
//!   thread has exited.
//! * [`CoroAction`]: the body is a future polled once per tick on the driver
//!   thread. `ctx.yield_running().await` gives control back to the tree.
//!
//! Timers and worker threads raise a [`WakeUpSignal`] so that
//! [`Tree::tick_while_running`] can re-tick before its sleep expires.
//!
//!
//! ## Blackboard
//!
//! Every subtree owns a [`Blackboard`] scope. Keys are not visible across
//! scopes unless they are remapped explicitly or the subtree enables
//! auto-remapping. `@key` always refers to the root scope and keys starting
//! with `_` are never auto-remapped. Once an entry is declared with a type,
//! writing a value of another type is an error, with the exception of strings
//! that can be parsed into that type and numbers that fit.

pub mod any;
pub mod blackboard;
pub mod config;
mod container;
mod context;
pub mod convert;
pub mod error;
pub mod json_export;
pub mod nodes;
mod port;
pub mod script;
mod symbol;
pub mod timer_queue;
mod tree;
pub mod visitor;
pub mod wake_up;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub use crate::any::{Any, TypeInfo};
pub use crate::blackboard::{Blackboard, StampedValue, Timestamp};
pub use crate::config::TreeConfig;
pub use crate::convert::{ConvertFromString, SharedQueue};
pub use crate::container::BehaviorNodeContainer;
pub use crate::context::Context;
pub use crate::error::{AddChildError, AddChildResult, Error, Result};
pub use crate::nodes::{
    action::{
        ActionNode, CoroAction, CoroContext, StatefulActionNode, ThreadContext,
        ThreadedActionNode,
    },
    builtin::{
        AlwaysFailure, AlwaysSuccess, ScriptAction, ScriptCondition, SetBlackboard, Sleep,
        UnsetBlackboard, WasEntryUpdated,
    },
    control::ControlNode,
    decorator::DecoratorNode,
    NodeKind, NodeType,
};
pub use crate::port::{blackboard_pointer, NodeConfig, PortDirection, PortSpec, PortValue, PortsList};
pub use crate::script::{Environment, PostCond, PreCond, ScriptFunction, ScriptParser};
pub use crate::symbol::Symbol;
pub use crate::tree::{NodeId, PostTickHook, PreTickHook, Tree, TreeBuilder, TreeNode};
pub use crate::wake_up::WakeUpSignal;
pub use ::once_cell::sync::*;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Not ticked yet in the current activation. Never returned by a tick.
    #[default]
    Idle,
    /// The node should keep running in the next tick
    Running,
    Success,
    Failure,
    /// The node decided not to run. Its parent sees `Skipped`, but the node
    /// itself stays `Idle`.
    Skipped,
}

impl NodeStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failure)
    }

    /// Whether the node has been ticked since it was last reset.
    ///
    /// ```rust
    /// # use behavior_tree_core::NodeStatus;
    /// assert!(NodeStatus::Running.is_active());
    /// assert!(NodeStatus::Failure.is_active());
    /// assert!(!NodeStatus::Idle.is_active());
    /// assert!(!NodeStatus::Skipped.is_active());
    /// ```
    pub fn is_active(self) -> bool {
        matches!(
            self,
            NodeStatus::Running | NodeStatus::Success | NodeStatus::Failure
        )
    }
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(match self {
            NodeStatus::Idle => "IDLE",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Success => "SUCCESS",
            NodeStatus::Failure => "FAILURE",
            NodeStatus::Skipped => "SKIPPED",
        })
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NumChildren {
    Finite(usize),
    Infinite,
}

impl PartialOrd for NumChildren {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(match (self, other) {
            (NumChildren::Finite(_), NumChildren::Infinite) => std::cmp::Ordering::Less,
            (NumChildren::Infinite, NumChildren::Finite(_)) => std::cmp::Ordering::Greater,
            (NumChildren::Finite(lhs), NumChildren::Finite(rhs)) => lhs.cmp(rhs),
            (NumChildren::Infinite, NumChildren::Infinite) => return None,
        })
    }
}

/// A leaf that completes within a single tick: conditions and synchronous
/// actions. Returning `Running` from `tick` is a logic error.
pub trait BehaviorNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![]
    }

    fn tick(&mut self, ctx: &mut Context) -> Result<NodeStatus>;

    /// Name the node is known by when no instance name is given.
    fn registration_name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }
}

pub(crate) fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_owned()
}

/// Builds a port remapping table.
///
/// ```rust
/// # use behavior_tree_core::*;
/// let ports: std::collections::HashMap<Symbol, String> = hash_map!("in" => "{a}", "n" => "3");
/// assert_eq!(ports.len(), 2);
/// ```
#[macro_export]
macro_rules! hash_map {
    () => {
        std::collections::HashMap::default()
    };
    ($($name: literal => $val: expr),+ $(,)?) => {{
        let mut ret = std::collections::HashMap::default();
        $(
            ret.insert($name.into(), $val.into());
        )+
        ret
    }};
}
