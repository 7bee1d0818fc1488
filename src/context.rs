use crate::{
    any::Any,
    blackboard::{Blackboard, StampedValue},
    config::TreeConfig,
    convert::ConvertFromString,
    error::{Error, Result},
    port::NodeConfig,
    script::{self, Environment, ScriptFunction},
    tree::{execute_tick, halt_node, NodeId, TickEnv, TreeNode},
    wake_up::WakeUpSignal,
    NodeStatus,
};
use std::sync::Arc;

/// What a node sees while it is ticked or halted: its own slot in the tree,
/// its children and the tree-wide environment.
pub struct Context<'t> {
    nodes: &'t mut [TreeNode],
    env: &'t TickEnv,
    id: NodeId,
}

impl<'t> Context<'t> {
    pub(crate) fn new(nodes: &'t mut [TreeNode], env: &'t TickEnv, id: NodeId) -> Self {
        Self { nodes, env, id }
    }

    fn node(&self) -> &TreeNode {
        &self.nodes[self.id]
    }

    pub fn status(&self) -> NodeStatus {
        self.node().status
    }

    /// Publishes an intermediate status, typically `Running` before ticking
    /// children.
    pub fn set_status(&mut self, status: NodeStatus) -> Result<()> {
        if status == NodeStatus::Idle {
            return Err(Error::logic(format!(
                "[{}]: use reset_status() to go back to IDLE",
                self.node().name
            )));
        }
        self.nodes[self.id].status = status;
        Ok(())
    }

    pub fn reset_status(&mut self) {
        self.nodes[self.id].status = NodeStatus::Idle;
    }

    /// True from the moment a stateful action is halted until it starts again.
    pub fn is_halt_requested(&self) -> bool {
        self.node().halt_requested
    }

    pub(crate) fn set_halt_requested(&mut self, requested: bool) {
        self.nodes[self.id].halt_requested = requested;
    }

    pub fn name(&self) -> &str {
        &self.node().name
    }

    pub fn uid(&self) -> u16 {
        self.node().config.uid
    }

    pub fn path(&self) -> &str {
        &self.node().config.path
    }

    pub fn config(&self) -> &NodeConfig {
        &self.node().config
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.node().config.blackboard
    }

    pub fn get_input<T>(&self, name: &str) -> Result<T>
    where
        T: ConvertFromString + Clone + 'static,
    {
        self.config().get_input(name)
    }

    pub fn get_input_stamped<T>(&self, name: &str) -> Result<StampedValue<T>>
    where
        T: ConvertFromString + Clone + 'static,
    {
        self.config().get_input_stamped(name)
    }

    pub fn set_output<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.config().set_output(name, value)
    }

    pub fn children_count(&self) -> usize {
        self.node().children.len()
    }

    pub fn child_id(&self, index: usize) -> Result<NodeId> {
        self.node().children.get(index).copied().ok_or_else(|| {
            Error::logic(format!(
                "[{}] has {} children, index {} is out of range",
                self.node().name,
                self.node().children.len(),
                index
            ))
        })
    }

    pub fn child_status(&self, index: usize) -> Result<NodeStatus> {
        Ok(self.nodes[self.child_id(index)?].status)
    }

    pub fn tick_child(&mut self, index: usize) -> Result<NodeStatus> {
        let child = self.child_id(index)?;
        execute_tick(self.nodes, self.env, child)
    }

    /// Halts the child if it is running and sets it back to `Idle` either way.
    pub fn halt_child(&mut self, index: usize) -> Result<()> {
        let child = self.child_id(index)?;
        if self.nodes[child].status == NodeStatus::Running {
            halt_node(self.nodes, self.env, child)?;
        }
        self.nodes[child].status = NodeStatus::Idle;
        Ok(())
    }

    pub fn halt_children_from(&mut self, first: usize) -> Result<()> {
        for index in first..self.children_count() {
            self.halt_child(index)?;
        }
        Ok(())
    }

    pub fn halt_children(&mut self) -> Result<()> {
        self.halt_children_from(0)
    }

    /// Sets a completed child back to `Idle` without halting it.
    pub fn reset_child(&mut self, index: usize) -> Result<()> {
        let child = self.child_id(index)?;
        self.nodes[child].status = NodeStatus::Idle;
        Ok(())
    }

    /// Asks the driver to tick again as soon as possible.
    pub fn emit_wake_up(&self) {
        self.env.wake_up.emit_signal();
    }

    pub fn wake_up_signal(&self) -> Arc<WakeUpSignal> {
        self.env.wake_up.clone()
    }

    pub fn tree_config(&self) -> &TreeConfig {
        &self.env.config
    }

    pub fn parse_script(&self, text: &str) -> Result<ScriptFunction> {
        script::parse_script(self.env.script_parser.as_deref(), text)
    }

    pub fn eval_script(&self, script: &ScriptFunction) -> Result<Any> {
        let config = self.config();
        script(&Environment {
            blackboard: &config.blackboard,
            enums: config.enums.as_deref(),
        })
    }
}
