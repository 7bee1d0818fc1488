use crate::{
    any::TypeInfo,
    blackboard::Blackboard,
    config::TreeConfig,
    container::{BehaviorNodeContainer, SubtreeScope},
    context::Context,
    error::{Error, Result},
    nodes::{NodeKind, NodeType},
    port::{NodeConfig, PortSpec, PortValue},
    script::{self, Environment, PostCond, PreCond, ScriptFunction, ScriptParser, ScriptingEnums},
    wake_up::WakeUpSignal,
    NodeStatus, Symbol,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};


/// Index of a node in the tree's arena.
pub type NodeId = usize;

/// Runs before a node's own tick. Returning a completed status skips the
/// tick and uses that status instead.
pub type PreTickHook = Box<dyn FnMut(&TreeNode) -> Option<NodeStatus>>;
/// Runs after every tick with the resulting status. Returning a completed
/// status overrides it.
pub type PostTickHook = Box<dyn FnMut(&TreeNode, NodeStatus) -> Option<NodeStatus>>;

/// Shared by every node of a tree for the duration of a tick.
pub(crate) struct TickEnv {
    pub wake_up: Arc<WakeUpSignal>,
    pub config: TreeConfig,
    pub script_parser: Option<Arc<dyn ScriptParser>>,
}

pub struct TreeNode {
    pub(crate) name: String,
    pub(crate) registration_name: String,
    pub(crate) node_type: NodeType,
    pub(crate) status: NodeStatus,
    pub(crate) config: NodeConfig,
    pub(crate) children: Vec<NodeId>,
    /// Taken out while the node is being ticked or halted.
    pub(crate) behavior: Option<NodeKind>,
    pub(crate) pre_scripts: Vec<(PreCond, ScriptFunction)>,
    pub(crate) post_scripts: HashMap<PostCond, ScriptFunction>,
    pub(crate) pre_tick: Option<PreTickHook>,
    pub(crate) post_tick: Option<PostTickHook>,
    /// Set by stateful actions while they are being halted.
    pub(crate) halt_requested: bool,
}

impl TreeNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registration_name(&self) -> &str {
        &self.registration_name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn uid(&self) -> u16 {
        self.config.uid
    }

    /// Slash separated names from the root down to this node.
    pub fn full_path(&self) -> &str {
        &self.config.path
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn behavior(&self) -> Option<&NodeKind> {
        self.behavior.as_ref()
    }

    fn environment(&self) -> Environment {
        Environment {
            blackboard: &self.config.blackboard,
            enums: self.config.enums.as_deref(),
        }
    }

    fn eval(&self, script: &ScriptFunction) -> Result<bool> {
        script::is_truthy(&script(&self.environment())?)
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("name", &self.name)
            .field("uid", &self.config.uid)
            .field("status", &self.status)
            .field("children", &self.children)
            .finish()
    }
}

fn take_behavior(nodes: &mut [TreeNode], id: NodeId) -> Result<NodeKind> {
    nodes[id].behavior.take().ok_or_else(|| {
        Error::logic(format!(
            "node [{}] was re-entered while it was being ticked or halted",
            nodes[id].name
        ))
    })
}

/// Pre-conditions, hooks, the node's own tick and post-conditions, in that
/// order. `Skipped` is reported but not stored.
pub(crate) fn execute_tick(nodes: &mut [TreeNode], env: &TickEnv, id: NodeId) -> Result<NodeStatus> {
    let before = nodes[id].status;
    let mut status = match check_pre_conditions(nodes, env, id)? {
        Some(status) => status,
        None => match run_pre_tick_hook(&mut nodes[id]) {
            Some(status) => status,
            None => tick_behavior(nodes, env, id)?,
        },
    };
    if status == NodeStatus::Idle {
        return Err(Error::logic(format!(
            "[{}]: a node must not return IDLE from its tick",
            nodes[id].name
        )));
    }

    if status.is_completed() {
        check_post_conditions(&nodes[id], status)?;
    }
    if let Some(overridden) = run_post_tick_hook(&mut nodes[id], status) {
        status = overridden;
    }

    let node = &mut nodes[id];
    if status == NodeStatus::Skipped {
        // A composite may have marked itself Running before finding out that
        // every child was skipped.
        if before == NodeStatus::Idle {
            node.status = NodeStatus::Idle;
        }
    } else {
        if node.status != status {
            trace!(node = %node.name, uid = node.config.uid, from = %node.status, to = %status, "status changed");
        }
        node.status = status;
    }
    Ok(status)
}

fn tick_behavior(nodes: &mut [TreeNode], env: &TickEnv, id: NodeId) -> Result<NodeStatus> {
    let mut behavior = take_behavior(nodes, id)?;
    let res = behavior.tick(&mut Context::new(nodes, env, id));
    nodes[id].behavior = Some(behavior);
    let status = res?;

    // Decorators hand a completed child back to Idle once they are done with it.
    if nodes[id].node_type.is_decorator() {
        if let Some(&child) = nodes[id].children.first() {
            if nodes[child].status.is_completed() {
                nodes[child].status = NodeStatus::Idle;
            }
        }
    }
    Ok(status)
}

fn run_pre_tick_hook(node: &mut TreeNode) -> Option<NodeStatus> {
    if node.status.is_completed() {
        return None;
    }
    let mut hook = node.pre_tick.take()?;
    let res = hook(node);
    node.pre_tick = Some(hook);
    res.filter(|status| status.is_completed())
}

fn run_post_tick_hook(node: &mut TreeNode, status: NodeStatus) -> Option<NodeStatus> {
    let mut hook = node.post_tick.take()?;
    let res = hook(node, status);
    node.post_tick = Some(hook);
    res.filter(|status| status.is_completed())
}

fn check_pre_conditions(nodes: &mut [TreeNode], env: &TickEnv, id: NodeId) -> Result<Option<NodeStatus>> {
    let status = nodes[id].status;
    for index in 0..nodes[id].pre_scripts.len() {
        let (cond, script) = nodes[id].pre_scripts[index].clone();
        match status {
            NodeStatus::Idle | NodeStatus::Skipped => {
                let holds = nodes[id].eval(&script)?;
                match (cond, holds) {
                    (PreCond::FailureIf, true) => return Ok(Some(NodeStatus::Failure)),
                    (PreCond::SuccessIf, true) => return Ok(Some(NodeStatus::Success)),
                    (PreCond::SkipIf, true) => return Ok(Some(NodeStatus::Skipped)),
                    (PreCond::WhileTrue, false) => return Ok(Some(NodeStatus::Skipped)),
                    _ => {}
                }
            }
            NodeStatus::Running if cond == PreCond::WhileTrue => {
                if !nodes[id].eval(&script)? {
                    halt_node(nodes, env, id)?;
                    return Ok(Some(NodeStatus::Skipped));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

fn check_post_conditions(node: &TreeNode, status: NodeStatus) -> Result<()> {
    let specific = match status {
        NodeStatus::Success => Some(PostCond::OnSuccess),
        NodeStatus::Failure => Some(PostCond::OnFailure),
        _ => None,
    };
    for cond in specific.into_iter().chain(Some(PostCond::Always)) {
        if let Some(script) = node.post_scripts.get(&cond) {
            script(&node.environment())?;
        }
    }
    Ok(())
}

/// Cancels the node, resets it to `Idle` and runs its `_onHalted` script.
pub(crate) fn halt_node(nodes: &mut [TreeNode], env: &TickEnv, id: NodeId) -> Result<()> {
    debug!(node = %nodes[id].name, uid = nodes[id].config.uid, "halt");
    let mut behavior = take_behavior(nodes, id)?;
    let res = behavior.halt(&mut Context::new(nodes, env, id));
    nodes[id].behavior = Some(behavior);
    nodes[id].status = NodeStatus::Idle;
    res?;
    if let Some(script) = nodes[id].post_scripts.get(&PostCond::OnHalted) {
        script(&nodes[id].environment())?;
    }
    Ok(())
}

/// An instantiated tree: a node arena, the blackboards of every scope and the
/// wake-up signal shared with asynchronous nodes.
pub struct Tree {
    nodes: Vec<TreeNode>,
    root: NodeId,
    blackboards: Vec<Blackboard>,
    env: TickEnv,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes)
            .field("root", &self.root)
            .finish()
    }
}

#[derive(Default)]
pub struct TreeBuilder {
    config: TreeConfig,
    blackboard: Option<Blackboard>,
    script_parser: Option<Arc<dyn ScriptParser>>,
    enums: Option<Arc<ScriptingEnums>>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    /// Root scope to use instead of a fresh one.
    pub fn blackboard(mut self, blackboard: Blackboard) -> Self {
        self.blackboard = Some(blackboard);
        self
    }

    pub fn script_parser(mut self, parser: impl ScriptParser + 'static) -> Self {
        self.script_parser = Some(Arc::new(parser));
        self
    }

    pub fn enums(mut self, enums: ScriptingEnums) -> Self {
        self.enums = Some(Arc::new(enums));
        self
    }

    pub fn build(self, root: BehaviorNodeContainer) -> Result<Tree> {
        let root_blackboard = self.blackboard.unwrap_or_default();
        let mut flattener = Flattener {
            nodes: vec![],
            blackboards: vec![root_blackboard.clone()],
            config: &self.config,
            script_parser: self.script_parser.as_deref(),
            enums: self.enums.clone(),
        };
        let root = flattener.flatten(root, &root_blackboard, "")?;
        let Flattener {
            nodes, blackboards, ..
        } = flattener;
        debug!(nodes = nodes.len(), scopes = blackboards.len(), "tree built");
        Ok(Tree {
            nodes,
            root,
            blackboards,
            env: TickEnv {
                wake_up: Arc::new(WakeUpSignal::new()),
                config: self.config,
                script_parser: self.script_parser,
            },
        })
    }
}

struct Flattener<'a> {
    nodes: Vec<TreeNode>,
    blackboards: Vec<Blackboard>,
    config: &'a TreeConfig,
    script_parser: Option<&'a dyn ScriptParser>,
    enums: Option<Arc<ScriptingEnums>>,
}

impl<'a> Flattener<'a> {
    fn flatten(
        &mut self,
        container: BehaviorNodeContainer,
        blackboard: &Blackboard,
        parent_path: &str,
    ) -> Result<NodeId> {
        let BehaviorNodeContainer {
            name,
            kind,
            ports,
            children,
            subtree,
            pre_conditions,
            post_conditions,
            pre_tick,
            post_tick,
        } = container;

        let registration_name = kind.registration_name();
        let name = if name.is_empty() {
            registration_name.clone()
        } else {
            name
        };
        let node_type = kind.node_type();
        if node_type.is_decorator() && children.len() != 1 {
            return Err(Error::logic(format!(
                "decorator [{}] must have exactly one child, found {}",
                name,
                children.len()
            )));
        }
        if subtree.is_some() && node_type != NodeType::Subtree {
            return Err(Error::logic(format!(
                "[{}] is not a subtree and can't remap blackboard entries",
                name
            )));
        }

        let id = self.nodes.len();
        let uid = u16::try_from(id)
            .map_err(|_| Error::logic("too many nodes in a single tree"))?;
        let path = if parent_path.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", parent_path, name)
        };

        let manifest: HashMap<Symbol, PortSpec> = kind
            .provided_ports()
            .into_iter()
            .map(|port| (port.name, port))
            .collect();
        let mut input_ports = HashMap::new();
        let mut output_ports = HashMap::new();
        for (port, remapped) in ports {
            let spec = manifest.get(&port).ok_or_else(|| {
                Error::logic(format!(
                    "port [{}] is not declared by node [{}]",
                    port, name
                ))
            })?;
            if let PortValue::Pointer(key) = PortValue::parse(port.as_str(), &remapped) {
                blackboard.create_entry(key, spec.type_info.clone())?;
            }
            if spec.is_input() {
                input_ports.insert(port, remapped.clone());
            }
            if spec.is_output() {
                output_ports.insert(port, remapped);
            }
        }

        let mut pre_scripts = pre_conditions
            .iter()
            .map(|(cond, text)| Ok((*cond, script::parse_script(self.script_parser, text)?)))
            .collect::<Result<Vec<_>>>()?;
        pre_scripts.sort_by_key(|(cond, _)| *cond);
        let post_scripts = post_conditions
            .iter()
            .map(|(cond, text)| Ok((*cond, script::parse_script(self.script_parser, text)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let config = NodeConfig {
            blackboard: blackboard.clone(),
            enums: self.enums.clone(),
            input_ports,
            output_ports,
            manifest,
            uid,
            path: path.clone(),
            pre_conditions,
            post_conditions,
        };

        self.nodes.push(TreeNode {
            name,
            registration_name,
            node_type,
            status: NodeStatus::Idle,
            config,
            children: vec![],
            behavior: Some(kind),
            pre_scripts,
            post_scripts,
            pre_tick,
            post_tick,
            halt_requested: false,
        });

        let child_blackboard = match subtree {
            Some(scope) => self.open_scope(scope, blackboard)?,
            None => blackboard.clone(),
        };
        for child in children {
            let child_id = self.flatten(child, &child_blackboard, &path)?;
            self.nodes[id].children.push(child_id);
        }
        Ok(id)
    }

    fn open_scope(&mut self, scope: SubtreeScope, parent: &Blackboard) -> Result<Blackboard> {
        let scoped = Blackboard::create(Some(parent));
        scoped.enable_auto_remapping(scope.auto_remapping.unwrap_or(self.config.auto_remapping));
        for (internal, external) in scope.remapping {
            match PortValue::parse(internal.as_str(), &external) {
                PortValue::Pointer(key) => {
                    scoped.add_subtree_remapping(&internal, key);
                    // Surface type conflicts with the outer scope now.
                    parent.create_entry(key, TypeInfo::any())?;
                }
                PortValue::Literal(text) => scoped.set(&internal, text.to_owned())?,
            }
        }
        self.blackboards.push(scoped.clone());
        Ok(scoped)
    }
}

impl Tree {
    pub fn new(root: BehaviorNodeContainer) -> Result<Self> {
        TreeBuilder::new().build(root)
    }

    pub fn builder() -> TreeBuilder {
        TreeBuilder::new()
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root_status(&self) -> NodeStatus {
        self.nodes[self.root].status
    }

    pub fn root_blackboard(&self) -> &Blackboard {
        &self.blackboards[0]
    }

    /// The root scope followed by one scope per subtree, in build order.
    pub fn blackboards(&self) -> &[Blackboard] {
        &self.blackboards
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|node| node.name == name)
    }

    pub fn config(&self) -> &TreeConfig {
        &self.env.config
    }

    pub fn wake_up_signal(&self) -> Arc<WakeUpSignal> {
        self.env.wake_up.clone()
    }

    pub fn set_pre_tick_hook(&mut self, id: NodeId, hook: PreTickHook) -> Result<()> {
        self.node_mut(id)?.pre_tick = Some(hook);
        Ok(())
    }

    pub fn set_post_tick_hook(&mut self, id: NodeId, hook: PostTickHook) -> Result<()> {
        self.node_mut(id)?.post_tick = Some(hook);
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::logic(format!("no node with id {}", id)))
    }

    fn tick_root(&mut self, mode: TickMode) -> Result<NodeStatus> {
        let mut status = NodeStatus::Idle;
        while status == NodeStatus::Idle
            || (matches!(mode, TickMode::WhileRunning(_)) && status == NodeStatus::Running)
        {
            status = execute_tick(&mut self.nodes, &self.env, self.root)?;

            // Something asked for attention during the tick: go again right away.
            while mode != TickMode::ExactlyOnce
                && status == NodeStatus::Running
                && self.env.wake_up.take()
            {
                status = execute_tick(&mut self.nodes, &self.env, self.root)?;
            }

            if status.is_completed() {
                self.nodes[self.root].status = NodeStatus::Idle;
            }
            if let (TickMode::WhileRunning(sleep), NodeStatus::Running) = (mode, status) {
                self.env.wake_up.wait_for(sleep);
            }
        }
        Ok(status)
    }

    /// A single tick of the root, even if a wake-up is pending.
    pub fn tick_exactly_once(&mut self) -> Result<NodeStatus> {
        self.tick_root(TickMode::ExactlyOnce)
    }

    /// Ticks the root and keeps re-ticking while it is `Running` and a
    /// wake-up was emitted in the meantime.
    pub fn tick_once(&mut self) -> Result<NodeStatus> {
        self.tick_root(TickMode::Once)
    }

    /// Ticks until the root completes, waiting up to `sleep` for a wake-up
    /// between ticks.
    pub fn tick_while_running(&mut self, sleep: Duration) -> Result<NodeStatus> {
        self.tick_root(TickMode::WhileRunning(sleep))
    }

    pub fn halt_tree(&mut self) -> Result<()> {
        halt_node(&mut self.nodes, &self.env, self.root)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TickMode {
    ExactlyOnce,
    Once,
    WhileRunning(Duration),
}
