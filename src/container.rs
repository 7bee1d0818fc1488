use std::collections::HashMap;

use crate::{
    error::{AddChildError, AddChildResult, Error, Result},
    nodes::NodeKind,
    script::{PostCond, PreCond},
    tree::{PostTickHook, PreTickHook},
    NumChildren, Symbol,
};

/// A subtree boundary: the child gets its own blackboard scope.
#[derive(Debug, Default, Clone)]
pub(crate) struct SubtreeScope {
    /// Internal key to either `{external_key}` or a literal value.
    pub remapping: HashMap<Symbol, String>,
    /// `None` falls back to [`crate::TreeConfig::auto_remapping`].
    pub auto_remapping: Option<bool>,
}

/// Describes a node and its children before the tree is instantiated.
pub struct BehaviorNodeContainer {
    /// Instance name. Empty means the registration name is used.
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) ports: HashMap<Symbol, String>,
    pub(crate) children: Vec<BehaviorNodeContainer>,
    pub(crate) subtree: Option<SubtreeScope>,
    pub(crate) pre_conditions: HashMap<PreCond, String>,
    pub(crate) post_conditions: HashMap<PostCond, String>,
    pub(crate) pre_tick: Option<PreTickHook>,
    pub(crate) post_tick: Option<PostTickHook>,
}

impl BehaviorNodeContainer {
    pub fn new(kind: impl Into<NodeKind>, ports: HashMap<Symbol, String>) -> Self {
        Self {
            name: "".to_owned(),
            kind: kind.into(),
            ports,
            children: vec![],
            subtree: None,
            pre_conditions: HashMap::new(),
            post_conditions: HashMap::new(),
            pre_tick: None,
            post_tick: None,
        }
    }

    pub fn new_node(kind: impl Into<NodeKind>) -> Self {
        Self::new(kind, HashMap::new())
    }

    /// Wraps `child` in a scope of its own.
    pub fn subtree(name: impl Into<String>, child: BehaviorNodeContainer) -> Self {
        let mut ret = Self::new_node(crate::nodes::decorator::DecoratorNode::Subtree)
            .with_name(name);
        ret.subtree = Some(SubtreeScope::default());
        ret.children.push(child);
        ret
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_port(mut self, port: impl Into<Symbol>, value: impl Into<String>) -> Self {
        self.ports.insert(port.into(), value.into());
        self
    }

    /// Maps `internal` to `{external}` or a literal. Only subtrees have a
    /// scope to remap; building a tree where any other node was given a
    /// remapping fails.
    pub fn with_remapping(mut self, internal: impl Into<Symbol>, external: impl Into<String>) -> Self {
        self.subtree
            .get_or_insert_with(SubtreeScope::default)
            .remapping
            .insert(internal.into(), external.into());
        self
    }

    /// Subtrees only, like [`Self::with_remapping`].
    pub fn with_auto_remapping(mut self, enabled: bool) -> Self {
        self.subtree
            .get_or_insert_with(SubtreeScope::default)
            .auto_remapping = Some(enabled);
        self
    }

    pub fn with_pre_condition(mut self, cond: PreCond, script: impl Into<String>) -> Self {
        self.pre_conditions.insert(cond, script.into());
        self
    }

    pub fn with_post_condition(mut self, cond: PostCond, script: impl Into<String>) -> Self {
        self.post_conditions.insert(cond, script.into());
        self
    }

    pub fn with_pre_tick_hook(mut self, hook: PreTickHook) -> Self {
        self.pre_tick = Some(hook);
        self
    }

    pub fn with_post_tick_hook(mut self, hook: PostTickHook) -> Self {
        self.post_tick = Some(hook);
        self
    }

    pub fn add_child(&mut self, child: BehaviorNodeContainer) -> AddChildResult {
        if NumChildren::Finite(self.children.len()) < self.kind.max_children() {
            self.children.push(child);
            Ok(())
        } else {
            Err(AddChildError::TooManyNodes)
        }
    }

    pub fn with_child(mut self, child: BehaviorNodeContainer) -> Result<Self> {
        self.add_child(child).map_err(|error| Error::AddChild {
            error,
            node: self.display_name(),
        })?;
        Ok(self)
    }

    pub fn with_children(
        mut self,
        children: impl IntoIterator<Item = BehaviorNodeContainer>,
    ) -> Result<Self> {
        for child in children {
            self = self.with_child(child)?;
        }
        Ok(self)
    }

    fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.kind.registration_name()
        } else {
            self.name.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn ports(&self) -> &HashMap<Symbol, String> {
        &self.ports
    }

    pub fn children(&self) -> &[BehaviorNodeContainer] {
        &self.children
    }

    pub fn is_subtree(&self) -> bool {
        self.subtree.is_some()
    }
}
