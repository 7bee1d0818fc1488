//! Read-only walks over an instantiated tree, for printing and monitoring.

use crate::{
    tree::{NodeId, Tree, TreeNode},
    NodeStatus,
};
use std::fmt::Write;

fn visit(tree: &Tree, id: NodeId, depth: usize, visitor: &mut dyn FnMut(&TreeNode, usize)) {
    let Some(node) = tree.node(id) else {
        return;
    };
    visitor(node, depth);
    for &child in node.children() {
        visit(tree, child, depth + 1, visitor);
    }
}

/// Calls `visitor` on every node, parents before children.
pub fn apply_recursive_visitor(tree: &Tree, mut visitor: impl FnMut(&TreeNode)) {
    visit(tree, tree.root_id(), 0, &mut |node, _| visitor(node));
}

/// The tree as an indented list of node names.
pub fn format_tree(tree: &Tree) -> String {
    let mut out = String::from("----------------\n");
    visit(tree, tree.root_id(), 0, &mut |node, depth| {
        let _ = writeln!(out, "{}{}", "   ".repeat(depth), node.name());
    });
    out.push_str("----------------\n");
    out
}

pub fn print_tree_recursively(tree: &Tree) {
    print!("{}", format_tree(tree));
}

/// `(uid, status)` of every node in visiting order.
pub fn build_serialized_status_snapshot(tree: &Tree) -> Vec<(u16, NodeStatus)> {
    let mut snapshot = vec![];
    apply_recursive_visitor(tree, |node| snapshot.push((node.uid(), node.status())));
    snapshot
}
