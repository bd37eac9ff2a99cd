// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The implementation of the nodes of an authenticated AVL tree.
//!
//! There are three kinds of nodes: internal nodes, leaves and label-only
//! stubs. All key/value data lives in the leaves; internal nodes route the
//! descent and carry the AVL balance. A label-only stub stands in for a
//! subtree a proof does not open, and reaching one during a walk is a
//! protocol error.
//!
//! Nodes are immutable once built: the `get_new` constructors produce a fresh
//! node that shares the unchanged children with the old one, so a mutated
//! tree and its predecessor coexist cheaply. The only mutable state is a pair
//! of flags used by the proof machinery: `visited` marks a node that must be
//! opened in the next proof, `is_new` marks a node created by the batch in
//! progress.

use crate::hash::{hash, Digest, DIGEST_BYTES};
use crate::types::{AvdKey, AvdValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Domain separator for leaf labels
const LEAF_LABEL_PREFIX: u8 = 0;
/// Domain separator for internal node labels
const INTERNAL_LABEL_PREFIX: u8 = 1;

/// A node of the tree. The tree is a strict binary tree: every internal node
/// has exactly two children, and every path ends in a leaf (or, on the
/// verifier side, possibly a label-only stub).
#[derive(Debug)]
pub enum Node {
    /// A routing node carrying the AVL balance
    Internal(InternalNode),
    /// A leaf carrying one key/value pair
    Leaf(LeafNode),
    /// A stub standing in for a subtree the proof does not open
    LabelOnly(LabelOnlyNode),
}

impl Node {
    /// The cryptographic label committing to this node's contents
    pub fn label(&self) -> Digest {
        match self {
            Node::Internal(node) => node.label,
            Node::Leaf(node) => node.label,
            Node::LabelOnly(node) => node.label,
        }
    }

    /// Whether this node is a leaf
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub(crate) fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            _ => None,
        }
    }

    pub(crate) fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(node) => Some(node),
            _ => None,
        }
    }

    pub(crate) fn mark_visited(&self) {
        match self {
            Node::Internal(node) => node.visited.store(true, Ordering::Relaxed),
            Node::Leaf(node) => node.visited.store(true, Ordering::Relaxed),
            Node::LabelOnly(_) => {}
        }
    }

    pub(crate) fn clear_visited(&self) {
        match self {
            Node::Internal(node) => node.visited.store(false, Ordering::Relaxed),
            Node::Leaf(node) => node.visited.store(false, Ordering::Relaxed),
            Node::LabelOnly(_) => {}
        }
    }

    pub(crate) fn visited(&self) -> bool {
        match self {
            Node::Internal(node) => node.visited.load(Ordering::Relaxed),
            Node::Leaf(node) => node.visited.load(Ordering::Relaxed),
            Node::LabelOnly(_) => false,
        }
    }

    pub(crate) fn clear_new(&self) {
        match self {
            Node::Internal(node) => node.is_new.store(false, Ordering::Relaxed),
            Node::Leaf(node) => node.is_new.store(false, Ordering::Relaxed),
            Node::LabelOnly(_) => {}
        }
    }

    pub(crate) fn is_new(&self) -> bool {
        match self {
            Node::Internal(node) => node.is_new.load(Ordering::Relaxed),
            Node::Leaf(node) => node.is_new.load(Ordering::Relaxed),
            Node::LabelOnly(_) => false,
        }
    }
}

/// An internal node. Its routing key is the minimum key of its right subtree
/// and decides which child a descent continues into. The prover stores the
/// routing key explicitly; nodes reconstructed from a proof leave it `None`
/// and are routed by the proof's direction bits instead. The balance is the
/// height of the right subtree minus the height of the left subtree, kept in
/// `{-1, 0, +1}`.
#[derive(Debug)]
pub struct InternalNode {
    pub(crate) key: Option<AvdKey>,
    pub(crate) left: Arc<Node>,
    pub(crate) right: Arc<Node>,
    pub(crate) balance: i8,
    pub(crate) label: Digest,
    pub(crate) visited: AtomicBool,
    pub(crate) is_new: AtomicBool,
}

impl InternalNode {
    /// Builds a fresh internal node, computing its label from its children.
    /// The routing key is not part of the label, so both roles derive the
    /// same labels whether or not they know it.
    pub(crate) fn new(
        key: Option<AvdKey>,
        left: Arc<Node>,
        right: Arc<Node>,
        balance: i8,
    ) -> Arc<Node> {
        let label = internal_label(balance, &left.label(), &right.label());
        Arc::new(Node::Internal(InternalNode {
            key,
            left,
            right,
            balance,
            label,
            visited: AtomicBool::new(false),
            is_new: AtomicBool::new(true),
        }))
    }

    /// Copy-on-write constructor: a new node in this node's place with the
    /// given children and balance, keeping the routing key.
    pub(crate) fn get_new(&self, left: Arc<Node>, right: Arc<Node>, balance: i8) -> Arc<Node> {
        self.get_new_routed(None, left, right, balance)
    }

    /// Like [InternalNode::get_new] but replacing the routing key, when this
    /// node tracks one. Nodes without a routing key stay without one.
    pub(crate) fn get_new_routed(
        &self,
        routing_key: Option<&AvdKey>,
        left: Arc<Node>,
        right: Arc<Node>,
        balance: i8,
    ) -> Arc<Node> {
        let key = match (routing_key, &self.key) {
            (Some(new_key), Some(_)) => Some(new_key.clone()),
            _ => self.key.clone(),
        };
        Self::new(key, left, right, balance)
    }

    /// The routing key, if this node stores one
    pub fn routing_key(&self) -> Option<&AvdKey> {
        self.key.as_ref()
    }

    /// The left child
    pub fn left(&self) -> &Arc<Node> {
        &self.left
    }

    /// The right child
    pub fn right(&self) -> &Arc<Node> {
        &self.right
    }

    /// The AVL balance: right subtree height minus left subtree height
    pub fn balance(&self) -> i8 {
        self.balance
    }
}

/// A leaf holding one key/value pair. `next_leaf_key` is the key of the
/// in-order successor leaf (the `+infinity` sentinel for the rightmost leaf),
/// which is what makes non-membership self-certifying: a leaf with
/// `key < k < next_leaf_key` proves that `k` is absent.
#[derive(Debug)]
pub struct LeafNode {
    pub(crate) key: AvdKey,
    pub(crate) value: AvdValue,
    pub(crate) next_leaf_key: AvdKey,
    pub(crate) label: Digest,
    pub(crate) visited: AtomicBool,
    pub(crate) is_new: AtomicBool,
}

impl LeafNode {
    /// Builds a fresh leaf, computing its label from its contents
    pub(crate) fn new(key: AvdKey, value: AvdValue, next_leaf_key: AvdKey) -> Arc<Node> {
        let label = leaf_label(&key, &value, &next_leaf_key);
        Arc::new(Node::Leaf(LeafNode {
            key,
            value,
            next_leaf_key,
            label,
            visited: AtomicBool::new(false),
            is_new: AtomicBool::new(true),
        }))
    }

    /// Copy-on-write constructor replacing the value
    pub(crate) fn get_new_value(&self, value: AvdValue) -> Arc<Node> {
        Self::new(self.key.clone(), value, self.next_leaf_key.clone())
    }

    /// Copy-on-write constructor replacing the successor key
    pub(crate) fn get_new_next_leaf_key(&self, next_leaf_key: AvdKey) -> Arc<Node> {
        Self::new(self.key.clone(), self.value.clone(), next_leaf_key)
    }

    /// Copy-on-write constructor replacing the key and value, used by the
    /// hard-deletion copy-over
    pub(crate) fn get_new_key_and_value(&self, key: AvdKey, value: AvdValue) -> Arc<Node> {
        Self::new(key, value, self.next_leaf_key.clone())
    }

    /// The key stored in this leaf
    pub fn key(&self) -> &AvdKey {
        &self.key
    }

    /// The value stored in this leaf
    pub fn value(&self) -> &AvdValue {
        &self.value
    }

    /// The key of the in-order successor leaf
    pub fn next_leaf_key(&self) -> &AvdKey {
        &self.next_leaf_key
    }
}

/// A stub standing in for a subtree whose contents the proof does not open.
/// Only its label is known.
#[derive(Debug)]
pub struct LabelOnlyNode {
    pub(crate) label: Digest,
}

impl LabelOnlyNode {
    pub(crate) fn new(label: Digest) -> Arc<Node> {
        Arc::new(Node::LabelOnly(LabelOnlyNode { label }))
    }
}

fn leaf_label(key: &AvdKey, value: &AvdValue, next_leaf_key: &AvdKey) -> Digest {
    let mut data = Vec::with_capacity(1 + key.len() + value.len() + next_leaf_key.len());
    data.push(LEAF_LABEL_PREFIX);
    data.extend_from_slice(key);
    data.extend_from_slice(value);
    data.extend_from_slice(next_leaf_key);
    hash(&data)
}

fn internal_label(balance: i8, left_label: &Digest, right_label: &Digest) -> Digest {
    let mut data = Vec::with_capacity(2 + 2 * DIGEST_BYTES);
    data.push(INTERNAL_LABEL_PREFIX);
    data.push(balance as u8);
    data.extend_from_slice(left_label);
    data.extend_from_slice(right_label);
    hash(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: u8, value: u8, next: u8) -> Arc<Node> {
        LeafNode::new(
            AvdKey::from(vec![key; 4]),
            AvdValue::from(vec![value; 4]),
            AvdKey::from(vec![next; 4]),
        )
    }

    #[test]
    fn test_labels_commit_to_contents() {
        let base = leaf(1, 2, 3);
        assert_ne!(base.label(), leaf(1, 2, 4).label());
        assert_ne!(base.label(), leaf(1, 4, 3).label());
        assert_ne!(base.label(), leaf(4, 2, 3).label());
        assert_eq!(base.label(), leaf(1, 2, 3).label());

        let parent = InternalNode::new(None, leaf(1, 2, 3), leaf(3, 4, 5), 0);
        let rebalanced = InternalNode::new(None, leaf(1, 2, 3), leaf(3, 4, 5), 1);
        assert_ne!(parent.label(), rebalanced.label());
    }

    #[test]
    fn test_routing_key_not_in_label() {
        let keyed = InternalNode::new(
            Some(AvdKey::from(vec![3u8; 4])),
            leaf(1, 2, 3),
            leaf(3, 4, 5),
            0,
        );
        let unkeyed = InternalNode::new(None, leaf(1, 2, 3), leaf(3, 4, 5), 0);
        assert_eq!(keyed.label(), unkeyed.label());
    }

    #[test]
    fn test_get_new_shares_children() {
        let left = leaf(1, 2, 3);
        let right = leaf(3, 4, 5);
        let parent = InternalNode::new(None, left.clone(), right.clone(), 0);
        let parent_node = parent.as_internal().unwrap();

        let replacement = leaf(3, 9, 5);
        let reparented = parent_node.get_new(left.clone(), replacement.clone(), 0);
        let reparented_node = reparented.as_internal().unwrap();
        assert!(Arc::ptr_eq(reparented_node.left(), &left));
        assert!(Arc::ptr_eq(reparented_node.right(), &replacement));
        // the original is untouched
        assert!(Arc::ptr_eq(parent_node.right(), &right));
    }

    #[test]
    fn test_routed_copy_keeps_role_convention() {
        let keyed = InternalNode::new(
            Some(AvdKey::from(vec![3u8; 4])),
            leaf(1, 2, 3),
            leaf(3, 4, 5),
            0,
        );
        let keyed_node = keyed.as_internal().unwrap();
        let new_key = AvdKey::from(vec![7u8; 4]);
        let rerouted = keyed_node.get_new_routed(
            Some(&new_key),
            keyed_node.left().clone(),
            keyed_node.right().clone(),
            0,
        );
        assert_eq!(
            rerouted.as_internal().unwrap().routing_key(),
            Some(&new_key)
        );

        let unkeyed = InternalNode::new(None, leaf(1, 2, 3), leaf(3, 4, 5), 0);
        let unkeyed_node = unkeyed.as_internal().unwrap();
        let still_unkeyed = unkeyed_node.get_new_routed(
            Some(&new_key),
            unkeyed_node.left().clone(),
            unkeyed_node.right().clone(),
            0,
        );
        assert_eq!(still_unkeyed.as_internal().unwrap().routing_key(), None);
    }

    #[test]
    fn test_visited_flags() {
        let node = leaf(1, 2, 3);
        assert!(!node.visited());
        node.mark_visited();
        assert!(node.visited());
        node.clear_visited();
        assert!(!node.visited());

        assert!(node.is_new());
        node.clear_new();
        assert!(!node.is_new());

        let stub = LabelOnlyNode::new([0u8; DIGEST_BYTES]);
        stub.mark_visited();
        assert!(!stub.visited());
    }
}
