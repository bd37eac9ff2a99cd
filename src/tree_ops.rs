// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The batch operation walk shared by the prover and the verifier.
//!
//! Both roles apply a batch by running the same recursive descent over their
//! view of the tree; the prover holds every node while the verifier holds the
//! partial tree reconstructed from a proof. Everything the two views disagree
//! on is pushed behind the four hooks of [AuthenticatedTreeOps], and the rest
//! of the walk is shared so that both roles derive bit-identical post-state
//! labels from the same operations. Any divergence here silently breaks the
//! authentication, which is why deletion replays the comparisons recorded
//! during the modify descent instead of comparing keys a second time.
//!
//! The walk never mutates a node: modified subtrees are rebuilt bottom-up
//! through the copy-on-write constructors, and the old root stays intact for
//! the proof of the batch in progress.

use crate::errors::{AvdError, InvariantError, PreconditionError, ProtocolError};
use crate::operation::Operation;
use crate::tree_node::{InternalNode, LeafNode, Node};
use crate::types::{AvdKey, AvdValue};
use std::sync::Arc;

/// What one modify descent reports back to its caller: the replacement
/// subtree, whether anything changed, whether the subtree grew by one level,
/// whether a deletion pass is still owed, and the value previously stored at
/// the key.
pub(crate) type ModifyResult = (Arc<Node>, bool, bool, bool, Option<AvdValue>);

/// What one deletion descent reports back: the replacement subtree, whether
/// it shrank by one level, and, while unwinding a `delete_max` descent, the
/// removed maximum leaf awaiting its copy-over.
pub(crate) type DeleteResult = (Arc<Node>, bool, Option<(AvdKey, AvdValue)>);

/// The walk, with the four role-specific hooks left abstract.
///
/// Hook contract: `next_direction_is_left` must be deterministic and agree
/// with the leaf ordering, and `replay_comparison` must emit the signs of
/// exactly the comparisons `next_direction_is_left` answered during the
/// modify descent of the same operation, in descent order.
pub(crate) trait AuthenticatedTreeOps {
    /// The fixed key length of the instance
    fn key_length(&self) -> usize;

    /// The fixed value length of the instance, if values are fixed-length
    fn value_length(&self) -> Option<usize>;

    /// The current tree height
    fn root_height(&self) -> u8;

    /// Replaces the current tree height
    fn set_root_height(&mut self, height: u8);

    /// Whether `key` belongs at `leaf`, the unique candidate slot the
    /// descent arrived at
    fn key_matches_leaf(&mut self, key: &AvdKey, leaf: &LeafNode) -> Result<bool, AvdError>;

    /// Whether the descent for `key` continues into the left child of `node`
    fn next_direction_is_left(&mut self, key: &AvdKey, node: &InternalNode)
        -> Result<bool, AvdError>;

    /// Builds the two-leaf subtree that replaces `leaf` when inserting the
    /// strictly greater `key`, maintaining the successor chain
    fn make_leaf_pair(
        &mut self,
        leaf: &LeafNode,
        key: &AvdKey,
        value: &AvdValue,
    ) -> Result<Arc<Node>, AvdError>;

    /// The sign of the next recorded key-versus-routing-key comparison of
    /// the operation being deleted; each recorded comparison is consumed once
    fn replay_comparison(&mut self) -> Result<i32, AvdError>;

    /// Marks a node for inclusion in the proof of the batch in progress
    fn on_node_visit(&mut self, node: &Arc<Node>) {
        node.mark_visited();
    }

    /// Rejects values of the wrong length when the instance fixes one
    fn check_value_length(&self, value: &AvdValue) -> Result<(), AvdError> {
        if let Some(expected) = self.value_length() {
            if value.len() != expected {
                return Err(PreconditionError::ValueLength(expected, value.len()).into());
            }
        }
        Ok(())
    }

    /// Applies one operation to the tree rooted at `root` and returns the new
    /// root together with the value stored at the key beforehand.
    ///
    /// The key must have the configured length and be strictly between the
    /// two sentinels. The tree height is adjusted here, driven by the height
    /// indicators the walks report.
    fn apply_one(
        &mut self,
        operation: &Operation,
        root: &Arc<Node>,
    ) -> Result<(Arc<Node>, Option<AvdValue>), AvdError> {
        let key = operation.key();
        let key_length = self.key_length();
        if key.len() != key_length {
            return Err(PreconditionError::KeyLength(key_length, key.len()).into());
        }
        if key.is_negative_infinity() || key.is_positive_infinity() {
            return Err(PreconditionError::ReservedKey.into());
        }

        let (new_root, _change_happened, child_height_increased, to_delete, old_value) =
            self.modify_helper(root, key, operation)?;
        if to_delete {
            let (post_delete_root, height_decreased, _saved) =
                self.delete_helper(&new_root, false)?;
            if height_decreased {
                let height = self
                    .root_height()
                    .checked_sub(1)
                    .ok_or(InvariantError::HeightOutOfRange)?;
                self.set_root_height(height);
            }
            Ok((post_delete_root, old_value))
        } else {
            if child_height_increased {
                let height = self
                    .root_height()
                    .checked_add(1)
                    .ok_or(InvariantError::HeightOutOfRange)?;
                self.set_root_height(height);
            }
            Ok((new_root, old_value))
        }
    }

    /// The single recursive descent behind lookups, insertions and updates.
    /// Deletion is not performed here: a modification that maps the stored
    /// value to nothing only flags `to_delete` and leaves the tree alone, and
    /// [AuthenticatedTreeOps::delete_helper] descends again to perform it.
    ///
    /// Nodes are marked visited on the way back up, and on the fallible side
    /// of a branch only after the update function has succeeded, so an
    /// operation that aborts contributes nothing to the proof.
    fn modify_helper(
        &mut self,
        r_node: &Arc<Node>,
        key: &AvdKey,
        operation: &Operation,
    ) -> Result<ModifyResult, AvdError> {
        match r_node.as_ref() {
            Node::Leaf(leaf) => {
                if self.key_matches_leaf(key, leaf)? {
                    match operation {
                        Operation::Lookup(_) => {
                            self.on_node_visit(r_node);
                            Ok((
                                Arc::clone(r_node),
                                false,
                                false,
                                false,
                                Some(leaf.value().clone()),
                            ))
                        }
                        modification => match modification.update_fn(Some(leaf.value()))? {
                            None => {
                                // deletion is owed; performed by the second pass
                                self.on_node_visit(r_node);
                                Ok((
                                    Arc::clone(r_node),
                                    false,
                                    false,
                                    true,
                                    Some(leaf.value().clone()),
                                ))
                            }
                            Some(new_value) => {
                                self.check_value_length(&new_value)?;
                                let old_value = Some(leaf.value().clone());
                                let new_leaf = leaf.get_new_value(new_value);
                                self.on_node_visit(r_node);
                                Ok((new_leaf, true, false, false, old_value))
                            }
                        },
                    }
                } else {
                    match operation {
                        Operation::Lookup(_) => {
                            self.on_node_visit(r_node);
                            Ok((Arc::clone(r_node), false, false, false, None))
                        }
                        modification => match modification.update_fn(None)? {
                            None => {
                                self.on_node_visit(r_node);
                                Ok((Arc::clone(r_node), false, false, false, None))
                            }
                            Some(new_value) => {
                                self.check_value_length(&new_value)?;
                                let pair = self.make_leaf_pair(leaf, key, &new_value)?;
                                self.on_node_visit(r_node);
                                Ok((pair, true, true, false, None))
                            }
                        },
                    }
                }
            }
            Node::Internal(r) => {
                if self.next_direction_is_left(key, r)? {
                    let (new_left, change_happened, child_height_increased, to_delete, old_value) =
                        self.modify_helper(r.left(), key, operation)?;
                    self.on_node_visit(r_node);

                    if !change_happened {
                        return Ok((Arc::clone(r_node), false, false, to_delete, old_value));
                    }
                    if child_height_increased && r.balance() < 0 {
                        // the left subtree was already taller and grew again
                        let new_left_node = new_left.as_internal().ok_or_else(|| {
                            ProtocolError::UnexpectedNode(
                                "a subtree that grew cannot be a leaf".to_string(),
                            )
                        })?;
                        if new_left_node.balance() < 0 {
                            // single right rotation
                            let new_right_child =
                                r.get_new(new_left_node.right().clone(), r.right().clone(), 0);
                            let new_root = new_left_node.get_new(
                                new_left_node.left().clone(),
                                new_right_child,
                                0,
                            );
                            Ok((new_root, true, false, false, old_value))
                        } else {
                            self.on_node_visit(new_left_node.right());
                            let new_root = double_right_rotate(r, None, &new_left, r.right())?;
                            Ok((new_root, true, false, false, old_value))
                        }
                    } else {
                        let my_height_increased = child_height_increased && r.balance() == 0;
                        let new_balance = if child_height_increased {
                            r.balance() - 1
                        } else {
                            r.balance()
                        };
                        Ok((
                            r.get_new(new_left, r.right().clone(), new_balance),
                            true,
                            my_height_increased,
                            false,
                            old_value,
                        ))
                    }
                } else {
                    let (new_right, change_happened, child_height_increased, to_delete, old_value) =
                        self.modify_helper(r.right(), key, operation)?;
                    self.on_node_visit(r_node);

                    if !change_happened {
                        return Ok((Arc::clone(r_node), false, false, to_delete, old_value));
                    }
                    if child_height_increased && r.balance() > 0 {
                        // the right subtree was already taller and grew again
                        let new_right_node = new_right.as_internal().ok_or_else(|| {
                            ProtocolError::UnexpectedNode(
                                "a subtree that grew cannot be a leaf".to_string(),
                            )
                        })?;
                        if new_right_node.balance() > 0 {
                            // single left rotation
                            let new_left_child =
                                r.get_new(r.left().clone(), new_right_node.left().clone(), 0);
                            let new_root = new_right_node.get_new(
                                new_left_child,
                                new_right_node.right().clone(),
                                0,
                            );
                            Ok((new_root, true, false, false, old_value))
                        } else {
                            self.on_node_visit(new_right_node.left());
                            let new_root = double_left_rotate(r, None, r.left(), &new_right)?;
                            Ok((new_root, true, false, false, old_value))
                        }
                    } else {
                        let my_height_increased = child_height_increased && r.balance() == 0;
                        let new_balance = if child_height_increased {
                            r.balance() + 1
                        } else {
                            r.balance()
                        };
                        Ok((
                            r.get_new(r.left().clone(), new_right, new_balance),
                            true,
                            my_height_increased,
                            false,
                            old_value,
                        ))
                    }
                }
            }
            Node::LabelOnly(_) => Err(ProtocolError::LabelOnlyNode.into()),
        }
    }

    /// The second pass of a deletion. Entered only after the modify walk
    /// flagged `to_delete`; descends along the replayed comparisons until the
    /// doomed leaf is adjacent, removes it, and rebalances on the way up.
    ///
    /// With `delete_max` the descent instead chases the maximum leaf of the
    /// subtree and hands it back to the caller, which copies its contents
    /// over the leaf actually being deleted and takes its key as the new
    /// routing key. That copy-over is what keeps the successor chain intact
    /// without a second relinking pass.
    fn delete_helper(&mut self, r_node: &Arc<Node>, delete_max: bool) -> Result<DeleteResult, AvdError> {
        let r = match r_node.as_ref() {
            Node::Internal(node) => node,
            Node::Leaf(_) => {
                return Err(ProtocolError::ReplayMismatch(
                    "the deletion descent reached a leaf".to_string(),
                )
                .into())
            }
            Node::LabelOnly(_) => return Err(ProtocolError::LabelOnlyNode.into()),
        };
        let direction = if delete_max { 1 } else { self.replay_comparison()? };
        if direction < 0 && r.left().is_leaf() {
            // the modify walk found the key, so it cannot lie left of a leaf
            return Err(ProtocolError::ReplayMismatch(
                "the deletion descent was sent left of a leaf".to_string(),
            )
            .into());
        }
        self.on_node_visit(r_node);

        if direction >= 0 {
            if let Some(right_leaf) = r.right().as_leaf() {
                self.on_node_visit(r.right());
                if delete_max {
                    // hand the removed maximum leaf up for the copy-over
                    let saved = (right_leaf.key().clone(), right_leaf.value().clone());
                    return Ok((Arc::clone(r.left()), true, Some(saved)));
                }
                if direction > 0 {
                    return Err(ProtocolError::ReplayMismatch(
                        "the deletion descent was sent right of the rightmost leaf".to_string(),
                    )
                    .into());
                }
                // direction == 0: the right leaf is the one being deleted;
                // its predecessor inherits its successor key
                let new_node = self.change_next_leaf_key_of_max_node(
                    r.left(),
                    right_leaf.next_leaf_key().clone(),
                )?;
                return Ok((new_node, true, None));
            }
        }
        if direction == 0 {
            if let Some(left_leaf) = r.left().as_leaf() {
                // the deleted leaf is the minimum of the right subtree;
                // overwrite it with the predecessor leaf's contents
                self.on_node_visit(r.left());
                let new_node = self.change_key_and_value_of_min_node(
                    r.right(),
                    left_leaf.key().clone(),
                    left_leaf.value().clone(),
                )?;
                return Ok((new_node, true, None));
            }
        }

        if direction <= 0 {
            let (new_left, child_height_decreased, saved) =
                self.delete_helper(r.left(), direction == 0)?;
            let (new_right, new_routing_key) = if direction == 0 {
                let (saved_key, saved_value) =
                    saved.ok_or(InvariantError::SavedLeafMissing)?;
                let new_right = self.change_key_and_value_of_min_node(
                    r.right(),
                    saved_key.clone(),
                    saved_value,
                )?;
                (new_right, Some(saved_key))
            } else {
                (Arc::clone(r.right()), None)
            };
            let new_routing_key = new_routing_key.as_ref();

            if child_height_decreased && r.balance() > 0 {
                // the right side now sticks out by two levels
                self.on_node_visit(&new_right);
                let right_node = new_right.as_internal().ok_or_else(|| {
                    ProtocolError::UnexpectedNode(
                        "a subtree that outgrew its sibling cannot be a leaf".to_string(),
                    )
                })?;
                if right_node.balance() < 0 {
                    self.on_node_visit(right_node.left());
                    let new_root =
                        double_left_rotate(r, new_routing_key, &new_left, &new_right)?;
                    Ok((new_root, true, None))
                } else {
                    // single left rotation
                    let new_left_child = r.get_new_routed(
                        new_routing_key,
                        new_left,
                        right_node.left().clone(),
                        1 - right_node.balance(),
                    );
                    let new_root_balance = right_node.balance() - 1;
                    let new_root = right_node.get_new(
                        new_left_child,
                        right_node.right().clone(),
                        new_root_balance,
                    );
                    Ok((new_root, new_root_balance == 0, None))
                }
            } else {
                let new_balance = if child_height_decreased {
                    r.balance() + 1
                } else {
                    r.balance()
                };
                let new_root = r.get_new_routed(new_routing_key, new_left, new_right, new_balance);
                Ok((new_root, child_height_decreased && new_balance == 0, None))
            }
        } else {
            let (new_right, child_height_decreased, saved) =
                self.delete_helper(r.right(), delete_max)?;

            if child_height_decreased && r.balance() < 0 {
                // the left side now sticks out by two levels
                self.on_node_visit(r.left());
                let left_node = r.left().as_internal().ok_or_else(|| {
                    ProtocolError::UnexpectedNode(
                        "a subtree that outgrew its sibling cannot be a leaf".to_string(),
                    )
                })?;
                if left_node.balance() > 0 {
                    self.on_node_visit(left_node.right());
                    let new_root = double_right_rotate(r, None, r.left(), &new_right)?;
                    Ok((new_root, true, saved))
                } else {
                    // single right rotation
                    let new_right_child = r.get_new(
                        left_node.right().clone(),
                        new_right,
                        -1 - left_node.balance(),
                    );
                    let new_root_balance = left_node.balance() + 1;
                    let new_root = left_node.get_new(
                        left_node.left().clone(),
                        new_right_child,
                        new_root_balance,
                    );
                    Ok((new_root, new_root_balance == 0, saved))
                }
            } else {
                let new_balance = if child_height_decreased {
                    r.balance() - 1
                } else {
                    r.balance()
                };
                Ok((
                    r.get_new(r.left().clone(), new_right, new_balance),
                    child_height_decreased && new_balance == 0,
                    saved,
                ))
            }
        }
    }

    /// Walks the right spine down to the maximum leaf and rebuilds it with a
    /// new successor key. Marks every node on the way; fails loudly on a
    /// label-only stub.
    fn change_next_leaf_key_of_max_node(
        &mut self,
        r_node: &Arc<Node>,
        next_leaf_key: AvdKey,
    ) -> Result<Arc<Node>, AvdError> {
        self.on_node_visit(r_node);
        match r_node.as_ref() {
            Node::Leaf(leaf) => Ok(leaf.get_new_next_leaf_key(next_leaf_key)),
            Node::Internal(node) => {
                let new_right =
                    self.change_next_leaf_key_of_max_node(node.right(), next_leaf_key)?;
                Ok(node.get_new(node.left().clone(), new_right, node.balance()))
            }
            Node::LabelOnly(_) => Err(ProtocolError::LabelOnlyNode.into()),
        }
    }

    /// Walks the left spine down to the minimum leaf and rebuilds it with a
    /// new key and value. Marks every node on the way; fails loudly on a
    /// label-only stub.
    fn change_key_and_value_of_min_node(
        &mut self,
        r_node: &Arc<Node>,
        key: AvdKey,
        value: AvdValue,
    ) -> Result<Arc<Node>, AvdError> {
        self.on_node_visit(r_node);
        match r_node.as_ref() {
            Node::Leaf(leaf) => Ok(leaf.get_new_key_and_value(key, value)),
            Node::Internal(node) => {
                let new_left = self.change_key_and_value_of_min_node(node.left(), key, value)?;
                Ok(node.get_new(new_left, node.right().clone(), node.balance()))
            }
            Node::LabelOnly(_) => Err(ProtocolError::LabelOnlyNode.into()),
        }
    }
}

/// The balances of the two displaced nodes after a double rotation, derived
/// from the inner pivot's balance
fn rotation_balances(pivot_balance: i8) -> Result<(i8, i8), AvdError> {
    match pivot_balance {
        0 => Ok((0, 0)),
        -1 => Ok((0, 1)),
        1 => Ok((-1, 0)),
        balance => Err(InvariantError::BalanceOutOfRange(balance).into()),
    }
}

/// Double left rotation of `cur` with children `left` and `right`: the inner
/// pivot `right.left` becomes the subtree root, `cur` its left child and
/// `right` its right child. The caller must have marked the pivot visited
/// beforehand. `routing_key`, when given, replaces `cur`'s routing key in
/// its rebuilt node.
pub(crate) fn double_left_rotate(
    cur: &InternalNode,
    routing_key: Option<&AvdKey>,
    left: &Arc<Node>,
    right: &Arc<Node>,
) -> Result<Arc<Node>, AvdError> {
    let right_node = right.as_internal().ok_or_else(|| {
        ProtocolError::UnexpectedNode("a double left rotation needs an internal right child".to_string())
    })?;
    let pivot = right_node.left().as_internal().ok_or_else(|| {
        ProtocolError::UnexpectedNode("a double left rotation needs an internal pivot".to_string())
    })?;
    let (new_left_balance, new_right_balance) = rotation_balances(pivot.balance())?;
    let new_left_child = cur.get_new_routed(
        routing_key,
        Arc::clone(left),
        pivot.left().clone(),
        new_left_balance,
    );
    let new_right_child = right_node.get_new(
        pivot.right().clone(),
        right_node.right().clone(),
        new_right_balance,
    );
    Ok(pivot.get_new(new_left_child, new_right_child, 0))
}

/// Double right rotation: the mirror image of
/// [double_left_rotate], pivoting on `left.right`.
pub(crate) fn double_right_rotate(
    cur: &InternalNode,
    routing_key: Option<&AvdKey>,
    left: &Arc<Node>,
    right: &Arc<Node>,
) -> Result<Arc<Node>, AvdError> {
    let left_node = left.as_internal().ok_or_else(|| {
        ProtocolError::UnexpectedNode("a double right rotation needs an internal left child".to_string())
    })?;
    let pivot = left_node.right().as_internal().ok_or_else(|| {
        ProtocolError::UnexpectedNode("a double right rotation needs an internal pivot".to_string())
    })?;
    let (new_left_balance, new_right_balance) = rotation_balances(pivot.balance())?;
    let new_left_child = left_node.get_new(
        left_node.left().clone(),
        pivot.left().clone(),
        new_left_balance,
    );
    let new_right_child = cur.get_new_routed(
        routing_key,
        pivot.right().clone(),
        Arc::clone(right),
        new_right_balance,
    );
    Ok(pivot.get_new(new_left_child, new_right_child, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_node::LeafNode;

    fn leaf(key: u8) -> Arc<Node> {
        LeafNode::new(
            AvdKey::from(vec![key; 4]),
            AvdValue::from(vec![key; 4]),
            AvdKey::from(vec![key + 1; 4]),
        )
    }

    fn internal(key: u8, left: Arc<Node>, right: Arc<Node>, balance: i8) -> Arc<Node> {
        InternalNode::new(Some(AvdKey::from(vec![key; 4])), left, right, balance)
    }

    #[test]
    fn test_rotation_balance_table() {
        assert_eq!(rotation_balances(0).unwrap(), (0, 0));
        assert_eq!(rotation_balances(-1).unwrap(), (0, 1));
        assert_eq!(rotation_balances(1).unwrap(), (-1, 0));
        assert!(rotation_balances(2).is_err());
    }

    #[test]
    fn test_double_left_rotate_shape() {
        // cur(a) with right child c whose left child is the pivot b
        let a_left = leaf(1);
        let b_left = leaf(3);
        let b_right = leaf(5);
        let c_right = leaf(7);
        let pivot = internal(4, b_left.clone(), b_right.clone(), 0);
        let right = internal(6, pivot.clone(), c_right.clone(), -1);
        let cur = internal(2, a_left.clone(), right.clone(), 1);
        let cur_node = cur.as_internal().unwrap();

        let rotated = double_left_rotate(cur_node, None, &a_left, &right).unwrap();
        let root = rotated.as_internal().unwrap();
        assert_eq!(root.balance(), 0);
        assert_eq!(root.routing_key(), Some(&AvdKey::from(vec![4u8; 4])));

        let new_left = root.left().as_internal().unwrap();
        let new_right = root.right().as_internal().unwrap();
        assert!(Arc::ptr_eq(new_left.left(), &a_left));
        assert!(Arc::ptr_eq(new_left.right(), &b_left));
        assert!(Arc::ptr_eq(new_right.left(), &b_right));
        assert!(Arc::ptr_eq(new_right.right(), &c_right));
        assert_eq!(new_left.balance(), 0);
        assert_eq!(new_right.balance(), 0);
    }

    #[test]
    fn test_double_right_rotate_shape() {
        // cur(c) with left child a whose right child is the pivot b
        let a_left = leaf(1);
        let b_left = leaf(3);
        let b_right = leaf(5);
        let c_right = leaf(7);
        let pivot = internal(4, b_left.clone(), b_right.clone(), 1);
        let left = internal(2, a_left.clone(), pivot.clone(), 1);
        let cur = internal(6, left.clone(), c_right.clone(), -1);
        let cur_node = cur.as_internal().unwrap();

        let rotated = double_right_rotate(cur_node, None, &left, &c_right).unwrap();
        let root = rotated.as_internal().unwrap();
        assert_eq!(root.balance(), 0);

        let new_left = root.left().as_internal().unwrap();
        let new_right = root.right().as_internal().unwrap();
        assert!(Arc::ptr_eq(new_left.left(), &a_left));
        assert!(Arc::ptr_eq(new_left.right(), &b_left));
        assert!(Arc::ptr_eq(new_right.left(), &b_right));
        assert!(Arc::ptr_eq(new_right.right(), &c_right));
        // pivot balance +1 puts the slack on the displaced left node
        assert_eq!(new_left.balance(), -1);
        assert_eq!(new_right.balance(), 0);
    }
}
