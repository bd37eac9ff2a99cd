// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The prover side of the dictionary: holds the full tree, applies batches of
//! operations, and packs a proof from which a verifier that only remembers
//! the previous root digest can reach the same post-batch digest.

use crate::errors::{AvdError, InvariantError, PreconditionError};
use crate::operation::Operation;
use crate::serialization::{direction_bit, pack_tree, END_OF_TREE_IN_PROOF};
use crate::tree_node::{InternalNode, LeafNode, Node};
use crate::tree_ops::AuthenticatedTreeOps;
use crate::types::{root_digest, AvdKey, AvdValue, RootDigest, SerializedProof};
use log::debug;
use std::cmp::Ordering;
use std::sync::Arc;

/// The prover's view of the dictionary.
///
/// A fresh prover holds a single leaf carrying the `-infinity` sentinel, so
/// an empty dictionary already has a digest. Operations are applied one at a
/// time with [BatchProver::perform_one_operation]; the batch is closed by
/// [BatchProver::generate_proof], which emits the proof for everything
/// applied since the previous proof and starts the next batch.
///
/// While a batch is open the pre-batch tree stays reachable: operations
/// rebuild only the spine they touch, sharing everything else, and the
/// prover packs the proof from the pre-batch root afterwards.
#[derive(Debug)]
pub struct BatchProver {
    key_length: usize,
    value_length_opt: Option<usize>,
    /// The current root, reflecting every operation of the open batch
    top_node: Arc<Node>,
    /// The root as of the last generated proof
    old_top_node: Arc<Node>,
    root_height: u8,
    /// Set when the descent key compared equal to a routing key; the target
    /// leaf then lies one step right and all the way left
    found: bool,
    /// The direction transcript of the open batch, one bit per descent step
    /// (1 = left, 0 = right)
    directions: Vec<u8>,
    directions_bit_length: usize,
    /// Where [AuthenticatedTreeOps::replay_comparison] reads the transcript
    replay_index: usize,
    /// The transcript index at which the key compared equal
    last_right_step: usize,
}

impl BatchProver {
    /// Creates a prover over an empty dictionary with the given key length
    /// and, optionally, a fixed value length.
    pub fn new(key_length: usize, value_length_opt: Option<usize>) -> Result<Self, AvdError> {
        if key_length == 0 {
            return Err(PreconditionError::KeyLengthZero.into());
        }
        let sentinel_value = AvdValue::from(vec![0u8; value_length_opt.unwrap_or(0)]);
        let root = LeafNode::new(
            AvdKey::negative_infinity(key_length),
            sentinel_value,
            AvdKey::positive_infinity(key_length),
        );
        Ok(Self {
            key_length,
            value_length_opt,
            top_node: Arc::clone(&root),
            old_top_node: root,
            root_height: 0,
            found: false,
            directions: Vec::new(),
            directions_bit_length: 0,
            replay_index: 0,
            last_right_step: 0,
        })
    }

    /// The current root digest: the root label followed by the tree height
    /// as one unsigned byte. Reflects every operation applied so far,
    /// whether or not a proof has been generated for it yet.
    pub fn digest(&self) -> RootDigest {
        root_digest(&self.top_node.label(), self.root_height)
    }

    /// Applies one operation and returns the value stored at its key
    /// beforehand (`None` if the key was absent).
    ///
    /// A failed operation leaves no trace: the tree, the height and the
    /// direction transcript are exactly as if it had never been attempted,
    /// and it must likewise be left out of the batch given to verifiers.
    pub fn perform_one_operation(
        &mut self,
        operation: &Operation,
    ) -> Result<Option<AvdValue>, AvdError> {
        let transcript_checkpoint = self.directions_bit_length;
        self.replay_index = transcript_checkpoint;
        let root = Arc::clone(&self.top_node);
        match self.apply_one(operation, &root) {
            Ok((new_root, old_value)) => {
                self.top_node = new_root;
                Ok(old_value)
            }
            Err(error) => {
                // drop the direction bits the failed descent recorded
                self.found = false;
                self.directions_bit_length = transcript_checkpoint;
                self.directions.truncate((transcript_checkpoint + 7) / 8);
                if transcript_checkpoint & 7 != 0 {
                    if let Some(last) = self.directions.last_mut() {
                        *last &= (1u8 << (transcript_checkpoint & 7)) - 1;
                    }
                }
                Err(error)
            }
        }
    }

    /// Closes the open batch: packs the proof for every operation applied
    /// since the last call, clears the bookkeeping flags, and makes the
    /// current tree the base of the next batch.
    pub fn generate_proof(&mut self) -> SerializedProof {
        let mut packed = Vec::new();
        pack_tree(&self.old_top_node, self.value_length_opt, &mut packed);
        packed.push(END_OF_TREE_IN_PROOF);
        packed.extend_from_slice(&self.directions);

        reset_new_nodes(&self.top_node);
        self.directions.clear();
        self.directions_bit_length = 0;
        self.replay_index = 0;
        self.last_right_step = 0;
        self.found = false;
        self.old_top_node = Arc::clone(&self.top_node);

        debug!(
            "generated a {} byte proof; new root digest {}",
            packed.len(),
            hex::encode(self.digest())
        );
        packed
    }

    /// Reads the value at a key directly from the tree, without proof
    /// bookkeeping. Useful for serving reads that need no authentication.
    pub fn unauthenticated_lookup(&self, key: &AvdKey) -> Option<AvdValue> {
        let mut node = &self.top_node;
        loop {
            match node.as_ref() {
                Node::Leaf(leaf) => {
                    return if leaf.key() == key {
                        Some(leaf.value().clone())
                    } else {
                        None
                    }
                }
                Node::Internal(internal) => {
                    let routing_key = internal.routing_key()?;
                    node = if key < routing_key {
                        internal.left()
                    } else {
                        internal.right()
                    };
                }
                Node::LabelOnly(_) => return None,
            }
        }
    }

    fn push_direction(&mut self, going_left: bool) {
        if self.directions_bit_length & 7 == 0 {
            self.directions.push(going_left as u8);
        } else if going_left {
            let index = self.directions_bit_length >> 3;
            self.directions[index] |= 1 << (self.directions_bit_length & 7);
        }
        self.directions_bit_length += 1;
    }

    pub(crate) fn top_node(&self) -> &Arc<Node> {
        &self.top_node
    }

    pub(crate) fn height(&self) -> u8 {
        self.root_height
    }
}

impl AuthenticatedTreeOps for BatchProver {
    fn key_length(&self) -> usize {
        self.key_length
    }

    fn value_length(&self) -> Option<usize> {
        self.value_length_opt
    }

    fn root_height(&self) -> u8 {
        self.root_height
    }

    fn set_root_height(&mut self, height: u8) {
        self.root_height = height;
    }

    fn key_matches_leaf(&mut self, key: &AvdKey, leaf: &LeafNode) -> Result<bool, AvdError> {
        // the descent lands either on the key's own leaf (found on the way
        // down) or on the key's in-order predecessor
        let matches = self.found;
        if matches {
            self.found = false;
        } else {
            if key <= leaf.key() {
                return Err(InvariantError::DescentMismatch(format!(
                    "key {} is not right of leaf {}",
                    hex::encode(key.as_slice()),
                    hex::encode(leaf.key().as_slice())
                ))
                .into());
            }
            if key >= leaf.next_leaf_key() {
                return Err(InvariantError::DescentMismatch(format!(
                    "key {} is not left of the successor {}",
                    hex::encode(key.as_slice()),
                    hex::encode(leaf.next_leaf_key().as_slice())
                ))
                .into());
            }
        }
        Ok(matches)
    }

    fn next_direction_is_left(
        &mut self,
        key: &AvdKey,
        node: &InternalNode,
    ) -> Result<bool, AvdError> {
        let routing_key = node
            .routing_key()
            .ok_or(InvariantError::MissingRoutingKey)?;
        let going_left = if self.found {
            true
        } else {
            match key.cmp(routing_key) {
                Ordering::Equal => {
                    // the target leaf is one step right, then left all the way
                    self.found = true;
                    self.last_right_step = self.directions_bit_length;
                    false
                }
                Ordering::Less => true,
                Ordering::Greater => false,
            }
        };
        self.push_direction(going_left);
        Ok(going_left)
    }

    fn make_leaf_pair(
        &mut self,
        leaf: &LeafNode,
        key: &AvdKey,
        value: &AvdValue,
    ) -> Result<Arc<Node>, AvdError> {
        let new_leaf = LeafNode::new(key.clone(), value.clone(), leaf.next_leaf_key().clone());
        let predecessor = leaf.get_new_next_leaf_key(key.clone());
        Ok(InternalNode::new(Some(key.clone()), predecessor, new_leaf, 0))
    }

    fn replay_comparison(&mut self) -> Result<i32, AvdError> {
        if self.replay_index >= self.directions_bit_length {
            return Err(InvariantError::ReplayOutOfBounds.into());
        }
        let comparison = if self.replay_index == self.last_right_step {
            0
        } else if !direction_bit(&self.directions, self.replay_index)
            && self.replay_index < self.last_right_step
        {
            1
        } else {
            -1
        };
        self.replay_index += 1;
        Ok(comparison)
    }
}

/// Clears the batch bookkeeping flags of every node the closed batch
/// created, leaving the pre-existing subtrees untouched.
fn reset_new_nodes(node: &Arc<Node>) {
    if node.is_new() {
        if let Node::Internal(internal) = node.as_ref() {
            reset_new_nodes(internal.left());
            reset_new_nodes(internal.right());
        }
        node.clear_new();
        node.clear_visited();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ROOT_DIGEST_BYTES;

    fn key(n: u32) -> AvdKey {
        AvdKey::from(n.to_be_bytes().to_vec())
    }

    fn value(n: u32) -> AvdValue {
        AvdValue::from(n.to_be_bytes().to_vec())
    }

    #[test]
    fn test_empty_tree_digest() {
        let prover = BatchProver::new(4, Some(4)).unwrap();
        let digest = prover.digest();
        assert_eq!(digest.len(), ROOT_DIGEST_BYTES);
        assert_eq!(digest[ROOT_DIGEST_BYTES - 1], 0);
    }

    #[test]
    fn test_zero_key_length_rejected() {
        assert!(BatchProver::new(0, None).is_err());
    }

    #[test]
    fn test_unauthenticated_lookup() {
        let mut prover = BatchProver::new(4, Some(4)).unwrap();
        for n in 1u32..=20 {
            prover
                .perform_one_operation(&Operation::Insert(key(n), value(n * 11)))
                .unwrap();
        }
        assert_eq!(prover.unauthenticated_lookup(&key(7)), Some(value(77)));
        assert_eq!(prover.unauthenticated_lookup(&key(21)), None);
    }

    #[test]
    fn test_sentinel_keys_rejected() {
        let mut prover = BatchProver::new(4, Some(4)).unwrap();
        for reserved in [AvdKey::negative_infinity(4), AvdKey::positive_infinity(4)] {
            let result =
                prover.perform_one_operation(&Operation::Insert(reserved, value(1)));
            assert_eq!(result, Err(PreconditionError::ReservedKey.into()));
        }
    }

    #[test]
    fn test_wrong_lengths_rejected() {
        let mut prover = BatchProver::new(4, Some(4)).unwrap();
        let short_key = AvdKey::from(&[1u8, 2][..]);
        assert_eq!(
            prover.perform_one_operation(&Operation::Insert(short_key, value(1))),
            Err(PreconditionError::KeyLength(4, 2).into())
        );
        let long_value = AvdValue::from(vec![1u8; 5]);
        assert_eq!(
            prover.perform_one_operation(&Operation::Insert(key(1), long_value)),
            Err(PreconditionError::ValueLength(4, 5).into())
        );
    }

    #[test]
    fn test_failed_operation_leaves_no_trace() {
        let mut prover = BatchProver::new(4, Some(4)).unwrap();
        prover
            .perform_one_operation(&Operation::Insert(key(1), value(1)))
            .unwrap();
        let digest = prover.digest();
        let bits = prover.directions_bit_length;

        assert!(prover
            .perform_one_operation(&Operation::Insert(key(1), value(2)))
            .is_err());
        assert_eq!(prover.digest(), digest);
        assert_eq!(prover.directions_bit_length, bits);
    }
}
