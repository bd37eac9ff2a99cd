// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The verifier side of the dictionary: reconstructs the opened part of the
//! tree from a proof and replays a batch of operations over it, without ever
//! materializing the whole tree.
//!
//! The verifier trusts nothing but the starting digest. The proof supplies
//! the opened nodes and the direction bits of every descent; the walk checks
//! each landing leaf against the key, which is what catches forged
//! directions, and recomputes every label bottom-up, which is what catches
//! forged contents. After the batch, [BatchVerifier::digest] is the root
//! digest the prover must have reached, or `None` if the proof was rejected.

use crate::errors::{AvdError, PreconditionError, ProtocolError};
use crate::operation::Operation;
use crate::serialization::{direction_bit, parse_tree};
use crate::tree_node::{InternalNode, LeafNode, Node};
use crate::tree_ops::AuthenticatedTreeOps;
use crate::types::{root_digest, split_root_digest, AvdKey, AvdValue, RootDigest};
use log::{debug, warn};
use std::cmp::Ordering;
use std::sync::Arc;

/// The verifier's view of the dictionary: the partial tree reconstructed
/// from one proof, plus the proof's direction bits.
#[derive(Debug)]
pub struct BatchVerifier {
    key_length: usize,
    value_length_opt: Option<usize>,
    /// The current root; `None` once a proof has been rejected
    root: Option<Arc<Node>>,
    root_height: u8,
    /// The direction bits that followed the packed tree in the proof
    directions: Vec<u8>,
    /// The next direction bit to consume
    directions_index: usize,
    /// Where [AuthenticatedTreeOps::replay_comparison] reads the transcript
    replay_index: usize,
    /// The transcript index of the most recent right step
    last_right_step: usize,
}

impl BatchVerifier {
    /// Reconstructs the opened part of the tree from `proof` and checks it
    /// against `starting_digest` (a label plus one unsigned height byte).
    ///
    /// When `max_num_operations` is given, the number of nodes the proof may
    /// open is bounded in terms of it, the starting height and
    /// `max_deletes` (defaulting to `max_num_operations`), so a malicious
    /// proof cannot force unbounded reconstruction work.
    pub fn new(
        starting_digest: &[u8],
        proof: &[u8],
        key_length: usize,
        value_length_opt: Option<usize>,
        max_num_operations: Option<usize>,
        max_deletes: Option<usize>,
    ) -> Result<Self, AvdError> {
        if key_length == 0 {
            return Err(PreconditionError::KeyLengthZero.into());
        }
        let (label, root_height) = split_root_digest(starting_digest)?;

        let max_nodes = match max_num_operations {
            Some(max_operations) => {
                let mut log_num_operations = 0usize;
                let mut power = 1usize;
                while power < max_operations {
                    power = power.saturating_mul(2);
                    log_num_operations += 1;
                }
                // 1.5x the starting height covers the AVL worst case
                let pre_batch_height = 1 + std::cmp::max(root_height as usize, log_num_operations);
                let post_batch_height = pre_batch_height + pre_batch_height / 2;
                let max_deletes = max_deletes.unwrap_or(max_operations);
                (max_operations + max_deletes) * (2 * root_height as usize + 1)
                    + max_deletes * post_batch_height
                    + 1
            }
            None => 0,
        };

        let (root, directions_offset) = parse_tree(proof, key_length, value_length_opt, max_nodes)?;
        if root.label() != label {
            return Err(ProtocolError::DigestMismatch.into());
        }
        let directions = proof[directions_offset..].to_vec();
        debug!(
            "reconstructed a proof tree for digest {}; {} direction bytes",
            hex::encode(starting_digest),
            directions.len()
        );

        Ok(Self {
            key_length,
            value_length_opt,
            root: Some(root),
            root_height,
            directions,
            directions_index: 0,
            replay_index: 0,
            last_right_step: 0,
        })
    }

    /// The root digest after the operations replayed so far, or `None` if a
    /// proof has been rejected. After replaying the prover's batch this must
    /// equal the prover's post-batch digest.
    pub fn digest(&self) -> Option<RootDigest> {
        self.root
            .as_ref()
            .map(|root| root_digest(&root.label(), self.root_height))
    }

    /// Replays one operation of the batch and returns the value stored at
    /// its key beforehand.
    ///
    /// A precondition or update error mirrors the prover exactly: the tree
    /// and the direction cursor are rolled back and the verifier stays
    /// usable, matching a prover batch from which the failed operation was
    /// left out. A protocol or invariant error means the proof itself is
    /// bad: the verifier poisons itself and every later call fails.
    pub fn perform_one_operation(
        &mut self,
        operation: &Operation,
    ) -> Result<Option<AvdValue>, AvdError> {
        let root = match &self.root {
            Some(root) => Arc::clone(root),
            None => return Err(ProtocolError::VerifierNoLongerValid.into()),
        };
        let cursor_checkpoint = self.directions_index;
        self.replay_index = cursor_checkpoint;
        match self.apply_one(operation, &root) {
            Ok((new_root, old_value)) => {
                self.root = Some(new_root);
                Ok(old_value)
            }
            Err(error) => {
                match &error {
                    AvdError::Precondition(_) | AvdError::Update(_) => {
                        self.directions_index = cursor_checkpoint;
                    }
                    AvdError::Protocol(_) | AvdError::Invariant(_) => {
                        warn!("rejecting proof: {error}");
                        self.root = None;
                    }
                }
                Err(error)
            }
        }
    }
}

impl AuthenticatedTreeOps for BatchVerifier {
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
        // either the key is exactly here, or this leaf proves its absence by
        // bracketing it; anything else means the directions were forged
        match key.cmp(leaf.key()) {
            Ordering::Equal => Ok(true),
            Ordering::Greater => {
                if key >= leaf.next_leaf_key() {
                    return Err(ProtocolError::LeafMismatch(format!(
                        "key {} is not left of the successor {}",
                        hex::encode(key.as_slice()),
                        hex::encode(leaf.next_leaf_key().as_slice())
                    ))
                    .into());
                }
                Ok(false)
            }
            Ordering::Less => Err(ProtocolError::LeafMismatch(format!(
                "key {} lies left of leaf {}",
                hex::encode(key.as_slice()),
                hex::encode(leaf.key().as_slice())
            ))
            .into()),
        }
    }

    fn next_direction_is_left(
        &mut self,
        _key: &AvdKey,
        _node: &InternalNode,
    ) -> Result<bool, AvdError> {
        if self.directions_index >= self.directions.len() * 8 {
            return Err(ProtocolError::DirectionsExhausted.into());
        }
        let going_left = direction_bit(&self.directions, self.directions_index);
        if !going_left {
            self.last_right_step = self.directions_index;
        }
        self.directions_index += 1;
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
        // no routing key: reconstructed nodes are routed by the proof
        Ok(InternalNode::new(None, predecessor, new_leaf, 0))
    }

    fn replay_comparison(&mut self) -> Result<i32, AvdError> {
        if self.replay_index >= self.directions_index {
            return Err(ProtocolError::DirectionsExhausted.into());
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prover::BatchProver;
    use crate::types::ROOT_DIGEST_BYTES;

    fn key(n: u32) -> AvdKey {
        AvdKey::from(n.to_be_bytes().to_vec())
    }

    fn value(n: u32) -> AvdValue {
        AvdValue::from(n.to_be_bytes().to_vec())
    }

    #[test]
    fn test_rejects_wrong_digest_length() {
        let result = BatchVerifier::new(&[0u8; ROOT_DIGEST_BYTES - 1], &[], 4, Some(4), None, None);
        assert_eq!(
            result.map(|_| ()),
            Err(ProtocolError::DigestLength(ROOT_DIGEST_BYTES, ROOT_DIGEST_BYTES - 1).into())
        );
    }

    #[test]
    fn test_rejects_foreign_starting_digest() {
        let mut prover = BatchProver::new(4, Some(4)).unwrap();
        prover
            .perform_one_operation(&Operation::Insert(key(1), value(1)))
            .unwrap();
        let proof = prover.generate_proof();

        let mut foreign_digest = [0u8; ROOT_DIGEST_BYTES];
        foreign_digest[0] = 0xA5;
        let result = BatchVerifier::new(&foreign_digest, &proof, 4, Some(4), None, None);
        assert_eq!(
            result.map(|_| ()),
            Err(ProtocolError::DigestMismatch.into())
        );
    }

    #[test]
    fn test_poisoned_verifier_stays_poisoned() {
        let mut prover = BatchProver::new(4, Some(4)).unwrap();
        let starting_digest = prover.digest();
        prover
            .perform_one_operation(&Operation::Insert(key(1), value(1)))
            .unwrap();
        let proof = prover.generate_proof();

        let mut verifier =
            BatchVerifier::new(&starting_digest, &proof, 4, Some(4), Some(1), None).unwrap();
        // replaying a different operation than the prover ran starves the
        // walk of direction bits sooner or later
        let result = verifier.perform_one_operation(&Operation::Insert(key(2), value(2)));
        if result.is_ok() {
            // the forged operation can only survive until the landing leaf
            // check; the digests cannot match either way
            assert_ne!(verifier.digest(), Some(prover.digest()));
        } else {
            assert_eq!(verifier.digest(), None);
            assert_eq!(
                verifier.perform_one_operation(&Operation::Insert(key(1), value(1))),
                Err(ProtocolError::VerifierNoLongerValid.into())
            );
        }
    }
}
