// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The proof wire format.
//!
//! A proof is the post-order packing of the pre-batch tree restricted to the
//! nodes the batch visited, followed by an end-of-tree marker and the batch's
//! direction bits. Subtrees the batch never touched appear only as their
//! label. Leaves carry their key, value and successor key; internal nodes are
//! a single balance byte, since their two children immediately precede them
//! in post order and their routing key is not part of their label.

use crate::errors::{AvdError, ProtocolError};
use crate::hash::{try_parse_digest, DIGEST_BYTES};
use crate::tree_node::{InternalNode, LabelOnlyNode, LeafNode, Node};
use crate::types::{AvdKey, AvdValue};
use std::sync::Arc;

/// Marks a leaf in the packed tree
pub(crate) const LEAF_IN_PROOF: u8 = 2;
/// Marks an unopened subtree's label in the packed tree
pub(crate) const LABEL_IN_PROOF: u8 = 3;
/// Ends the packed tree; the direction bits follow
pub(crate) const END_OF_TREE_IN_PROOF: u8 = 4;

/// Packs the subtree rooted at `node` in post order, opening exactly the
/// nodes marked visited and clearing their marks along the way.
pub(crate) fn pack_tree(node: &Arc<Node>, value_length_opt: Option<usize>, out: &mut Vec<u8>) {
    match node.as_ref() {
        Node::Leaf(leaf) if node.visited() => {
            node.clear_visited();
            out.push(LEAF_IN_PROOF);
            out.extend_from_slice(leaf.key());
            if value_length_opt.is_none() {
                out.extend_from_slice(&(leaf.value().len() as u32).to_be_bytes());
            }
            out.extend_from_slice(leaf.value());
            out.extend_from_slice(leaf.next_leaf_key());
        }
        Node::Internal(internal) if node.visited() => {
            node.clear_visited();
            pack_tree(internal.left(), value_length_opt, out);
            pack_tree(internal.right(), value_length_opt, out);
            out.push(internal.balance() as u8);
        }
        _ => {
            out.push(LABEL_IN_PROOF);
            out.extend_from_slice(&node.label());
        }
    }
}

/// Parses the packed tree at the head of `proof`. Returns the reconstructed
/// root and the offset just past the end-of-tree marker, where the direction
/// bits begin. A `max_nodes` of zero leaves the node count unbounded.
pub(crate) fn parse_tree(
    proof: &[u8],
    key_length: usize,
    value_length_opt: Option<usize>,
    max_nodes: usize,
) -> Result<(Arc<Node>, usize), AvdError> {
    let mut stack: Vec<Arc<Node>> = Vec::new();
    let mut pos = 0usize;
    let mut nodes = 0usize;
    loop {
        let marker = *proof.get(pos).ok_or_else(|| {
            ProtocolError::MalformedProof(
                "the node stream ended without an end-of-tree marker".to_string(),
            )
        })?;
        pos += 1;
        match marker {
            END_OF_TREE_IN_PROOF => break,
            LABEL_IN_PROOF => {
                let label_bytes = take(proof, &mut pos, DIGEST_BYTES)?;
                let label = try_parse_digest(label_bytes).map_err(ProtocolError::MalformedProof)?;
                stack.push(LabelOnlyNode::new(label));
            }
            LEAF_IN_PROOF => {
                let key = AvdKey::from(take(proof, &mut pos, key_length)?);
                let value_length = match value_length_opt {
                    Some(length) => length,
                    None => {
                        let length_bytes = take(proof, &mut pos, 4)?;
                        let mut arr = [0u8; 4];
                        arr.copy_from_slice(length_bytes);
                        u32::from_be_bytes(arr) as usize
                    }
                };
                let value = AvdValue::from(take(proof, &mut pos, value_length)?);
                let next_leaf_key = AvdKey::from(take(proof, &mut pos, key_length)?);
                stack.push(LeafNode::new(key, value, next_leaf_key));
            }
            balance_byte => {
                let balance = balance_byte as i8;
                if !(-1..=1).contains(&balance) {
                    return Err(ProtocolError::MalformedProof(format!(
                        "unknown marker byte 0x{balance_byte:02x}"
                    ))
                    .into());
                }
                let right = stack.pop().ok_or_else(|| {
                    ProtocolError::MalformedProof(
                        "an internal node needs two children on the stack".to_string(),
                    )
                })?;
                let left = stack.pop().ok_or_else(|| {
                    ProtocolError::MalformedProof(
                        "an internal node needs two children on the stack".to_string(),
                    )
                })?;
                stack.push(InternalNode::new(None, left, right, balance));
            }
        }
        nodes += 1;
        if max_nodes > 0 && nodes > max_nodes {
            return Err(ProtocolError::ProofTooLarge(nodes, max_nodes).into());
        }
    }

    if stack.len() != 1 {
        return Err(ProtocolError::MalformedProof(format!(
            "the node stream left {} nodes on the stack",
            stack.len()
        ))
        .into());
    }
    let root = stack.pop().ok_or_else(|| {
        ProtocolError::MalformedProof("the node stream was empty".to_string())
    })?;
    Ok((root, pos))
}

/// Reads one bit of a direction transcript. Callers bounds-check the index.
pub(crate) fn direction_bit(bits: &[u8], index: usize) -> bool {
    bits[index >> 3] & (1 << (index & 7)) != 0
}

fn take<'a>(proof: &'a [u8], pos: &mut usize, length: usize) -> Result<&'a [u8], AvdError> {
    let end = pos
        .checked_add(length)
        .ok_or_else(|| ProtocolError::MalformedProof("length overflow".to_string()))?;
    let bytes = proof.get(*pos..end).ok_or_else(|| {
        ProtocolError::MalformedProof("the node stream ended mid-node".to_string())
    })?;
    *pos = end;
    Ok(bytes)
}

#[cfg(feature = "serde_serialization")]
pub(crate) mod serde_helpers {
    //! Serde serializers rendering byte strings as hex

    use serde::Deserialize;

    /// A serde serializer for bytes as a hex string
    pub fn bytes_serialize_hex<S, T>(x: &T, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: AsRef<[u8]>,
    {
        let hex_str = hex::encode(x.as_ref());
        s.serialize_str(&hex_str)
    }

    /// A serde deserializer for bytes from a hex string
    pub fn bytes_deserialize_hex<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        hex::decode(hex_str).map_err(serde::de::Error::custom)
    }
}
