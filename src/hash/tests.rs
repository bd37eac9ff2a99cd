// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Tests pinning the node label formulas to the selected hash backend

use super::*;
use crate::tree_node::{InternalNode, LeafNode};
use crate::types::{AvdKey, AvdValue};

#[cfg(feature = "blake3")]
fn backend_hash(data: &[u8]) -> Digest {
    ::blake3::hash(data).into()
}

#[cfg(feature = "sha2")]
fn backend_hash(data: &[u8]) -> Digest {
    use ::sha2::Digest as _;
    ::sha2::Sha256::digest(data).into()
}

#[cfg(feature = "sha3")]
fn backend_hash(data: &[u8]) -> Digest {
    use ::sha3::Digest as _;
    ::sha3::Sha3_256::digest(data).into()
}

#[test]
fn test_try_parse_digest_checks_length() {
    assert_eq!(
        try_parse_digest(&[7u8; DIGEST_BYTES]),
        Ok([7u8; DIGEST_BYTES])
    );
    assert!(try_parse_digest(&[]).is_err());
    assert!(try_parse_digest(&[7u8; DIGEST_BYTES - 1]).is_err());
    assert!(try_parse_digest(&[7u8; DIGEST_BYTES + 1]).is_err());
}

#[test]
fn test_leaf_labels_pin_the_backend() {
    let key = AvdKey::from(vec![0x11u8; 4]);
    let value = AvdValue::from(vec![0x22u8; 4]);
    let next_leaf_key = AvdKey::from(vec![0x33u8; 4]);
    let leaf = LeafNode::new(key.clone(), value.clone(), next_leaf_key.clone());

    // a leaf label is the backend hash of 0x00, the key, the value and the
    // successor key
    let mut preimage = vec![0x00u8];
    preimage.extend_from_slice(key.as_slice());
    preimage.extend_from_slice(value.as_slice());
    preimage.extend_from_slice(next_leaf_key.as_slice());
    assert_eq!(leaf.label(), backend_hash(&preimage));
}

#[test]
fn test_internal_labels_pin_the_backend() {
    let left = LeafNode::new(
        AvdKey::from(vec![0x11u8; 4]),
        AvdValue::from(vec![0x22u8; 4]),
        AvdKey::from(vec![0x44u8; 4]),
    );
    let right = LeafNode::new(
        AvdKey::from(vec![0x44u8; 4]),
        AvdValue::from(vec![0x55u8; 4]),
        AvdKey::from(vec![0xFFu8; 4]),
    );
    let node = InternalNode::new(
        Some(AvdKey::from(vec![0x44u8; 4])),
        left.clone(),
        right.clone(),
        -1,
    );

    // an internal label is the backend hash of 0x01, the balance byte and
    // the two child labels; the routing key stays out of the preimage
    let mut preimage = vec![0x01u8, (-1i8) as u8];
    preimage.extend_from_slice(&left.label());
    preimage.extend_from_slice(&right.label());
    assert_eq!(node.label(), backend_hash(&preimage));
}
