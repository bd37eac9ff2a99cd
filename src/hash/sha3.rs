// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Node labelling through SHA3-256

use sha3::Digest;

/// The width of a SHA3-256 label
pub const DIGEST_BYTES: usize = 32;

/// Hashes one preimage into a label
pub fn hash(item: &[u8]) -> crate::hash::Digest {
    sha3::Sha3_256::digest(item).into()
}
