// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! This module contains the hashing utilities used to label tree nodes and to
//! form root digests

/// A node label or root-digest prefix, `DIGEST_BYTES` wide
pub type Digest = [u8; DIGEST_BYTES];
/// The all-zero digest, used as a starting point when filling one in
pub const EMPTY_DIGEST: [u8; DIGEST_BYTES] = [0u8; DIGEST_BYTES];

// =========================================
// ========== Blake3 settings ==============
// =========================================
#[cfg(feature = "blake3")]
pub mod blake3;
#[cfg(feature = "blake3")]
pub use crate::hash::blake3::hash;
#[cfg(feature = "blake3")]
pub use crate::hash::blake3::DIGEST_BYTES;

// =========================================
// ========== Sha2 settings ================
// =========================================
#[cfg(feature = "sha2")]
pub mod sha2;
#[cfg(feature = "sha2")]
pub use crate::hash::sha2::hash;
#[cfg(feature = "sha2")]
pub use crate::hash::sha2::DIGEST_BYTES;

// =========================================
// ========== Sha3 settings ================
// =========================================
#[cfg(feature = "sha3")]
pub mod sha3;
#[cfg(feature = "sha3")]
pub use crate::hash::sha3::hash;
#[cfg(feature = "sha3")]
pub use crate::hash::sha3::DIGEST_BYTES;

#[cfg(not(any(feature = "blake3", feature = "sha2", feature = "sha3")))]
compile_error!("exactly one hash backend feature (blake3, sha2, sha3) must be enabled");

#[cfg(test)]
mod tests;

/// Parses a [Digest] out of a byte slice, rejecting any other length. Used
/// when pulling node labels out of proof material.
pub fn try_parse_digest(value: &[u8]) -> Result<Digest, String> {
    let mut digest = EMPTY_DIGEST;
    if value.len() != digest.len() {
        return Err(format!(
            "a label is {DIGEST_BYTES} bytes, got {}",
            value.len()
        ));
    }
    digest.copy_from_slice(value);
    Ok(digest)
}
