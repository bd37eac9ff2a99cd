// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The base types handled by the dictionary: keys, values and root digests.

use crate::errors::{AvdError, ProtocolError};
use crate::hash::{Digest, DIGEST_BYTES};
#[cfg(feature = "serde_serialization")]
use crate::serialization::serde_helpers::{bytes_deserialize_hex, bytes_serialize_hex};

#[cfg(feature = "rand")]
use rand::Rng;

/// The number of bytes in a [RootDigest]: a node label followed by one height byte
pub const ROOT_DIGEST_BYTES: usize = DIGEST_BYTES + 1;

/// The externally visible commitment to the dictionary: the root node's label
/// concatenated with the tree height as one unsigned byte
pub type RootDigest = [u8; ROOT_DIGEST_BYTES];

/// A proof for a batch of operations, as produced by
/// [crate::BatchProver::generate_proof]
pub type SerializedProof = Vec<u8>;

/// A key stored in the dictionary. Keys are byte strings of the fixed,
/// per-instance length and are ordered lexicographically. The all-`0x00` and
/// all-`0xFF` keys are reserved as the `-infinity` and `+infinity` sentinels
/// that bracket the key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde_serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct AvdKey(
    #[cfg_attr(
        feature = "serde_serialization",
        serde(serialize_with = "bytes_serialize_hex")
    )]
    #[cfg_attr(
        feature = "serde_serialization",
        serde(deserialize_with = "bytes_deserialize_hex")
    )]
    pub Vec<u8>,
);

impl core::ops::Deref for AvdKey {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::convert::From<Vec<u8>> for AvdKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl core::convert::From<&[u8]> for AvdKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AvdKey {
    /// The `-infinity` sentinel: the smallest key of the given length
    pub fn negative_infinity(key_length: usize) -> Self {
        Self(vec![0x00u8; key_length])
    }

    /// The `+infinity` sentinel: the largest key of the given length
    pub fn positive_infinity(key_length: usize) -> Self {
        Self(vec![0xFFu8; key_length])
    }

    /// Whether this key is the `-infinity` sentinel of its length
    pub fn is_negative_infinity(&self) -> bool {
        self.0.iter().all(|b| *b == 0x00)
    }

    /// Whether this key is the `+infinity` sentinel of its length
    pub fn is_positive_infinity(&self) -> bool {
        self.0.iter().all(|b| *b == 0xFF)
    }

    #[cfg(feature = "rand")]
    /// Gets a random key of the given length
    pub fn random<R: Rng>(key_length: usize, rng: &mut R) -> Self {
        let mut bytes = vec![0u8; key_length];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// A value stored in the dictionary. Values are byte strings; an instance may
/// be configured to require a fixed value length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde_serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct AvdValue(
    #[cfg_attr(
        feature = "serde_serialization",
        serde(serialize_with = "bytes_serialize_hex")
    )]
    #[cfg_attr(
        feature = "serde_serialization",
        serde(deserialize_with = "bytes_deserialize_hex")
    )]
    pub Vec<u8>,
);

impl core::ops::Deref for AvdValue {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::convert::From<Vec<u8>> for AvdValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl core::convert::From<&[u8]> for AvdValue {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AvdValue {
    #[cfg(feature = "rand")]
    /// Gets a random value of the given length
    pub fn random<R: Rng>(value_length: usize, rng: &mut R) -> Self {
        let mut bytes = vec![0u8; value_length];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Forms the root digest for a root label and a tree height
pub(crate) fn root_digest(label: &Digest, height: u8) -> RootDigest {
    let mut digest = [0u8; ROOT_DIGEST_BYTES];
    digest[..DIGEST_BYTES].copy_from_slice(label);
    digest[DIGEST_BYTES] = height;
    digest
}

/// Splits a root digest into its label and height byte. The height byte is
/// unsigned; any length other than [ROOT_DIGEST_BYTES] is a decoding error.
pub(crate) fn split_root_digest(digest: &[u8]) -> Result<(Digest, u8), AvdError> {
    if digest.len() != ROOT_DIGEST_BYTES {
        return Err(ProtocolError::DigestLength(ROOT_DIGEST_BYTES, digest.len()).into());
    }
    let mut label = [0u8; DIGEST_BYTES];
    label.copy_from_slice(&digest[..DIGEST_BYTES]);
    Ok((label, digest[DIGEST_BYTES]))
}
