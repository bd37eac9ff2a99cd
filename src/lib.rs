// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of an authenticated AVL dictionary (AVD), also known as a
//! verifiable key-value store.
//!
//! # Overview
//! An authenticated AVL dictionary is an authenticated data structure: a
//! balanced binary search tree whose every node carries a cryptographic
//! label, so that the label of the root commits to the entire key/value
//! mapping. A server holding the full tree (the [BatchProver]) applies a
//! batch of operations and emits a compact proof; a client that only
//! remembers the previous root digest (the [BatchVerifier]) replays the
//! batch against the proof and arrives at the new digest without ever
//! holding the tree. Both sides run the same descent, rebalancing and
//! deletion logic, which is what makes their digests bit-identical.
//!
//! Keys are fixed-length byte strings ordered lexicographically; the
//! all-`0x00` and all-`0xFF` keys are reserved sentinels. Values are byte
//! strings, optionally fixed-length per instance. All data lives in the
//! leaves, and each leaf also names its in-order successor, so proofs of
//! absence are ordinary leaf openings.
//!
//! ### Operations
//!
//! A batch is a sequence of [Operation]s:
//! - [Operation::Lookup]: read a key, never modifying the tree.
//! - [Operation::Insert] / [Operation::Update] / [Operation::InsertOrUpdate]:
//!   store a value, with the variants differing in whether the key must be
//!   absent, present, or either.
//! - [Operation::Remove] / [Operation::RemoveIfExists]: delete a key.
//!
//! Every successful operation also reports the value previously stored at
//! its key, so a lookup is just an operation like any other.
//!
//! ## Proving
//! A [BatchProver] starts from an empty dictionary (or keeps running across
//! batches). Applying operations and closing the batch looks as follows:
//! ```
//! use avd::{AvdKey, AvdValue, BatchProver, Operation};
//!
//! # fn main() -> Result<(), avd::AvdError> {
//! let mut prover = BatchProver::new(4, Some(4))?;
//! let starting_digest = prover.digest();
//!
//! let insert = Operation::Insert(
//!     AvdKey::from(&[0u8, 0, 0, 1][..]),
//!     AvdValue::from(&[0xAAu8; 4][..]),
//! );
//! assert_eq!(prover.perform_one_operation(&insert)?, None);
//!
//! let proof = prover.generate_proof();
//! assert_ne!(prover.digest(), starting_digest);
//! # Ok(())
//! # }
//! ```
//! A failed operation (say, inserting a key that is already present) leaves
//! the prover exactly as it was and must simply be left out of the batch
//! shipped to verifiers.
//!
//! ## Verifying
//! A [BatchVerifier] is built from the previous digest and the proof, then
//! fed the same batch. Its digest afterwards is the digest the prover must
//! have reached:
//! ```
//! use avd::{AvdKey, AvdValue, BatchProver, BatchVerifier, Operation};
//!
//! # fn main() -> Result<(), avd::AvdError> {
//! let mut prover = BatchProver::new(4, Some(4))?;
//! let starting_digest = prover.digest();
//! let insert = Operation::Insert(
//!     AvdKey::from(&[0u8, 0, 0, 1][..]),
//!     AvdValue::from(&[0xAAu8; 4][..]),
//! );
//! prover.perform_one_operation(&insert)?;
//! let proof = prover.generate_proof();
//!
//! let mut verifier = BatchVerifier::new(&starting_digest, &proof, 4, Some(4), Some(1), None)?;
//! verifier.perform_one_operation(&insert)?;
//! assert_eq!(verifier.digest(), Some(prover.digest()));
//! # Ok(())
//! # }
//! ```
//! The two optional bounds passed to [BatchVerifier::new] cap the number of
//! operations and deletions the proof may be asked to support, which bounds
//! the reconstruction work a malicious proof can cause.
//!
//! ## Digests
//! The digest exposed everywhere is the root label followed by the tree
//! height as one unsigned byte; see [RootDigest].

#![warn(missing_docs)]

pub mod errors;
pub mod hash;
pub mod operation;
pub mod prover;
pub mod tree_node;
pub mod types;
pub mod verifier;

mod serialization;
mod tree_ops;


pub use crate::errors::{
    AvdError, InvariantError, PreconditionError, ProtocolError, UpdateError,
};
pub use crate::hash::{Digest, DIGEST_BYTES};
pub use crate::operation::Operation;
pub use crate::prover::BatchProver;
pub use crate::types::{AvdKey, AvdValue, RootDigest, SerializedProof, ROOT_DIGEST_BYTES};
pub use crate::verifier::BatchVerifier;
