// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Errors for various tree and proof operations.

use core::fmt;

/// The top-level error thrown by the avd.
#[derive(Debug, Eq, PartialEq)]
pub enum AvdError {
    /// A caller-supplied argument violated a precondition
    Precondition(PreconditionError),
    /// The operation's update function rejected the current value
    Update(UpdateError),
    /// The proof and the operations disagree; on the prover side this is a
    /// logic bug, on the verifier side an invalid proof
    Protocol(ProtocolError),
    /// An internal invariant of the tree was violated; always a bug
    Invariant(InvariantError),
}

impl From<PreconditionError> for AvdError {
    fn from(error: PreconditionError) -> Self {
        Self::Precondition(error)
    }
}

impl From<UpdateError> for AvdError {
    fn from(error: UpdateError) -> Self {
        Self::Update(error)
    }
}

impl From<ProtocolError> for AvdError {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }
}

impl From<InvariantError> for AvdError {
    fn from(error: InvariantError) -> Self {
        Self::Invariant(error)
    }
}

impl fmt::Display for AvdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(err) => write!(f, "Precondition error: {err}"),
            Self::Update(err) => write!(f, "Update error: {err}"),
            Self::Protocol(err) => write!(f, "Protocol error: {err}"),
            Self::Invariant(err) => write!(f, "Invariant error: {err}"),
        }
    }
}

impl std::error::Error for AvdError {}

/// A caller-supplied argument was rejected before the tree was touched. The
/// tree is unchanged and nothing was added to the proof.
#[derive(Debug, Eq, PartialEq)]
pub enum PreconditionError {
    /// The key length does not match the instance configuration
    KeyLength(usize, usize),
    /// The value length does not match the fixed instance configuration
    ValueLength(usize, usize),
    /// The key is one of the two reserved sentinel keys
    ReservedKey,
    /// The instance was configured with a zero key length
    KeyLengthZero,
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyLength(expected, got) => {
                write!(f, "expected a key of {expected} bytes, got {got}")
            }
            Self::ValueLength(expected, got) => {
                write!(f, "expected a value of {expected} bytes, got {got}")
            }
            Self::ReservedKey => {
                write!(f, "the all-0x00 and all-0xFF keys are reserved")
            }
            Self::KeyLengthZero => {
                write!(f, "the key length must be positive")
            }
        }
    }
}

/// The operation's update function rejected the value currently stored at the
/// key. The tree is unchanged and nothing was added to the proof.
#[derive(Debug, Eq, PartialEq)]
pub enum UpdateError {
    /// An insert found the key already present
    KeyAlreadyPresent,
    /// An update or removal found no value at the key
    KeyNotPresent,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyAlreadyPresent => write!(f, "the key is already in the tree"),
            Self::KeyNotPresent => write!(f, "the key is not in the tree"),
        }
    }
}

/// The walk and the proof material disagree. When thrown by a
/// [crate::BatchVerifier] the proof is invalid and the whole batch must be
/// rejected; when thrown by a [crate::BatchProver] it indicates a logic bug.
#[derive(Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// A label-only stub was reached during a walk
    LabelOnlyNode,
    /// A walk reached a node of the wrong variant
    UnexpectedNode(String),
    /// The descent landed on a leaf that cannot hold the key
    LeafMismatch(String),
    /// The proof ran out of direction bits
    DirectionsExhausted,
    /// The deletion descent disagreed with the recorded comparisons
    ReplayMismatch(String),
    /// The proof bytes could not be decoded
    MalformedProof(String),
    /// The proof opens more nodes than the operation bounds allow
    ProofTooLarge(usize, usize),
    /// A root digest had the wrong length
    DigestLength(usize, usize),
    /// The reconstructed root does not match the starting digest
    DigestMismatch,
    /// The verifier already rejected a proof and can no longer be used
    VerifierNoLongerValid,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LabelOnlyNode => {
                write!(f, "reached a subtree the proof does not open")
            }
            Self::UnexpectedNode(msg) => {
                write!(f, "reached a node of the wrong variant: {msg}")
            }
            Self::LeafMismatch(msg) => {
                write!(f, "the descent landed on the wrong leaf: {msg}")
            }
            Self::DirectionsExhausted => {
                write!(f, "the proof contains too few direction bits")
            }
            Self::ReplayMismatch(msg) => {
                write!(f, "deletion disagrees with the recorded comparisons: {msg}")
            }
            Self::MalformedProof(msg) => {
                write!(f, "could not decode the proof: {msg}")
            }
            Self::ProofTooLarge(nodes, limit) => {
                write!(f, "proof opens {nodes} nodes but at most {limit} are allowed")
            }
            Self::DigestLength(expected, got) => {
                write!(f, "expected a digest of {expected} bytes, got {got}")
            }
            Self::DigestMismatch => {
                write!(f, "the proof does not start from the given root digest")
            }
            Self::VerifierNoLongerValid => {
                write!(f, "the verifier already rejected a proof")
            }
        }
    }
}

/// An internal invariant of the tree did not hold. Indicates an
/// implementation bug; the current batch cannot be trusted.
#[derive(Debug, Eq, PartialEq)]
pub enum InvariantError {
    /// An internal node's balance left the [-1, 1] range
    BalanceOutOfRange(i8),
    /// The tree height left the [0, 255] range
    HeightOutOfRange,
    /// A prover-side internal node was missing its routing key
    MissingRoutingKey,
    /// A hard deletion finished without a saved leaf to copy over
    SavedLeafMissing,
    /// The descent landed on a leaf that does not bracket the key
    DescentMismatch(String),
    /// A comparison was replayed past the recorded transcript
    ReplayOutOfBounds,
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BalanceOutOfRange(balance) => {
                write!(f, "balance {balance} is outside [-1, 1]")
            }
            Self::HeightOutOfRange => {
                write!(f, "the tree height left the [0, 255] range")
            }
            Self::MissingRoutingKey => {
                write!(f, "an internal node of the full tree has no routing key")
            }
            Self::SavedLeafMissing => {
                write!(f, "a hard deletion did not save the predecessor leaf")
            }
            Self::DescentMismatch(msg) => {
                write!(
                    f,
                    "the descent landed on a leaf that does not bracket the key: {msg}"
                )
            }
            Self::ReplayOutOfBounds => {
                write!(f, "a comparison was replayed past the recorded transcript")
            }
        }
    }
}
