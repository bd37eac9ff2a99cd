// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The operations a batch may contain, and how each of them maps the value
//! currently stored at its key to the value stored afterwards.

use crate::errors::{AvdError, UpdateError};
use crate::types::{AvdKey, AvdValue};

/// One operation of a batch. Every operation carries the key it touches;
/// all variants except [Operation::Lookup] may modify the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde_serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum Operation {
    /// Read the value at the key without modifying the tree
    Lookup(AvdKey),
    /// Store a value at a key that must not be present yet
    Insert(AvdKey, AvdValue),
    /// Replace the value at a key that must already be present
    Update(AvdKey, AvdValue),
    /// Store a value at the key whether or not it is present
    InsertOrUpdate(AvdKey, AvdValue),
    /// Remove a key that must be present
    Remove(AvdKey),
    /// Remove a key if it is present; a no-op otherwise
    RemoveIfExists(AvdKey),
}

impl Operation {
    /// The key this operation touches
    pub fn key(&self) -> &AvdKey {
        match self {
            Operation::Lookup(key) => key,
            Operation::Insert(key, _) => key,
            Operation::Update(key, _) => key,
            Operation::InsertOrUpdate(key, _) => key,
            Operation::Remove(key) => key,
            Operation::RemoveIfExists(key) => key,
        }
    }

    /// Maps the value currently stored at the key (`None` if the key is
    /// absent) to the value stored after the operation. Returning `Ok(None)`
    /// for a present key deletes it; `Ok(Some(..))` for an absent key inserts
    /// it; `Ok(None)` for an absent key is a no-op.
    ///
    /// [Operation::Lookup] never reaches this: the walk handles lookups
    /// without consulting an update function.
    pub(crate) fn update_fn(
        &self,
        current: Option<&AvdValue>,
    ) -> Result<Option<AvdValue>, AvdError> {
        match (self, current) {
            (Operation::Lookup(_), _) => Ok(current.cloned()),
            (Operation::Insert(_, _), Some(_)) => Err(UpdateError::KeyAlreadyPresent.into()),
            (Operation::Insert(_, value), None) => Ok(Some(value.clone())),
            (Operation::Update(_, value), Some(_)) => Ok(Some(value.clone())),
            (Operation::Update(_, _), None) => Err(UpdateError::KeyNotPresent.into()),
            (Operation::InsertOrUpdate(_, value), _) => Ok(Some(value.clone())),
            (Operation::Remove(_), Some(_)) => Ok(None),
            (Operation::Remove(_), None) => Err(UpdateError::KeyNotPresent.into()),
            (Operation::RemoveIfExists(_), _) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AvdKey {
        AvdKey::from(&[0u8, 0, 0, 1][..])
    }

    fn value(fill: u8) -> AvdValue {
        AvdValue::from(vec![fill; 4])
    }

    #[test]
    fn test_insert_semantics() {
        let op = Operation::Insert(key(), value(1));
        assert_eq!(op.update_fn(None).unwrap(), Some(value(1)));
        assert_eq!(
            op.update_fn(Some(&value(2))),
            Err(UpdateError::KeyAlreadyPresent.into())
        );
    }

    #[test]
    fn test_update_semantics() {
        let op = Operation::Update(key(), value(1));
        assert_eq!(op.update_fn(Some(&value(2))).unwrap(), Some(value(1)));
        assert_eq!(op.update_fn(None), Err(UpdateError::KeyNotPresent.into()));
    }

    #[test]
    fn test_insert_or_update_semantics() {
        let op = Operation::InsertOrUpdate(key(), value(1));
        assert_eq!(op.update_fn(None).unwrap(), Some(value(1)));
        assert_eq!(op.update_fn(Some(&value(2))).unwrap(), Some(value(1)));
    }

    #[test]
    fn test_remove_semantics() {
        let op = Operation::Remove(key());
        assert_eq!(op.update_fn(Some(&value(2))).unwrap(), None);
        assert_eq!(op.update_fn(None), Err(UpdateError::KeyNotPresent.into()));

        let op = Operation::RemoveIfExists(key());
        assert_eq!(op.update_fn(Some(&value(2))).unwrap(), None);
        assert_eq!(op.update_fn(None).unwrap(), None);
    }
}
