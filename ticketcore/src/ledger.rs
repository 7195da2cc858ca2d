//! Capacity ledger.
//!
//! The ledger has no storage of its own. The committed quantity for a
//! [`CapacityKey`] is the sum of the quantities of every stored reservation
//! under that key, and stores compute it inside the same atomic unit that
//! writes the new or changed row. This module holds the admission rule those
//! stores apply.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Capacity, CapacityKey, Quantity};

/// Limits a store applies to a single admission unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    /// Maximum committed quantity per key.
    pub capacity: Capacity,
    /// Upper bound on how long one admission unit may take, lock waits
    /// included.
    pub timeout: Duration,
}

impl AdmissionPolicy {
    /// Default bound on one admission unit.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a policy.
    pub const fn new(capacity: Capacity, timeout: Duration) -> Self {
        Self { capacity, timeout }
    }

    /// Decides whether `requested` more tickets fit on top of `committed`.
    ///
    /// `committed` must already exclude the contribution of a reservation
    /// that is being updated.
    pub fn admit(
        &self,
        key: CapacityKey,
        committed: u32,
        requested: Quantity,
    ) -> Result<(), CapacityExceeded> {
        let capacity = self.capacity.into_inner();
        match committed.checked_add(requested.count()) {
            Some(total) if total <= capacity => Ok(()),
            _ => Err(CapacityExceeded {
                key,
                committed,
                requested: requested.count(),
                capacity,
            }),
        }
    }

    /// Quantity still available under `key` given the committed total.
    pub fn remaining(&self, committed: u32) -> u32 {
        self.capacity.into_inner().saturating_sub(committed)
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(Capacity::default(), Self::DEFAULT_TIMEOUT)
    }
}

/// Rejected admission: the key has too little capacity left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "capacity exceeded for {key}: {committed} committed + {requested} requested > {capacity}"
)]
pub struct CapacityExceeded {
    /// Key the admission targeted.
    pub key: CapacityKey,
    /// Quantity already committed under the key.
    pub committed: u32,
    /// Quantity requested by the rejected operation.
    pub requested: u32,
    /// Configured capacity of the key.
    pub capacity: u32,
}

impl CapacityExceeded {
    /// Quantity that was still available when the admission was rejected.
    pub const fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.committed)
    }
}
