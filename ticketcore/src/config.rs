//! Booking engine configuration.
//!
//! Every tunable is a validated `nutype`, so an out-of-range configuration
//! cannot be constructed or deserialized.

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::ledger::AdmissionPolicy;
use crate::types::Capacity;

/// How many identities the engine tries before giving up on a create.
///
/// Validated to be between 1 and 10 attempts.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    default = 3,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct MaxIdentityAttempts(u32);

/// Upper bound on one admission unit in milliseconds.
///
/// Validated to be between 100ms and one minute.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 60_000),
    default = 5_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct AdmissionTimeoutMs(u64);

impl AdmissionTimeoutMs {
    /// Convert to Duration for use with `tokio::time::timeout`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Settings for [`BookingEngine`](crate::BookingEngine).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Capacity of every (date, ticket) key.
    pub capacity: Capacity,
    /// Identity attempts per create before reporting a persistence failure.
    pub max_identity_attempts: MaxIdentityAttempts,
    /// Time bound of each admission unit.
    pub admission_timeout_ms: AdmissionTimeoutMs,
}

impl BookingConfig {
    /// Policy handed to stores for each admission.
    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::new(self.capacity, self.admission_timeout_ms.as_duration())
    }

    /// Returns a copy with a different capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Returns a copy with a different admission timeout.
    #[must_use]
    pub fn with_admission_timeout(mut self, timeout: AdmissionTimeoutMs) -> Self {
        self.admission_timeout_ms = timeout;
        self
    }

    /// Returns a copy with a different identity attempt limit.
    #[must_use]
    pub fn with_max_identity_attempts(mut self, attempts: MaxIdentityAttempts) -> Self {
        self.max_identity_attempts = attempts;
        self
    }
}
