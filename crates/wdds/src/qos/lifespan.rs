// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! LIFESPAN QoS policy - bounded sample lifetime.
//!
//! A change expires `duration` after its source timestamp; expired changes
//! are removed from the writer history oldest first.

use std::time::Duration;

use crate::core::types::Timestamp;

const INFINITE: Duration = Duration::from_secs(u64::MAX);

/// LIFESPAN policy. Default: infinite (samples never expire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifespan {
    pub duration: Duration,
}

impl Default for Lifespan {
    fn default() -> Self {
        Self { duration: INFINITE }
    }
}

impl Lifespan {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    #[must_use]
    pub fn infinite() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        Self {
            duration: Duration::from_millis(ms),
        }
    }

    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.duration == INFINITE
    }

    /// Absolute expiry of a change stamped at `source_timestamp`, or `None`
    /// when the lifespan is infinite.
    #[must_use]
    pub fn expiry_of(&self, source_timestamp: Timestamp) -> Option<Timestamp> {
        if self.is_infinite() {
            return None;
        }
        let ns = u64::try_from(self.duration.as_nanos()).unwrap_or(u64::MAX);
        Some(Timestamp::from_nanos(
            source_timestamp.as_nanos().saturating_add(ns),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_infinite() {
        assert!(Lifespan::default().is_infinite());
        assert_eq!(Lifespan::default().expiry_of(Timestamp::from_nanos(5)), None);
    }

    #[test]
    fn test_expiry_computation() {
        let lifespan = Lifespan::from_millis(200);
        let expiry = lifespan
            .expiry_of(Timestamp::from_nanos(1_000))
            .expect("finite lifespan has an expiry");
        assert_eq!(expiry.as_nanos(), 1_000 + 200_000_000);
    }

    #[test]
    fn test_expiry_saturates() {
        let lifespan = Lifespan::new(Duration::from_secs(u64::MAX / 2));
        let expiry = lifespan.expiry_of(Timestamp::from_nanos(u64::MAX - 1));
        assert_eq!(expiry, Some(Timestamp::from_nanos(u64::MAX)));
    }
}
