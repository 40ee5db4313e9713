//! Cache entries and the validity window.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SerializationError;
use crate::identity::Timestamp;

pub const SECOND: Duration = Duration::from_secs(1);
pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MONTH: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Entries never expire.
pub const FOREVER: Validity = Validity::Forever;

/// How long a stored entry stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    #[default]
    Forever,
    Within(Duration),
}

impl Validity {
    pub fn seconds(secs: u64) -> Self {
        Self::Within(Duration::from_secs(secs))
    }

    pub fn is_forever(&self) -> bool {
        matches!(self, Self::Forever)
    }
}

impl From<Duration> for Validity {
    fn from(window: Duration) -> Self {
        Self::Within(window)
    }
}

impl From<Option<Duration>> for Validity {
    fn from(window: Option<Duration>) -> Self {
        window.map_or(Self::Forever, Self::Within)
    }
}

/// A stored result: when it was computed and its serialized value.
///
/// Entries are never mutated; a refresh writes a whole new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub created_at: Timestamp,
    pub payload: serde_json::Value,
}

impl CacheEntry {
    pub fn new(created_at: Timestamp, payload: serde_json::Value) -> Self {
        Self {
            created_at,
            payload,
        }
    }

    /// Serialize a computed value into a fresh entry stamped `now`.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, SerializationError> {
        let payload = serde_json::to_value(value).map_err(|e| SerializationError::Payload {
            reason: e.to_string(),
        })?;
        Ok(Self::new(Utc::now(), payload))
    }

    /// Deserialize the payload into the caller's type.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        T::deserialize(&self.payload).map_err(|e| SerializationError::Payload {
            reason: e.to_string(),
        })
    }

    /// Age of the entry at `now`. Entries stamped in the future have age zero.
    pub fn age(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Persisted encoding: a self-describing JSON document.
    pub fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(self).map_err(|e| SerializationError::Entry {
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Entry {
            reason: e.to_string(),
        })
    }
}

/// Returns true if `entry` is still usable at `now`.
pub fn is_valid(entry: &CacheEntry, validity: Validity, now: Timestamp) -> bool {
    match validity {
        Validity::Forever => true,
        Validity::Within(window) => entry.age(now) < window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn entry_at(secs: i64) -> CacheEntry {
        CacheEntry::new(
            Utc.timestamp_opt(secs, 0).unwrap(),
            serde_json::json!({"v": 1}),
        )
    }

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_within_window_is_valid() {
        let entry = entry_at(1_000);
        assert!(is_valid(&entry, Validity::seconds(10), at(1_009)));
    }

    #[test]
    fn test_window_boundary_is_expired() {
        let entry = entry_at(1_000);
        assert!(!is_valid(&entry, Validity::seconds(10), at(1_010)));
        assert!(!is_valid(&entry, Validity::seconds(10), at(5_000)));
    }

    #[test]
    fn test_future_entry_counts_as_fresh() {
        let entry = entry_at(2_000);
        assert_eq!(entry.age(at(1_000)), Duration::ZERO);
        assert!(is_valid(&entry, Validity::seconds(1), at(1_000)));
    }

    #[test]
    fn test_validity_conversions() {
        assert_eq!(Validity::from(None), FOREVER);
        assert_eq!(Validity::from(Some(HOUR)), Validity::Within(HOUR));
        assert_eq!(Validity::from(DAY), Validity::Within(DAY));
        assert!(Validity::default().is_forever());
        assert_eq!(YEAR, DAY * 365);
    }

    #[test]
    fn test_value_roundtrip_through_payload() {
        let entry = CacheEntry::from_value(&vec!["a".to_string(), "b".to_string()]).unwrap();
        let back: Vec<String> = entry.value().unwrap();
        assert_eq!(back, vec!["a", "b"]);
    }

    #[test]
    fn test_value_type_mismatch_is_serialization_error() {
        let entry = CacheEntry::from_value(&"text").unwrap();
        let err = entry.value::<u32>().unwrap_err();
        assert!(matches!(err, SerializationError::Payload { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_bytes() {
        let bytes = entry_at(1_000).encode().unwrap();
        let err = CacheEntry::decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, SerializationError::Entry { .. }));
    }

    #[test]
    fn test_encoding_is_self_describing_json() {
        let bytes = entry_at(0).encode().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["payload"]["v"], 1);
        assert_eq!(doc["created_at"], "1970-01-01T00:00:00Z");
    }

    proptest! {
        /// Property: FOREVER never expires an entry, however old.
        #[test]
        fn prop_forever_never_expires(created in 0i64..1_000_000, elapsed in 0i64..4_000_000_000) {
            let entry = entry_at(created);
            prop_assert!(is_valid(&entry, FOREVER, at(created + elapsed)));
        }

        /// Property: a finite window is valid exactly while age < window.
        #[test]
        fn prop_window_matches_age(window in 1u64..100_000, elapsed in 0i64..200_000) {
            let entry = entry_at(0);
            let valid = is_valid(&entry, Validity::seconds(window), at(elapsed));
            prop_assert_eq!(valid, (elapsed as u64) < window);
        }
    }
}
