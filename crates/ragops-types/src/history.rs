//! Per-index version history.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Recorded versions of one index and its active version.
///
/// `active`, when set, is always an element of `versions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHistory {
    pub index: String,
    #[serde(default)]
    pub versions: BTreeSet<u32>,
    #[serde(default)]
    pub active: Option<u32>,
}

impl IndexHistory {
    /// Empty history for an index that has never been promoted.
    pub fn empty(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            versions: BTreeSet::new(),
            active: None,
        }
    }

    /// Next version number: 1 when nothing is recorded, otherwise max + 1.
    pub fn next_version(&self) -> u32 {
        self.versions.last().map(|v| v + 1).unwrap_or(1)
    }

    /// Record a version. Returns true if it was not already present.
    pub fn record_version(&mut self, version: u32) -> bool {
        self.versions.insert(version)
    }

    /// Make `version` active, recording it first if needed.
    pub fn set_active(&mut self, version: u32) {
        self.record_version(version);
        self.active = Some(version);
    }

    pub fn contains(&self, version: u32) -> bool {
        self.versions.contains(&version)
    }

    /// Walk `steps` positions back from the active version in recorded order.
    ///
    /// Returns `None` when there is no active version, the active version is
    /// not in the recorded set, or the walk runs past the oldest version.
    pub fn previous_version(&self, steps: usize) -> Option<u32> {
        let active = self.active?;
        let ordered: Vec<u32> = self.versions.iter().copied().collect();
        let position = ordered.iter().position(|v| *v == active)?;
        let target = position.checked_sub(steps)?;
        ordered.get(target).copied()
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version_empty() {
        assert_eq!(IndexHistory::empty("demo").next_version(), 1);
    }

    #[test]
    fn test_next_version_is_max_plus_one() {
        let mut hist = IndexHistory::empty("demo");
        for v in [3, 1, 7] {
            hist.record_version(v);
        }
        assert_eq!(hist.next_version(), 8);
    }

    #[test]
    fn test_set_active_records_version() {
        let mut hist = IndexHistory::empty("demo");
        hist.set_active(4);
        assert_eq!(hist.active, Some(4));
        assert!(hist.contains(4));
    }

    #[test]
    fn test_previous_version_walks_back() {
        let mut hist = IndexHistory::empty("demo");
        for v in [1, 2, 5] {
            hist.record_version(v);
        }
        hist.set_active(5);
        assert_eq!(hist.previous_version(1), Some(2));
        assert_eq!(hist.previous_version(2), Some(1));
        assert_eq!(hist.previous_version(3), None);
    }

    #[test]
    fn test_previous_version_without_active() {
        let mut hist = IndexHistory::empty("demo");
        hist.record_version(1);
        hist.record_version(2);
        assert_eq!(hist.previous_version(1), None);
    }

    #[test]
    fn test_history_json_shape() {
        let mut hist = IndexHistory::empty("demo");
        hist.set_active(2);
        hist.record_version(1);
        let json = serde_json::to_value(&hist).unwrap();
        assert_eq!(json["versions"], serde_json::json!([1, 2]));
        assert_eq!(json["active"], 2);

        let empty = serde_json::to_value(IndexHistory::empty("x")).unwrap();
        assert!(empty["active"].is_null());
    }
}
