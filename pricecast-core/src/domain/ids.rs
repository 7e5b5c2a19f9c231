use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned record identifier. Stable across upserts of the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing model version, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion(pub u32);

impl ModelVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Deterministic prediction ID (model version + base time + horizon + issue time).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PredictionId(pub String);

impl PredictionId {
    /// Derive the ID with BLAKE3 so that re-issuing the same forecast yields the same ID.
    pub fn derive(
        model_version: ModelVersion,
        base_timestamp: DateTime<Utc>,
        horizon_hours: usize,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let canonical = serde_json::json!({
            "model_version": model_version.0,
            "base_timestamp": base_timestamp.to_rfc3339(),
            "horizon_hours": horizon_hours,
            "issued_at": issued_at.to_rfc3339(),
        });
        let hash = blake3::hash(canonical.to_string().as_bytes());
        // 16 bytes of digest is plenty for a per-deployment prediction log
        Self(hash.to_hex()[..32].to_string())
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
