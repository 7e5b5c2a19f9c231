//! FeatureVectors keyed 1:1 by record id, last writer wins.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::{FeatureVector, RecordId};

#[derive(Debug, Default)]
pub struct FeatureStore {
    vectors: RwLock<HashMap<RecordId, FeatureVector>>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RecordId) -> Option<FeatureVector> {
        self.vectors.read().get(&id).cloned()
    }

    /// Upsert one flushed batch. Returns the number of vectors written.
    pub fn upsert_batch(&self, batch: Vec<FeatureVector>) -> usize {
        let mut vectors = self.vectors.write();
        let n = batch.len();
        for fv in batch {
            vectors.insert(fv.record_id, fv);
        }
        n
    }

    /// Drop vectors whose record can no longer produce features.
    pub fn remove(&self, ids: &[RecordId]) -> usize {
        let mut vectors = self.vectors.write();
        ids.iter().filter(|id| vectors.remove(id).is_some()).count()
    }

    /// Point-in-time copy of all stored vectors.
    pub fn snapshot(&self) -> HashMap<RecordId, FeatureVector> {
        self.vectors.read().clone()
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }
}
