//! Performance ledger — validated absolute errors per constituent.
//!
//! Feeds the ensemble weights: each constituent keeps its most recent `window`
//! absolute errors, and weights are the normalised inverse of their mean.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Default number of validated errors kept per constituent (one week hourly).
pub const DEFAULT_WINDOW: usize = 168;

/// Serialisable contents of a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub window: usize,
    pub errors: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug)]
pub struct PerformanceLedger {
    window: usize,
    errors: RwLock<BTreeMap<String, VecDeque<f64>>>,
}

impl Default for PerformanceLedger {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl PerformanceLedger {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            errors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn restore(snapshot: LedgerSnapshot) -> Self {
        let ledger = Self::new(snapshot.window);
        for (name, errors) in snapshot.errors {
            ledger.record_all(&name, errors);
        }
        ledger
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            window: self.window,
            errors: self
                .errors
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
        }
    }

    pub fn record(&self, constituent: &str, abs_error: f64) {
        self.record_all(constituent, [abs_error]);
    }

    fn record_all(&self, constituent: &str, abs_errors: impl IntoIterator<Item = f64>) {
        let mut errors = self.errors.write();
        let entry = errors.entry(constituent.to_string()).or_default();
        for e in abs_errors.into_iter().filter(|e| e.is_finite()) {
            entry.push_back(e.abs());
            while entry.len() > self.window {
                entry.pop_front();
            }
        }
    }

    /// Mean absolute error over the retained window.
    pub fn mae(&self, constituent: &str) -> Option<f64> {
        let errors = self.errors.read();
        let e = errors.get(constituent).filter(|e| !e.is_empty())?;
        Some(e.iter().sum::<f64>() / e.len() as f64)
    }

    pub fn samples(&self, constituent: &str) -> usize {
        self.errors.read().get(constituent).map_or(0, VecDeque::len)
    }

    /// Inverse-MAE weights for `names`, normalised to sum to 1.
    ///
    /// Falls back to uniform weights when any constituent has no history.
    /// A constituent with zero MAE takes all the weight (shared if several).
    pub fn weights(&self, names: &[&str]) -> BTreeMap<String, f64> {
        if names.is_empty() {
            return BTreeMap::new();
        }
        let uniform = || {
            let w = 1.0 / names.len() as f64;
            names.iter().map(|n| (n.to_string(), w)).collect()
        };

        let maes: Option<Vec<f64>> = names.iter().map(|n| self.mae(n)).collect();
        let Some(maes) = maes else {
            return uniform();
        };

        let perfect = maes.iter().filter(|m| **m <= f64::EPSILON).count();
        if perfect > 0 {
            let w = 1.0 / perfect as f64;
            return names
                .iter()
                .zip(&maes)
                .map(|(n, m)| (n.to_string(), if *m <= f64::EPSILON { w } else { 0.0 }))
                .collect();
        }

        let inverse: Vec<f64> = maes.iter().map(|m| 1.0 / m).collect();
        let total: f64 = inverse.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return uniform();
        }
        names
            .iter()
            .zip(inverse)
            .map(|(n, inv)| (n.to_string(), inv / total))
            .collect()
    }
}
