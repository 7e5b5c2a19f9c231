//! Cross-variable interaction terms.

use serde::{Deserialize, Serialize};

use crate::domain::TimeSeriesRecord;

/// A configured pair of record fields whose product becomes a feature.
///
/// Fields resolve through [`TimeSeriesRecord::field`], so calendar fields such
/// as `hour_of_day` can be paired with exogenous ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionPair {
    pub left: String,
    pub right: String,
}

impl InteractionPair {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Feature name, `<left>_x_<right>`.
    pub fn name(&self) -> String {
        format!("{}_x_{}", self.left, self.right)
    }

    /// Product of both operands on the same record; `None` if either is missing.
    pub fn compute(&self, record: &TimeSeriesRecord) -> Option<f64> {
        let left = record.field(&self.left)?;
        let right = record.field(&self.right)?;
        let product = left * right;
        product.is_finite().then_some(product)
    }
}
