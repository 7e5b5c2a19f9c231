//! Property tests for feature and ensemble invariants.
//!
//! Uses proptest to verify:
//! 1. No look-ahead: lag_Nh is null for i < N and equals target[i - N] otherwise
//! 2. Truncation invariance of every computed vector
//! 3. Idempotent refresh over an unchanged series
//! 4. Ledger weights are a probability distribution

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use pricecast_core::domain::RawRecord;
use pricecast_core::features::{FeatureConfig, FeatureEngine};
use pricecast_core::store::{FeatureStore, TimeSeriesStore};
use pricecast_core::PerformanceLedger;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_prices() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(
        prop_oneof![9 => -50.0..300.0_f64, 1 => Just(0.0)],
        30..120,
    )
}

fn store_of(prices: &[f64]) -> TimeSeriesStore {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let store = TimeSeriesStore::new();
    store.upsert(
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| RawRecord::market(start + Duration::hours(i as i64), *p, "prop")),
    );
    store
}

fn engine() -> FeatureEngine {
    FeatureEngine::new(FeatureConfig::default()).unwrap()
}

proptest! {
    #[test]
    fn lags_match_index_arithmetic(prices in arb_prices()) {
        let records = store_of(&prices).snapshot();
        let vectors = engine().compute_all(&records);
        prop_assert_eq!(vectors.len(), prices.len());
        for (i, fv) in vectors.iter().enumerate() {
            for n in [1usize, 2, 3, 24] {
                let expected = if i < n { None } else { Some(prices[i - n]) };
                prop_assert_eq!(fv.lag(n), expected);
            }
            if let Some(m) = fv.momentum(1) {
                prop_assert!(m.is_finite());
            }
        }
    }

    #[test]
    fn prefix_is_truncation_invariant(prices in arb_prices(), cut in 1usize..30) {
        let records = store_of(&prices).snapshot();
        let full = engine().compute_all(&records);
        let truncated = engine().compute_all(&records[..cut]);
        prop_assert_eq!(&full[..cut], &truncated[..]);
    }

    #[test]
    fn second_refresh_writes_nothing(prices in arb_prices()) {
        let series = store_of(&prices);
        let features = FeatureStore::new();
        let eng = engine();
        eng.refresh(&series, &features);
        let report = eng.refresh(&series, &features);
        prop_assert_eq!(report.written, 0);
    }

    #[test]
    fn weights_sum_to_one(
        errors in prop::collection::vec((0usize..3, 0.01..100.0_f64), 0..50)
    ) {
        let names = ["ridge", "drift", "hourly_profile"];
        let ledger = PerformanceLedger::default();
        for (who, e) in errors {
            ledger.record(names[who], e);
        }
        let w = ledger.weights(&names);
        let total: f64 = w.values().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(w.values().all(|v| *v >= 0.0));
    }
}
