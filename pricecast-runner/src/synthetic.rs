//! Deterministic synthetic hourly market data for demos and tests.
//!
//! Produces three aligned streams from one seed: market (price + demand),
//! weather (temperature + wind generation) and gas (gas price). The price is
//! driven by the other fields plus noise, so the models have real signal to
//! learn. Same seed, same series.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use pricecast_core::domain::RawRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub start: DateTime<Utc>,
    pub hours: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            hours: 24 * 60,
            seed: 42,
        }
    }
}

/// The three streams, one record per hour each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntheticSeries {
    pub market: Vec<RawRecord>,
    pub weather: Vec<RawRecord>,
    pub gas: Vec<RawRecord>,
}

/// Seed derived from the master seed and a stream name.
fn stream_rng(seed: u64, stream: &str) -> StdRng {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(stream.as_bytes());
    StdRng::from_seed(*hasher.finalize().as_bytes())
}

pub fn generate(config: &SyntheticConfig) -> SyntheticSeries {
    let mut weather_rng = stream_rng(config.seed, "weather");
    let mut gas_rng = stream_rng(config.seed, "gas");
    let mut market_rng = stream_rng(config.seed, "market");

    let mut series = SyntheticSeries::default();
    let mut wind = 4_000.0_f64;
    let mut gas = 30.0_f64;

    for h in 0..config.hours {
        let ts = config.start + Duration::hours(h as i64);
        let hour = ts.hour() as f64;
        let daily = ((hour - 6.0) / 24.0 * TAU).sin();
        let seasonal = (h as f64 / (24.0 * 365.0) * TAU).cos();

        let temperature = 10.0 + 8.0 * seasonal + 5.0 * ((hour - 9.0) / 24.0 * TAU).sin()
            + weather_rng.gen_range(-1.5..1.5);
        wind = (0.92 * wind + 0.08 * 4_000.0 + weather_rng.gen_range(-450.0..450.0)).max(0.0);
        gas = (gas + gas_rng.gen_range(-0.3..0.3)).clamp(15.0, 60.0);

        let demand = 30_000.0 + 5_000.0 * daily - 150.0 * (temperature - 10.0)
            + market_rng.gen_range(-600.0..600.0);
        let spike = if market_rng.gen_bool(0.01) {
            market_rng.gen_range(20.0..60.0)
        } else {
            0.0
        };
        let price = 0.002 * demand + 1.1 * gas - 0.003 * wind
            + market_rng.gen_range(-3.0..3.0)
            + spike;

        series
            .market
            .push(RawRecord::market(ts, round2(price), "market").with_field("demand", demand.round()));
        series.weather.push(
            RawRecord::enrichment(ts, "weather")
                .with_field("temperature", round2(temperature))
                .with_field("wind_generation", wind.round()),
        );
        series
            .gas
            .push(RawRecord::enrichment(ts, "gas").with_field("gas_price", round2(gas)));
    }
    series
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
