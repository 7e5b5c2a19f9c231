//! Hourly profile model: mean level per hour of day, with decaying deviation.
//!
//! forecast = profile[target_hour] + phi * (current - profile[base_hour])
//!
//! `phi` is fitted by least squares on the training rows and clamped to
//! [-1, 1]. Hours never seen in training fall back to the overall mean.

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::{target_hour, ConstituentModel, FittedModel, HorizonDataset, ModelError};
use crate::domain::FeatureVector;

pub const NAME: &str = "hourly_profile";

#[derive(Debug, Clone, Copy, Default)]
pub struct HourlyProfile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileFit {
    pub horizon: usize,
    /// Mean target per hour of day (24 entries).
    pub profile: Vec<Option<f64>>,
    pub overall_mean: f64,
    pub phi: f64,
}

impl ProfileFit {
    fn level(&self, hour: usize) -> f64 {
        self.profile
            .get(hour)
            .copied()
            .flatten()
            .unwrap_or(self.overall_mean)
    }

    pub fn predict(&self, fv: &FeatureVector) -> f64 {
        let base = self.level(fv.timestamp.hour() as usize);
        let target = self.level(target_hour(fv.timestamp, self.horizon));
        target + self.phi * (fv.current - base)
    }
}

impl ConstituentModel for HourlyProfile {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&self, data: &HorizonDataset<'_>) -> Result<FittedModel, ModelError> {
        data.ensure_rows()?;

        let mut sums = [0.0_f64; 24];
        let mut counts = [0_usize; 24];
        for (fv, y) in data.inputs.iter().zip(&data.targets) {
            let h = target_hour(fv.timestamp, data.horizon);
            sums[h] += y;
            counts[h] += 1;
        }
        let overall_mean = data.targets.iter().sum::<f64>() / data.len() as f64;
        let profile: Vec<Option<f64>> = sums
            .iter()
            .zip(counts)
            .map(|(s, c)| (c > 0).then(|| s / c as f64))
            .collect();

        let mut fit = ProfileFit {
            horizon: data.horizon,
            profile,
            overall_mean,
            phi: 0.0,
        };

        let (mut num, mut den) = (0.0, 0.0);
        for (fv, y) in data.inputs.iter().zip(&data.targets) {
            let dev_now = fv.current - fit.level(fv.timestamp.hour() as usize);
            let dev_then = y - fit.level(target_hour(fv.timestamp, data.horizon));
            num += dev_now * dev_then;
            den += dev_now * dev_now;
        }
        if den > 1e-12 {
            fit.phi = (num / den).clamp(-1.0, 1.0);
        }

        Ok(FittedModel::HourlyProfile(fit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::fv;

    fn seasonal(h: i64) -> f64 {
        if (h % 24) < 12 {
            20.0
        } else {
            60.0
        }
    }

    #[test]
    fn recovers_pure_daily_shape() {
        let rows: Vec<FeatureVector> = (0..96).map(|h| fv(h, seasonal(h))).collect();
        let targets: Vec<f64> = (0..96).map(|h| seasonal(h + 6)).collect();
        let data = HorizonDataset {
            horizon: 6,
            required: &[],
            inputs: rows.iter().collect(),
            targets,
        };
        let fit = HourlyProfile.fit(&data).unwrap();

        // hour 8 + 6 = hour 14 => afternoon level
        let out = fit.predict(&fv(104, 20.0)).unwrap();
        assert!((out - 60.0).abs() < 1e-9, "got {out}");
    }

    #[test]
    fn unseen_hour_falls_back_to_mean() {
        let rows = [fv(0, 10.0), fv(1, 30.0)];
        let data = HorizonDataset {
            horizon: 1,
            required: &[],
            inputs: rows.iter().collect(),
            targets: vec![10.0, 30.0],
        };
        let FittedModel::HourlyProfile(fit) = HourlyProfile.fit(&data).unwrap() else {
            panic!("wrong kind");
        };
        assert_eq!(fit.level(1), 10.0);
        assert_eq!(fit.level(17), 20.0);
        assert!(fit.phi.abs() <= 1.0);
    }
}
