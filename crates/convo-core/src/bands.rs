use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// FSRS5's default forgetting-curve decay.
pub const FSRS5_DEFAULT_DECAY: f64 = 0.5;

/// Coarse bucket driving planner selection policy.
///
/// `New` never comes from retrievability — it is assigned out-of-band by
/// the new-word pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievabilityBand {
    Cold,
    Fragile,
    Stretch,
    Support,
    New,
}

impl RetrievabilityBand {
    /// Ordered scale used for telemetry-driven up/downgrades. `New` is
    /// excluded — it never participates in up/downgrade arithmetic.
    const ORDER: [RetrievabilityBand; 4] = [
        RetrievabilityBand::Cold,
        RetrievabilityBand::Fragile,
        RetrievabilityBand::Stretch,
        RetrievabilityBand::Support,
    ];

    fn index(self) -> Option<usize> {
        Self::ORDER.iter().position(|b| *b == self)
    }

    fn downgrade(self) -> Self {
        match self.index() {
            Some(idx) if idx > 0 => Self::ORDER[idx - 1],
            _ => self,
        }
    }

    fn upgrade(self) -> Self {
        match self.index() {
            Some(idx) if idx + 1 < Self::ORDER.len() => Self::ORDER[idx + 1],
            _ => self,
        }
    }
}

/// Strictly-increasing cut points for (cold, fragile, stretch) — the band
/// above `stretch` is `Support`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub cold: f64,
    pub fragile: f64,
    pub stretch: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            cold: 0.4,
            fragile: 0.6,
            stretch: 0.85,
        }
    }
}

impl BandThresholds {
    /// `true` iff the three cut points are strictly increasing and inside
    /// `(0, 1)`. Used by config validation to reject bad settings.
    pub fn is_valid(&self) -> bool {
        0.0 < self.cold
            && self.cold < self.fragile
            && self.fragile < self.stretch
            && self.stretch < 1.0
    }
}

/// `R(stability, elapsed, decay) = ((elapsed/stability)*factor + 1)^(-decay)`
/// with `factor = 0.9^(1/-decay) - 1`.
///
/// Returns 0 when `stability <= 0` or `decay <= 0`; otherwise clamped to
/// `[0, 1]`. Non-increasing in `elapsed_days` for fixed stability/decay.
pub fn compute_retrievability(stability: f64, elapsed_days: f64, decay: f64) -> f64 {
    if stability <= 0.0 || decay <= 0.0 {
        return 0.0;
    }
    let factor = 0.9_f64.powf(1.0 / -decay) - 1.0;
    let r = ((elapsed_days / stability) * factor + 1.0).powf(-decay);
    r.clamp(0.0, 1.0)
}

/// Classify a retrievability value into a base band, then apply telemetry
/// up/downgrades.
///
/// Downgrade one band (never below `Cold`) when `dont_know >= 2` or
/// `lookup_count >= 3`. Upgrade one band (never above `Support`) when
/// `conv_success_count >= 3`. Downgrade is checked first, matching the
/// source's precedence — an item that is both struggling and "successful"
/// (inconsistent telemetry) stays downgraded.
pub fn classify_item(
    retrievability: f64,
    mastery: &HashMap<String, i64>,
    thresholds: BandThresholds,
) -> RetrievabilityBand {
    let base = if retrievability < thresholds.cold {
        RetrievabilityBand::Cold
    } else if retrievability < thresholds.fragile {
        RetrievabilityBand::Fragile
    } else if retrievability < thresholds.stretch {
        RetrievabilityBand::Stretch
    } else {
        RetrievabilityBand::Support
    };

    let dont_know = mastery.get("dont_know").copied().unwrap_or(0);
    let lookup_count = mastery.get("lookup_count").copied().unwrap_or(0);
    let conv_success = mastery.get("conv_success_count").copied().unwrap_or(0);

    if dont_know >= 2 || lookup_count >= 3 {
        return base.downgrade();
    }
    if conv_success >= 3 {
        return base.upgrade();
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrievability_is_clamped_and_one_at_zero_elapsed() {
        let r = compute_retrievability(10.0, 0.0, FSRS5_DEFAULT_DECAY);
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn retrievability_non_increasing_in_elapsed() {
        let mut prev = 1.0;
        for elapsed in [0.0, 1.0, 5.0, 30.0, 100.0] {
            let r = compute_retrievability(10.0, elapsed, FSRS5_DEFAULT_DECAY);
            assert!(r <= prev + 1e-9, "R should not increase with elapsed time");
            assert!((0.0..=1.0).contains(&r));
            prev = r;
        }
    }

    #[test]
    fn non_positive_stability_or_decay_is_zero() {
        assert_eq!(compute_retrievability(0.0, 5.0, FSRS5_DEFAULT_DECAY), 0.0);
        assert_eq!(compute_retrievability(-1.0, 5.0, FSRS5_DEFAULT_DECAY), 0.0);
        assert_eq!(compute_retrievability(10.0, 5.0, 0.0), 0.0);
    }

    #[test]
    fn telemetry_downgrades_and_upgrades() {
        let thresholds = BandThresholds::default();
        let mut mastery = HashMap::new();
        mastery.insert("dont_know".to_string(), 2);
        assert_eq!(
            classify_item(0.7, &mastery, thresholds),
            RetrievabilityBand::Fragile
        );

        let mut mastery = HashMap::new();
        mastery.insert("conv_success_count".to_string(), 3);
        assert_eq!(
            classify_item(0.7, &mastery, thresholds),
            RetrievabilityBand::Support
        );
    }

    #[test]
    fn downgrade_never_goes_below_cold() {
        let thresholds = BandThresholds::default();
        let mut mastery = HashMap::new();
        mastery.insert("dont_know".to_string(), 5);
        assert_eq!(
            classify_item(0.1, &mastery, thresholds),
            RetrievabilityBand::Cold
        );
    }

    #[test]
    fn upgrade_never_exceeds_support() {
        let thresholds = BandThresholds::default();
        let mut mastery = HashMap::new();
        mastery.insert("conv_success_count".to_string(), 10);
        assert_eq!(
            classify_item(0.9, &mastery, thresholds),
            RetrievabilityBand::Support
        );
    }

    #[test]
    fn thresholds_validate_strictly_increasing() {
        assert!(BandThresholds::default().is_valid());
        assert!(!BandThresholds {
            cold: 0.6,
            fragile: 0.4,
            stretch: 0.85
        }
        .is_valid());
    }
}
