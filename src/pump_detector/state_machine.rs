// =============================================================================
// Pure predicates for the pump/reversal state machine
// =============================================================================
//
// Kept free of I/O and locking so the exact boundary conditions in §8.3 are
// directly unit-testable. Grounded on the original's `_detect_new_pump` /
// `detect_reversal` (`pump_detector.py`), §4.5.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

pub fn pump_magnitude_pct(price: Decimal, baseline: Decimal) -> f64 {
    if baseline.is_zero() {
        return 0.0;
    }
    decimal_to_f64((price - baseline) / baseline * Decimal::from(100))
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateInputs {
    pub price: Decimal,
    pub baseline_price: Decimal,
    pub volume: Decimal,
    pub baseline_volume: Decimal,
    pub velocity: Option<f64>,
    pub volume_24h: Option<Decimal>,
}

#[derive(Debug, Clone, Copy)]
pub struct PumpThresholds {
    pub min_pump_magnitude_pct: f64,
    pub volume_surge_multiplier: f64,
    pub velocity_threshold: f64,
    pub min_volume_24h: Decimal,
}

/// A new pump is recognized when magnitude, volume surge, and (when
/// computable) velocity and 24h volume all clear their thresholds.
/// Boundary values exactly at a threshold qualify (§8.3).
pub fn is_candidate(inputs: &CandidateInputs, thresholds: &PumpThresholds) -> bool {
    if inputs.baseline_price.is_zero() || inputs.baseline_volume.is_zero() {
        return false;
    }
    let magnitude = pump_magnitude_pct(inputs.price, inputs.baseline_price);
    if magnitude < thresholds.min_pump_magnitude_pct {
        return false;
    }
    let surge_ratio = decimal_to_f64(inputs.volume / inputs.baseline_volume);
    if surge_ratio < thresholds.volume_surge_multiplier {
        return false;
    }
    if let Some(velocity) = inputs.velocity {
        if velocity < thresholds.velocity_threshold {
            return false;
        }
    }
    if let Some(volume_24h) = inputs.volume_24h {
        if volume_24h < thresholds.min_volume_24h {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone, Copy)]
pub struct ReversalInputs {
    pub peak_price: Decimal,
    pub current_price: Decimal,
    pub current_volume_surge_ratio: f64,
    pub peak_volume_surge_ratio: f64,
    pub velocity: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReversalThresholds {
    pub min_retracement_pct: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ReversalOutcome {
    pub retracement_pct: f64,
    pub volume_decline_ratio: f64,
    pub momentum_shift_confirmed: bool,
    pub emergency_exit: bool,
}

pub fn retracement_pct(peak: Decimal, current: Decimal) -> f64 {
    if peak.is_zero() {
        return 0.0;
    }
    decimal_to_f64((peak - current) / peak * Decimal::from(100))
}

/// An elevated multiple of `min_retracement_pct` combined with a steep
/// volume decline marks an emergency exit, distinct from an ordinary
/// reversal signal.
const EMERGENCY_RETRACEMENT_MULTIPLIER: f64 = 2.0;
const EMERGENCY_VOLUME_DECLINE_RATIO: f64 = 0.5;

pub fn check_reversal(inputs: &ReversalInputs, thresholds: &ReversalThresholds) -> Option<ReversalOutcome> {
    if inputs.peak_price.is_zero() {
        return None;
    }
    let retracement = retracement_pct(inputs.peak_price, inputs.current_price);
    if retracement < thresholds.min_retracement_pct {
        return None;
    }
    let decline_ratio = if inputs.peak_volume_surge_ratio > 0.0 {
        ((inputs.peak_volume_surge_ratio - inputs.current_volume_surge_ratio) / inputs.peak_volume_surge_ratio).max(0.0)
    } else {
        0.0
    };
    let momentum_shift_confirmed = inputs.velocity.map(|v| v < 0.0).unwrap_or(false);
    let emergency_exit = retracement >= thresholds.min_retracement_pct * EMERGENCY_RETRACEMENT_MULTIPLIER
        && decline_ratio >= EMERGENCY_VOLUME_DECLINE_RATIO;

    Some(ReversalOutcome {
        retracement_pct: retracement,
        volume_decline_ratio: decline_ratio,
        momentum_shift_confirmed,
        emergency_exit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn thresholds() -> PumpThresholds {
        PumpThresholds {
            min_pump_magnitude_pct: 7.0,
            volume_surge_multiplier: 3.5,
            velocity_threshold: 0.5,
            min_volume_24h: Decimal::from(100_000),
        }
    }

    #[test]
    fn magnitude_exactly_at_threshold_qualifies() {
        let inputs = CandidateInputs {
            price: dec!(107),
            baseline_price: dec!(100),
            volume: dec!(40),
            baseline_volume: dec!(10),
            velocity: Some(1.0),
            volume_24h: Some(Decimal::from(200_000)),
        };
        assert!(is_candidate(&inputs, &thresholds()));
    }

    #[test]
    fn magnitude_strictly_below_threshold_is_rejected() {
        let inputs = CandidateInputs {
            price: dec!(106.99),
            baseline_price: dec!(100),
            volume: dec!(40),
            baseline_volume: dec!(10),
            velocity: Some(1.0),
            volume_24h: Some(Decimal::from(200_000)),
        };
        assert!(!is_candidate(&inputs, &thresholds()));
    }

    #[test]
    fn low_24h_volume_disqualifies_even_with_strong_pump() {
        let inputs = CandidateInputs {
            price: dec!(120),
            baseline_price: dec!(100),
            volume: dec!(100),
            baseline_volume: dec!(10),
            velocity: Some(1.0),
            volume_24h: Some(Decimal::from(1_000)),
        };
        assert!(!is_candidate(&inputs, &thresholds()));
    }

    #[test]
    fn reversal_scenario_matches_spec_example() {
        let inputs = ReversalInputs {
            peak_price: dec!(112),
            current_price: dec!(108),
            current_volume_surge_ratio: 2.0,
            peak_volume_surge_ratio: 5.0,
            velocity: Some(-0.4),
        };
        let outcome = check_reversal(&inputs, &ReversalThresholds { min_retracement_pct: 2.0 }).unwrap();
        assert!((outcome.retracement_pct - 3.571).abs() < 0.01);
        assert!((outcome.volume_decline_ratio - 0.6).abs() < 0.01);
        assert!(outcome.momentum_shift_confirmed);
    }

    #[test]
    fn retracement_below_threshold_yields_no_reversal() {
        let inputs = ReversalInputs {
            peak_price: dec!(112),
            current_price: dec!(111),
            current_volume_surge_ratio: 4.0,
            peak_volume_surge_ratio: 5.0,
            velocity: Some(-0.1),
        };
        assert!(check_reversal(&inputs, &ReversalThresholds { min_retracement_pct: 2.0 }).is_none());
    }
}
