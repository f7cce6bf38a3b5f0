// =============================================================================
// Confidence scoring — weighted blend of four 0-100 sub-scores
// =============================================================================
//
// Exact weights and scaling ceilings grounded on the original's
// `ConfidenceCalculator.calculate_confidence` (`pump_detector.py`), §4.5.
// =============================================================================

const WEIGHT_MAGNITUDE: f64 = 0.30;
const WEIGHT_VOLUME_SURGE: f64 = 0.30;
const WEIGHT_VELOCITY: f64 = 0.25;
const WEIGHT_MARKET_CONDITIONS: f64 = 0.15;

/// Inputs to the confidence score. All of `velocity`, `spread_pct`,
/// `liquidity_usdt`, and `volume_24h_usdt` are optional market context —
/// absent inputs fall back to neutral defaults rather than penalizing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceInputs {
    pub pump_magnitude_pct: f64,
    pub volume_surge_ratio: f64,
    pub velocity: Option<f64>,
    pub spread_pct: Option<f64>,
    pub liquidity_usdt: Option<f64>,
    pub volume_24h_usdt: Option<f64>,
}

/// Weighted sum of magnitude, volume-surge, velocity, and market-condition
/// sub-scores, clamped to `[0, 100]`.
pub fn calculate_confidence(inputs: ConfidenceInputs) -> f64 {
    // Magnitude score: 20% magnitude scales to the 100-point ceiling.
    let magnitude_score = (inputs.pump_magnitude_pct / 20.0 * 100.0).clamp(0.0, 100.0);

    // Volume surge score: a 5x surge (4x above the 1x baseline) scales to 100.
    let volume_score = (((inputs.volume_surge_ratio - 1.0) / 4.0) * 100.0).clamp(0.0, 100.0);

    let velocity_score = match inputs.velocity {
        Some(v) => (v.abs() * 100.0).min(100.0),
        None => 50.0,
    };

    let mut market_score: f64 = 70.0;
    if let Some(spread) = inputs.spread_pct {
        if spread > 3.0 {
            market_score -= 30.0;
        } else if spread > 1.0 {
            market_score -= 15.0;
        }
    }
    if let Some(liquidity) = inputs.liquidity_usdt {
        if liquidity < 500.0 {
            market_score -= 20.0;
        } else if liquidity < 1000.0 {
            market_score -= 10.0;
        }
    }
    if let Some(volume_24h) = inputs.volume_24h_usdt {
        if volume_24h < 50_000.0 {
            market_score -= 25.0;
        } else if volume_24h < 100_000.0 {
            market_score -= 10.0;
        }
    }

    let confidence = magnitude_score * WEIGHT_MAGNITUDE
        + volume_score * WEIGHT_VOLUME_SURGE
        + velocity_score * WEIGHT_VELOCITY
        + market_score * WEIGHT_MARKET_CONDITIONS;

    confidence.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_strength_signal_scores_high() {
        let confidence = calculate_confidence(ConfidenceInputs {
            pump_magnitude_pct: 20.0,
            volume_surge_ratio: 5.0,
            velocity: Some(1.0),
            spread_pct: Some(0.1),
            liquidity_usdt: Some(10_000.0),
            volume_24h_usdt: Some(1_000_000.0),
        });
        assert!(confidence >= 95.0, "expected near-max confidence, got {confidence}");
    }

    #[test]
    fn thin_market_depresses_market_conditions_score() {
        let healthy = calculate_confidence(ConfidenceInputs {
            pump_magnitude_pct: 12.0,
            volume_surge_ratio: 5.0,
            velocity: Some(0.6),
            spread_pct: Some(0.1),
            liquidity_usdt: Some(10_000.0),
            volume_24h_usdt: Some(1_000_000.0),
        });
        let thin = calculate_confidence(ConfidenceInputs {
            pump_magnitude_pct: 12.0,
            volume_surge_ratio: 5.0,
            velocity: Some(0.6),
            spread_pct: Some(5.0),
            liquidity_usdt: Some(100.0),
            volume_24h_usdt: Some(10_000.0),
        });
        assert!(thin < healthy);
    }

    #[test]
    fn missing_market_context_falls_back_to_neutral_defaults() {
        let confidence = calculate_confidence(ConfidenceInputs {
            pump_magnitude_pct: 12.0,
            volume_surge_ratio: 5.0,
            velocity: None,
            spread_pct: None,
            liquidity_usdt: None,
            volume_24h_usdt: None,
        });
        // magnitude=60*0.3=18, volume=100*0.3=30, velocity(neutral 50)*0.25=12.5, market(70)*0.15=10.5
        assert!((confidence - 71.0).abs() < 0.5);
    }
}
