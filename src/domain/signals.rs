// =============================================================================
// Pump / reversal signal value types
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A pump under observation, not yet confirmed. Owned exclusively by the
/// pump detector's per-symbol state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpCandidate {
    pub symbol: String,
    pub exchange: String,
    pub detection_time: DateTime<Utc>,
    pub peak_price: Decimal,
    pub peak_time: DateTime<Utc>,
    pub baseline_price: Decimal,
    pub baseline_volume: Decimal,
    pub pump_magnitude_pct: f64,
    pub volume_surge_ratio: f64,
    pub velocity: f64,
}

/// A confirmed pump: the candidate's fields plus the confidence score and
/// market-condition snapshot taken at confirmation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashPumpSignal {
    pub symbol: String,
    pub exchange: String,
    pub detection_time: DateTime<Utc>,
    pub peak_price: Decimal,
    pub baseline_price: Decimal,
    pub baseline_volume: Decimal,
    pub pump_magnitude_pct: f64,
    pub volume_surge_ratio: f64,
    pub velocity: f64,
    pub confidence: f64,
    pub pump_age_seconds: f64,
    pub spread_pct: Option<f64>,
    pub liquidity: Option<Decimal>,
    pub rsi: Option<f64>,
    pub volume_24h: Option<Decimal>,
}

/// Emitted against a prior confirmed pump when price retraces meaningfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalSignal {
    pub symbol: String,
    pub exchange: String,
    pub detection_time: DateTime<Utc>,
    pub peak_price: Decimal,
    pub current_price: Decimal,
    pub retracement_pct: f64,
    pub volume_decline_ratio: f64,
    pub momentum_shift_confirmed: bool,
    pub emergency_exit: bool,
}
