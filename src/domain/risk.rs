// =============================================================================
// Risk configuration value type
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The six quantitative limits enforced by the risk manager, plus the
/// margin-ratio warning/critical thresholds used for alert severity
/// escalation (see SPEC_FULL.md §11, open question 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_position_size_pct: Decimal,
    pub max_concurrent_positions: u32,
    pub max_symbol_concentration_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub max_margin_utilization_pct: Decimal,
    pub margin_warning_pct: Decimal,
    pub margin_critical_pct: Decimal,
}

/// Severity of a `risk_alert` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

/// The specific condition a `risk_alert` reports, mirroring the original's
/// `RiskAlertType` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAlertType {
    PositionSizeExceeded,
    MaxPositionsExceeded,
    ConcentrationExceeded,
    DailyLossLimit,
    MaxDrawdown,
    MarginUtilizationHigh,
    MarginRatioLow,
    OrderRejected,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_pct: Decimal::from(10),
            max_concurrent_positions: 3,
            max_symbol_concentration_pct: Decimal::from(30),
            daily_loss_limit_pct: Decimal::from(5),
            max_drawdown_pct: Decimal::from(15),
            max_margin_utilization_pct: Decimal::from(80),
            margin_warning_pct: Decimal::from(70),
            margin_critical_pct: Decimal::from(84),
        }
    }
}
