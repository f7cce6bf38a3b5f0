// =============================================================================
// Risk Manager — six independent pre-trade checks under one lock
// =============================================================================
//
// Grounded on the original's `RiskManager` (`domain/services/risk_manager.py`):
// same six checks, same per-check risk-score contributions and severities,
// same daily-P&L UTC-date reset and equity-peak/drawdown tracking, same
// per-strategy budget ledger. The `RwLock<Inner>` shape and the
// check-then-maybe-reset double-checked-locking idiom are carried over from
// the host's `risk.rs` `RiskEngine`. Margin-critical severity escalation
// follows SPEC_FULL.md §11, open question 2.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::risk::{AlertSeverity, RiskAlertType, RiskConfig};
use crate::domain::trading::{OrderSide, Position};
use crate::event_bus::event::{Event, RiskAlertPayload};
use crate::event_bus::EventBus;

fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Outcome of a `can_open_position` call. `risk_score` is a continuous 0-100
/// heuristic, not an exact-money figure, so it is `f64` per the crate's
/// Decimal/float split.
#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    pub can_proceed: bool,
    pub reason: Option<String>,
    pub risk_score: f64,
    pub failed_checks: Vec<String>,
}

impl Default for RiskCheckResult {
    fn default() -> Self {
        Self { can_proceed: true, reason: None, risk_score: 0.0, failed_checks: Vec::new() }
    }
}

impl RiskCheckResult {
    fn rejected(reason: impl Into<String>) -> Self {
        Self { can_proceed: false, reason: Some(reason.into()), risk_score: 0.0, failed_checks: Vec::new() }
    }

    fn fail(&mut self, check: &str, reason: String) {
        self.can_proceed = false;
        self.failed_checks.push(check.to_string());
        if self.reason.is_none() {
            self.reason = Some(reason);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub current_capital: Decimal,
    pub initial_capital: Decimal,
    pub equity_peak: Decimal,
    pub drawdown_percent: f64,
    pub daily_pnl: Decimal,
    pub daily_reset_date: String,
    pub allocated_budgets: HashMap<String, Decimal>,
    pub total_allocated: Decimal,
    pub available_capital: Decimal,
}

struct Inner {
    current_capital: Decimal,
    initial_capital: Decimal,
    equity_peak: Decimal,
    daily_pnl: Decimal,
    daily_reset_date: NaiveDate,
    allocated_budgets: HashMap<String, Decimal>,
}

pub struct RiskManager {
    event_bus: Arc<EventBus>,
    config: RiskConfig,
    state: RwLock<Inner>,
}

impl RiskManager {
    pub fn new(event_bus: Arc<EventBus>, config: RiskConfig, initial_capital: Decimal) -> Self {
        info!(
            initial_capital = %initial_capital,
            max_position_size_pct = %config.max_position_size_pct,
            max_positions = config.max_concurrent_positions,
            daily_loss_limit_pct = %config.daily_loss_limit_pct,
            max_drawdown_pct = %config.max_drawdown_pct,
            "risk manager initialized"
        );
        Self {
            event_bus,
            config,
            state: RwLock::new(Inner {
                current_capital: initial_capital,
                initial_capital,
                equity_peak: initial_capital,
                daily_pnl: Decimal::ZERO,
                daily_reset_date: Utc::now().date_naive(),
                allocated_budgets: HashMap::new(),
            }),
        }
    }

    /// Run all six checks against a consistent snapshot of capital, equity
    /// peak, daily P&L, and allocated budgets. All checks execute even after
    /// an earlier one fails, so `risk_score` and `failed_checks` reflect the
    /// full picture; only the first failure's reason is surfaced.
    #[allow(clippy::too_many_arguments)]
    pub async fn can_open_position(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        current_positions: &[Position],
        current_margin_ratio: Option<Decimal>,
        available_margin: Option<Decimal>,
    ) -> RiskCheckResult {
        if symbol.trim().is_empty() {
            return RiskCheckResult::rejected("symbol must not be blank");
        }
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return RiskCheckResult::rejected("quantity and price must both be positive");
        }

        self.maybe_reset_daily();

        let (result, alert) = {
            let inner = self.state.read();
            if inner.current_capital <= Decimal::ZERO {
                return RiskCheckResult::rejected("insufficient capital");
            }

            let position_value = quantity * price;
            let mut result = RiskCheckResult::default();

            self.check_max_position_size(&inner, position_value, &mut result);
            self.check_max_positions(current_positions, &mut result);
            self.check_symbol_concentration(&inner, symbol, position_value, current_positions, &mut result);
            self.check_daily_loss_limit(&inner, &mut result);
            self.check_max_drawdown(&inner, &mut result);
            self.check_margin_utilization(&inner, position_value, available_margin, current_margin_ratio, &mut result);

            let alert = if !result.can_proceed {
                Some(self.build_rejection_alert(symbol, side, quantity, price, position_value, &result))
            } else {
                None
            };
            (result, alert)
        };

        if let Some(payload) = alert {
            self.publish_alert(payload).await;
        }

        info!(
            symbol,
            can_proceed = result.can_proceed,
            risk_score = result.risk_score,
            failed_checks = ?result.failed_checks,
            "risk check result"
        );
        result
    }

    /// Check 1: position notional must not exceed a percentage of capital.
    fn check_max_position_size(&self, inner: &Inner, position_value: Decimal, result: &mut RiskCheckResult) {
        let max_value = inner.current_capital * self.config.max_position_size_pct / Decimal::from(100);
        if position_value > max_value {
            result.fail(
                "max_position_size",
                format!(
                    "position size {position_value} USDT exceeds max {max_value} USDT ({}% of capital)",
                    self.config.max_position_size_pct
                ),
            );
            result.risk_score += 25.0;
            return;
        }
        if max_value > Decimal::ZERO {
            result.risk_score += decimal_to_f64(position_value / max_value * Decimal::from(100)) / 10.0;
        }
    }

    /// Check 2: number of currently open positions must stay under the cap.
    fn check_max_positions(&self, positions: &[Position], result: &mut RiskCheckResult) {
        let num_open = positions.iter().filter(|p| p.is_open()).count() as u32;
        if num_open >= self.config.max_concurrent_positions {
            result.fail(
                "max_concurrent_positions",
                format!("max positions reached: {num_open}/{}", self.config.max_concurrent_positions),
            );
            result.risk_score += 20.0;
            return;
        }
        result.risk_score += (num_open as f64 / self.config.max_concurrent_positions as f64 * 100.0) / 10.0;
    }

    /// Check 3: existing plus new exposure to one symbol must not exceed a
    /// percentage of capital.
    fn check_symbol_concentration(
        &self,
        inner: &Inner,
        symbol: &str,
        new_position_value: Decimal,
        positions: &[Position],
        result: &mut RiskCheckResult,
    ) {
        let existing: Decimal = positions
            .iter()
            .filter(|p| p.symbol == symbol && p.is_open())
            .map(|p| p.notional_value())
            .sum();
        let total_exposure = existing + new_position_value;
        let max_exposure = inner.current_capital * self.config.max_symbol_concentration_pct / Decimal::from(100);

        if total_exposure > max_exposure {
            result.fail(
                "symbol_concentration",
                format!(
                    "symbol concentration for {symbol} would be {total_exposure} USDT, exceeds max {max_exposure} USDT ({}% of capital)",
                    self.config.max_symbol_concentration_pct
                ),
            );
            result.risk_score += 30.0;
            return;
        }
        if max_exposure > Decimal::ZERO {
            result.risk_score += decimal_to_f64(total_exposure / max_exposure * Decimal::from(100)) / 10.0;
        }
    }

    /// Check 4: today's realized P&L must not exceed the daily loss limit.
    fn check_daily_loss_limit(&self, inner: &Inner, result: &mut RiskCheckResult) {
        let limit = inner.current_capital * self.config.daily_loss_limit_pct / Decimal::from(100);
        if inner.daily_pnl < -limit {
            result.fail(
                "daily_loss_limit",
                format!(
                    "daily loss {} USDT exceeds limit {limit} USDT ({}% of capital)",
                    inner.daily_pnl, self.config.daily_loss_limit_pct
                ),
            );
            result.risk_score += 40.0;
            return;
        }
        if inner.daily_pnl < Decimal::ZERO && limit > Decimal::ZERO {
            result.risk_score += decimal_to_f64(inner.daily_pnl.abs() / limit * Decimal::from(100)) / 10.0;
        }
    }

    /// Check 5: drawdown from the equity peak must stay under the cap.
    fn check_max_drawdown(&self, inner: &Inner, result: &mut RiskCheckResult) {
        let drawdown_pct = Self::drawdown_pct(inner);
        let max_drawdown_pct = decimal_to_f64(self.config.max_drawdown_pct);
        if drawdown_pct >= max_drawdown_pct {
            result.fail(
                "max_drawdown",
                format!("drawdown {drawdown_pct:.2}% exceeds max {max_drawdown_pct}%"),
            );
            result.risk_score += 50.0;
            return;
        }
        if max_drawdown_pct > 0.0 {
            result.risk_score += (drawdown_pct / max_drawdown_pct) * 10.0;
        }
    }

    /// Check 6: current and post-trade projected margin utilization, skipped
    /// entirely when margin data is not supplied.
    fn check_margin_utilization(
        &self,
        inner: &Inner,
        new_position_value: Decimal,
        available_margin: Option<Decimal>,
        current_margin_ratio: Option<Decimal>,
        result: &mut RiskCheckResult,
    ) {
        let (Some(_available_margin), Some(current_margin_ratio)) = (available_margin, current_margin_ratio) else {
            return;
        };

        let max_pct = decimal_to_f64(self.config.max_margin_utilization_pct);
        let current_pct = decimal_to_f64(current_margin_ratio);

        if current_pct >= max_pct {
            result.fail(
                "margin_utilization",
                format!("margin utilization {current_pct:.2}% exceeds max {max_pct}%"),
            );
            result.risk_score += 35.0;
            return;
        }

        let estimated_increase = decimal_to_f64(new_position_value / inner.current_capital * Decimal::from(100));
        let estimated_new = current_pct + estimated_increase;
        if estimated_new >= max_pct {
            result.fail(
                "margin_utilization",
                format!("new position would push margin to ~{estimated_new:.2}%, exceeds max {max_pct}%"),
            );
            result.risk_score += 35.0;
            return;
        }

        result.risk_score += (current_pct / max_pct) * 10.0;
    }

    fn drawdown_pct(inner: &Inner) -> f64 {
        if inner.equity_peak <= Decimal::ZERO {
            return 0.0;
        }
        decimal_to_f64((inner.equity_peak - inner.current_capital) / inner.equity_peak * Decimal::from(100))
    }

    /// Update current capital, track the equity peak, and accumulate daily
    /// P&L. Emits a `MaxDrawdown` warning once drawdown reaches 80% of the
    /// configured limit.
    pub async fn update_capital(&self, new_capital: Decimal, pnl_change: Decimal) {
        self.maybe_reset_daily();

        let drawdown_pct = {
            let mut inner = self.state.write();
            inner.current_capital = new_capital;
            if new_capital > inner.equity_peak {
                inner.equity_peak = new_capital;
            }
            inner.daily_pnl += pnl_change;
            Self::drawdown_pct(&inner)
        };

        let max_drawdown_pct = decimal_to_f64(self.config.max_drawdown_pct);
        if drawdown_pct >= max_drawdown_pct * 0.8 {
            let payload = RiskAlertPayload {
                alert_id: format!("risk_{}", Utc::now().timestamp_millis()),
                severity: AlertSeverity::Warning,
                alert_type: RiskAlertType::MaxDrawdown,
                message: format!("drawdown at {drawdown_pct:.2}% (limit {max_drawdown_pct}%)"),
                details: json!({
                    "current_capital": new_capital,
                    "drawdown_percent": drawdown_pct,
                }),
                timestamp_ms: Utc::now().timestamp_millis(),
            };
            self.publish_alert(payload).await;
        }
    }

    /// Emit CRITICAL/WARNING alerts as the margin ratio crosses the
    /// configured thresholds. `margin_critical_pct` only escalates severity
    /// here; it never gates `can_open_position` (SPEC_FULL.md §11, decision 2).
    pub async fn check_margin_ratio(&self, margin_ratio: Decimal) {
        let severity = if margin_ratio <= self.config.margin_critical_pct {
            AlertSeverity::Critical
        } else if margin_ratio <= self.config.margin_warning_pct {
            AlertSeverity::Warning
        } else {
            return;
        };

        let message = match severity {
            AlertSeverity::Critical => format!("margin ratio at {margin_ratio}% — liquidation risk"),
            _ => format!("margin ratio at {margin_ratio}%"),
        };

        let payload = RiskAlertPayload {
            alert_id: format!("risk_{}", Utc::now().timestamp_millis()),
            severity,
            alert_type: RiskAlertType::MarginRatioLow,
            message,
            details: json!({ "margin_ratio": margin_ratio }),
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        self.publish_alert(payload).await;
    }

    /// Reserve `amount` of unallocated capital for `strategy`. Fails if the
    /// request exceeds what remains after existing reservations.
    pub fn use_budget(&self, strategy: &str, amount: Decimal) -> bool {
        let mut inner = self.state.write();
        let total_allocated: Decimal = inner.allocated_budgets.values().copied().sum();
        let available = inner.current_capital - total_allocated;
        if amount > available {
            warn!(strategy, requested = %amount, %available, "budget allocation failed — insufficient funds");
            return false;
        }
        *inner.allocated_budgets.entry(strategy.to_string()).or_insert(Decimal::ZERO) += amount;
        true
    }

    /// Release all (`amount = None`) or part of a strategy's reserved
    /// budget. Releasing an unknown strategy returns `false`.
    pub fn release_budget(&self, strategy: &str, amount: Option<Decimal>) -> bool {
        let mut inner = self.state.write();
        let Some(current) = inner.allocated_budgets.get(strategy).copied() else {
            warn!(strategy, "cannot release budget — no allocation found");
            return false;
        };
        match amount {
            None => {
                inner.allocated_budgets.remove(strategy);
            }
            Some(amount) if amount >= current => {
                inner.allocated_budgets.remove(strategy);
            }
            Some(amount) => {
                inner.allocated_budgets.insert(strategy.to_string(), current - amount);
            }
        }
        true
    }

    pub fn get_allocated_budget(&self, strategy: &str) -> Decimal {
        self.state.read().allocated_budgets.get(strategy).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn get_available_capital(&self) -> Decimal {
        let inner = self.state.read();
        let total_allocated: Decimal = inner.allocated_budgets.values().copied().sum();
        inner.current_capital - total_allocated
    }

    pub fn get_risk_summary(&self) -> RiskSummary {
        self.maybe_reset_daily();
        let inner = self.state.read();
        let total_allocated: Decimal = inner.allocated_budgets.values().copied().sum();
        RiskSummary {
            current_capital: inner.current_capital,
            initial_capital: inner.initial_capital,
            equity_peak: inner.equity_peak,
            drawdown_percent: Self::drawdown_pct(&inner),
            daily_pnl: inner.daily_pnl,
            daily_reset_date: inner.daily_reset_date.to_string(),
            allocated_budgets: inner.allocated_budgets.clone(),
            total_allocated,
            available_capital: inner.current_capital - total_allocated,
        }
    }

    fn build_rejection_alert(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        position_value: Decimal,
        result: &RiskCheckResult,
    ) -> RiskAlertPayload {
        RiskAlertPayload {
            alert_id: format!("risk_{}", Utc::now().timestamp_millis()),
            severity: AlertSeverity::Warning,
            alert_type: RiskAlertType::OrderRejected,
            message: format!("position opening rejected for {symbol}: {}", result.reason.clone().unwrap_or_default()),
            details: json!({
                "symbol": symbol,
                "side": side.to_string(),
                "quantity": quantity,
                "price": price,
                "position_value": position_value,
                "failed_checks": result.failed_checks,
                "risk_score": result.risk_score,
            }),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    async fn publish_alert(&self, payload: RiskAlertPayload) {
        match payload.severity {
            AlertSeverity::Critical => error!(alert_type = ?payload.alert_type, "{}", payload.message),
            AlertSeverity::Warning => warn!(alert_type = ?payload.alert_type, "{}", payload.message),
            AlertSeverity::Info => info!(alert_type = ?payload.alert_type, "{}", payload.message),
        }
        self.event_bus.publish(Event::RiskAlert(payload)).await;
    }

    /// Reset daily P&L if the UTC calendar date has rolled over since the
    /// last check. Read-then-write-if-stale to avoid taking the write lock
    /// on every call.
    fn maybe_reset_daily(&self) {
        let today = Utc::now().date_naive();
        {
            let inner = self.state.read();
            if inner.daily_reset_date == today {
                return;
            }
        }
        let mut inner = self.state.write();
        if inner.daily_reset_date != today {
            info!(old_date = %inner.daily_reset_date, new_date = %today, "daily P&L reset");
            inner.daily_pnl = Decimal::ZERO;
            inner.daily_reset_date = today;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn manager(capital: Decimal) -> RiskManager {
        let bus = Arc::new(EventBus::new(16));
        RiskManager::new(bus, RiskConfig::default(), capital)
    }

    fn position(symbol: &str, qty: Decimal, price: Decimal) -> Position {
        Position::new(symbol, OrderSide::Buy, price, qty, Utc::now())
    }

    #[tokio::test]
    async fn approves_a_position_within_all_limits() {
        let manager = manager(dec!(10000));
        let result = manager
            .can_open_position("BTC_USDT", OrderSide::Buy, dec!(0.01), dec!(100), &[], None, None)
            .await;
        assert!(result.can_proceed);
        assert!(result.failed_checks.is_empty());
    }

    #[tokio::test]
    async fn rejects_position_exceeding_max_position_size() {
        let manager = manager(dec!(10000));
        // 10% of capital is 1000 USDT; this order is 2000 USDT notional.
        let result = manager
            .can_open_position("BTC_USDT", OrderSide::Buy, dec!(2), dec!(1000), &[], None, None)
            .await;
        assert!(!result.can_proceed);
        assert!(result.failed_checks.contains(&"max_position_size".to_string()));
    }

    #[tokio::test]
    async fn rejects_when_max_concurrent_positions_reached() {
        let manager = manager(dec!(100000));
        let open = vec![position("A", dec!(1), dec!(10)), position("B", dec!(1), dec!(10)), position("C", dec!(1), dec!(10))];
        let result = manager
            .can_open_position("D", OrderSide::Buy, dec!(1), dec!(10), &open, None, None)
            .await;
        assert!(!result.can_proceed);
        assert!(result.failed_checks.contains(&"max_concurrent_positions".to_string()));
    }

    #[tokio::test]
    async fn rejects_when_symbol_concentration_would_be_exceeded() {
        let manager = manager(dec!(10000)); // max_symbol_concentration_pct defaults to 30% => 3000 cap
        let open = vec![position("BTC_USDT", dec!(25), dec!(100))]; // existing notional 2500
        let result = manager
            .can_open_position("BTC_USDT", OrderSide::Buy, dec!(1), dec!(600), &open, None, None)
            .await;
        assert!(!result.can_proceed);
        assert!(result.failed_checks.contains(&"symbol_concentration".to_string()));
    }

    #[tokio::test]
    async fn rejects_blank_symbol_and_non_positive_inputs() {
        let manager = manager(dec!(10000));
        let blank = manager.can_open_position("", OrderSide::Buy, dec!(1), dec!(10), &[], None, None).await;
        assert!(!blank.can_proceed);

        let zero_qty = manager.can_open_position("BTC_USDT", OrderSide::Buy, Decimal::ZERO, dec!(10), &[], None, None).await;
        assert!(!zero_qty.can_proceed);
    }

    #[tokio::test]
    async fn drawdown_past_limit_blocks_new_positions() {
        let manager = manager(dec!(10000));
        manager.update_capital(dec!(8400), dec!(-1600)).await; // 16% drawdown, limit is 15%
        let result = manager
            .can_open_position("BTC_USDT", OrderSide::Buy, dec!(0.001), dec!(100), &[], None, None)
            .await;
        assert!(!result.can_proceed);
        assert!(result.failed_checks.contains(&"max_drawdown".to_string()));
    }

    #[tokio::test]
    async fn margin_check_is_skipped_without_margin_data() {
        let manager = manager(dec!(10000));
        let result = manager
            .can_open_position("BTC_USDT", OrderSide::Buy, dec!(0.01), dec!(100), &[], None, None)
            .await;
        assert!(!result.failed_checks.contains(&"margin_utilization".to_string()));
    }

    #[test]
    fn budget_allocation_tracks_available_capital() {
        let manager = manager(dec!(10000));
        assert!(manager.use_budget("strategy-a", dec!(4000)));
        assert_eq!(manager.get_available_capital(), dec!(6000));
        assert!(!manager.use_budget("strategy-b", dec!(7000)));
        assert!(manager.release_budget("strategy-a", None));
        assert_eq!(manager.get_available_capital(), dec!(10000));
    }

    #[test]
    fn releasing_unknown_strategy_budget_fails() {
        let manager = manager(dec!(10000));
        assert!(!manager.release_budget("ghost", None));
    }
}
