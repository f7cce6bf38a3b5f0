// =============================================================================
// Pump Detector — stateful per-symbol candidate/reversal state machine
// =============================================================================
//
// Wires the pure predicates in `state_machine`, the ring-buffer baselines in
// `baseline`, and the weighted scoring in `confidence` into a live component
// that subscribes to `market.price_update` and emits `pump.detected` /
// `reversal.detected`. Grounded on the original's `PumpDetector` class
// (`domain/services/pump_detector.py`), §4.5.
//
// All mutation for a given symbol happens on the event bus's own subscriber
// worker task, so within a symbol there is a single writer; the state map is
// still guarded by a lock because `clear_history` can be called from outside
// that task (typically once a position for the symbol closes).
// =============================================================================

pub mod baseline;
pub mod confidence;
pub mod state_machine;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::domain::signals::{FlashPumpSignal, PumpCandidate, ReversalSignal};
use crate::event_bus::event::{
    Event, MarketPriceUpdate, PumpDetectedPayload, ReversalDetectedPayload, TOPIC_MARKET_PRICE_UPDATE,
};
use crate::event_bus::EventBus;

use baseline::SymbolBuffer;
use state_machine::{
    check_reversal, decimal_to_f64, is_candidate, pump_magnitude_pct, CandidateInputs, PumpThresholds,
    ReversalInputs, ReversalThresholds,
};

/// Tunables behind the detector, sourced from `EngineConfig`'s pump-detector
/// section (SPEC_FULL §4.8).
#[derive(Debug, Clone, Copy)]
pub struct PumpDetectorConfig {
    pub baseline_window: Duration,
    pub velocity_window: Duration,
    pub peak_confirmation_window: Duration,
    pub ring_buffer_capacity: usize,
    pub min_confidence_threshold: f64,
    pub thresholds: PumpThresholds,
    pub reversal_thresholds: ReversalThresholds,
}

impl Default for PumpDetectorConfig {
    fn default() -> Self {
        Self {
            baseline_window: Duration::from_secs(10 * 60),
            velocity_window: Duration::from_secs(30),
            peak_confirmation_window: Duration::from_secs(30),
            ring_buffer_capacity: 1000,
            min_confidence_threshold: 60.0,
            thresholds: PumpThresholds {
                min_pump_magnitude_pct: 7.0,
                volume_surge_multiplier: 3.5,
                velocity_threshold: 0.5,
                min_volume_24h: Decimal::from(100_000),
            },
            reversal_thresholds: ReversalThresholds { min_retracement_pct: 2.0 },
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Tracking { candidate: PumpCandidate, peak_price: Decimal, peak_time: DateTime<Utc> },
}

/// A pump already confirmed and emitted, kept around solely to evaluate
/// reversal/exit conditions against its peak.
#[derive(Debug, Clone)]
struct ConfirmedPump {
    peak_price: Decimal,
    peak_volume_surge_ratio: f64,
    detection_time: DateTime<Utc>,
}

struct SymbolState {
    buffer: SymbolBuffer,
    phase: Phase,
    confirmed: Option<ConfirmedPump>,
    error_count: u64,
}

impl SymbolState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: SymbolBuffer::new(capacity),
            phase: Phase::Idle,
            confirmed: None,
            error_count: 0,
        }
    }
}

pub struct PumpDetector {
    event_bus: Arc<EventBus>,
    config: PumpDetectorConfig,
    symbols: Mutex<HashMap<String, SymbolState>>,
}

impl PumpDetector {
    pub fn new(event_bus: Arc<EventBus>, config: PumpDetectorConfig) -> Arc<Self> {
        Arc::new(Self { event_bus, config, symbols: Mutex::new(HashMap::new()) })
    }

    /// Subscribe to `market.price_update`. Call once during orchestrator
    /// startup, after construction.
    pub fn subscribe(self: &Arc<Self>) {
        let detector = self.clone();
        self.event_bus.subscribe(
            TOPIC_MARKET_PRICE_UPDATE,
            Arc::new(move |event: Arc<Event>| {
                let detector = detector.clone();
                Box::pin(async move {
                    if let Event::MarketPriceUpdate(update) = event.as_ref() {
                        detector.handle_price_update(update).await;
                    }
                    Ok(())
                })
            }),
        );
    }

    /// Wipe ring buffer and candidate/confirmed state for `symbol`. Called
    /// once a position for that symbol closes, so stale peaks don't leak
    /// into the next pump cycle.
    pub fn clear_history(&self, symbol: &str) {
        self.symbols.lock().remove(symbol);
    }

    pub fn error_count(&self, symbol: &str) -> u64 {
        self.symbols.lock().get(symbol).map(|s| s.error_count).unwrap_or(0)
    }

    async fn handle_price_update(&self, update: &MarketPriceUpdate) {
        let (pump_event, reversal_event) = {
            let mut symbols = self.symbols.lock();
            let state = symbols
                .entry(update.symbol.clone())
                .or_insert_with(|| SymbolState::new(self.config.ring_buffer_capacity));

            match self.process_tick(update, state) {
                Ok(outcome) => outcome,
                Err(reason) => {
                    state.error_count += 1;
                    error!(symbol = %update.symbol, error = %reason, "pump detector tick failed, symbol unaffected by other symbols");
                    (None, None)
                }
            }
        };

        if let Some(payload) = pump_event {
            self.event_bus.publish(Event::PumpDetected(payload)).await;
        }
        if let Some(payload) = reversal_event {
            self.event_bus.publish(Event::ReversalDetected(payload)).await;
        }
    }

    /// Pure(-ish) per-tick transition, isolated so a single symbol's bad
    /// input can never take down the worker task processing every symbol.
    fn process_tick(
        &self,
        update: &MarketPriceUpdate,
        state: &mut SymbolState,
    ) -> Result<(Option<PumpDetectedPayload>, Option<ReversalDetectedPayload>), String> {
        if update.price <= Decimal::ZERO || update.volume < Decimal::ZERO {
            return Err(format!("non-positive price or negative volume: {}/{}", update.price, update.volume));
        }

        state.buffer.push(update.price, update.volume, update.timestamp);

        let baseline = state.buffer.baseline(self.config.baseline_window, update.timestamp);
        let velocity = state.buffer.velocity(self.config.velocity_window, update.timestamp);

        let mut pump_event = None;
        if let Phase::Idle = state.phase {
            if let Some((baseline_price, baseline_volume)) = baseline {
                let candidate_inputs = CandidateInputs {
                    price: update.price,
                    baseline_price,
                    volume: update.volume,
                    baseline_volume,
                    velocity,
                    volume_24h: update.quote_volume,
                };
                if is_candidate(&candidate_inputs, &self.config.thresholds) {
                    let volume_surge_ratio = decimal_to_f64(update.volume / baseline_volume);
                    let candidate = PumpCandidate {
                        symbol: update.symbol.clone(),
                        exchange: update.exchange.clone(),
                        detection_time: update.timestamp,
                        peak_price: update.price,
                        peak_time: update.timestamp,
                        baseline_price,
                        baseline_volume,
                        pump_magnitude_pct: pump_magnitude_pct(update.price, baseline_price),
                        volume_surge_ratio,
                        velocity: velocity.unwrap_or(0.0),
                    };
                    state.phase = Phase::Tracking {
                        candidate,
                        peak_price: update.price,
                        peak_time: update.timestamp,
                    };
                }
            }
        }

        if let Phase::Tracking { candidate, peak_price, peak_time } = &mut state.phase {
            if update.price > *peak_price {
                *peak_price = update.price;
                *peak_time = update.timestamp;
            }

            let elapsed = update.timestamp - *peak_time;
            if elapsed >= chrono::Duration::from_std(self.config.peak_confirmation_window).unwrap_or_default() {
                let magnitude = pump_magnitude_pct(*peak_price, candidate.baseline_price);
                let confidence_inputs = confidence::ConfidenceInputs {
                    pump_magnitude_pct: magnitude,
                    volume_surge_ratio: candidate.volume_surge_ratio,
                    velocity,
                    spread_pct: None,
                    liquidity_usdt: None,
                    volume_24h_usdt: update.quote_volume.map(decimal_to_f64),
                };
                let score = confidence::calculate_confidence(confidence_inputs);

                if score >= self.config.min_confidence_threshold {
                    let signal = FlashPumpSignal {
                        symbol: update.symbol.clone(),
                        exchange: update.exchange.clone(),
                        detection_time: candidate.detection_time,
                        peak_price: *peak_price,
                        baseline_price: candidate.baseline_price,
                        baseline_volume: candidate.baseline_volume,
                        pump_magnitude_pct: magnitude,
                        volume_surge_ratio: candidate.volume_surge_ratio,
                        velocity: velocity.unwrap_or(candidate.velocity),
                        confidence: score,
                        pump_age_seconds: (update.timestamp - candidate.detection_time).num_milliseconds() as f64
                            / 1000.0,
                        spread_pct: None,
                        liquidity: None,
                        rsi: None,
                        volume_24h: update.quote_volume,
                    };
                    pump_event = Some(PumpDetectedPayload {
                        timestamp: update.timestamp,
                        source: "pump_detector".into(),
                        symbol: update.symbol.clone(),
                        signal,
                        entry_allowed: true,
                        rejection_reasons: Vec::new(),
                    });
                    state.confirmed = Some(ConfirmedPump {
                        peak_price: *peak_price,
                        peak_volume_surge_ratio: candidate.volume_surge_ratio,
                        detection_time: candidate.detection_time,
                    });
                } else {
                    warn!(symbol = %update.symbol, confidence = score, "pump candidate abandoned below confidence threshold");
                }
                state.phase = Phase::Idle;
            }
        }

        let mut reversal_event = None;
        if let Some(confirmed) = &state.confirmed {
            let current_volume_surge_ratio = baseline
                .map(|(_, baseline_volume)| decimal_to_f64(update.volume / baseline_volume))
                .unwrap_or(0.0);
            let reversal_inputs = ReversalInputs {
                peak_price: confirmed.peak_price,
                current_price: update.price,
                current_volume_surge_ratio,
                peak_volume_surge_ratio: confirmed.peak_volume_surge_ratio,
                velocity,
            };
            if let Some(outcome) = check_reversal(&reversal_inputs, &self.config.reversal_thresholds) {
                let signal = ReversalSignal {
                    symbol: update.symbol.clone(),
                    exchange: update.exchange.clone(),
                    detection_time: confirmed.detection_time,
                    peak_price: confirmed.peak_price,
                    current_price: update.price,
                    retracement_pct: outcome.retracement_pct,
                    volume_decline_ratio: outcome.volume_decline_ratio,
                    momentum_shift_confirmed: outcome.momentum_shift_confirmed,
                    emergency_exit: outcome.emergency_exit,
                };
                reversal_event = Some(ReversalDetectedPayload {
                    timestamp: update.timestamp,
                    source: "pump_detector".into(),
                    symbol: update.symbol.clone(),
                    data: signal,
                });
                // One reversal per confirmed pump; further ticks need a new
                // confirmation to track again.
                state.confirmed = None;
            }
        }

        Ok((pump_event, reversal_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Side;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal, volume: Decimal, secs: i64) -> MarketPriceUpdate {
        MarketPriceUpdate {
            exchange: "mexc".into(),
            symbol: symbol.into(),
            price,
            volume,
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
            side: Side::Buy,
            quote_volume: Some(Decimal::from(200_000)),
            source: "test".into(),
        }
    }

    fn detector() -> Arc<PumpDetector> {
        let bus = Arc::new(EventBus::new(1024));
        PumpDetector::new(bus, PumpDetectorConfig::default())
    }

    #[test]
    fn idle_symbol_with_flat_prices_never_becomes_a_candidate() {
        let detector = detector();
        let mut symbols = HashMap::new();
        symbols.insert("BTC_USDT".to_string(), SymbolState::new(1000));
        let state = symbols.get_mut("BTC_USDT").unwrap();

        for i in 0..10 {
            detector.process_tick(&tick("BTC_USDT", dec!(100), dec!(10), i), state).unwrap();
        }
        assert!(matches!(state.phase, Phase::Idle));
        assert!(state.confirmed.is_none());
    }

    #[test]
    fn sustained_pump_confirms_after_the_peak_window_and_emits_once() {
        let detector = detector();
        let mut symbols = HashMap::new();
        symbols.insert("BTC_USDT".to_string(), SymbolState::new(1000));
        let state = symbols.get_mut("BTC_USDT").unwrap();

        // Five flat baseline samples, then a sharp pump.
        for i in 0..5 {
            detector.process_tick(&tick("BTC_USDT", dec!(100), dec!(10), i), state).unwrap();
        }
        let (pump, _) = detector.process_tick(&tick("BTC_USDT", dec!(115), dec!(40), 5), state).unwrap();
        assert!(pump.is_none(), "confidence window has not elapsed yet");
        assert!(matches!(state.phase, Phase::Tracking { .. }));

        // 30s later, past the peak confirmation window, still above peak.
        let (pump, _) = detector.process_tick(&tick("BTC_USDT", dec!(114), dec!(38), 36), state).unwrap();
        assert!(pump.is_some());
        assert!(matches!(state.phase, Phase::Idle));
        assert!(state.confirmed.is_some());
    }

    #[test]
    fn rejects_non_positive_price_without_poisoning_other_symbols() {
        let detector = detector();
        let mut state = SymbolState::new(1000);
        let err = detector.process_tick(&tick("BTC_USDT", Decimal::ZERO, dec!(10), 0), &mut state);
        assert!(err.is_err());
    }
}
