// =============================================================================
// Pump lifecycle — event bus + pump detector wired together end to end
// =============================================================================
//
// Exercises the one seam unit tests inside `pump_detector::mod` can't reach:
// ticks enter through `EventBus::publish` exactly as the WebSocket pool would
// drive them, and `pump.detected`/`reversal.detected` are observed by a
// separate subscriber, not by calling `process_tick` directly.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulsecore::domain::market::Side;
use pulsecore::event_bus::{Event, EventBus, MarketPriceUpdate, TOPIC_PUMP_DETECTED, TOPIC_REVERSAL_DETECTED};
use pulsecore::pump_detector::{PumpDetector, PumpDetectorConfig};
use rust_decimal_macros::dec;
use tokio::sync::Mutex as AsyncMutex;

fn tick(symbol: &str, price: rust_decimal::Decimal, volume: rust_decimal::Decimal, secs: i64) -> MarketPriceUpdate {
    MarketPriceUpdate {
        exchange: "mexc".into(),
        symbol: symbol.into(),
        price,
        volume,
        timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        side: Side::Buy,
        quote_volume: Some(rust_decimal::Decimal::from(200_000)),
        source: "test".into(),
    }
}

#[tokio::test]
async fn sustained_burst_emits_pump_detected_then_reversal_on_retracement() {
    let bus = Arc::new(EventBus::new(1024));
    let detector = PumpDetector::new(bus.clone(), PumpDetectorConfig::default());
    detector.subscribe();

    let pump_count = Arc::new(AtomicUsize::new(0));
    let reversal_count = Arc::new(AtomicUsize::new(0));
    let last_confidence = Arc::new(AsyncMutex::new(0.0_f64));

    {
        let pump_count = pump_count.clone();
        let last_confidence = last_confidence.clone();
        bus.subscribe(
            TOPIC_PUMP_DETECTED,
            Arc::new(move |event: Arc<Event>| {
                let pump_count = pump_count.clone();
                let last_confidence = last_confidence.clone();
                Box::pin(async move {
                    if let Event::PumpDetected(payload) = event.as_ref() {
                        pump_count.fetch_add(1, Ordering::SeqCst);
                        *last_confidence.lock().await = payload.signal.confidence;
                    }
                    Ok(())
                })
            }),
        );
    }
    {
        let reversal_count = reversal_count.clone();
        bus.subscribe(
            TOPIC_REVERSAL_DETECTED,
            Arc::new(move |event: Arc<Event>| {
                let reversal_count = reversal_count.clone();
                Box::pin(async move {
                    if let Event::ReversalDetected(_) = event.as_ref() {
                        reversal_count.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                })
            }),
        );
    }

    // Steady baseline: price=100, volume=10 for several samples.
    for i in 0..5 {
        bus.publish(Event::MarketPriceUpdate(tick("BTC_USDT", dec!(100), dec!(10), i))).await;
    }

    // Burst: price climbs to 112 with a volume surge, holds past the peak
    // confirmation window.
    bus.publish(Event::MarketPriceUpdate(tick("BTC_USDT", dec!(112), dec!(50), 10))).await;
    bus.publish(Event::MarketPriceUpdate(tick("BTC_USDT", dec!(112), dec!(48), 41))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(pump_count.load(Ordering::SeqCst), 1);
    assert!(*last_confidence.lock().await >= 60.0);

    // Retracement with declining volume triggers the reversal.
    bus.publish(Event::MarketPriceUpdate(tick("BTC_USDT", dec!(108), dec!(20), 50))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(reversal_count.load(Ordering::SeqCst), 1);
}
