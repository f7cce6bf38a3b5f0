// =============================================================================
// Per-symbol ring buffer — baseline price/volume and velocity
// =============================================================================
//
// Grounded on the original's rolling-window baseline in `pump_detector.py`
// (`_calculate_baseline`, `_calculate_velocity`), §4.5.
// =============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const MIN_BASELINE_SAMPLES: usize = 5;

#[derive(Debug, Clone)]
struct Sample {
    price: Decimal,
    volume: Decimal,
    timestamp: DateTime<Utc>,
}

/// Bounded ring buffer of timestamped price/volume samples for one symbol.
pub struct SymbolBuffer {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl SymbolBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, price: Decimal, volume: Decimal, timestamp: DateTime<Utc>) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { price, volume, timestamp });
    }

    pub fn latest_price(&self) -> Option<Decimal> {
        self.samples.back().map(|s| s.price)
    }

    fn in_window(&self, window: Duration, now: DateTime<Utc>) -> Vec<&Sample> {
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_default();
        self.samples.iter().filter(|s| s.timestamp >= cutoff).collect()
    }

    /// `(baseline_price, baseline_volume)` as the median of samples within
    /// `window`, or `None` if fewer than [`MIN_BASELINE_SAMPLES`] qualify.
    pub fn baseline(&self, window: Duration, now: DateTime<Utc>) -> Option<(Decimal, Decimal)> {
        let windowed = self.in_window(window, now);
        if windowed.len() < MIN_BASELINE_SAMPLES {
            return None;
        }
        let mut prices: Vec<Decimal> = windowed.iter().map(|s| s.price).collect();
        let mut volumes: Vec<Decimal> = windowed.iter().map(|s| s.volume).collect();
        Some((median(&mut prices), median(&mut volumes)))
    }

    /// `(price_now - price_window_ago) / window_seconds`, using the oldest
    /// sample still inside `window` as the "window ago" reference.
    pub fn velocity(&self, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let windowed = self.in_window(window, now);
        let (oldest, newest) = (windowed.first()?, windowed.last()?);
        if oldest.timestamp == newest.timestamp {
            return None;
        }
        let elapsed = (newest.timestamp - oldest.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        let delta = newest.price - oldest.price;
        Some(decimal_to_f64(delta) / elapsed)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

fn median(values: &mut [Decimal]) -> Decimal {
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / Decimal::from(2)
    } else {
        values[mid]
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn baseline_requires_minimum_sample_count() {
        let mut buf = SymbolBuffer::new(100);
        for i in 0..4 {
            buf.push(dec!(100), dec!(10), ts(i));
        }
        assert!(buf.baseline(Duration::from_secs(600), ts(10)).is_none());

        buf.push(dec!(100), dec!(10), ts(4));
        assert!(buf.baseline(Duration::from_secs(600), ts(10)).is_some());
    }

    #[test]
    fn baseline_is_median_of_window() {
        let mut buf = SymbolBuffer::new(100);
        for (i, price) in [100, 101, 99, 102, 98].into_iter().enumerate() {
            buf.push(Decimal::from(price), dec!(10), ts(i as i64));
        }
        let (median_price, _) = buf.baseline(Duration::from_secs(600), ts(10)).unwrap();
        assert_eq!(median_price, Decimal::from(100));
    }

    #[test]
    fn velocity_reflects_price_change_per_second() {
        let mut buf = SymbolBuffer::new(100);
        buf.push(dec!(100), dec!(10), ts(0));
        buf.push(dec!(112), dec!(10), ts(10));
        let v = buf.velocity(Duration::from_secs(30), ts(10)).unwrap();
        assert!((v - 1.2).abs() < 0.01);
    }

    #[test]
    fn clear_wipes_all_samples() {
        let mut buf = SymbolBuffer::new(100);
        buf.push(dec!(100), dec!(10), ts(0));
        buf.clear();
        assert!(buf.latest_price().is_none());
    }
}
