use serde::{Deserialize, Serialize};

/// One OHLCV bar. `time` is the candle's open timestamp in epoch seconds
/// (UTC), aligned to the owning timeframe's minute boundary. A missing
/// volume column is normalized to `0` by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A zero-range candle at `price`, used for synthetic fills.
    pub fn flat(time: i64, price: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_candle_has_zero_range_and_volume() {
        let c = Candle::flat(1_700_000_000, 18_250.5);
        assert_eq!(c.open, c.close);
        assert_eq!(c.high, c.low);
        assert_eq!(c.volume, 0.0);
    }

    #[test]
    fn json_shape_is_scalar_only() {
        let c = Candle {
            time: 1_700_000_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        };
        let v = serde_json::to_value(c).unwrap();
        assert_eq!(v["time"], 1_700_000_000_i64);
        assert!(v["open"].is_f64() || v["open"].is_u64());
        let back: Candle = serde_json::from_value(v).unwrap();
        assert_eq!(back, c);
    }
}
