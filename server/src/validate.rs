use crate::candle::Candle;

/// Gate between the data plane and the wire. Everything the client renders
/// passes through here; the client must never receive an empty array or a
/// candle violating the OHLC invariants.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    min_price: f64,
    max_price: f64,
}

impl Validator {
    pub fn new(min_price: f64, max_price: f64) -> Self {
        Self {
            min_price,
            max_price,
        }
    }

    /// True when the candle is renderable: finite positive prices inside the
    /// plausibility bounds, and `low <= open,close <= high`.
    pub fn is_valid(&self, c: &Candle) -> bool {
        let prices = [c.open, c.high, c.low, c.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        if prices
            .iter()
            .any(|p| *p < self.min_price || *p > self.max_price)
        {
            return false;
        }
        c.low <= c.open && c.low <= c.close && c.high >= c.open && c.high >= c.close && c.low <= c.high
    }

    /// Drop invalid candles and zero out non-finite volume. When nothing
    /// survives, substitute a single flat candle at `last_known_price` so
    /// the client never renders from an empty array.
    pub fn sanitize(&self, candles: &[Candle], last_known_price: f64, now: i64) -> Vec<Candle> {
        let mut out: Vec<Candle> = candles
            .iter()
            .filter(|c| self.is_valid(c))
            .map(|c| {
                let mut fixed = *c;
                if !fixed.volume.is_finite() {
                    fixed.volume = 0.0;
                }
                fixed
            })
            .collect();

        if out.is_empty() {
            out.push(Candle::flat(now, last_known_price));
        }
        out
    }
}
