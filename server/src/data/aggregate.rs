//! OHLCV rollup from a lower timeframe to a higher one.

use crate::candle::Candle;
use crate::timeframe::Timeframe;

/// Aggregate `base` candles (any lower timeframe, sorted ascending) into
/// `target` buckets: `open` from the first candle of a bucket, `close` from
/// the last, `high`/`low` as the extremes, `volume` as the sum.
pub fn aggregate(base: &[Candle], target: Timeframe) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    for c in base {
        let bucket = target.align(c.time);
        match out.last_mut() {
            Some(agg) if agg.time == bucket => {
                agg.high = agg.high.max(c.high);
                agg.low = agg.low.min(c.low);
                agg.close = c.close;
                agg.volume += c.volume;
            }
            _ => out.push(Candle {
                time: bucket,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
            }),
        }
    }
    out
}
