use crate::error::{ArchiveError, ArchiveResult};
use crate::models::{Bar, Timeframe};
use tracing::debug;

/// Aggregate bars from a finer granularity into a coarser one.
///
/// Only upsampling is supported. The target duration must be an exact
/// integer multiple of the source duration; requesting the same granularity
/// returns the input unchanged. Each output bar covers `k` consecutive input
/// bars: open of the first, max high, min low, close of the last, summed
/// volume, timestamp of the first. The final partial group is still emitted
/// as one aggregated bar.
pub fn aggregate(bars: &[Bar], from: Timeframe, to: Timeframe) -> ArchiveResult<Vec<Bar>> {
    if from == to {
        return Ok(bars.to_vec());
    }
    if to.minutes() < from.minutes() {
        return Err(ArchiveError::InvalidConversion {
            from: from.label().to_string(),
            to: to.label().to_string(),
            reason: "downsampling is not supported".to_string(),
        });
    }
    if to.minutes() % from.minutes() != 0 {
        return Err(ArchiveError::InvalidConversion {
            from: from.label().to_string(),
            to: to.label().to_string(),
            reason: "target is not an integer multiple of source".to_string(),
        });
    }

    let k = (to.minutes() / from.minutes()) as usize;
    let mut out = Vec::with_capacity(bars.len() / k + 1);

    for group in bars.chunks(k) {
        let high = group.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = group.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let volume = group.iter().map(|b| b.volume).sum();
        out.push(Bar::new(
            group[0].timestamp,
            group[0].open,
            high,
            low,
            group[group.len() - 1].close,
            volume,
        ));
    }

    debug!(
        "Aggregated {} bars from {} to {} ({} output bars)",
        bars.len(),
        from,
        to,
        out.len()
    );

    Ok(out)
}

/// Granularities a source timeframe can legally aggregate into (strictly
/// coarser, exact multiples only).
pub fn upsample_targets(from: Timeframe) -> Vec<Timeframe> {
    Timeframe::ALL
        .into_iter()
        .filter(|to| to.minutes() > from.minutes() && to.minutes() % from.minutes() == 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn minute_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64;
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::minutes(i as i64),
                    base,
                    base + 2.0,
                    base - 1.0,
                    base + 1.0,
                    10.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_aggregate_even_groups() {
        let bars = minute_bars(10);
        let out = aggregate(&bars, Timeframe::M1, Timeframe::M5).unwrap();
        assert_eq!(out.len(), 2);

        let last = &out[1];
        // Group covers input bars 5..10.
        assert!((last.open - 105.0).abs() < 1e-10);
        assert!((last.high - 111.0).abs() < 1e-10); // 109 + 2
        assert!((last.low - 104.0).abs() < 1e-10); // 105 - 1
        assert!((last.close - 110.0).abs() < 1e-10); // 109 + 1
        assert!((last.volume - 50.0).abs() < 1e-10);
        assert_eq!(last.timestamp, bars[5].timestamp);
    }

    #[test]
    fn test_partial_final_group_emitted() {
        let bars = minute_bars(7);
        let out = aggregate(&bars, Timeframe::M1, Timeframe::M5).unwrap();
        assert_eq!(out.len(), 2);
        // Second group holds only 2 bars.
        assert!((out[1].volume - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_same_granularity_identity() {
        let bars = minute_bars(3);
        let out = aggregate(&bars, Timeframe::M1, Timeframe::M1).unwrap();
        assert_eq!(out, bars);
    }

    #[test]
    fn test_downsampling_rejected() {
        let bars = minute_bars(3);
        let err = aggregate(&bars, Timeframe::M5, Timeframe::M1).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidConversion { .. }));
    }

    #[test]
    fn test_non_multiple_rejected() {
        // 6h is coarser than 4h but not an integer multiple of it.
        let bars = minute_bars(3);
        let err = aggregate(&bars, Timeframe::H4, Timeframe::H6).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidConversion { .. }));
        // 1d is a multiple of 4h.
        assert!(aggregate(&bars, Timeframe::H4, Timeframe::D1).is_ok());
    }

    #[test]
    fn test_upsample_targets() {
        let targets = upsample_targets(Timeframe::M1);
        assert_eq!(targets.len(), 7);
        assert!(!targets.contains(&Timeframe::M1));

        // 6h can only go to 1d; 4h cannot go to 6h.
        assert_eq!(upsample_targets(Timeframe::H6), vec![Timeframe::D1]);
        assert!(!upsample_targets(Timeframe::H4).contains(&Timeframe::H6));
    }
}
