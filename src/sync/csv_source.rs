use crate::error::{ArchiveError, ArchiveResult};
use crate::index::ProgressFn;
use crate::models::{Bar, Timeframe};
use crate::sync::filler::BarSource;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// One OHLCV row. `timestamp` is either epoch seconds or RFC 3339.
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Bar source backed by a local CSV file, so backfill runs without a live
/// exchange adapter. Real exchange clients are external collaborators that
/// implement the same `BarSource` trait.
pub struct CsvBarSource {
    path: PathBuf,
}

impl CsvBarSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_timestamp(raw: &str) -> ArchiveResult<DateTime<Utc>> {
        if let Ok(secs) = raw.parse::<i64>() {
            return Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
                ArchiveError::BackendUnavailable(format!("bad epoch timestamp '{}'", raw))
            });
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ArchiveError::BackendUnavailable(format!("bad timestamp '{}': {}", raw, e))
            })
    }
}

#[async_trait]
impl BarSource for CsvBarSource {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        on_progress: Option<&ProgressFn>,
    ) -> ArchiveResult<Vec<Bar>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| ArchiveError::BackendUnavailable(format!("csv open: {}", e)))?;

        let mut bars = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row =
                row.map_err(|e| ArchiveError::BackendUnavailable(format!("csv row: {}", e)))?;
            let timestamp = Self::parse_timestamp(&row.timestamp)?;
            if timestamp < start || timestamp > end {
                continue;
            }
            bars.push(Bar::new(
                timestamp, row.open, row.high, row.low, row.close, row.volume,
            ));
        }
        bars.sort_by_key(|b| b.timestamp);

        info!(
            "CSV source served {} bars for {}:{} [{} - {}]",
            bars.len(),
            symbol,
            timeframe,
            start,
            end
        );
        if let Some(progress) = on_progress {
            progress(bars.len(), bars.len());
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(rows: &[(&str, f64)]) -> tempfile_path::TempCsv {
        let mut file = tempfile_path::TempCsv::new();
        writeln!(file.file, "timestamp,open,high,low,close,volume").unwrap();
        for (ts, px) in rows {
            writeln!(
                file.file,
                "{},{},{},{},{},{}",
                ts,
                px,
                px + 1.0,
                px - 1.0,
                px + 0.5,
                10.0
            )
            .unwrap();
        }
        file.file.flush().unwrap();
        file
    }

    // Minimal throwaway-file helper so the tests need no extra dev crate.
    mod tempfile_path {
        use std::fs::File;
        use std::path::PathBuf;

        pub struct TempCsv {
            pub path: PathBuf,
            pub file: File,
        }

        impl TempCsv {
            pub fn new() -> Self {
                let path = std::env::temp_dir().join(format!(
                    "pattern-archive-test-{}.csv",
                    uuid::Uuid::new_v4()
                ));
                let file = File::create(&path).unwrap();
                Self { path, file }
            }
        }

        impl Drop for TempCsv {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_clips_to_range_and_sorts() {
        let csv = write_csv(&[
            ("2024-06-01T00:02:00Z", 102.0),
            ("2024-06-01T00:00:00Z", 100.0),
            ("2024-06-01T00:01:00Z", 101.0),
            ("2024-06-01T00:10:00Z", 110.0),
        ]);
        let source = CsvBarSource::new(&csv.path);

        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 5, 0).unwrap();
        let bars = source
            .fetch("BTCUSDT", Timeframe::M1, start, end, None)
            .await
            .unwrap();

        assert_eq!(bars.len(), 3);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!((bars[0].open - 100.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_fetch_epoch_timestamps() {
        let csv = write_csv(&[("1717200000", 100.0), ("1717200060", 101.0)]);
        let source = CsvBarSource::new(&csv.path);

        let start = Utc.timestamp_opt(1717200000, 0).unwrap();
        let end = Utc.timestamp_opt(1717200060, 0).unwrap();
        let bars = source
            .fetch("BTCUSDT", Timeframe::M1, start, end, None)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_range_is_empty_not_error() {
        let csv = write_csv(&[("2024-06-01T00:00:00Z", 100.0)]);
        let source = CsvBarSource::new(&csv.path);

        let start = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2030, 1, 2, 0, 0, 0).unwrap();
        let bars = source
            .fetch("BTCUSDT", Timeframe::M1, start, end, None)
            .await
            .unwrap();
        assert!(bars.is_empty());
    }
}
