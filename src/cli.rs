use crate::config::Settings;
use crate::index::{PatternIndex, QdrantBackend};
use crate::models::Timeframe;
use crate::patterns::{PatternEmbedder, PatternExtractor};
use crate::sync::{CsvBarSource, FillerConfig, GapDetector, GapFiller};
use crate::util::format_time;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pattern-archive")]
#[command(about = "Price-pattern indexing and retrieval", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the vector collection and payload indexes
    Init,

    /// Detect gaps and backfill them from a CSV bar file
    Backfill {
        /// Symbol (e.g. "BTCUSDT")
        #[arg(short, long)]
        symbol: String,

        /// Timeframe (e.g. "1m", "1h", "1d")
        #[arg(short, long, default_value = "1m")]
        timeframe: String,

        /// CSV file with timestamp,open,high,low,close,volume rows
        #[arg(short, long)]
        file: PathBuf,

        /// How far back to reconcile, in days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Fill only the trailing gap since the latest indexed pattern
    Update {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "1m")]
        timeframe: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// List detected gaps without filling them
    Gaps {
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long, default_value = "1m")]
        timeframe: String,

        #[arg(long)]
        days: Option<i64>,
    },

    /// Show collection status and point count
    Info,

    /// Drop the vector collection
    DeleteCollection,
}

/// Connect to the configured vector store and build the index handle.
pub fn create_index(settings: &Settings) -> Result<Arc<PatternIndex>> {
    let backend = QdrantBackend::new(&settings.qdrant_url, settings.request_timeout_ms)
        .with_context(|| format!("Failed to connect to Qdrant at {}", settings.qdrant_url))?;
    Ok(Arc::new(PatternIndex::new(
        Arc::new(backend),
        PatternEmbedder::new(settings.embedder_config()),
        settings.index_config(),
    )))
}

fn parse_timeframe(raw: &str) -> Result<Timeframe> {
    Timeframe::parse(raw).with_context(|| format!("Unknown timeframe '{}'", raw))
}

pub async fn execute_command(command: Commands) -> Result<()> {
    let settings = Settings::from_env()?;
    let index = create_index(&settings)?;

    match command {
        Commands::Init => {
            index.ensure_collection().await?;
            info!("Collection '{}' ready", settings.collection);
        }

        Commands::Backfill {
            symbol,
            timeframe,
            file,
            days,
        } => {
            let timeframe = parse_timeframe(&timeframe)?;
            let days = days.unwrap_or(settings.max_history_days);
            index.ensure_collection().await?;

            let filler = GapFiller::new(
                Arc::new(CsvBarSource::new(file)),
                PatternExtractor::new(settings.extractor_config()),
                Arc::clone(&index),
                FillerConfig::default(),
            );
            let report = filler
                .fill_all_gaps(&symbol, timeframe, days, Some(&print_progress))
                .await
                .context("Backfill failed")?;

            println!(
                "Backfill: {} gaps attempted, {} patterns inserted, {} failures",
                report.gaps_attempted,
                report.patterns_inserted,
                report.failures.len()
            );
            for (gap, reason) in &report.failures {
                println!(
                    "  failed {} gap [{} - {}]: {}",
                    gap.kind, gap.start, gap.end, reason
                );
            }
        }

        Commands::Update {
            symbol,
            timeframe,
            file,
        } => {
            let timeframe = parse_timeframe(&timeframe)?;
            let filler = GapFiller::new(
                Arc::new(CsvBarSource::new(file)),
                PatternExtractor::new(settings.extractor_config()),
                Arc::clone(&index),
                FillerConfig::default(),
            );
            let inserted = filler
                .update_to_now(&symbol, timeframe, Some(&print_progress))
                .await
                .context("Update failed")?;
            println!("Inserted {} patterns", inserted);
        }

        Commands::Gaps {
            symbol,
            timeframe,
            days,
        } => {
            let timeframe = parse_timeframe(&timeframe)?;
            let days = days.unwrap_or(settings.max_history_days);
            let detector = GapDetector::new(Arc::clone(&index));
            let gaps = detector
                .detect_gaps(&symbol, timeframe, days)
                .await
                .context("Gap detection failed")?;

            if gaps.is_empty() {
                println!("No gaps for {}:{} over {} days", symbol, timeframe, days);
            }
            for gap in &gaps {
                println!(
                    "{:<10} [{} - {}] ~{} candles",
                    gap.kind.to_string(),
                    format_time(&gap.start),
                    format_time(&gap.end),
                    gap.estimated_candles
                );
            }
        }

        Commands::Info => {
            let info = index.collection_info().await.context("Info query failed")?;
            println!(
                "Collection '{}': {} points, status {}",
                info.name, info.points_count, info.status
            );
        }

        Commands::DeleteCollection => {
            index
                .delete_collection()
                .await
                .context("Delete failed")?;
            println!("Collection '{}' deleted", settings.collection);
        }
    }

    Ok(())
}

fn print_progress(completed: usize, total: usize) {
    if total > 0 {
        println!("  {}/{}", completed, total);
    }
}
