use crate::index::IndexConfig;
use crate::matcher::{PartialMatcherConfig, ProjectionStrategy};
use crate::patterns::{EmbedderConfig, ExtractorConfig};
use anyhow::{Context, Result};
use std::env;

/// Runtime settings, read from the environment with sensible defaults.
/// All tuning knobs become construction-time parameters of the components;
/// nothing here is global mutable state.
#[derive(Debug, Clone)]
pub struct Settings {
    pub qdrant_url: String,
    pub collection: String,
    pub window_size: usize,
    pub step_size: usize,
    pub outcome_bars: usize,
    pub min_volatility: f64,
    pub score_threshold: f64,
    pub batch_size: usize,
    pub request_timeout_ms: u64,
    pub max_history_days: i64,
    pub partial_alpha: f64,
    pub projection_strategy: ProjectionStrategy,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            qdrant_url: env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6333".to_string()),
            collection: env::var("PATTERN_COLLECTION").unwrap_or_else(|_| "patterns".to_string()),
            window_size: parse_var("PATTERN_WINDOW_SIZE", 20)?,
            step_size: parse_var("PATTERN_STEP_SIZE", 1)?,
            outcome_bars: parse_var("PATTERN_OUTCOME_BARS", 5)?,
            min_volatility: parse_var("PATTERN_MIN_VOLATILITY", 0.05)?,
            score_threshold: parse_var("PATTERN_SCORE_THRESHOLD", 0.7)?,
            batch_size: parse_var("PATTERN_BATCH_SIZE", 500)?,
            request_timeout_ms: parse_var("PATTERN_REQUEST_TIMEOUT_MS", 10_000)?,
            max_history_days: parse_var("PATTERN_MAX_HISTORY_DAYS", 30)?,
            partial_alpha: parse_var("PATTERN_PARTIAL_ALPHA", 0.7)?,
            projection_strategy: projection_from_env()?,
        })
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            window_size: self.window_size,
            step_size: self.step_size,
            outcome_bars: self.outcome_bars,
            min_volatility: self.min_volatility,
        }
    }

    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            window_size: self.window_size,
        }
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            collection: self.collection.clone(),
            batch_size: self.batch_size,
            score_threshold: self.score_threshold,
            timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn partial_config(&self) -> PartialMatcherConfig {
        PartialMatcherConfig {
            alpha: self.partial_alpha,
            strategy: self.projection_strategy,
            ..PartialMatcherConfig::for_window(self.window_size)
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

fn projection_from_env() -> Result<ProjectionStrategy> {
    let raw = env::var("PATTERN_PROJECTION").unwrap_or_else(|_| "trend".to_string());
    match raw.as_str() {
        "zero" => Ok(ProjectionStrategy::ZeroPad),
        "last" => Ok(ProjectionStrategy::LastValue),
        "trend" => Ok(ProjectionStrategy::TrendProjection),
        other => anyhow::bail!(
            "Invalid PATTERN_PROJECTION '{}' (expected zero | last | trend)",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only inspects variables this test does not set; defaults apply.
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.window_size, 20);
        assert!((settings.partial_alpha - 0.7).abs() < 1e-12);
        assert_eq!(settings.projection_strategy, ProjectionStrategy::TrendProjection);
        assert_eq!(settings.extractor_config().outcome_bars, 5);
        assert_eq!(settings.index_config().collection, "patterns");
    }
}
