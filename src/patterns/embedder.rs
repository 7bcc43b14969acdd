use crate::models::{Pattern, TrendDirection, VolumeTrend};
use tracing::warn;

/// Number of statistical descriptor features appended to the flattened
/// shape matrix.
pub const DESCRIPTOR_FEATURES: usize = 16;

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Window size the vector dimension is derived from. Must match the
    /// extractor's window size.
    pub window_size: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self { window_size: 20 }
    }
}

/// Deterministic embedding of a pattern into a fixed-length unit vector:
/// the normalized W x 4 shape matrix flattened row-major, followed by 16
/// statistical descriptors, L2-normalized so cosine similarity reduces to a
/// dot product. Undefined features (division by zero, NaN) become 0.
#[derive(Debug, Clone)]
pub struct PatternEmbedder {
    config: EmbedderConfig,
}

impl PatternEmbedder {
    pub fn new(config: EmbedderConfig) -> Self {
        Self { config }
    }

    /// Vector dimension: window_size * 4 shape values + descriptors.
    pub fn dimension(&self) -> usize {
        self.config.window_size * 4 + DESCRIPTOR_FEATURES
    }

    pub fn embed(&self, pattern: &Pattern) -> Vec<f64> {
        let shape_len = self.config.window_size * 4;
        let mut vector = Vec::with_capacity(self.dimension());

        if pattern.window_size() != self.config.window_size {
            warn!(
                "Pattern window {} does not match embedder window {}; padding/truncating",
                pattern.window_size(),
                self.config.window_size
            );
        }

        // Shape features, row-major (bar, then O/H/L/C), zero-padded or
        // truncated to the configured dimension.
        for row in &pattern.normalized {
            for v in row {
                if vector.len() == shape_len {
                    break;
                }
                vector.push(sanitize(*v));
            }
        }
        vector.resize(shape_len, 0.0);

        vector.extend_from_slice(&self.descriptors(pattern));

        l2_normalize(&mut vector);
        vector
    }

    /// The 16 descriptor features, fixed order.
    fn descriptors(&self, p: &Pattern) -> [f64; DESCRIPTOR_FEATURES] {
        let n = p.window_size();
        let half = n / 2;

        let mut body_sum = 0.0;
        let mut upper_sum = 0.0;
        let mut lower_sum = 0.0;
        for i in 0..n {
            let range = p.highs[i] - p.lows[i];
            if range > f64::EPSILON {
                let top = p.opens[i].max(p.closes[i]);
                let bottom = p.opens[i].min(p.closes[i]);
                body_sum += (p.closes[i] - p.opens[i]).abs() / range;
                upper_sum += (p.highs[i] - top) / range;
                lower_sum += (bottom - p.lows[i]) / range;
            }
        }
        let mean_body = if n > 0 { body_sum / n as f64 } else { 0.0 };
        let mean_upper = if n > 0 { upper_sum / n as f64 } else { 0.0 };
        let mean_lower = if n > 0 { lower_sum / n as f64 } else { 0.0 };

        // Fraction of bars whose own direction agrees with the pattern trend.
        let agreeing = (0..n)
            .filter(|&i| match p.trend {
                TrendDirection::Up => p.closes[i] > p.opens[i],
                TrendDirection::Down => p.closes[i] < p.opens[i],
                TrendDirection::Sideways => {
                    p.opens[i].abs() > f64::EPSILON
                        && ((p.closes[i] - p.opens[i]) / p.opens[i]).abs() < 0.001
                }
            })
            .count();
        let trend_consistency = if n > 0 { agreeing as f64 / n as f64 } else { 0.0 };

        // Momentum: second-half vs first-half rate of change over closes.
        let momentum = if half >= 2 && n - half >= 2 {
            let first = pct_change(p.closes[0], p.closes[half - 1]);
            let second = pct_change(p.closes[half], p.closes[n - 1]);
            (second - first) / 10.0
        } else {
            0.0
        };

        // Range expansion: second-half vs first-half mean high-low range.
        let range_expansion = if half > 0 && n > half {
            let first: f64 =
                (0..half).map(|i| p.highs[i] - p.lows[i]).sum::<f64>() / half as f64;
            let second: f64 = (half..n).map(|i| p.highs[i] - p.lows[i]).sum::<f64>()
                / (n - half) as f64;
            if first > f64::EPSILON {
                second / first - 1.0
            } else {
                0.0
            }
        } else {
            0.0
        };

        // Volume-trend ratio: second-half vs first-half mean volume.
        let volume_ratio = if half > 0 && n > half {
            let first: f64 = p.volumes[..half].iter().sum::<f64>() / half as f64;
            let second: f64 = p.volumes[half..].iter().sum::<f64>() / (n - half) as f64;
            if first > f64::EPSILON {
                second / first - 1.0
            } else {
                0.0
            }
        } else {
            0.0
        };

        let correlation = pearson(&p.volumes, &p.closes);

        // Aggregate stats over the normalized OHLC matrix.
        let flat: Vec<f64> = p.normalized.iter().flatten().copied().collect();
        let (matrix_mean, matrix_std, matrix_range) = if flat.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let mean = flat.iter().sum::<f64>() / flat.len() as f64;
            let var =
                flat.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / flat.len() as f64;
            let max = flat.iter().copied().fold(f64::MIN, f64::max);
            let min = flat.iter().copied().fold(f64::MAX, f64::min);
            (mean / 10.0, var.sqrt() / 10.0, (max - min) / 10.0)
        };

        let r_squared = linear_fit_r_squared(&p.closes);

        let volume_trend_encoding = match p.volume_trend {
            VolumeTrend::Increasing => 1.0,
            VolumeTrend::Decreasing => -1.0,
            VolumeTrend::Stable => 0.0,
        };

        let mut features = [
            p.price_change_pct / 10.0,
            p.volatility / 10.0,
            mean_body,
            mean_upper,
            mean_lower,
            trend_consistency,
            momentum,
            range_expansion,
            volume_ratio,
            correlation,
            matrix_mean,
            matrix_std,
            matrix_range,
            r_squared,
            volume_trend_encoding,
            p.trend.encoding(),
        ];
        for f in features.iter_mut() {
            *f = sanitize(*f);
        }
        features
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from.abs() < f64::EPSILON {
        0.0
    } else {
        (to - from) / from * 100.0
    }
}

/// Pearson correlation coefficient; 0 when either series has zero variance.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a < f64::EPSILON || var_b < f64::EPSILON {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// R-squared of an ordinary least-squares line through (index, close).
/// 0 when the closes have no variance.
fn linear_fit_r_squared(closes: &[f64]) -> f64 {
    let n = closes.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = closes.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in closes.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if syy < f64::EPSILON || sxx < f64::EPSILON {
        return 0.0;
    }
    let slope = sxy / sxx;
    let ss_res: f64 = closes
        .iter()
        .enumerate()
        .map(|(i, y)| {
            let fitted = mean_y + slope * (i as f64 - mean_x);
            (y - fitted) * (y - fitted)
        })
        .sum();
    (1.0 - ss_res / syy).clamp(0.0, 1.0)
}

/// Divide by the L2 norm in place; no-op for the zero vector.
fn l2_normalize(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, Timeframe};
    use chrono::{TimeZone, Utc};

    fn sample_pattern(n: usize) -> Pattern {
        let bars: Vec<Bar> = (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 0.3 } else { -0.3 };
                Bar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::minutes(i as i64),
                    base,
                    base + 1.0,
                    base - 1.0,
                    base + 0.4,
                    10.0 + i as f64,
                )
            })
            .collect();
        Pattern::from_window("BTCUSDT", Timeframe::M1, &bars, None)
    }

    #[test]
    fn test_dimension() {
        let e = PatternEmbedder::new(EmbedderConfig { window_size: 20 });
        assert_eq!(e.dimension(), 96);
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let e = PatternEmbedder::new(EmbedderConfig { window_size: 20 });
        let p = sample_pattern(20);
        let a = e.embed(&p);
        let b = e.embed(&p);
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let e = PatternEmbedder::new(EmbedderConfig { window_size: 20 });
        let v = e.embed(&sample_pattern(20));
        assert_eq!(v.len(), 96);
        let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9, "norm={}", norm);
    }

    #[test]
    fn test_window_mismatch_pads_and_truncates() {
        let e = PatternEmbedder::new(EmbedderConfig { window_size: 20 });

        // Shorter pattern: shape portion zero-padded.
        let short = e.embed(&sample_pattern(10));
        assert_eq!(short.len(), 96);
        assert!(short[40..80].iter().all(|v| v.abs() < f64::EPSILON));

        // Longer pattern: shape portion truncated, still unit length.
        let long = e.embed(&sample_pattern(30));
        assert_eq!(long.len(), 96);
        let norm: f64 = long.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_r_squared_perfect_line() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert!((linear_fit_r_squared(&closes) - 1.0).abs() < 1e-9);

        let flat = vec![100.0; 20];
        assert!(linear_fit_r_squared(&flat).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_undefined_is_zero() {
        let flat = vec![5.0; 10];
        let rising: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(pearson(&flat, &rising).abs() < 1e-12);
        assert!((pearson(&rising, &rising) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_vector_normalization_noop() {
        let mut v = vec![0.0; 8];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
