pub mod bar;
pub mod pattern;
pub mod timeframe;

pub use self::bar::Bar;
pub use self::pattern::{
    close_return_stddev, OutcomeLabel, Pattern, PatternOutcome, TrendDirection, VolumeTrend,
};
pub use self::timeframe::Timeframe;
