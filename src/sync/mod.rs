pub mod csv_source;
pub mod filler;
pub mod gaps;

pub use self::csv_source::CsvBarSource;
pub use self::filler::{BackfillReport, BarSource, FillerConfig, GapFiller};
pub use self::gaps::{DataGap, GapDetector, GapKind};
