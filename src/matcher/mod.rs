pub mod partial;

pub use self::partial::{
    PartialMatcherConfig, PartialPatternAnalysis, PartialPatternMatcher, ProjectionStrategy,
};
