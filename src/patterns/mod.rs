pub mod embedder;
pub mod extractor;

pub use self::embedder::{EmbedderConfig, PatternEmbedder, DESCRIPTOR_FEATURES};
pub use self::extractor::{ExtractorConfig, PatternExtractor};
