// datastat-core/src/lib.rs
// Read-only statistics over dataset documents with embedded files

pub mod aggregation;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod expression;
pub mod filter;
pub mod generator;
pub mod report;
pub mod timestamp;
pub mod value_utils;

// Public exports
pub use aggregation::Pipeline;
pub use collection::{Collection, DocumentSource, InputFormat, DEFAULT_COLLECTION};
pub use config::{AppConfig, OutputFormat};
pub use document::{DataFile, Dataset, TechnicalMetadata};
pub use error::{DataStatError, Result};
pub use generator::{DatasetGenerator, GeneratorConfig};
pub use report::{
    AcquisitionSpan, FilesPerDataset, MissingDimensions, Report, ReportGenerator, ReportKind,
    ReportStrategy, Section, TypeVolume,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
