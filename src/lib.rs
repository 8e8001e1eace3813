// Star ETL - Core Library
// Ecommerce sales → raw store → cleaning → enrichment → star schema → validation

pub mod error;
pub mod config;
pub mod sink;
pub mod tables;
pub mod raw;            // Raw rows as observed
pub mod ingestion;      // Dataset source + chunked CSV reader
pub mod cleaning;       // Validation, dedup, outliers
pub mod rules;          // Product category rules
pub mod enrichment;     // Totals, segments, regions, rolling sales
pub mod processed;
pub mod dimensions;     // Surrogate keys + fact assembly
pub mod validation;     // Post-load checks + summaries
pub mod pipeline;

// Re-export commonly used types
pub use error::{
    ConfigError, DimensionResolutionError, IngestionError, PipelineError, SinkError,
};
pub use config::{DatasetConfig, OutlierConfig, PipelineConfig, SchemaConfig, SegmentConfig, SegmentTier};
pub use sink::{Cell, Filter, Row, Sink, SqliteSink, TableDef, WriteMode};
pub use raw::{RawRecord, RawValue};
pub use ingestion::{DatasetSource, LocalDatasetSource, RawCsvReader};
pub use cleaning::{CleanRecord, CleaningEngine, DropReason, QualityReport, RowValidationError};
pub use rules::{CategoryRule, CategoryRules};
pub use enrichment::{line_total, DateParts, EnrichedRecord, EnrichmentEngine, RegionTable};
pub use dimensions::{
    Dimension, DimensionAttributes, FactLoadReport, FactSalesRow, StarSchema, SENTINEL_KEY,
    UNKNOWN_NATURAL_KEY,
};
pub use validation::{validate, CheckResult, RunContext, ValidationCheckFailure, ValidationReport};
pub use pipeline::{write_outputs, Pipeline, RawInput, RunOutcome, RunSummary};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
