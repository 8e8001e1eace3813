// ⚙️ Pipeline Configuration
// Built once at start: defaults, then TOML file, then environment. Passed
// explicitly to every stage.

use crate::error::ConfigError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub raw: String,
    pub processed: String,
    pub warehouse: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig {
            raw: "raw_data".to_string(),
            processed: "processed_data".to_string(),
            warehouse: "data_warehouse".to_string(),
        }
    }
}

impl SchemaConfig {
    pub fn all(&self) -> [&str; 3] {
        [self.raw.as_str(), self.processed.as_str(), self.warehouse.as_str()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub identifier: String,
    pub file_name: Option<String>,
    pub data_dir: PathBuf,
    pub credentials_file: Option<PathBuf>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            identifier: "carrie1/ecommerce-data".to_string(),
            file_name: Some("ecommerce_data.csv".to_string()),
            data_dir: PathBuf::from("data"),
            credentials_file: None,
        }
    }
}

/// Cleaning strictness for quantity and unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Values further than this many standard deviations from the batch mean
    pub std_devs: f64,
    /// Absolute cap on |quantity|
    pub max_quantity: Option<i64>,
    /// Absolute cap on unit price
    pub max_unit_price: Option<Decimal>,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        OutlierConfig {
            std_devs: 3.0,
            max_quantity: Some(10_000),
            max_unit_price: Some(Decimal::from(10_000)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTier {
    pub label: String,
    pub min_spend: Decimal,
    pub min_orders: u32,
}

/// Ordered tiers; the first one whose minimums are both met wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub tiers: Vec<SegmentTier>,
    pub fallback: String,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            tiers: vec![
                SegmentTier {
                    label: "high-value".to_string(),
                    min_spend: Decimal::from(5_000),
                    min_orders: 10,
                },
                SegmentTier {
                    label: "regular".to_string(),
                    min_spend: Decimal::from(1_000),
                    min_orders: 3,
                },
            ],
            fallback: "occasional".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schemas: SchemaConfig,
    pub dataset: DatasetConfig,
    /// Rows per chunk for reading, staging and warehouse writes
    pub chunk_size: usize,
    pub database_dir: PathBuf,
    pub output_dir: PathBuf,
    pub outliers: OutlierConfig,
    pub segments: SegmentConfig,
    /// Extra country → region entries, merged over the built-in table
    pub regions: BTreeMap<String, String>,
    /// JSON file of product category rules; built-in rules when absent
    pub category_rules_file: Option<PathBuf>,
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            schemas: SchemaConfig::default(),
            dataset: DatasetConfig::default(),
            chunk_size: 5_000,
            database_dir: PathBuf::from("warehouse"),
            output_dir: PathBuf::from("output"),
            outliers: OutlierConfig::default(),
            segments: SegmentConfig::default(),
            regions: BTreeMap::new(),
            category_rules_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, optional file, process environment; validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay recognized environment variables using `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RAW_SCHEMA") {
            self.schemas.raw = v;
        }
        if let Some(v) = lookup("PROCESSED_SCHEMA") {
            self.schemas.processed = v;
        }
        if let Some(v) = lookup("WAREHOUSE_SCHEMA") {
            self.schemas.warehouse = v;
        }
        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunk_size = parse_env("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("OUTLIER_STD_DEVS") {
            self.outliers.std_devs = parse_env("OUTLIER_STD_DEVS", &v)?;
        }
        if let Some(v) = lookup("DATASET") {
            self.dataset.identifier = v;
        }
        if let Some(v) = lookup("DATASET_FILE") {
            self.dataset.file_name = Some(v).filter(|f| !f.is_empty());
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.dataset.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_DIR") {
            self.database_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for schema in self.schemas.all() {
            if !is_identifier(schema) {
                return Err(ConfigError::Invalid(format!(
                    "schema name '{}' must be a plain identifier",
                    schema
                )));
            }
        }
        let [raw, processed, warehouse] = self.schemas.all();
        if raw == processed || raw == warehouse || processed == warehouse {
            return Err(ConfigError::Invalid(
                "raw, processed and warehouse schemas must differ".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".to_string()));
        }
        if self.outliers.std_devs.is_nan() || self.outliers.std_devs <= 0.0 {
            return Err(ConfigError::Invalid(
                "outliers.std_devs must be positive".to_string(),
            ));
        }
        if self.dataset.identifier.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dataset identifier must not be empty".to_string(),
            ));
        }
        if self.segments.fallback.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "segments.fallback must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
