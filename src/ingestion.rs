// 📥 Ingestion - resolve a dataset to a file and read it as raw records
// The reader yields bounded chunks so staging never holds a second copy.

use crate::error::IngestionError;
use crate::raw::{RawRecord, RawValue};
use csv::{ByteRecord, ReaderBuilder};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// DATASET SOURCE
// ============================================================================

/// Acquisition boundary: turn a dataset identifier into a readable file.
pub trait DatasetSource {
    fn fetch(&self, dataset: &str, file_name: Option<&str>) -> Result<PathBuf, IngestionError>;
}

/// Datasets already downloaded under `<root>/<dataset>/`.
pub struct LocalDatasetSource {
    root: PathBuf,
    credentials: Option<PathBuf>,
}

impl LocalDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDatasetSource {
            root: root.into(),
            credentials: None,
        }
    }

    /// Require a credentials file to be present before any fetch.
    pub fn with_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials = Some(path.into());
        self
    }
}

impl DatasetSource for LocalDatasetSource {
    fn fetch(&self, dataset: &str, file_name: Option<&str>) -> Result<PathBuf, IngestionError> {
        if let Some(credentials) = &self.credentials {
            if !credentials.is_file() {
                return Err(IngestionError::Authentication(format!(
                    "credentials file {} not found",
                    credentials.display()
                )));
            }
        }

        let dir = self.root.join(dataset);
        if !dir.is_dir() {
            return Err(IngestionError::DatasetNotFound {
                dataset: dataset.to_string(),
                root: self.root.clone(),
            });
        }

        if let Some(file) = file_name {
            let path = dir.join(file);
            if !path.is_file() {
                return Err(IngestionError::FileNotFound {
                    dataset: dataset.to_string(),
                    file: file.to_string(),
                });
            }
            info!(dataset, path = %path.display(), "resolved dataset file");
            return Ok(path);
        }

        // No file requested: first CSV by name
        let entries = fs::read_dir(&dir).map_err(|source| IngestionError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut csvs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("csv"))
                        .unwrap_or(false)
            })
            .collect();
        csvs.sort();

        let path = csvs.into_iter().next().ok_or_else(|| IngestionError::NoCsvFile {
            dataset: dataset.to_string(),
        })?;
        info!(dataset, path = %path.display(), "resolved dataset file");
        Ok(path)
    }
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    InvoiceNo,
    StockCode,
    Description,
    Quantity,
    InvoiceDate,
    UnitPrice,
    CustomerId,
    Country,
}

impl Field {
    fn is_measure(self) -> bool {
        matches!(self, Field::Quantity | Field::UnitPrice)
    }
}

const FIELDS: [(Field, &str, &[&str]); 8] = [
    (Field::InvoiceNo, "invoice_no", &["invoiceno", "invoice", "invoicenumber"]),
    (Field::StockCode, "stock_code", &["stockcode", "sku", "productcode"]),
    (Field::Description, "description", &["description", "productdescription"]),
    (Field::Quantity, "quantity", &["quantity", "qty"]),
    (Field::InvoiceDate, "invoice_date", &["invoicedate", "date", "invoicedatetime"]),
    (Field::UnitPrice, "unit_price", &["unitprice", "price"]),
    (Field::CustomerId, "customer_id", &["customerid", "customer"]),
    (Field::Country, "country", &["country", "countryname"]),
];

/// `InvoiceNo`, `invoice_no` and `Invoice No` all normalize to `invoiceno`.
fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug)]
struct ColumnIndex {
    positions: Vec<(Field, usize)>,
}

impl ColumnIndex {
    fn from_headers(path: &Path, headers: &ByteRecord) -> Result<Self, IngestionError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| normalize_header(&decode(h)))
            .collect();

        let mut positions = Vec::with_capacity(FIELDS.len());
        for (field, name, aliases) in FIELDS {
            let position = normalized
                .iter()
                .position(|h| aliases.contains(&h.as_str()))
                .ok_or_else(|| IngestionError::MissingColumn {
                    path: path.to_path_buf(),
                    column: name,
                })?;
            positions.push((field, position));
        }
        Ok(ColumnIndex { positions })
    }

    fn record(&self, row_number: u64, record: &ByteRecord) -> RawRecord {
        let mut raw = RawRecord::empty(row_number);
        for (field, position) in &self.positions {
            // Only the measures are typed; everything else keeps its text
            let value = match record.get(*position) {
                Some(bytes) if field.is_measure() => RawValue::sniff(&decode(bytes)),
                Some(bytes) => RawValue::verbatim(&decode(bytes)),
                None => RawValue::Missing,
            };
            match field {
                Field::InvoiceNo => raw.invoice_no = value,
                Field::StockCode => raw.stock_code = value,
                Field::Description => raw.description = value,
                Field::Quantity => raw.quantity = value,
                Field::InvoiceDate => raw.invoice_date = value,
                Field::UnitPrice => raw.unit_price = value,
                Field::CustomerId => raw.customer_id = value,
                Field::Country => raw.country = value,
            }
        }
        raw
    }
}

/// UTF-8 when valid, otherwise Latin-1 (every byte is one code point).
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ============================================================================
// CHUNKED CSV READER
// ============================================================================

pub struct RawCsvReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    columns: ColumnIndex,
    chunk_size: usize,
    next_row: u64,
    done: bool,
}

impl RawCsvReader {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, IngestionError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| IngestionError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

        let headers = reader
            .byte_headers()
            .map_err(|source| IngestionError::Csv {
                path: path.to_path_buf(),
                source,
            })?
            .clone();
        let columns = ColumnIndex::from_headers(path, &headers)?;

        Ok(RawCsvReader {
            path: path.to_path_buf(),
            reader,
            columns,
            chunk_size: chunk_size.max(1),
            next_row: 1,
            done: false,
        })
    }

    /// Next chunk of at most `chunk_size` records; `None` once exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<RawRecord>>, IngestionError> {
        if self.done {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut record = ByteRecord::new();
        while chunk.len() < self.chunk_size {
            let more = self
                .reader
                .read_byte_record(&mut record)
                .map_err(|source| IngestionError::Csv {
                    path: self.path.clone(),
                    source,
                })?;
            if !more {
                self.done = true;
                break;
            }
            chunk.push(self.columns.record(self.next_row, &record));
            self.next_row += 1;
        }

        if chunk.is_empty() {
            return Ok(None);
        }
        debug!(path = %self.path.display(), rows = chunk.len(), "read raw chunk");
        Ok(Some(chunk))
    }
}

impl Iterator for RawCsvReader {
    type Item = Result<Vec<RawRecord>, IngestionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
