// 🧾 Raw Records - rows as observed, before any interpretation
// Fields are loosely typed; only the cleaning engine decides what they mean.

use crate::error::SinkError;
use crate::sink::{Cell, Filter, Row, Sink, WriteMode};
use crate::tables::RAW_SALES;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

// ============================================================================
// RAW VALUE
// ============================================================================

/// One loosely typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
    Missing,
}

/// Markers read as "no value", matched case-insensitively.
const MISSING_MARKERS: &[&str] = &["", "nan", "null", "none", "na", "n/a"];

fn is_missing_marker(trimmed: &str) -> bool {
    MISSING_MARKERS
        .iter()
        .any(|m| trimmed.eq_ignore_ascii_case(m))
}

impl RawValue {
    /// Type a CSV cell the way a dataframe reader would: integers, then
    /// floats, then text. Blank and null-like markers are missing.
    pub fn sniff(cell: &str) -> RawValue {
        let trimmed = cell.trim();
        if is_missing_marker(trimmed) {
            return RawValue::Missing;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return RawValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            if v.is_finite() {
                return RawValue::Float(v);
            }
        }
        RawValue::Text(cell.to_string())
    }

    /// Keep the cell exactly as written. Identifier columns go through here
    /// so `0123` and `123` stay distinct.
    pub fn verbatim(cell: &str) -> RawValue {
        if is_missing_marker(cell.trim()) {
            return RawValue::Missing;
        }
        RawValue::Text(cell.to_string())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, RawValue::Missing)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
            RawValue::Text(s) => write!(f, "{}", s),
            RawValue::Missing => Ok(()),
        }
    }
}

impl From<&RawValue> for Cell {
    fn from(value: &RawValue) -> Self {
        match value {
            RawValue::Int(v) => Cell::Int(*v),
            RawValue::Float(v) => Cell::Real(*v),
            RawValue::Text(s) => Cell::Text(s.clone()),
            RawValue::Missing => Cell::Null,
        }
    }
}

impl From<&Cell> for RawValue {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Int(v) => RawValue::Int(*v),
            Cell::Real(v) => RawValue::Float(*v),
            Cell::Text(s) => RawValue::Text(s.clone()),
            Cell::Null => RawValue::Missing,
        }
    }
}

// ============================================================================
// RAW RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based data row in the source file (header excluded)
    pub row_number: u64,
    pub invoice_no: RawValue,
    pub stock_code: RawValue,
    pub description: RawValue,
    pub quantity: RawValue,
    pub invoice_date: RawValue,
    pub unit_price: RawValue,
    pub customer_id: RawValue,
    pub country: RawValue,
}

impl RawRecord {
    /// A record with every field missing
    pub fn empty(row_number: u64) -> Self {
        RawRecord {
            row_number,
            invoice_no: RawValue::Missing,
            stock_code: RawValue::Missing,
            description: RawValue::Missing,
            quantity: RawValue::Missing,
            invoice_date: RawValue::Missing,
            unit_price: RawValue::Missing,
            customer_id: RawValue::Missing,
            country: RawValue::Missing,
        }
    }

    fn to_row(&self, run_id: &str, loaded_at: &str) -> Row {
        let mut row = Row::new();
        row.insert("run_id".to_string(), Cell::from(run_id));
        row.insert("row_number".to_string(), Cell::from(self.row_number));
        row.insert("invoice_no".to_string(), Cell::from(&self.invoice_no));
        row.insert("stock_code".to_string(), Cell::from(&self.stock_code));
        row.insert("description".to_string(), Cell::from(&self.description));
        row.insert("quantity".to_string(), Cell::from(&self.quantity));
        row.insert("invoice_date".to_string(), Cell::from(&self.invoice_date));
        row.insert("unit_price".to_string(), Cell::from(&self.unit_price));
        row.insert("customer_id".to_string(), Cell::from(&self.customer_id));
        row.insert("country".to_string(), Cell::from(&self.country));
        row.insert("loaded_at".to_string(), Cell::from(loaded_at));
        row
    }

    fn from_row(row: &Row) -> Option<Self> {
        let field = |name: &str| row.get(name).map(RawValue::from).unwrap_or(RawValue::Missing);
        let row_number = row.get("row_number")?.as_i64()?;
        Some(RawRecord {
            row_number: row_number as u64,
            invoice_no: field("invoice_no"),
            stock_code: field("stock_code"),
            description: field("description"),
            quantity: field("quantity"),
            invoice_date: field("invoice_date"),
            unit_price: field("unit_price"),
            customer_id: field("customer_id"),
            country: field("country"),
        })
    }
}

// ============================================================================
// RAW STORE
// ============================================================================

/// Append one chunk of a run to the raw namespace, unmodified.
pub fn stage_raw_chunk<S: Sink>(
    sink: &mut S,
    schema: &str,
    run_id: &str,
    records: &[RawRecord],
) -> Result<usize, SinkError> {
    let loaded_at = Utc::now().to_rfc3339();
    let rows: Vec<Row> = records
        .iter()
        .map(|r| r.to_row(run_id, &loaded_at))
        .collect();
    let written = sink.write(schema, &RAW_SALES, &rows, WriteMode::Append)?;
    debug!(schema, run_id, rows = written, "staged raw chunk");
    Ok(written)
}

/// Read back every raw row of a run, in source row order.
pub fn load_raw_run<S: Sink>(
    sink: &S,
    schema: &str,
    run_id: &str,
) -> Result<Vec<RawRecord>, SinkError> {
    let filter = Filter::eq("run_id", run_id);
    let mut records: Vec<RawRecord> = sink
        .read(schema, &RAW_SALES, Some(&filter))?
        .iter()
        .filter_map(RawRecord::from_row)
        .collect();
    records.sort_by_key(|r| r.row_number);
    Ok(records)
}

/// Number of raw rows staged for a run.
pub fn count_raw_run<S: Sink>(sink: &S, schema: &str, run_id: &str) -> Result<usize, SinkError> {
    sink.count(schema, &RAW_SALES, Some(&Filter::eq("run_id", run_id)))
}
