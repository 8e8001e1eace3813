// 🧹 Data Cleaning Engine - raw rows in, typed rows plus a quality report out
// Keys missing → dropped. Bad measures → flagged and kept. Exact repeats → dropped.
//
// The engine is pure: no I/O, no clock. Everything it decides is visible on the
// returned records and in the QualityReport.

use crate::config::OutlierConfig;
use crate::raw::{RawRecord, RawValue};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// ROW-LEVEL OUTCOMES
// ============================================================================

/// Why a raw row never became a CleanRecord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingInvoiceNo,
    MissingStockCode,
    Duplicate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingInvoiceNo => "missing_invoice_no",
            DropReason::MissingStockCode => "missing_stock_code",
            DropReason::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Quantity,
    UnitPrice,
    InvoiceDate,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Quantity => "quantity",
            Field::UnitPrice => "unit_price",
            Field::InvoiceDate => "invoice_date",
        })
    }
}

/// A cleaning rule a retained row violated.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowValidationError {
    #[error("customer id is missing")]
    MissingCustomerId,

    #[error("{field} is missing")]
    MissingValue { field: Field },

    #[error("{field} value '{raw}' cannot be parsed")]
    Unparseable { field: Field, raw: String },

    #[error("quantity {0} is not positive")]
    NonPositiveQuantity(i64),

    #[error("unit price {0} is not positive")]
    NonPositiveUnitPrice(Decimal),

    #[error("quantity {0} is outside the accepted range")]
    QuantityOutlier(i64),

    #[error("unit price {0} is outside the accepted range")]
    UnitPriceOutlier(Decimal),

    #[error("line total of {quantity} x {unit_price} does not fit a decimal")]
    AmountOverflow { quantity: i64, unit_price: Decimal },
}

impl RowValidationError {
    pub fn rule_name(&self) -> String {
        match self {
            RowValidationError::MissingCustomerId => "missing_customer_id".to_string(),
            RowValidationError::MissingValue { field } => format!("missing_{}", field),
            RowValidationError::Unparseable { field, .. } => format!("unparseable_{}", field),
            RowValidationError::NonPositiveQuantity(_) => "non_positive_quantity".to_string(),
            RowValidationError::NonPositiveUnitPrice(_) => "non_positive_unit_price".to_string(),
            RowValidationError::QuantityOutlier(_) => "quantity_outlier".to_string(),
            RowValidationError::UnitPriceOutlier(_) => "unit_price_outlier".to_string(),
            RowValidationError::AmountOverflow { .. } => "amount_overflow".to_string(),
        }
    }

    /// A missing customer only affects customer-level joins.
    pub fn invalidates(&self) -> bool {
        !matches!(self, RowValidationError::MissingCustomerId)
    }
}

// ============================================================================
// CLEAN RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    /// Row number of the RawRecord this came from
    pub source_row: u64,
    pub invoice_no: String,
    pub stock_code: String,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub invoice_date: Option<NaiveDateTime>,
    pub unit_price: Option<Decimal>,
    pub customer_id: Option<String>,
    pub country: Option<String>,
    pub is_valid: bool,
    pub violations: Vec<RowValidationError>,
    /// SHA-256 over every parsed field; identical lines share it
    pub fingerprint: String,
}

impl CleanRecord {
    pub fn invoice_day(&self) -> Option<NaiveDate> {
        self.invoice_date.map(|d| d.date())
    }

    pub fn violation_names(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.rule_name()).collect()
    }

    fn flag(&mut self, violation: RowValidationError) {
        if violation.invalidates() {
            self.is_valid = false;
        }
        self.violations.push(violation);
    }

    fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let parts = [
            self.invoice_no.clone(),
            self.stock_code.clone(),
            self.description.clone().unwrap_or_default(),
            self.quantity.map(|q| q.to_string()).unwrap_or_default(),
            self.invoice_date
                .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string())
                .unwrap_or_default(),
            self.unit_price
                .map(|p| p.normalize().to_string())
                .unwrap_or_default(),
            self.customer_id.clone().unwrap_or_default(),
            self.country.clone().unwrap_or_default(),
        ];
        for part in &parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f_u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub rows_in: usize,
    pub rows_dropped: usize,
    pub dropped_by_reason: BTreeMap<String, usize>,
    pub rows_invalid: usize,
    /// Per invalidating rule; a row breaking two rules counts under both
    pub invalid_by_rule: BTreeMap<String, usize>,
    pub rows_valid: usize,
    pub customer_missing: usize,
}

impl QualityReport {
    /// Every raw row is accounted for exactly once.
    pub fn reconciles(&self) -> bool {
        self.rows_in == self.rows_valid + self.rows_invalid + self.rows_dropped
    }

    pub fn summary(&self) -> String {
        format!(
            "{} in, {} valid, {} invalid, {} dropped ({} without customer)",
            self.rows_in, self.rows_valid, self.rows_invalid, self.rows_dropped, self.customer_missing
        )
    }

    fn record_drop(&mut self, reason: DropReason) {
        self.rows_dropped += 1;
        *self
            .dropped_by_reason
            .entry(reason.as_str().to_string())
            .or_insert(0) += 1;
    }
}

// ============================================================================
// CLEANING ENGINE
// ============================================================================

pub struct CleaningEngine {
    outliers: OutlierConfig,
}

impl CleaningEngine {
    pub fn new(outliers: OutlierConfig) -> Self {
        CleaningEngine { outliers }
    }

    pub fn clean(&self, raw: &[RawRecord]) -> (Vec<CleanRecord>, QualityReport) {
        let mut report = QualityReport {
            rows_in: raw.len(),
            ..QualityReport::default()
        };
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(raw.len());

        for row in raw {
            let record = match parse_record(row) {
                Ok(record) => record,
                Err(reason) => {
                    debug!(stage = "cleaning", row = row.row_number, rule = reason.as_str(), "dropped row");
                    report.record_drop(reason);
                    continue;
                }
            };

            if !seen.insert(record.fingerprint.clone()) {
                debug!(
                    stage = "cleaning",
                    row = row.row_number,
                    rule = DropReason::Duplicate.as_str(),
                    invoice = %record.invoice_no,
                    "dropped duplicate row"
                );
                report.record_drop(DropReason::Duplicate);
                continue;
            }

            records.push(record);
        }

        self.flag_outliers(&mut records);

        for record in &records {
            if record.customer_id.is_none() {
                report.customer_missing += 1;
            }
            if record.is_valid {
                report.rows_valid += 1;
                continue;
            }
            report.rows_invalid += 1;
            for violation in record.violations.iter().filter(|v| v.invalidates()) {
                debug!(
                    stage = "cleaning",
                    row = record.source_row,
                    rule = %violation.rule_name(),
                    detail = %violation,
                    "flagged row invalid"
                );
                *report.invalid_by_rule.entry(violation.rule_name()).or_insert(0) += 1;
            }
        }

        info!(stage = "cleaning", "{}", report.summary());
        (records, report)
    }

    fn flag_outliers(&self, records: &mut [CleanRecord]) {
        let quantities: Vec<f64> = records
            .iter()
            .filter_map(|r| r.quantity)
            .map(|q| q as f64)
            .collect();
        let prices: Vec<f64> = records
            .iter()
            .filter_map(|r| r.unit_price.and_then(|p| p.to_f64()))
            .collect();

        let quantity_bounds = mean_and_std(&quantities);
        let price_bounds = mean_and_std(&prices);
        let k = self.outliers.std_devs;

        for record in records.iter_mut() {
            if let Some(q) = record.quantity {
                let beyond_sigma = quantity_bounds
                    .map(|(mean, std)| ((q as f64) - mean).abs() > k * std)
                    .unwrap_or(false);
                let beyond_cap = self
                    .outliers
                    .max_quantity
                    .map(|cap| q.unsigned_abs() > cap.unsigned_abs())
                    .unwrap_or(false);
                if beyond_sigma || beyond_cap {
                    record.flag(RowValidationError::QuantityOutlier(q));
                }
            }

            if let Some(p) = record.unit_price {
                let beyond_sigma = match (price_bounds, p.to_f64()) {
                    (Some((mean, std)), Some(v)) => (v - mean).abs() > k * std,
                    _ => false,
                };
                let beyond_cap = self
                    .outliers
                    .max_unit_price
                    .map(|cap| p.abs() > cap)
                    .unwrap_or(false);
                if beyond_sigma || beyond_cap {
                    record.flag(RowValidationError::UnitPriceOutlier(p));
                }
            }
        }
    }
}

/// Mean and sample standard deviation. None when the sigma test cannot apply.
fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return None;
    }
    Some((mean, std))
}

// ============================================================================
// FIELD PARSING
// ============================================================================

const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

fn parse_record(raw: &RawRecord) -> Result<CleanRecord, DropReason> {
    let invoice_no = text_field(&raw.invoice_no).ok_or(DropReason::MissingInvoiceNo)?;
    let stock_code = text_field(&raw.stock_code).ok_or(DropReason::MissingStockCode)?;

    let mut violations = Vec::new();

    let quantity = match parse_quantity(&raw.quantity) {
        Ok(q) => Some(q),
        Err(v) => {
            violations.push(v);
            None
        }
    };
    let unit_price = match parse_unit_price(&raw.unit_price) {
        Ok(p) => Some(p),
        Err(v) => {
            violations.push(v);
            None
        }
    };
    let invoice_date = match parse_invoice_date(&raw.invoice_date) {
        Ok(d) => Some(d),
        Err(v) => {
            violations.push(v);
            None
        }
    };

    let customer_id = text_field(&raw.customer_id);

    let mut record = CleanRecord {
        source_row: raw.row_number,
        invoice_no,
        stock_code,
        description: text_field(&raw.description),
        quantity,
        invoice_date,
        unit_price,
        customer_id,
        country: text_field(&raw.country),
        is_valid: true,
        violations: Vec::new(),
        fingerprint: String::new(),
    };

    for violation in violations {
        record.flag(violation);
    }
    if record.customer_id.is_none() {
        record.flag(RowValidationError::MissingCustomerId);
    }
    if let Some(q) = record.quantity.filter(|q| *q <= 0) {
        record.flag(RowValidationError::NonPositiveQuantity(q));
    }
    if let Some(p) = record.unit_price.filter(|p| *p <= Decimal::ZERO) {
        record.flag(RowValidationError::NonPositiveUnitPrice(p));
    }
    if let (Some(quantity), Some(unit_price)) = (record.quantity, record.unit_price) {
        if Decimal::from(quantity).checked_mul(unit_price).is_none() {
            record.flag(RowValidationError::AmountOverflow { quantity, unit_price });
        }
    }

    record.fingerprint = record.compute_fingerprint();
    Ok(record)
}

/// Trimmed text; integral floats lose their ".0" so ids read as ids.
fn text_field(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Missing => None,
        RawValue::Int(v) => Some(v.to_string()),
        RawValue::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => Some((*v as i64).to_string()),
        RawValue::Float(v) => Some(v.to_string()),
        RawValue::Text(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}

fn parse_quantity(value: &RawValue) -> Result<i64, RowValidationError> {
    let unparseable = || RowValidationError::Unparseable {
        field: Field::Quantity,
        raw: value.to_string(),
    };
    match value {
        RawValue::Missing => Err(RowValidationError::MissingValue {
            field: Field::Quantity,
        }),
        RawValue::Int(v) => Ok(*v),
        RawValue::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => Ok(*v as i64),
        RawValue::Float(_) => Err(unparseable()),
        RawValue::Text(s) => {
            let trimmed = s.trim().replace(',', "");
            if let Ok(v) = trimmed.parse::<i64>() {
                return Ok(v);
            }
            match trimmed.parse::<f64>() {
                Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => Ok(v as i64),
                _ => Err(unparseable()),
            }
        }
    }
}

fn parse_unit_price(value: &RawValue) -> Result<Decimal, RowValidationError> {
    let unparseable = || RowValidationError::Unparseable {
        field: Field::UnitPrice,
        raw: value.to_string(),
    };
    match value {
        RawValue::Missing => Err(RowValidationError::MissingValue {
            field: Field::UnitPrice,
        }),
        RawValue::Int(v) => Ok(Decimal::from(*v)),
        // Shortest round-trip text of the float, so 2.55 stays 2.55
        RawValue::Float(v) => Decimal::from_str(&v.to_string()).map_err(|_| unparseable()),
        RawValue::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '£' | '$' | '€' | ',' | ' '))
                .collect();
            Decimal::from_str(&cleaned)
                .or_else(|_| Decimal::from_scientific(&cleaned))
                .map_err(|_| unparseable())
        }
    }
}

fn parse_invoice_date(value: &RawValue) -> Result<NaiveDateTime, RowValidationError> {
    let text = match value {
        RawValue::Missing => {
            return Err(RowValidationError::MissingValue {
                field: Field::InvoiceDate,
            })
        }
        RawValue::Text(s) => s.trim(),
        other => {
            return Err(RowValidationError::Unparseable {
                field: Field::InvoiceDate,
                raw: other.to_string(),
            })
        }
    };

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }

    Err(RowValidationError::Unparseable {
        field: Field::InvoiceDate,
        raw: text.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    fn raw(row: u64, invoice: &str, stock: &str, qty: i64, price: f64, customer: Option<f64>) -> RawRecord {
        RawRecord {
            row_number: row,
            invoice_no: RawValue::verbatim(invoice),
            stock_code: RawValue::verbatim(stock),
            description: text("WHITE HANGING HEART T-LIGHT HOLDER"),
            quantity: RawValue::Int(qty),
            invoice_date: text("12/1/2010 8:26"),
            unit_price: RawValue::Float(price),
            customer_id: customer.map(RawValue::Float).unwrap_or(RawValue::Missing),
            country: text("United Kingdom"),
        }
    }

    fn engine() -> CleaningEngine {
        CleaningEngine::new(OutlierConfig::default())
    }

    #[test]
    fn test_parses_typical_row() {
        let (records, report) = engine().clean(&[raw(1, "536365", "85123A", 6, 2.55, Some(17850.0))]);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.invoice_no, "536365");
        assert_eq!(record.stock_code, "85123A");
        assert_eq!(record.quantity, Some(6));
        assert_eq!(record.unit_price, Some(Decimal::new(255, 2)));
        assert_eq!(record.customer_id.as_deref(), Some("17850"));
        assert_eq!(
            record.invoice_date.map(|d| d.to_string()),
            Some("2010-12-01 08:26:00".to_string())
        );
        assert!(record.is_valid);
        assert!(report.reconciles());
        assert_eq!(report.rows_valid, 1);
    }

    #[test]
    fn test_missing_keys_are_dropped() {
        let mut no_invoice = raw(1, "", "85123A", 1, 1.0, Some(1.0));
        no_invoice.invoice_no = RawValue::Missing;
        let no_stock = raw(2, "536365", "  ", 1, 1.0, Some(1.0));

        let (records, report) = engine().clean(&[no_invoice, no_stock]);

        assert!(records.is_empty());
        assert_eq!(report.rows_dropped, 2);
        assert_eq!(report.dropped_by_reason["missing_invoice_no"], 1);
        assert_eq!(report.dropped_by_reason["missing_stock_code"], 1);
        assert!(report.reconciles());
    }

    #[test]
    fn test_exact_duplicates_keep_first() {
        let rows = vec![
            raw(1, "536365", "85123A", 3, 2.50, Some(17850.0)),
            raw(2, "536365", "85123A", 3, 2.50, Some(17850.0)),
            raw(3, "536365", "85123A", 4, 2.50, Some(17850.0)),
        ];

        let (records, report) = engine().clean(&rows);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_row, 1);
        assert_eq!(records[1].source_row, 3);
        assert_eq!(report.dropped_by_reason["duplicate"], 1);
        assert_ne!(records[0].fingerprint, records[1].fingerprint);
        assert!(report.reconciles());
    }

    #[test]
    fn test_leading_zero_codes_are_distinct_lines() {
        let rows = vec![
            raw(1, "536365", "0123", 3, 2.50, Some(17850.0)),
            raw(2, "536365", "123", 3, 2.50, Some(17850.0)),
        ];

        let (records, report) = engine().clean(&rows);

        let codes: Vec<&str> = records.iter().map(|r| r.stock_code.as_str()).collect();
        assert_eq!(codes, vec!["0123", "123"]);
        assert_ne!(records[0].fingerprint, records[1].fingerprint);
        assert_eq!(report.rows_dropped, 0);
    }

    #[test]
    fn test_unrepresentable_total_is_flagged() {
        let mut row = raw(1, "536365", "85123A", 1, 1.0, Some(17850.0));
        row.quantity = RawValue::Int(9_000_000_000_000_000_000);
        row.unit_price = text("100000000000");

        let (records, report) = engine().clean(&[row]);

        let record = &records[0];
        assert!(!record.is_valid);
        assert!(record.violation_names().contains(&"amount_overflow".to_string()));
        assert_eq!(report.invalid_by_rule["amount_overflow"], 1);
        assert!(report.reconciles());
    }

    #[test]
    fn test_missing_customer_is_flag_not_invalid() {
        let (records, report) = engine().clean(&[raw(1, "536365", "85123A", 1, 1.0, None)]);

        let record = &records[0];
        assert!(record.is_valid);
        assert_eq!(record.customer_id, None);
        assert_eq!(record.violation_names(), vec!["missing_customer_id"]);
        assert_eq!(report.customer_missing, 1);
        assert_eq!(report.rows_valid, 1);
    }

    #[test]
    fn test_returns_are_retained_invalid() {
        let rows = vec![
            raw(1, "C536379", "D", -1, 27.50, Some(14527.0)),
            raw(2, "536380", "22961", 4, 0.0, Some(14527.0)),
        ];

        let (records, report) = engine().clean(&rows);

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.is_valid));
        assert_eq!(report.rows_invalid, 2);
        assert_eq!(report.invalid_by_rule["non_positive_quantity"], 1);
        assert_eq!(report.invalid_by_rule["non_positive_unit_price"], 1);
    }

    #[test]
    fn test_unparseable_fields_are_flagged() {
        let mut row = raw(1, "536365", "85123A", 1, 1.0, Some(1.0));
        row.quantity = text("six");
        row.unit_price = text("£1,234.50");
        row.invoice_date = text("yesterday");

        let (records, report) = engine().clean(&[row]);

        let record = &records[0];
        assert_eq!(record.quantity, None);
        assert_eq!(record.unit_price, Some(Decimal::new(123450, 2)));
        assert_eq!(record.invoice_date, None);
        assert!(!record.is_valid);
        assert_eq!(report.invalid_by_rule["unparseable_quantity"], 1);
        assert_eq!(report.invalid_by_rule["unparseable_invoice_date"], 1);
    }

    #[test]
    fn test_date_formats() {
        let iso = parse_invoice_date(&text("2011-03-04 10:15:00")).unwrap();
        let day_only = parse_invoice_date(&text("03/04/2011")).unwrap();
        assert_eq!(iso.date(), NaiveDate::from_ymd_opt(2011, 3, 4).unwrap());
        assert_eq!(day_only, NaiveDate::from_ymd_opt(2011, 3, 4).unwrap().and_hms_opt(0, 0, 0).unwrap());
        assert!(parse_invoice_date(&RawValue::Int(20110304)).is_err());
    }

    #[test]
    fn test_sigma_outlier_is_flagged() {
        let mut rows: Vec<RawRecord> = (1..=20)
            .map(|i| raw(i, &format!("5400{:02}", i), "22423", 1, 2.0, Some(12000.0)))
            .collect();
        rows.push(raw(21, "540021", "22423", 1000, 2.0, Some(12000.0)));

        let (records, report) = engine().clean(&rows);

        let outlier = records.iter().find(|r| r.source_row == 21).unwrap();
        assert!(!outlier.is_valid);
        assert_eq!(outlier.violation_names(), vec!["quantity_outlier"]);
        assert_eq!(report.rows_invalid, 1);
        assert_eq!(report.rows_valid, 20);
    }

    #[test]
    fn test_absolute_cap_applies_without_statistics() {
        let config = OutlierConfig {
            std_devs: 3.0,
            max_quantity: Some(100),
            max_unit_price: Some(Decimal::from(50)),
        };
        let (records, _) = CleaningEngine::new(config).clean(&[raw(1, "1", "A", 500, 80.0, Some(1.0))]);

        assert_eq!(
            records[0].violation_names(),
            vec!["quantity_outlier", "unit_price_outlier"]
        );
    }

    #[test]
    fn test_small_batches_skip_sigma_test() {
        assert_eq!(mean_and_std(&[5.0]), None);
        assert_eq!(mean_and_std(&[2.0, 2.0, 2.0]), None);
        let (mean, std) = mean_and_std(&[1.0, 3.0]).unwrap();
        assert_eq!(mean, 2.0);
        assert!((std - 2f64.sqrt()).abs() < 1e-12);
    }
}
