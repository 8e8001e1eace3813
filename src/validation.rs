// ✅ Warehouse Validation - post-load consistency checks + distribution summaries
//
// Checks never abort a run. A failed check becomes a ValidationCheckFailure in
// the report, for an operator to look at.

use crate::config::SchemaConfig;
use crate::dimensions::{
    CountryAttributes, CustomerAttributes, DateAttributes, DimensionAttributes, ProductAttributes,
    SENTINEL_KEY, UNKNOWN_NATURAL_KEY,
};
use crate::enrichment::line_total;
use crate::error::SinkError;
use crate::raw::{count_raw_run, load_raw_run, RawRecord};
use crate::sink::{Cell, Row, Sink};
use crate::tables::{FACT_SALES, PROCESSED_SALES, RAW_SALES};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

const TOP_N: usize = 10;

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("check '{check}' failed: {message}")]
pub struct ValidationCheckFailure {
    pub check: String,
    pub message: String,
    /// Rows (or keys) that broke the check
    pub offending: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub failure: Option<ValidationCheckFailure>,
}

impl CheckResult {
    fn pass(name: &str, detail: String) -> Self {
        CheckResult {
            name: name.to_string(),
            passed: true,
            detail,
            failure: None,
        }
    }

    fn fail(name: &str, detail: String, offending: usize) -> Self {
        CheckResult {
            name: name.to_string(),
            passed: false,
            failure: Some(ValidationCheckFailure {
                check: name.to_string(),
                message: detail.clone(),
                offending,
            }),
            detail,
        }
    }

    fn from_count(name: &str, offending: usize, ok: String, bad: String) -> Self {
        if offending == 0 {
            CheckResult::pass(name, ok)
        } else {
            CheckResult::fail(name, bad, offending)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesByKey {
    pub key: String,
    pub label: String,
    pub sales: Decimal,
    pub lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBreakdown {
    pub segment: String,
    pub customers: usize,
    pub lines: usize,
    pub sales: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySales {
    /// YYYY-MM
    pub month: String,
    pub lines: usize,
    pub sales: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub run_id: Option<String>,
    pub checks: Vec<CheckResult>,
    pub row_counts: BTreeMap<String, usize>,
    pub top_countries: Vec<SalesByKey>,
    pub segments: Vec<SegmentBreakdown>,
    pub monthly_trend: Vec<MonthlySales>,
    pub top_products: Vec<SalesByKey>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&ValidationCheckFailure> {
        self.checks.iter().filter_map(|c| c.failure.as_ref()).collect()
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} checks passed, {} fact rows",
            self.checks.iter().filter(|c| c.passed).count(),
            self.checks.len(),
            self.row_counts.get("fact_sales").copied().unwrap_or(0)
        )
    }
}

/// What the pipeline knows about the run it just finished.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub run_id: String,
    /// Rows the cleaning engine dropped (keys missing, duplicates)
    pub dropped: usize,
}

// ============================================================================
// WAREHOUSE VIEWS
// ============================================================================

struct DimensionView {
    table: &'static str,
    keys: HashSet<i64>,
    natural: HashMap<i64, String>,
    rows: HashMap<i64, Row>,
    duplicate_naturals: usize,
    has_sentinel: bool,
}

fn read_dimension<A: DimensionAttributes, S: Sink>(sink: &S, schema: &str) -> Result<DimensionView, SinkError> {
    Ok(dimension_view::<A>(sink.read(schema, &A::TABLE, None)?))
}

fn dimension_view<A: DimensionAttributes>(rows: Vec<Row>) -> DimensionView {
    let mut view = DimensionView {
        table: A::TABLE.name,
        keys: HashSet::new(),
        natural: HashMap::new(),
        rows: HashMap::new(),
        duplicate_naturals: 0,
        has_sentinel: false,
    };
    let mut seen = HashSet::new();

    for row in rows {
        let Some(key) = row.get(A::KEY_COLUMN).and_then(Cell::as_i64) else {
            continue;
        };
        let natural = row
            .get(A::NATURAL_COLUMN)
            .and_then(Cell::as_str)
            .unwrap_or_default()
            .to_string();
        if !seen.insert(natural.clone()) {
            view.duplicate_naturals += 1;
        }
        if key == SENTINEL_KEY && natural == UNKNOWN_NATURAL_KEY {
            view.has_sentinel = true;
        }
        view.keys.insert(key);
        view.natural.insert(key, natural);
        view.rows.insert(key, row);
    }
    view
}

/// Natural keys unique and the sentinel row present.
fn key_integrity_check(dim: &DimensionView) -> CheckResult {
    let missing_sentinel = usize::from(!dim.has_sentinel);
    CheckResult::from_count(
        &format!("{}_key_integrity", dim.table),
        dim.duplicate_naturals + missing_sentinel,
        format!("{} natural keys unique, sentinel present", dim.keys.len()),
        format!(
            "{} duplicate natural keys, sentinel {}",
            dim.duplicate_naturals,
            if dim.has_sentinel { "present" } else { "missing" }
        ),
    )
}

struct FactView {
    fingerprint: String,
    customer_key: Option<i64>,
    date_key: Option<i64>,
    product_key: Option<i64>,
    country_key: Option<i64>,
    quantity: Option<i64>,
    unit_price: Option<Decimal>,
    total_amount: Option<Decimal>,
    is_valid: bool,
}

impl FactView {
    fn from_row(row: &Row) -> Self {
        let int = |c: &str| row.get(c).and_then(Cell::as_i64);
        FactView {
            fingerprint: row
                .get("line_fingerprint")
                .and_then(Cell::as_str)
                .unwrap_or_default()
                .to_string(),
            customer_key: int("customer_key"),
            date_key: int("date_key"),
            product_key: int("product_key"),
            country_key: int("country_key"),
            quantity: int("quantity"),
            unit_price: row.get("unit_price").and_then(Cell::as_decimal),
            total_amount: row.get("total_amount").and_then(Cell::as_decimal),
            is_valid: row.get("is_valid").and_then(Cell::as_bool).unwrap_or(false),
        }
    }
}

// ============================================================================
// VALIDATE
// ============================================================================

pub fn validate<S: Sink>(
    sink: &S,
    schemas: &SchemaConfig,
    context: Option<&RunContext>,
) -> Result<ValidationReport, SinkError> {
    let processed = sink.read(&schemas.processed, &PROCESSED_SALES, None)?;
    let facts: Vec<FactView> = sink
        .read(&schemas.warehouse, &FACT_SALES, None)?
        .iter()
        .map(FactView::from_row)
        .collect();

    let customers = read_dimension::<CustomerAttributes, _>(sink, &schemas.warehouse)?;
    let dates = read_dimension::<DateAttributes, _>(sink, &schemas.warehouse)?;
    let products = read_dimension::<ProductAttributes, _>(sink, &schemas.warehouse)?;
    let countries = read_dimension::<CountryAttributes, _>(sink, &schemas.warehouse)?;

    // Without a context, the processed rows say which run is loaded
    let run_id = context.map(|c| c.run_id.clone()).or_else(|| {
        processed
            .first()
            .and_then(|r| r.get("run_id"))
            .and_then(Cell::as_str)
            .map(str::to_string)
    });

    let raw_rows = match &run_id {
        Some(run_id) => count_raw_run(sink, &schemas.raw, run_id)?,
        None => sink.count(&schemas.raw, &RAW_SALES, None)?,
    };

    let mut row_counts = BTreeMap::new();
    row_counts.insert("raw".to_string(), raw_rows);
    row_counts.insert("processed".to_string(), processed.len());
    row_counts.insert("fact_sales".to_string(), facts.len());
    for dim in [&customers, &dates, &products, &countries] {
        row_counts.insert(dim.table.to_string(), dim.keys.len());
    }

    let mut checks = Vec::new();

    // Row-count reconciliation: raw vs processed (+ dropped)
    checks.push(match context {
        Some(ctx) => {
            let expected = processed.len() + ctx.dropped;
            let diff = raw_rows.abs_diff(expected);
            CheckResult::from_count(
                "row_count_reconciliation",
                diff,
                format!("{} raw = {} processed + {} dropped", raw_rows, processed.len(), ctx.dropped),
                format!(
                    "{} raw rows but {} processed + {} dropped",
                    raw_rows,
                    processed.len(),
                    ctx.dropped
                ),
            )
        }
        None => {
            let unmatched = match &run_id {
                Some(run_id) => {
                    let raw = load_raw_run(sink, &schemas.raw, run_id)?;
                    unmatched_source_rows(&processed, &raw, run_id)
                }
                None => processed.len(),
            };
            CheckResult::from_count(
                "row_count_reconciliation",
                unmatched,
                format!("{} processed rows each trace to one of {} raw rows", processed.len(), raw_rows),
                format!(
                    "{} of {} processed rows do not trace to a distinct raw row",
                    unmatched,
                    processed.len()
                ),
            )
        }
    });

    // Processed vs warehouse
    let fact_fingerprints: HashSet<&str> = facts.iter().map(|f| f.fingerprint.as_str()).collect();
    let missing_facts = processed
        .iter()
        .filter_map(|r| r.get("line_fingerprint").and_then(Cell::as_str))
        .filter(|fp| !fact_fingerprints.contains(fp))
        .count();
    checks.push(CheckResult::from_count(
        "processed_lines_loaded",
        missing_facts,
        format!("all {} processed lines have a fact row", processed.len()),
        format!("{} processed lines have no fact row", missing_facts),
    ));

    // Referential integrity
    let dangling = facts
        .iter()
        .filter(|f| {
            !matches!(f.customer_key, Some(k) if customers.keys.contains(&k))
                || !matches!(f.date_key, Some(k) if dates.keys.contains(&k))
                || !matches!(f.product_key, Some(k) if products.keys.contains(&k))
                || !matches!(f.country_key, Some(k) if countries.keys.contains(&k))
        })
        .count();
    checks.push(CheckResult::from_count(
        "referential_integrity",
        dangling,
        format!("all {} fact rows reference existing dimension rows", facts.len()),
        format!("{} fact rows reference a missing dimension row", dangling),
    ));

    // Value range
    let negative = facts
        .iter()
        .filter(|f| f.is_valid && f.total_amount.map(|t| t < Decimal::ZERO).unwrap_or(true))
        .count();
    checks.push(CheckResult::from_count(
        "non_negative_valid_totals",
        negative,
        "no valid fact row has a negative total".to_string(),
        format!("{} valid fact rows have a negative or missing total", negative),
    ));

    // Measures agree with each other
    let mismatched = facts
        .iter()
        .filter(|f| f.is_valid)
        .filter(|f| match (f.quantity, f.unit_price, f.total_amount) {
            (Some(q), Some(p), Some(t)) => line_total(q, p) != Some(t),
            _ => true,
        })
        .count();
    checks.push(CheckResult::from_count(
        "fact_totals_match_measures",
        mismatched,
        "valid fact totals equal round(quantity × unit_price, 2)".to_string(),
        format!("{} valid fact rows have a total that disagrees with their measures", mismatched),
    ));

    // Dimension key integrity
    for dim in [&customers, &dates, &products, &countries] {
        checks.push(key_integrity_check(dim));
    }

    for check in &checks {
        match &check.failure {
            Some(failure) => warn!(stage = "validation", check = %check.name, "{}", failure),
            None => debug!(stage = "validation", check = %check.name, "{}", check.detail),
        }
    }

    let valid: Vec<&FactView> = facts.iter().filter(|f| f.is_valid).collect();
    let report = ValidationReport {
        generated_at: Utc::now(),
        run_id,
        checks,
        row_counts,
        top_countries: top_by_key(&valid, |f| f.country_key, &countries, |_| None),
        segments: segment_breakdown(&valid, &customers),
        monthly_trend: monthly_trend(&valid, &dates),
        top_products: top_by_key(&valid, |f| f.product_key, &products, |row| {
            row.get("description").and_then(Cell::as_str).map(str::to_string)
        }),
    };

    info!(stage = "validation", "{}", report.summary());
    Ok(report)
}

/// Processed rows whose run or source row has no raw counterpart, plus any
/// second row claiming the same source row.
fn unmatched_source_rows(processed: &[Row], raw: &[RawRecord], run_id: &str) -> usize {
    let staged: HashSet<i64> = raw.iter().map(|r| r.row_number as i64).collect();
    let mut claimed = HashSet::new();
    processed
        .iter()
        .filter(|row| {
            let same_run = row.get("run_id").and_then(Cell::as_str) == Some(run_id);
            let source = row.get("source_row").and_then(Cell::as_i64);
            !match source {
                Some(source) if same_run && staged.contains(&source) => claimed.insert(source),
                _ => false,
            }
        })
        .count()
}

// ============================================================================
// DISTRIBUTION SUMMARIES
// ============================================================================

fn total(fact: &FactView) -> Decimal {
    fact.total_amount.unwrap_or(Decimal::ZERO)
}

fn top_by_key<K, L>(facts: &[&FactView], key_of: K, dimension: &DimensionView, label_of: L) -> Vec<SalesByKey>
where
    K: Fn(&FactView) -> Option<i64>,
    L: Fn(&Row) -> Option<String>,
{
    let mut by_key: HashMap<i64, (Decimal, usize)> = HashMap::new();
    for fact in facts {
        if let Some(key) = key_of(fact) {
            let entry = by_key.entry(key).or_insert((Decimal::ZERO, 0));
            entry.0 = entry.0.saturating_add(total(fact));
            entry.1 += 1;
        }
    }

    let mut rows: Vec<SalesByKey> = by_key
        .into_iter()
        .map(|(key, (sales, lines))| {
            let natural = dimension
                .natural
                .get(&key)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_NATURAL_KEY.to_string());
            let label = dimension
                .rows
                .get(&key)
                .and_then(&label_of)
                .unwrap_or_else(|| natural.clone());
            SalesByKey {
                key: natural,
                label,
                sales,
                lines,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.sales.cmp(&a.sales).then_with(|| a.key.cmp(&b.key)));
    rows.truncate(TOP_N);
    rows
}

fn segment_breakdown(facts: &[&FactView], customers: &DimensionView) -> Vec<SegmentBreakdown> {
    let mut by_segment: BTreeMap<String, (HashSet<i64>, usize, Decimal)> = BTreeMap::new();
    for fact in facts {
        let Some(key) = fact.customer_key else {
            continue;
        };
        let segment = customers
            .rows
            .get(&key)
            .and_then(|row| row.get("customer_segment"))
            .and_then(Cell::as_str)
            .unwrap_or("unknown")
            .to_string();
        let entry = by_segment
            .entry(segment)
            .or_insert_with(|| (HashSet::new(), 0, Decimal::ZERO));
        if key != SENTINEL_KEY {
            entry.0.insert(key);
        }
        entry.1 += 1;
        entry.2 = entry.2.saturating_add(total(fact));
    }

    by_segment
        .into_iter()
        .map(|(segment, (customers, lines, sales))| SegmentBreakdown {
            segment,
            customers: customers.len(),
            lines,
            sales,
        })
        .collect()
}

fn monthly_trend(facts: &[&FactView], dates: &DimensionView) -> Vec<MonthlySales> {
    let mut by_month: BTreeMap<String, (usize, Decimal)> = BTreeMap::new();
    for fact in facts {
        let Some(key) = fact.date_key.filter(|k| *k != SENTINEL_KEY) else {
            continue;
        };
        let Some(full_date) = dates.natural.get(&key) else {
            continue;
        };
        // full_date is YYYY-MM-DD
        let month = full_date.get(..7).unwrap_or(full_date).to_string();
        let entry = by_month.entry(month).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(total(fact));
    }

    by_month
        .into_iter()
        .map(|(month, (lines, sales))| MonthlySales { month, lines, sales })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::CleaningEngine;
    use crate::config::OutlierConfig;
    use crate::dimensions::StarSchema;
    use crate::enrichment::{EnrichmentEngine, RegionTable};
    use crate::processed::store_processed;
    use crate::raw::{stage_raw_chunk, RawValue};
    use crate::rules::CategoryRules;
    use crate::sink::{SqliteSink, WriteMode};
    use crate::tables::{DIM_COUNTRY, FACT_SALES};

    fn raw(row: u64, invoice: &str, stock: &str, day: u32, qty: i64, price: f64, country: &str) -> RawRecord {
        RawRecord {
            row_number: row,
            invoice_no: RawValue::verbatim(invoice),
            stock_code: RawValue::verbatim(stock),
            description: RawValue::Text("JUMBO BAG RED RETROSPOT".to_string()),
            quantity: RawValue::Int(qty),
            invoice_date: RawValue::Text(format!("{}/{}/2011 10:00", 1 + day / 28, 1 + day % 28)),
            unit_price: RawValue::Float(price),
            customer_id: RawValue::Float(13047.0),
            country: RawValue::Text(country.to_string()),
        }
    }

    /// Runs the stages against an in-memory store and returns it.
    fn loaded_store() -> (SqliteSink, SchemaConfig, RunContext) {
        let schemas = SchemaConfig::default();
        let mut sink = SqliteSink::open_in_memory(&schemas.all()).unwrap();
        let rows = vec![
            raw(1, "540001", "85099B", 0, 10, 1.95, "United Kingdom"),
            raw(2, "540002", "85099B", 40, 5, 1.95, "France"),
            raw(3, "540002", "85099B", 40, 5, 1.95, "France"),
            raw(4, "C540003", "85099B", 41, -2, 1.95, "France"),
            raw(5, "", "85099B", 41, 1, 1.95, "France"),
        ];
        stage_raw_chunk(&mut sink, &schemas.raw, "run-1", &rows).unwrap();

        let (clean, quality) = CleaningEngine::new(OutlierConfig::default()).clean(&rows);
        let enriched = EnrichmentEngine::new(
            CategoryRules::default(),
            RegionTable::new(),
            crate::config::SegmentConfig::default(),
        )
        .enrich(clean);
        store_processed(&mut sink, &schemas.processed, "run-1", &enriched, 100).unwrap();
        let mut star = StarSchema::load(&sink, &schemas.warehouse).unwrap();
        star.load_facts(&mut sink, &schemas.warehouse, &enriched, 100).unwrap();

        let context = RunContext {
            run_id: "run-1".to_string(),
            dropped: quality.rows_dropped,
        };
        (sink, schemas, context)
    }

    #[test]
    fn test_clean_load_passes_every_check() {
        let (sink, schemas, context) = loaded_store();

        let report = validate(&sink, &schemas, Some(&context)).unwrap();

        assert!(report.passed(), "failures: {:?}", report.failures());
        assert_eq!(report.row_counts["raw"], 5);
        assert_eq!(report.row_counts["processed"], 3);
        assert_eq!(report.row_counts["fact_sales"], 3);
        assert_eq!(report.run_id.as_deref(), Some("run-1"));
    }

    #[test]
    fn test_summaries_cover_valid_facts_only() {
        let (sink, schemas, context) = loaded_store();
        let report = validate(&sink, &schemas, Some(&context)).unwrap();

        assert_eq!(report.top_countries[0].key, "United Kingdom");
        assert_eq!(report.top_countries[0].sales, Decimal::new(1950, 2));
        assert_eq!(report.top_countries[1].key, "France");
        assert_eq!(report.top_countries[1].sales, Decimal::new(975, 2));
        assert_eq!(report.top_products[0].label, "JUMBO BAG RED RETROSPOT");
        assert_eq!(report.top_products[0].lines, 2);

        let months: Vec<&str> = report.monthly_trend.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2011-01", "2011-02"]);

        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.segments[0].customers, 1);
    }

    #[test]
    fn test_without_context_uses_loaded_run() {
        let (sink, schemas, _) = loaded_store();
        let report = validate(&sink, &schemas, None).unwrap();

        assert_eq!(report.run_id.as_deref(), Some("run-1"));
        assert!(report.check("row_count_reconciliation").unwrap().passed);
    }

    #[test]
    fn test_without_context_processed_rows_must_trace_to_raw() {
        let (mut sink, schemas, _) = loaded_store();

        let mut processed = sink.read(&schemas.processed, &PROCESSED_SALES, None).unwrap();
        processed[0].insert("source_row".to_string(), Cell::Int(99));
        let second = processed[2]["source_row"].clone();
        processed[1].insert("source_row".to_string(), second);
        sink.write(&schemas.processed, &PROCESSED_SALES, &processed, WriteMode::Replace)
            .unwrap();

        let report = validate(&sink, &schemas, None).unwrap();

        // Counts still fit (3 <= 5), but one row has no raw row and two share one
        let check = report.check("row_count_reconciliation").unwrap();
        assert!(!check.passed);
        assert_eq!(check.failure.as_ref().unwrap().offending, 2);
    }

    #[test]
    fn test_wrong_drop_count_fails_reconciliation() {
        let (sink, schemas, mut context) = loaded_store();
        context.dropped += 1;

        let report = validate(&sink, &schemas, Some(&context)).unwrap();

        let check = report.check("row_count_reconciliation").unwrap();
        assert!(!check.passed);
        assert_eq!(check.failure.as_ref().unwrap().offending, 1);
        assert_eq!(report.failures().len(), 1);
    }

    #[test]
    fn test_dangling_and_negative_facts_are_reported() {
        let (mut sink, schemas, context) = loaded_store();

        let mut row = Row::new();
        row.insert("line_fingerprint".to_string(), Cell::from("bogus"));
        row.insert("customer_key".to_string(), Cell::Int(999));
        row.insert("date_key".to_string(), Cell::Int(0));
        row.insert("product_key".to_string(), Cell::Int(0));
        row.insert("country_key".to_string(), Cell::Int(0));
        row.insert("invoice_no".to_string(), Cell::from("X1"));
        row.insert("quantity".to_string(), Cell::Int(-1));
        row.insert("unit_price".to_string(), Cell::from("2.00"));
        row.insert("total_amount".to_string(), Cell::from("-2.00"));
        row.insert("is_valid".to_string(), Cell::from(true));
        row.insert("source_row".to_string(), Cell::Int(99));
        row.insert("loaded_at".to_string(), Cell::from("2011-01-01T00:00:00Z"));
        sink.write(&schemas.warehouse, &FACT_SALES, &[row], WriteMode::Append)
            .unwrap();

        let report = validate(&sink, &schemas, Some(&context)).unwrap();

        assert!(!report.check("referential_integrity").unwrap().passed);
        assert!(!report.check("non_negative_valid_totals").unwrap().passed);
        assert!(report.check("fact_totals_match_measures").unwrap().passed);
        assert!(report.check("processed_lines_loaded").unwrap().passed);
    }

    #[test]
    fn test_missing_sentinel_is_reported() {
        let (mut sink, schemas, context) = loaded_store();

        let country = |key: i64, name: &str| {
            let mut row = Row::new();
            row.insert("country_key".to_string(), Cell::Int(key));
            row.insert("country_name".to_string(), Cell::from(name));
            row.insert("region".to_string(), Cell::from("europe"));
            row.insert("updated_at".to_string(), Cell::from("now"));
            row
        };
        // Replace drops the sentinel; UNIQUE keeps natural keys distinct on disk
        sink.write(
            &schemas.warehouse,
            &DIM_COUNTRY,
            &[country(1, "United Kingdom"), country(2, "France")],
            WriteMode::Replace,
        )
        .unwrap();

        let report = validate(&sink, &schemas, Some(&context)).unwrap();

        let check = report.check("dim_country_key_integrity").unwrap();
        assert!(!check.passed);
        assert!(check.detail.contains("sentinel missing"));
        assert!(report.check("dim_customer_key_integrity").unwrap().passed);
    }

    #[test]
    fn test_duplicate_natural_keys_are_reported() {
        let country = |key: i64, name: &str| {
            let mut row = Row::new();
            row.insert("country_key".to_string(), Cell::Int(key));
            row.insert("country_name".to_string(), Cell::from(name));
            row
        };
        let view = dimension_view::<CountryAttributes>(vec![
            country(SENTINEL_KEY, UNKNOWN_NATURAL_KEY),
            country(1, "France"),
            country(2, "France"),
            country(3, "Germany"),
        ]);

        assert_eq!(view.duplicate_naturals, 1);
        assert!(view.has_sentinel);

        let check = key_integrity_check(&view);
        assert_eq!(check.name, "dim_country_key_integrity");
        assert!(!check.passed);
        assert_eq!(check.failure.as_ref().unwrap().offending, 1);
        assert!(check.detail.contains("1 duplicate natural keys, sentinel present"));
    }
}
