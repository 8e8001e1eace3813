// ⭐ Dimensional Modeling Engine - dimension registries + fact assembly
//
// Each dimension maps a natural key (customer id, calendar date, stock code,
// country name) to a surrogate key it alone mints. Keys start after the
// largest persisted key, so re-runs never collide. Attribute changes
// overwrite the row in place (type-1); no history is kept.
//
// Key 0 is the sentinel row ("<unknown>") that facts fall back to when their
// source data has no natural key.

use crate::enrichment::{DateParts, EnrichedRecord, OTHER_REGION, UNKNOWN_SEGMENT};
use crate::error::{DimensionResolutionError, SinkError};
use crate::rules::UNCATEGORIZED;
use crate::sink::{Cell, Row, Sink, TableDef, WriteMode};
use crate::tables::{DIM_COUNTRY, DIM_CUSTOMER, DIM_DATE, DIM_PRODUCT, FACT_SALES};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

pub const SENTINEL_KEY: i64 = 0;
pub const UNKNOWN_NATURAL_KEY: &str = "<unknown>";

// ============================================================================
// DIMENSION ATTRIBUTES
// ============================================================================

/// Descriptive columns of one dimension table.
pub trait DimensionAttributes: Clone + PartialEq + Sized {
    const NAME: &'static str;
    const TABLE: TableDef;
    const KEY_COLUMN: &'static str;
    const NATURAL_COLUMN: &'static str;

    /// Attributes of the sentinel row, also used for rows created without attributes
    fn unknown() -> Self;

    fn write_cells(&self, row: &mut Row);

    fn from_row(row: &Row) -> Option<Self>;
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Cell::as_str).map(str::to_string)
}

fn int(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Cell::as_i64)
}

fn put(row: &mut Row, column: &str, value: impl Into<Cell>) {
    row.insert(column.to_string(), value.into());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerAttributes {
    pub segment: String,
    pub country: String,
}

impl DimensionAttributes for CustomerAttributes {
    const NAME: &'static str = "customer";
    const TABLE: TableDef = DIM_CUSTOMER;
    const KEY_COLUMN: &'static str = "customer_key";
    const NATURAL_COLUMN: &'static str = "customer_id";

    fn unknown() -> Self {
        CustomerAttributes {
            segment: UNKNOWN_SEGMENT.to_string(),
            country: UNKNOWN_NATURAL_KEY.to_string(),
        }
    }

    fn write_cells(&self, row: &mut Row) {
        put(row, "customer_segment", self.segment.as_str());
        put(row, "country", self.country.as_str());
    }

    fn from_row(row: &Row) -> Option<Self> {
        Some(CustomerAttributes {
            segment: text(row, "customer_segment")?,
            country: text(row, "country")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateAttributes {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub quarter: u32,
    pub day_of_week: u32,
    pub day_name: String,
    pub month_name: String,
    pub is_weekend: bool,
}

impl From<&DateParts> for DateAttributes {
    fn from(parts: &DateParts) -> Self {
        DateAttributes {
            year: parts.year,
            month: parts.month,
            day: parts.day,
            quarter: parts.quarter,
            day_of_week: parts.day_of_week,
            day_name: parts.day_name.clone(),
            month_name: parts.month_name.clone(),
            is_weekend: parts.is_weekend,
        }
    }
}

impl DimensionAttributes for DateAttributes {
    const NAME: &'static str = "date";
    const TABLE: TableDef = DIM_DATE;
    const KEY_COLUMN: &'static str = "date_key";
    const NATURAL_COLUMN: &'static str = "full_date";

    fn unknown() -> Self {
        DateAttributes {
            year: 0,
            month: 0,
            day: 0,
            quarter: 0,
            day_of_week: 0,
            day_name: "Unknown".to_string(),
            month_name: "Unknown".to_string(),
            is_weekend: false,
        }
    }

    fn write_cells(&self, row: &mut Row) {
        put(row, "year", self.year);
        put(row, "month", self.month);
        put(row, "day", self.day);
        put(row, "quarter", self.quarter);
        put(row, "day_of_week", self.day_of_week);
        put(row, "day_name", self.day_name.as_str());
        put(row, "month_name", self.month_name.as_str());
        put(row, "is_weekend", self.is_weekend);
    }

    fn from_row(row: &Row) -> Option<Self> {
        Some(DateAttributes {
            year: int(row, "year")? as i32,
            month: int(row, "month")? as u32,
            day: int(row, "day")? as u32,
            quarter: int(row, "quarter")? as u32,
            day_of_week: int(row, "day_of_week")? as u32,
            day_name: text(row, "day_name")?,
            month_name: text(row, "month_name")?,
            is_weekend: int(row, "is_weekend")? != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAttributes {
    pub description: String,
    pub category: String,
}

impl DimensionAttributes for ProductAttributes {
    const NAME: &'static str = "product";
    const TABLE: TableDef = DIM_PRODUCT;
    const KEY_COLUMN: &'static str = "product_key";
    const NATURAL_COLUMN: &'static str = "stock_code";

    fn unknown() -> Self {
        ProductAttributes {
            description: UNKNOWN_NATURAL_KEY.to_string(),
            category: UNCATEGORIZED.to_string(),
        }
    }

    fn write_cells(&self, row: &mut Row) {
        put(row, "description", self.description.as_str());
        put(row, "product_category", self.category.as_str());
    }

    fn from_row(row: &Row) -> Option<Self> {
        Some(ProductAttributes {
            description: text(row, "description")?,
            category: text(row, "product_category")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryAttributes {
    pub region: String,
}

impl DimensionAttributes for CountryAttributes {
    const NAME: &'static str = "country";
    const TABLE: TableDef = DIM_COUNTRY;
    const KEY_COLUMN: &'static str = "country_key";
    const NATURAL_COLUMN: &'static str = "country_name";

    fn unknown() -> Self {
        CountryAttributes {
            region: OTHER_REGION.to_string(),
        }
    }

    fn write_cells(&self, row: &mut Row) {
        put(row, "region", self.region.as_str());
    }

    fn from_row(row: &Row) -> Option<Self> {
        Some(CountryAttributes {
            region: text(row, "region")?,
        })
    }
}

// ============================================================================
// DIMENSION REGISTRY (key allocation lives here and nowhere else)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct DimensionRow<A> {
    natural_key: String,
    attributes: A,
}

#[derive(Debug, Clone)]
pub struct Dimension<A: DimensionAttributes> {
    rows: BTreeMap<i64, DimensionRow<A>>,
    by_natural: HashMap<String, i64>,
    next_key: i64,
    /// Keys whose row differs from what the sink holds
    dirty: BTreeSet<i64>,
    has_sentinel: bool,
}

impl<A: DimensionAttributes> Dimension<A> {
    /// Empty dimension holding only the sentinel row.
    pub fn new() -> Self {
        let mut dimension = Self::without_sentinel();
        dimension.rows.insert(
            SENTINEL_KEY,
            DimensionRow {
                natural_key: UNKNOWN_NATURAL_KEY.to_string(),
                attributes: A::unknown(),
            },
        );
        dimension
            .by_natural
            .insert(UNKNOWN_NATURAL_KEY.to_string(), SENTINEL_KEY);
        dimension.dirty.insert(SENTINEL_KEY);
        dimension.has_sentinel = true;
        dimension
    }

    /// A dimension with no fallback row; unresolvable facts are errors.
    pub fn without_sentinel() -> Self {
        Dimension {
            rows: BTreeMap::new(),
            by_natural: HashMap::new(),
            next_key: SENTINEL_KEY + 1,
            dirty: BTreeSet::new(),
            has_sentinel: false,
        }
    }

    /// Adopt the rows already persisted in `schema`, so new keys start after them.
    pub fn seed<S: Sink>(&mut self, sink: &S, schema: &str) -> Result<usize, SinkError> {
        let mut loaded = 0;
        for row in sink.read(schema, &A::TABLE, None)? {
            let key = int(&row, A::KEY_COLUMN);
            let natural = text(&row, A::NATURAL_COLUMN);
            let (Some(key), Some(natural), Some(attributes)) = (key, natural, A::from_row(&row)) else {
                warn!(dimension = A::NAME, schema, "skipping malformed dimension row");
                continue;
            };

            let persisted = DimensionRow {
                natural_key: natural.clone(),
                attributes,
            };
            if self.rows.get(&key) == Some(&persisted) {
                self.dirty.remove(&key);
            }
            self.rows.insert(key, persisted);
            self.by_natural.insert(natural, key);
            self.next_key = self.next_key.max(key + 1);
            loaded += 1;
        }

        debug!(dimension = A::NAME, rows = loaded, next_key = self.next_key, "seeded dimension");
        Ok(loaded)
    }

    /// Surrogate key for `natural_key`, minting one on first sight. Changed
    /// attributes overwrite the existing row, except the sentinel's: a literal
    /// `<unknown>` key resolves to it and leaves it untouched.
    pub fn resolve_or_create(&mut self, natural_key: &str, attributes: A) -> i64 {
        if let Some(&key) = self.by_natural.get(natural_key) {
            if key == SENTINEL_KEY && self.has_sentinel {
                debug!(dimension = A::NAME, natural_key, "natural key matches the sentinel");
                return key;
            }
            if let Some(row) = self.rows.get_mut(&key) {
                if row.attributes != attributes {
                    row.attributes = attributes;
                    self.dirty.insert(key);
                }
            }
            return key;
        }

        let key = self.next_key;
        self.next_key += 1;
        self.rows.insert(
            key,
            DimensionRow {
                natural_key: natural_key.to_string(),
                attributes,
            },
        );
        self.by_natural.insert(natural_key.to_string(), key);
        self.dirty.insert(key);
        key
    }

    /// Resolve a possibly incomplete reference.
    ///
    /// - no natural key: the sentinel
    /// - natural key without attributes: the existing row, else a new row
    ///   carrying the sentinel's attributes (later attributes overwrite it)
    pub fn resolve(
        &mut self,
        natural_key: Option<&str>,
        attributes: Option<A>,
    ) -> Result<i64, DimensionResolutionError> {
        match (natural_key, attributes) {
            (Some(natural), Some(attributes)) => Ok(self.resolve_or_create(natural, attributes)),
            (Some(natural), None) => {
                if let Some(key) = self.key_for(natural) {
                    return Ok(key);
                }
                if !self.has_sentinel {
                    return Err(DimensionResolutionError {
                        dimension: A::NAME,
                        natural_key: Some(natural.to_string()),
                        reason: "attributes missing for a new row".to_string(),
                    });
                }
                Ok(self.resolve_or_create(natural, A::unknown()))
            }
            (None, _) if self.has_sentinel => Ok(SENTINEL_KEY),
            (None, _) => Err(DimensionResolutionError {
                dimension: A::NAME,
                natural_key: None,
                reason: "natural key missing and no sentinel row defined".to_string(),
            }),
        }
    }

    pub fn key_for(&self, natural_key: &str) -> Option<i64> {
        self.by_natural.get(natural_key).copied()
    }

    pub fn attributes(&self, key: i64) -> Option<&A> {
        self.rows.get(&key).map(|row| &row.attributes)
    }

    pub fn natural_key(&self, key: i64) -> Option<&str> {
        self.rows.get(&key).map(|row| row.natural_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Upsert every row changed since the last flush.
    pub fn flush<S: Sink>(&mut self, sink: &mut S, schema: &str) -> Result<usize, SinkError> {
        if self.dirty.is_empty() {
            return Ok(0);
        }
        let updated_at = Utc::now().to_rfc3339();
        let rows: Vec<Row> = self
            .dirty
            .iter()
            .filter_map(|key| self.rows.get(key).map(|row| (key, row)))
            .map(|(key, dim_row)| {
                let mut row = Row::new();
                put(&mut row, A::KEY_COLUMN, *key);
                put(&mut row, A::NATURAL_COLUMN, dim_row.natural_key.as_str());
                dim_row.attributes.write_cells(&mut row);
                put(&mut row, "updated_at", updated_at.as_str());
                row
            })
            .collect();

        let written = sink.write(schema, &A::TABLE, &rows, WriteMode::Upsert)?;
        self.dirty.clear();
        debug!(dimension = A::NAME, rows = written, "flushed dimension");
        Ok(written)
    }
}

impl<A: DimensionAttributes> Default for Dimension<A> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FACTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactSalesRow {
    pub line_fingerprint: String,
    pub customer_key: i64,
    pub date_key: i64,
    pub product_key: i64,
    pub country_key: i64,
    pub invoice_no: String,
    pub quantity: Option<i64>,
    pub unit_price: Option<Decimal>,
    pub total_amount: Decimal,
    pub rolling_7d_sales: Option<Decimal>,
    pub is_valid: bool,
    pub source_row: u64,
}

impl FactSalesRow {
    fn to_row(&self, loaded_at: &str) -> Row {
        let mut row = Row::new();
        put(&mut row, "line_fingerprint", self.line_fingerprint.as_str());
        put(&mut row, "customer_key", self.customer_key);
        put(&mut row, "date_key", self.date_key);
        put(&mut row, "product_key", self.product_key);
        put(&mut row, "country_key", self.country_key);
        put(&mut row, "invoice_no", self.invoice_no.as_str());
        put(&mut row, "quantity", self.quantity);
        put(&mut row, "unit_price", self.unit_price);
        put(&mut row, "total_amount", self.total_amount);
        put(&mut row, "rolling_7d_sales", self.rolling_7d_sales);
        put(&mut row, "is_valid", self.is_valid);
        put(&mut row, "source_row", self.source_row);
        put(&mut row, "loaded_at", loaded_at);
        row
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactLoadReport {
    pub facts_written: usize,
    pub facts_skipped: usize,
    /// Source rows whose fact could not be built
    pub skipped_rows: Vec<u64>,
    pub dimension_rows_written: usize,
}

// ============================================================================
// STAR SCHEMA
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StarSchema {
    pub customers: Dimension<CustomerAttributes>,
    pub dates: Dimension<DateAttributes>,
    pub products: Dimension<ProductAttributes>,
    pub countries: Dimension<CountryAttributes>,
}

impl StarSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimensions seeded from what `schema` already holds.
    pub fn load<S: Sink>(sink: &S, schema: &str) -> Result<Self, SinkError> {
        let mut star = StarSchema::new();
        star.customers.seed(sink, schema)?;
        star.dates.seed(sink, schema)?;
        star.products.seed(sink, schema)?;
        star.countries.seed(sink, schema)?;
        info!(stage = "modeling", schema, dimensions = ?star.dimension_sizes(), "loaded dimensions");
        Ok(star)
    }

    /// Resolve all four dimensions for a record, then assemble its fact row.
    pub fn build_fact(
        &mut self,
        record: &EnrichedRecord,
    ) -> Result<FactSalesRow, DimensionResolutionError> {
        let clean = &record.clean;

        let customer_attributes = clean.country.as_ref().map(|country| CustomerAttributes {
            segment: record.customer_segment.clone(),
            country: country.clone(),
        });
        let customer_key = self
            .customers
            .resolve(clean.customer_id.as_deref(), customer_attributes)?;

        let full_date = record
            .date_parts
            .as_ref()
            .map(|parts| parts.date.format("%Y-%m-%d").to_string());
        let date_key = self
            .dates
            .resolve(full_date.as_deref(), record.date_parts.as_ref().map(DateAttributes::from))?;

        let product_attributes = clean.description.as_ref().map(|description| ProductAttributes {
            description: description.clone(),
            category: record.product_category.clone(),
        });
        let product_key = self
            .products
            .resolve(Some(clean.stock_code.as_str()), product_attributes)?;

        let country_key = self.countries.resolve(
            clean.country.as_deref(),
            Some(CountryAttributes {
                region: record.region.clone(),
            }),
        )?;

        Ok(FactSalesRow {
            line_fingerprint: clean.fingerprint.clone(),
            customer_key,
            date_key,
            product_key,
            country_key,
            invoice_no: clean.invoice_no.clone(),
            quantity: clean.quantity,
            unit_price: clean.unit_price,
            total_amount: record.total_amount,
            rolling_7d_sales: record.rolling_7d_sales,
            is_valid: clean.is_valid,
            source_row: clean.source_row,
        })
    }

    pub fn flush_dimensions<S: Sink>(&mut self, sink: &mut S, schema: &str) -> Result<usize, SinkError> {
        Ok(self.customers.flush(sink, schema)?
            + self.dates.flush(sink, schema)?
            + self.products.flush(sink, schema)?
            + self.countries.flush(sink, schema)?)
    }

    /// Build and upsert facts chunk by chunk. Each chunk's dimension rows are
    /// written before its facts.
    pub fn load_facts<S: Sink>(
        &mut self,
        sink: &mut S,
        schema: &str,
        records: &[EnrichedRecord],
        chunk_size: usize,
    ) -> Result<FactLoadReport, SinkError> {
        let mut report = FactLoadReport::default();

        for chunk in records.chunks(chunk_size.max(1)) {
            let mut facts = Vec::with_capacity(chunk.len());
            for record in chunk {
                match self.build_fact(record) {
                    Ok(fact) => facts.push(fact),
                    Err(e) => {
                        warn!(stage = "modeling", row = record.clean.source_row, error = %e, "skipping fact row");
                        report.facts_skipped += 1;
                        report.skipped_rows.push(record.clean.source_row);
                    }
                }
            }

            report.dimension_rows_written += self.flush_dimensions(sink, schema)?;

            let loaded_at = Utc::now().to_rfc3339();
            let rows: Vec<Row> = facts.iter().map(|f| f.to_row(&loaded_at)).collect();
            report.facts_written += sink.write(schema, &FACT_SALES, &rows, WriteMode::Upsert)?;
        }
        // Sentinels still land when there were no records
        report.dimension_rows_written += self.flush_dimensions(sink, schema)?;

        info!(
            stage = "modeling",
            facts = report.facts_written,
            skipped = report.facts_skipped,
            dimension_rows = report.dimension_rows_written,
            "loaded facts"
        );
        Ok(report)
    }

    pub fn dimension_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        sizes.insert(CustomerAttributes::NAME.to_string(), self.customers.len());
        sizes.insert(DateAttributes::NAME.to_string(), self.dates.len());
        sizes.insert(ProductAttributes::NAME.to_string(), self.products.len());
        sizes.insert(CountryAttributes::NAME.to_string(), self.countries.len());
        sizes
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::CleanRecord;
    use crate::sink::SqliteSink;
    use chrono::NaiveDate;

    const DW: &str = "data_warehouse";

    fn country(region: &str) -> CountryAttributes {
        CountryAttributes {
            region: region.to_string(),
        }
    }

    fn enriched(row: u64, stock: &str, customer: Option<&str>, description: Option<&str>) -> EnrichedRecord {
        let date = NaiveDate::from_ymd_opt(2010, 12, 1).unwrap();
        EnrichedRecord {
            clean: CleanRecord {
                source_row: row,
                invoice_no: "536365".to_string(),
                stock_code: stock.to_string(),
                description: description.map(str::to_string),
                quantity: Some(3),
                invoice_date: date.and_hms_opt(8, 26, 0),
                unit_price: Some(Decimal::new(250, 2)),
                customer_id: customer.map(str::to_string),
                country: Some("United Kingdom".to_string()),
                is_valid: true,
                violations: Vec::new(),
                fingerprint: format!("fp-{}", row),
            },
            total_amount: Decimal::new(750, 2),
            customer_segment: if customer.is_some() { "regular" } else { UNKNOWN_SEGMENT }.to_string(),
            product_category: "home_decor".to_string(),
            region: "europe".to_string(),
            date_parts: Some(DateParts::from_date(date)),
            rolling_7d_sales: Some(Decimal::new(750, 2)),
        }
    }

    #[test]
    fn test_resolve_or_create_is_idempotent() {
        let mut countries: Dimension<CountryAttributes> = Dimension::new();

        let uk = countries.resolve_or_create("United Kingdom", country("europe"));
        let fr = countries.resolve_or_create("France", country("europe"));
        let uk_again = countries.resolve_or_create("United Kingdom", country("europe"));

        assert_eq!(uk, 1);
        assert_eq!(fr, 2);
        assert_eq!(uk_again, uk);
        assert_eq!(countries.len(), 3);
    }

    #[test]
    fn test_changed_attributes_overwrite_in_place() {
        let mut countries: Dimension<CountryAttributes> = Dimension::new();
        let key = countries.resolve_or_create("Israel", country("other"));
        let again = countries.resolve_or_create("Israel", country("middle_east"));

        assert_eq!(key, again);
        assert_eq!(countries.attributes(key), Some(&country("middle_east")));
        assert_eq!(countries.len(), 2);
    }

    #[test]
    fn test_missing_natural_key_uses_sentinel() {
        let mut customers: Dimension<CustomerAttributes> = Dimension::new();
        assert_eq!(customers.resolve(None, None), Ok(SENTINEL_KEY));
        assert_eq!(customers.natural_key(SENTINEL_KEY), Some(UNKNOWN_NATURAL_KEY));
        assert_eq!(customers.len(), 1);
    }

    #[test]
    fn test_literal_unknown_key_keeps_sentinel_attributes() {
        let mut countries: Dimension<CountryAttributes> = Dimension::new();

        let key = countries.resolve(Some(UNKNOWN_NATURAL_KEY), Some(country("europe")));

        assert_eq!(key, Ok(SENTINEL_KEY));
        assert_eq!(countries.attributes(SENTINEL_KEY), Some(&CountryAttributes::unknown()));
        assert_eq!(countries.len(), 1);
    }

    #[test]
    fn test_missing_attributes_create_placeholder_row() {
        let mut products: Dimension<ProductAttributes> = Dimension::new();
        let key = products.resolve(Some("POST"), None).unwrap();
        assert_eq!(products.attributes(key), Some(&ProductAttributes::unknown()));

        let described = ProductAttributes {
            description: "POSTAGE".to_string(),
            category: "fees_postage".to_string(),
        };
        assert_eq!(products.resolve(Some("POST"), Some(described.clone())), Ok(key));
        // A later row without attributes keeps what is known
        assert_eq!(products.resolve(Some("POST"), None), Ok(key));
        assert_eq!(products.attributes(key), Some(&described));
    }

    #[test]
    fn test_without_sentinel_reports_resolution_errors() {
        let mut dates: Dimension<DateAttributes> = Dimension::without_sentinel();

        let err = dates.resolve(None, None).unwrap_err();
        assert_eq!(err.dimension, "date");
        assert_eq!(err.natural_key, None);

        let err = dates.resolve(Some("2011-01-01"), None).unwrap_err();
        assert_eq!(err.natural_key.as_deref(), Some("2011-01-01"));
        assert!(dates.is_empty());
    }

    #[test]
    fn test_keys_survive_across_runs() {
        let mut sink = SqliteSink::open_in_memory(&[DW]).unwrap();

        let mut first: Dimension<CountryAttributes> = Dimension::new();
        first.resolve_or_create("United Kingdom", country("europe"));
        first.resolve_or_create("France", country("europe"));
        assert_eq!(first.flush(&mut sink, DW).unwrap(), 3);

        let mut second: Dimension<CountryAttributes> = Dimension::new();
        assert_eq!(second.seed(&sink, DW).unwrap(), 3);
        // Nothing changed since it was persisted
        assert_eq!(second.flush(&mut sink, DW).unwrap(), 0);

        assert_eq!(second.resolve_or_create("France", country("europe")), 2);
        assert_eq!(second.resolve_or_create("Japan", country("asia")), 3);
        assert_eq!(second.flush(&mut sink, DW).unwrap(), 1);
        assert_eq!(sink.count(DW, &DIM_COUNTRY, None).unwrap(), 4);
    }

    #[test]
    fn test_build_fact_resolves_every_dimension() {
        let mut star = StarSchema::new();

        let fact = star.build_fact(&enriched(1, "85123A", Some("17850"), Some("HEART"))).unwrap();

        assert_eq!(fact.customer_key, 1);
        assert_eq!(fact.date_key, 1);
        assert_eq!(fact.product_key, 1);
        assert_eq!(fact.country_key, 1);
        assert_eq!(fact.total_amount, Decimal::new(750, 2));
        assert_eq!(star.dates.key_for("2010-12-01"), Some(1));
        assert_eq!(
            star.customers.attributes(1).map(|a| a.segment.as_str()),
            Some("regular")
        );
    }

    #[test]
    fn test_missing_customer_maps_to_sentinel() {
        let mut star = StarSchema::new();
        let fact = star.build_fact(&enriched(1, "85123A", None, Some("HEART"))).unwrap();

        assert_eq!(fact.customer_key, SENTINEL_KEY);
        assert!(fact.is_valid);
        assert_eq!(star.customers.len(), 1);
    }

    #[test]
    fn test_load_facts_twice_is_idempotent() {
        let mut sink = SqliteSink::open_in_memory(&[DW]).unwrap();
        let records = vec![
            enriched(1, "85123A", Some("17850"), Some("HEART")),
            enriched(2, "71053", Some("17850"), None),
            enriched(3, "85123A", None, Some("HEART")),
        ];

        let mut star = StarSchema::load(&sink, DW).unwrap();
        let report = star.load_facts(&mut sink, DW, &records, 2).unwrap();
        assert_eq!(report.facts_written, 3);
        assert_eq!(report.facts_skipped, 0);

        let mut rerun = StarSchema::load(&sink, DW).unwrap();
        rerun.load_facts(&mut sink, DW, &records, 2).unwrap();

        assert_eq!(sink.count(DW, &FACT_SALES, None).unwrap(), 3);
        assert_eq!(sink.count(DW, &DIM_PRODUCT, None).unwrap(), 3);
        assert_eq!(sink.count(DW, &DIM_CUSTOMER, None).unwrap(), 2);
        assert_eq!(rerun.products.key_for("71053"), star.products.key_for("71053"));
    }

    #[test]
    fn test_unresolvable_rows_are_skipped_and_counted() {
        let mut sink = SqliteSink::open_in_memory(&[DW]).unwrap();
        let mut star = StarSchema::new();
        star.customers = Dimension::without_sentinel();

        let records = vec![
            enriched(1, "85123A", Some("17850"), Some("HEART")),
            enriched(2, "85123A", None, Some("HEART")),
        ];
        let report = star.load_facts(&mut sink, DW, &records, 10).unwrap();

        assert_eq!(report.facts_written, 1);
        assert_eq!(report.facts_skipped, 1);
        assert_eq!(report.skipped_rows, vec![2]);
    }
}
