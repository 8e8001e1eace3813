// ✨ Feature Enrichment Engine
// Totals, customer segments, product categories, regions, calendar parts and
// trailing 7-day sales. One output per input, order preserved.

use crate::cleaning::CleanRecord;
use crate::config::{PipelineConfig, SegmentConfig};
use crate::error::ConfigError;
use crate::rules::CategoryRules;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

pub const UNKNOWN_SEGMENT: &str = "unknown";
pub const OTHER_REGION: &str = "other";

/// Trailing window length in calendar days, current day included.
const ROLLING_WINDOW_DAYS: i64 = 7;

// ============================================================================
// ENRICHED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateParts {
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub month_name: String,
    pub day: u32,
    pub quarter: u32,
    /// 0 = Monday
    pub day_of_week: u32,
    pub day_name: String,
    pub is_weekend: bool,
}

impl DateParts {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        DateParts::from_date(ts.date())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        let day_of_week = date.weekday().num_days_from_monday();
        DateParts {
            date,
            year: date.year(),
            month: date.month(),
            month_name: date.format("%B").to_string(),
            day: date.day(),
            quarter: (date.month() - 1) / 3 + 1,
            day_of_week,
            day_name: date.format("%A").to_string(),
            is_weekend: day_of_week >= 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub clean: CleanRecord,
    pub total_amount: Decimal,
    pub customer_segment: String,
    pub product_category: String,
    pub region: String,
    pub date_parts: Option<DateParts>,
    pub rolling_7d_sales: Option<Decimal>,
}

/// quantity × unit_price at currency precision, midpoint rounded away from zero.
/// None when the product does not fit a Decimal.
pub fn line_total(quantity: i64, unit_price: Decimal) -> Option<Decimal> {
    Decimal::from(quantity)
        .checked_mul(unit_price)
        .map(|total| total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

// ============================================================================
// REGIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: HashMap<String, String>,
}

impl RegionTable {
    pub fn new() -> Self {
        let table: &[(&str, &[&str])] = &[
            (
                "europe",
                &[
                    "united kingdom", "eire", "ireland", "germany", "france", "italy", "spain",
                    "portugal", "netherlands", "belgium", "switzerland", "austria", "sweden",
                    "norway", "denmark", "finland", "iceland", "poland", "greece", "cyprus",
                    "malta", "czech republic", "lithuania", "channel islands", "european community",
                ],
            ),
            ("north_america", &["united states", "usa", "canada", "mexico"]),
            ("south_america", &["brazil", "argentina", "chile"]),
            (
                "asia",
                &[
                    "japan", "china", "hong kong", "india", "singapore", "south korea",
                    "korea", "thailand", "malaysia",
                ],
            ),
            (
                "middle_east",
                &[
                    "israel", "lebanon", "bahrain", "united arab emirates", "saudi arabia",
                ],
            ),
            ("africa", &["rsa", "south africa", "nigeria"]),
            ("oceania", &["australia", "new zealand"]),
        ];

        let mut regions = HashMap::new();
        for (region, countries) in table {
            for country in countries.iter() {
                regions.insert(country.to_string(), region.to_string());
            }
        }
        RegionTable { regions }
    }

    /// Merge configured entries over the built-in table.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for (country, region) in overrides {
            self.regions
                .insert(normalize_country(country), region.trim().to_string());
        }
        self
    }

    pub fn region_for(&self, country: Option<&str>) -> &str {
        country
            .and_then(|c| self.regions.get(&normalize_country(c)))
            .map(String::as_str)
            .unwrap_or(OTHER_REGION)
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_country(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// CUSTOMER SEGMENTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerHistory {
    pub spend: Decimal,
    pub orders: u32,
}

/// Whole-batch history per customer, over valid lines only.
fn customer_histories(records: &[CleanRecord], totals: &[Decimal]) -> HashMap<String, CustomerHistory> {
    let mut spend: HashMap<&str, Decimal> = HashMap::new();
    let mut invoices: HashMap<&str, HashSet<&str>> = HashMap::new();

    for (record, total) in records.iter().zip(totals) {
        let Some(customer) = record.customer_id.as_deref() else {
            continue;
        };
        if !record.is_valid {
            continue;
        }
        let sum = spend.entry(customer).or_insert(Decimal::ZERO);
        *sum = sum.saturating_add(*total);
        invoices
            .entry(customer)
            .or_default()
            .insert(record.invoice_no.as_str());
    }

    spend
        .into_iter()
        .map(|(customer, spend)| {
            let orders = invoices.get(customer).map(|s| s.len() as u32).unwrap_or(0);
            (customer.to_string(), CustomerHistory { spend, orders })
        })
        .collect()
}

/// First tier whose minimums are both met, else the fallback label.
pub fn segment_for<'a>(config: &'a SegmentConfig, history: &CustomerHistory) -> &'a str {
    config
        .tiers
        .iter()
        .find(|tier| history.spend >= tier.min_spend && history.orders >= tier.min_orders)
        .map(|tier| tier.label.as_str())
        .unwrap_or(config.fallback.as_str())
}

// ============================================================================
// ROLLING SALES
// ============================================================================

/// Trailing 7-day sales per stock code. Undated records get None.
fn rolling_sales(records: &[CleanRecord], totals: &[Decimal]) -> Vec<Option<Decimal>> {
    let mut out = vec![None; records.len()];

    let mut order: Vec<(&str, NaiveDate, usize)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.invoice_day().map(|d| (r.stock_code.as_str(), d, i)))
        .collect();
    order.sort();

    let mut start = 0;
    while start < order.len() {
        let grain = order[start].0;
        let end = order[start..]
            .iter()
            .position(|(g, _, _)| *g != grain)
            .map(|offset| start + offset)
            .unwrap_or(order.len());
        let group = &order[start..end];

        // Daily totals for this grain, in date order
        let mut days: Vec<(NaiveDate, Decimal)> = Vec::new();
        for (_, date, i) in group {
            match days.last_mut() {
                Some((last, sum)) if last == date => *sum = sum.saturating_add(totals[*i]),
                _ => days.push((*date, totals[*i])),
            }
        }

        // Two-pointer scan over [day - 6, day]
        let mut window = Vec::with_capacity(days.len());
        let mut lo = 0;
        // None once the running sum has overflowed; the window is then recounted
        let mut running = Some(Decimal::ZERO);
        for (idx, (date, sum)) in days.iter().enumerate() {
            running = running.and_then(|r| r.checked_add(*sum));
            let earliest = *date - Duration::days(ROLLING_WINDOW_DAYS - 1);
            while days[lo].0 < earliest {
                running = running.and_then(|r| r.checked_sub(days[lo].1));
                lo += 1;
            }
            let total = match running {
                Some(total) => total,
                None => {
                    running = window_sum(&days[lo..=idx]);
                    running.unwrap_or(Decimal::MAX)
                }
            };
            window.push((*date, total));
        }

        let mut day = 0;
        for (_, date, i) in group {
            while window[day].0 != *date {
                day += 1;
            }
            out[*i] = Some(window[day].1);
        }

        start = end;
    }

    out
}

fn window_sum(days: &[(NaiveDate, Decimal)]) -> Option<Decimal> {
    days.iter()
        .try_fold(Decimal::ZERO, |acc, (_, sum)| acc.checked_add(*sum))
}

// ============================================================================
// ENRICHMENT ENGINE
// ============================================================================

pub struct EnrichmentEngine {
    categories: CategoryRules,
    regions: RegionTable,
    segments: SegmentConfig,
}

impl EnrichmentEngine {
    pub fn new(categories: CategoryRules, regions: RegionTable, segments: SegmentConfig) -> Self {
        EnrichmentEngine {
            categories,
            regions,
            segments,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let categories = match &config.category_rules_file {
            Some(path) => CategoryRules::from_file(path)?,
            None => CategoryRules::default(),
        };
        let regions = RegionTable::new().with_overrides(&config.regions);
        Ok(EnrichmentEngine::new(categories, regions, config.segments.clone()))
    }

    pub fn enrich(&self, records: Vec<CleanRecord>) -> Vec<EnrichedRecord> {
        let totals: Vec<Decimal> = records
            .iter()
            .map(|r| match (r.quantity, r.unit_price) {
                // Overflowing lines are already flagged invalid by cleaning
                (Some(q), Some(p)) => line_total(q, p).unwrap_or(Decimal::ZERO),
                _ => Decimal::ZERO,
            })
            .collect();

        let histories = customer_histories(&records, &totals);
        let rolling = rolling_sales(&records, &totals);
        let empty = CustomerHistory::default();

        let enriched: Vec<EnrichedRecord> = records
            .into_iter()
            .zip(totals)
            .zip(rolling)
            .map(|((clean, total_amount), rolling_7d_sales)| {
                let customer_segment = match clean.customer_id.as_deref() {
                    Some(customer) => {
                        segment_for(&self.segments, histories.get(customer).unwrap_or(&empty))
                    }
                    None => UNKNOWN_SEGMENT,
                }
                .to_string();
                let product_category = self
                    .categories
                    .category_for(clean.description.as_deref())
                    .to_string();
                let region = self.regions.region_for(clean.country.as_deref()).to_string();
                let date_parts = clean.invoice_date.map(DateParts::from_timestamp);

                debug!(
                    stage = "enrichment",
                    row = clean.source_row,
                    segment = %customer_segment,
                    category = %product_category,
                    "enriched row"
                );

                EnrichedRecord {
                    clean,
                    total_amount,
                    customer_segment,
                    product_category,
                    region,
                    date_parts,
                    rolling_7d_sales,
                }
            })
            .collect();

        info!(
            stage = "enrichment",
            rows = enriched.len(),
            customers = histories.len(),
            "enrichment complete"
        );
        enriched
    }
}

// ============================================================================
// TESTS
// ============================================================================
