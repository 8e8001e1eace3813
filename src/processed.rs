// 🧮 Processed Store - enriched rows, one per retained source line
// Replaced wholesale on every run.

use crate::enrichment::EnrichedRecord;
use crate::error::SinkError;
use crate::sink::{Cell, Row, Sink, WriteMode};
use crate::tables::PROCESSED_SALES;
use tracing::debug;

fn to_row(record: &EnrichedRecord, run_id: &str) -> Row {
    let clean = &record.clean;
    let parts = record.date_parts.as_ref();

    let mut row = Row::new();
    let mut put = |column: &str, value: Cell| {
        row.insert(column.to_string(), value);
    };
    put("line_fingerprint", Cell::from(clean.fingerprint.as_str()));
    put("run_id", Cell::from(run_id));
    put("source_row", Cell::from(clean.source_row));
    put("invoice_no", Cell::from(clean.invoice_no.as_str()));
    put("stock_code", Cell::from(clean.stock_code.as_str()));
    put("description", Cell::from(clean.description.clone()));
    put("quantity", Cell::from(clean.quantity));
    put(
        "invoice_date",
        Cell::from(clean.invoice_date.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())),
    );
    put("unit_price", Cell::from(clean.unit_price));
    put("customer_id", Cell::from(clean.customer_id.clone()));
    put("country", Cell::from(clean.country.clone()));
    put("total_amount", Cell::from(record.total_amount));
    put("customer_segment", Cell::from(record.customer_segment.as_str()));
    put("product_category", Cell::from(record.product_category.as_str()));
    put("region", Cell::from(record.region.as_str()));
    put("invoice_year", Cell::from(parts.map(|p| p.year)));
    put("invoice_month", Cell::from(parts.map(|p| p.month)));
    put("invoice_day", Cell::from(parts.map(|p| p.day)));
    put("invoice_quarter", Cell::from(parts.map(|p| p.quarter)));
    put("invoice_day_of_week", Cell::from(parts.map(|p| p.day_of_week)));
    put("rolling_7d_sales", Cell::from(record.rolling_7d_sales));
    put("is_valid", Cell::from(clean.is_valid));
    put("violations", Cell::from(clean.violation_names().join(",")));
    row
}

/// Replace the processed table with this run's records, written in chunks.
pub fn store_processed<S: Sink>(
    sink: &mut S,
    schema: &str,
    run_id: &str,
    records: &[EnrichedRecord],
    chunk_size: usize,
) -> Result<usize, SinkError> {
    // Clears the previous run even when this one retained nothing
    sink.write(schema, &PROCESSED_SALES, &[], WriteMode::Replace)?;

    let mut written = 0;
    for chunk in records.chunks(chunk_size.max(1)) {
        let rows: Vec<Row> = chunk.iter().map(|r| to_row(r, run_id)).collect();
        written += sink.write(schema, &PROCESSED_SALES, &rows, WriteMode::Append)?;
    }

    debug!(schema, run_id, rows = written, "stored processed records");
    Ok(written)
}
