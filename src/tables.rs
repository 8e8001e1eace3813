// 📐 Table layouts for the raw, processed and warehouse namespaces

use crate::sink::{ColumnDef, TableDef};

// ============================================================================
// RAW NAMESPACE
// ============================================================================

/// Rows exactly as observed. Value columns carry no declared type so each
/// cell keeps the type it was read with.
pub const RAW_SALES: TableDef = TableDef {
    name: "raw_sales",
    columns: &[
        ColumnDef::new("run_id", "TEXT NOT NULL"),
        ColumnDef::new("row_number", "INTEGER NOT NULL"),
        ColumnDef::new("invoice_no", ""),
        ColumnDef::new("stock_code", ""),
        ColumnDef::new("description", ""),
        ColumnDef::new("quantity", ""),
        ColumnDef::new("invoice_date", ""),
        ColumnDef::new("unit_price", ""),
        ColumnDef::new("customer_id", ""),
        ColumnDef::new("country", ""),
        ColumnDef::new("loaded_at", "TEXT NOT NULL"),
    ],
    key: &["run_id", "row_number"],
};

// ============================================================================
// PROCESSED NAMESPACE
// ============================================================================

pub const PROCESSED_SALES: TableDef = TableDef {
    name: "processed_sales",
    columns: &[
        ColumnDef::new("line_fingerprint", "TEXT NOT NULL"),
        ColumnDef::new("run_id", "TEXT NOT NULL"),
        ColumnDef::new("source_row", "INTEGER NOT NULL"),
        ColumnDef::new("invoice_no", "TEXT NOT NULL"),
        ColumnDef::new("stock_code", "TEXT NOT NULL"),
        ColumnDef::new("description", "TEXT"),
        ColumnDef::new("quantity", "INTEGER"),
        ColumnDef::new("invoice_date", "TEXT"),
        ColumnDef::new("unit_price", "TEXT"),
        ColumnDef::new("customer_id", "TEXT"),
        ColumnDef::new("country", "TEXT"),
        ColumnDef::new("total_amount", "TEXT NOT NULL"),
        ColumnDef::new("customer_segment", "TEXT NOT NULL"),
        ColumnDef::new("product_category", "TEXT NOT NULL"),
        ColumnDef::new("region", "TEXT NOT NULL"),
        ColumnDef::new("invoice_year", "INTEGER"),
        ColumnDef::new("invoice_month", "INTEGER"),
        ColumnDef::new("invoice_day", "INTEGER"),
        ColumnDef::new("invoice_quarter", "INTEGER"),
        ColumnDef::new("invoice_day_of_week", "INTEGER"),
        ColumnDef::new("rolling_7d_sales", "TEXT"),
        ColumnDef::new("is_valid", "INTEGER NOT NULL"),
        ColumnDef::new("violations", "TEXT NOT NULL"),
    ],
    key: &["line_fingerprint"],
};

// ============================================================================
// WAREHOUSE NAMESPACE (star schema)
// ============================================================================

pub const DIM_CUSTOMER: TableDef = TableDef {
    name: "dim_customer",
    columns: &[
        ColumnDef::new("customer_key", "INTEGER NOT NULL"),
        ColumnDef::new("customer_id", "TEXT NOT NULL UNIQUE"),
        ColumnDef::new("customer_segment", "TEXT NOT NULL"),
        ColumnDef::new("country", "TEXT NOT NULL"),
        ColumnDef::new("updated_at", "TEXT NOT NULL"),
    ],
    key: &["customer_key"],
};

pub const DIM_DATE: TableDef = TableDef {
    name: "dim_date",
    columns: &[
        ColumnDef::new("date_key", "INTEGER NOT NULL"),
        ColumnDef::new("full_date", "TEXT NOT NULL UNIQUE"),
        ColumnDef::new("year", "INTEGER NOT NULL"),
        ColumnDef::new("month", "INTEGER NOT NULL"),
        ColumnDef::new("day", "INTEGER NOT NULL"),
        ColumnDef::new("quarter", "INTEGER NOT NULL"),
        ColumnDef::new("day_of_week", "INTEGER NOT NULL"),
        ColumnDef::new("day_name", "TEXT NOT NULL"),
        ColumnDef::new("month_name", "TEXT NOT NULL"),
        ColumnDef::new("is_weekend", "INTEGER NOT NULL"),
        ColumnDef::new("updated_at", "TEXT NOT NULL"),
    ],
    key: &["date_key"],
};

pub const DIM_PRODUCT: TableDef = TableDef {
    name: "dim_product",
    columns: &[
        ColumnDef::new("product_key", "INTEGER NOT NULL"),
        ColumnDef::new("stock_code", "TEXT NOT NULL UNIQUE"),
        ColumnDef::new("description", "TEXT NOT NULL"),
        ColumnDef::new("product_category", "TEXT NOT NULL"),
        ColumnDef::new("updated_at", "TEXT NOT NULL"),
    ],
    key: &["product_key"],
};

pub const DIM_COUNTRY: TableDef = TableDef {
    name: "dim_country",
    columns: &[
        ColumnDef::new("country_key", "INTEGER NOT NULL"),
        ColumnDef::new("country_name", "TEXT NOT NULL UNIQUE"),
        ColumnDef::new("region", "TEXT NOT NULL"),
        ColumnDef::new("updated_at", "TEXT NOT NULL"),
    ],
    key: &["country_key"],
};

pub const FACT_SALES: TableDef = TableDef {
    name: "fact_sales",
    columns: &[
        ColumnDef::new("line_fingerprint", "TEXT NOT NULL"),
        ColumnDef::new("customer_key", "INTEGER NOT NULL"),
        ColumnDef::new("date_key", "INTEGER NOT NULL"),
        ColumnDef::new("product_key", "INTEGER NOT NULL"),
        ColumnDef::new("country_key", "INTEGER NOT NULL"),
        ColumnDef::new("invoice_no", "TEXT NOT NULL"),
        ColumnDef::new("quantity", "INTEGER"),
        ColumnDef::new("unit_price", "TEXT"),
        ColumnDef::new("total_amount", "TEXT NOT NULL"),
        ColumnDef::new("rolling_7d_sales", "TEXT"),
        ColumnDef::new("is_valid", "INTEGER NOT NULL"),
        ColumnDef::new("source_row", "INTEGER NOT NULL"),
        ColumnDef::new("loaded_at", "TEXT NOT NULL"),
    ],
    key: &["line_fingerprint"],
};
