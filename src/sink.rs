// 🗄️ Relational Sink - schema-qualified table writes and reads
// SQLite implementation: one attached database per schema, WAL on disk.

use crate::error::SinkError;
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, DatabaseName, ToSql};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

// ============================================================================
// CELLS & ROWS
// ============================================================================

/// One value in a row. Money travels as decimal text so it never touches f64.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Cell::Int(v) => Some(Decimal::from(*v)),
            Cell::Real(v) => Decimal::from_str(&v.to_string()).ok(),
            Cell::Text(s) => Decimal::from_str(s.trim()).ok(),
            Cell::Null => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_i64().map(|v| v != 0)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<u64> for Cell {
    fn from(v: u64) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<u32> for Cell {
    fn from(v: u32) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Real(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<Decimal> for Cell {
    fn from(v: Decimal) -> Self {
        Cell::Text(v.to_string())
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Cell::Null)
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Owned(Value::Null),
            Cell::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Cell::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Cell {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(v) => Cell::Int(v),
            ValueRef::Real(v) => Cell::Real(v),
            ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
        })
    }
}

pub type Row = BTreeMap<String, Cell>;

static NULL_CELL: Cell = Cell::Null;

// ============================================================================
// TABLE DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    /// SQLite declared type. Empty keeps whatever type the value arrives with.
    pub sql_type: &'static str,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        ColumnDef { name, sql_type }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// Primary key columns; upserts conflict on these.
    pub key: &'static [&'static str],
}

impl TableDef {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop existing contents, then insert.
    Replace,
    /// Insert; key conflicts are errors.
    Append,
    /// Insert or overwrite non-key columns on key conflict.
    Upsert,
}

/// Equality filter on a single column.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub value: Cell,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Cell>) -> Self {
        Filter {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

// ============================================================================
// SINK TRAIT
// ============================================================================

pub trait Sink {
    /// Write rows into `schema.table`, creating the table if needed.
    fn write(
        &mut self,
        schema: &str,
        table: &TableDef,
        rows: &[Row],
        mode: WriteMode,
    ) -> Result<usize, SinkError>;

    /// Read rows in insertion order. A table that does not exist yet reads as empty.
    fn read(
        &self,
        schema: &str,
        table: &TableDef,
        filter: Option<&Filter>,
    ) -> Result<Vec<Row>, SinkError>;

    fn count(
        &self,
        schema: &str,
        table: &TableDef,
        filter: Option<&Filter>,
    ) -> Result<usize, SinkError> {
        Ok(self.read(schema, table, filter)?.len())
    }
}

// ============================================================================
// SQLITE SINK
// ============================================================================

pub struct SqliteSink {
    conn: Connection,
    location: String,
    schemas: HashSet<String>,
}

impl SqliteSink {
    /// Open a file-backed store. Each schema lives in `<dir>/<schema>.db`.
    pub fn open(dir: &Path, schemas: &[&str]) -> Result<Self, SinkError> {
        let location = dir.display().to_string();
        fs::create_dir_all(dir).map_err(|e| SinkError::Connection {
            location: location.clone(),
            source: Box::new(e),
        })?;

        let conn = Connection::open(dir.join("catalog.db")).map_err(|e| SinkError::Connection {
            location: location.clone(),
            source: Box::new(e),
        })?;

        let mut sink = SqliteSink {
            conn,
            location,
            schemas: HashSet::new(),
        };
        for schema in schemas {
            let path = dir.join(format!("{}.db", schema));
            sink.attach(schema, Some(&path))?;
        }

        info!(location = %sink.location, schemas = schemas.len(), "opened sqlite store");
        Ok(sink)
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory(schemas: &[&str]) -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(|e| SinkError::Connection {
            location: ":memory:".to_string(),
            source: Box::new(e),
        })?;

        let mut sink = SqliteSink {
            conn,
            location: ":memory:".to_string(),
            schemas: HashSet::new(),
        };
        for schema in schemas {
            sink.attach(schema, None)?;
        }
        Ok(sink)
    }

    fn attach(&mut self, schema: &str, path: Option<&PathBuf>) -> Result<(), SinkError> {
        check_identifier(schema)?;
        if self.schemas.contains(schema) {
            return Ok(());
        }

        let target = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string());
        self.conn
            .execute(&format!("ATTACH DATABASE ?1 AS {}", quote(schema)), [&target])
            .map_err(|e| SinkError::Connection {
                location: target.clone(),
                source: Box::new(e),
            })?;

        // Enable WAL mode for crash recovery on disk-backed schemas
        if path.is_some() {
            self.conn
                .pragma_update(Some(DatabaseName::Attached(schema)), "journal_mode", "WAL")
                .map_err(|e| SinkError::Connection {
                    location: target.clone(),
                    source: Box::new(e),
                })?;
        }

        debug!(schema, target = %target, "attached schema");
        self.schemas.insert(schema.to_string());
        Ok(())
    }

    fn check_schema(&self, schema: &str) -> Result<(), SinkError> {
        check_identifier(schema)?;
        if !self.schemas.contains(schema) {
            return Err(SinkError::UnknownSchema(schema.to_string()));
        }
        Ok(())
    }

    fn table_exists(&self, schema: &str, table: &TableDef) -> Result<bool, SinkError> {
        let count: i64 = self
            .conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                    quote(schema)
                ),
                [table.name],
                |row| row.get(0),
            )
            .map_err(|e| query_error(schema, table, e))?;
        Ok(count > 0)
    }

    fn ensure_table(&self, schema: &str, table: &TableDef) -> Result<(), SinkError> {
        check_identifier(table.name)?;
        let mut defs = Vec::with_capacity(table.columns.len() + 1);
        for column in table.columns {
            check_identifier(column.name)?;
            if column.sql_type.is_empty() {
                defs.push(quote(column.name));
            } else {
                defs.push(format!("{} {}", quote(column.name), column.sql_type));
            }
        }
        if !table.key.is_empty() {
            let key: Vec<String> = table.key.iter().map(|k| quote(k)).collect();
            defs.push(format!("PRIMARY KEY ({})", key.join(", ")));
        }

        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    qualified(schema, table),
                    defs.join(", ")
                ),
                [],
            )
            .map_err(|e| query_error(schema, table, e))?;
        Ok(())
    }
}

impl Sink for SqliteSink {
    fn write(
        &mut self,
        schema: &str,
        table: &TableDef,
        rows: &[Row],
        mode: WriteMode,
    ) -> Result<usize, SinkError> {
        self.check_schema(schema)?;
        self.ensure_table(schema, table)?;
        let sql = insert_sql(schema, table, mode)?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| query_error(schema, table, e))?;

        if mode == WriteMode::Replace {
            tx.execute(&format!("DELETE FROM {}", qualified(schema, table)), [])
                .map_err(|e| query_error(schema, table, e))?;
        }

        {
            let mut stmt = tx.prepare(&sql).map_err(|e| query_error(schema, table, e))?;
            for row in rows {
                let values = table
                    .columns
                    .iter()
                    .map(|c| row.get(c.name).unwrap_or(&NULL_CELL));
                stmt.execute(params_from_iter(values))
                    .map_err(|e| query_error(schema, table, e))?;
            }
        }

        tx.commit().map_err(|e| query_error(schema, table, e))?;

        debug!(schema, table = table.name, rows = rows.len(), ?mode, "wrote rows");
        Ok(rows.len())
    }

    fn read(
        &self,
        schema: &str,
        table: &TableDef,
        filter: Option<&Filter>,
    ) -> Result<Vec<Row>, SinkError> {
        self.check_schema(schema)?;
        if !self.table_exists(schema, table)? {
            return Ok(Vec::new());
        }

        let columns: Vec<String> = table.column_names().map(quote).collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            qualified(schema, table)
        );
        let mut params: Vec<&Cell> = Vec::new();
        if let Some(filter) = filter {
            check_identifier(&filter.column)?;
            sql.push_str(&format!(" WHERE {} = ?1", quote(&filter.column)));
            params.push(&filter.value);
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| query_error(schema, table, e))?;

        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let mut out = Row::new();
                for (i, column) in table.columns.iter().enumerate() {
                    out.insert(column.name.to_string(), row.get::<_, Cell>(i)?);
                }
                Ok(out)
            })
            .map_err(|e| query_error(schema, table, e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| query_error(schema, table, e))?;

        Ok(rows)
    }

    fn count(
        &self,
        schema: &str,
        table: &TableDef,
        filter: Option<&Filter>,
    ) -> Result<usize, SinkError> {
        self.check_schema(schema)?;
        if !self.table_exists(schema, table)? {
            return Ok(0);
        }

        let mut sql = format!("SELECT COUNT(*) FROM {}", qualified(schema, table));
        let mut params: Vec<&Cell> = Vec::new();
        if let Some(filter) = filter {
            check_identifier(&filter.column)?;
            sql.push_str(&format!(" WHERE {} = ?1", quote(&filter.column)));
            params.push(&filter.value);
        }

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))
            .map_err(|e| query_error(schema, table, e))?;
        Ok(count as usize)
    }
}

// ============================================================================
// SQL HELPERS
// ============================================================================

fn check_identifier(name: &str) -> Result<(), SinkError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidIdentifier(name.to_string()))
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

fn qualified(schema: &str, table: &TableDef) -> String {
    format!("{}.{}", quote(schema), quote(table.name))
}

fn query_error(schema: &str, table: &TableDef, source: rusqlite::Error) -> SinkError {
    SinkError::Query {
        schema: schema.to_string(),
        table: table.name.to_string(),
        source,
    }
}

fn insert_sql(schema: &str, table: &TableDef, mode: WriteMode) -> Result<String, SinkError> {
    let columns: Vec<String> = table.column_names().map(quote).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(schema, table),
        columns.join(", "),
        placeholders.join(", ")
    );

    if mode == WriteMode::Upsert {
        if table.key.is_empty() {
            return Err(SinkError::MissingKey {
                schema: schema.to_string(),
                table: table.name.to_string(),
            });
        }
        let key: Vec<String> = table.key.iter().map(|k| quote(k)).collect();
        let updates: Vec<String> = table
            .column_names()
            .filter(|c| !table.key.contains(c))
            .map(|c| format!("{} = excluded.{}", quote(c), quote(c)))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", key.join(", ")));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                key.join(", "),
                updates.join(", ")
            ));
        }
    }

    Ok(sql)
}
