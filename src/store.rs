//! Tabular Store - the persisted campaign table
//!
//! A single relation, replaced wholesale on every upload. Every operation opens
//! its own SQLite connection and releases it before returning; replacement runs
//! inside one transaction and is serialized against reads by an in-process gate,
//! so a reader sees either the old table or the new one.

use crate::dataset::sql_type_for;
use crate::error::{CopilotError, Result};
use crate::execution::result::{CellValue, QueryResult, ResultSource};
use polars::prelude::*;
use rusqlite::config::DbConfig;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default name of the persisted relation
pub const DEFAULT_TABLE: &str = "campaign_data";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Quote an identifier for SQLite, doubling embedded quotes
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Storage and read-only querying of the campaign table
pub trait TabularStore: Send + Sync {
    /// Name of the persisted relation
    fn table_name(&self) -> &str;

    /// Replace the persisted table with `frame`. Returns the number of rows stored.
    /// An empty frame is rejected with [`CopilotError::EmptyDataset`].
    fn store_table(&self, frame: &DataFrame) -> Result<usize>;

    /// Run a read-only query. A missing table is reported as
    /// [`CopilotError::MissingTable`], any other failure as `MalformedQuery` or `Database`.
    fn run_query(&self, sql: &str) -> Result<QueryResult>;

    /// `CREATE TABLE`-style description of the persisted table
    fn describe_schema(&self) -> Result<String>;

    /// First `n` rows rendered as text
    fn sample_rows(&self, n: usize) -> Result<String>;
}

/// SQLite-backed store
pub struct SqliteStore {
    path: PathBuf,
    table: String,
    gate: RwLock<()>,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_table(path, DEFAULT_TABLE)
    }

    pub fn open_with_table(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Touch the file so read-only connections can open it later
        let conn = Connection::open(&path)
            .map_err(|e| CopilotError::Database(format!("Failed to open database {:?}: {}", path, e)))?;
        drop(conn);

        info!("Opened campaign store at {:?} (table {})", path, table);
        Ok(Self {
            path,
            table: table.to_string(),
            gate: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// End of session. Connections are per call, so there is nothing left to flush.
    pub fn close(self) {
        info!("Closed campaign store at {:?}", self.path);
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(|e| CopilotError::Database(format!("Failed to open database: {}", e)))?;
        configure(&conn)?;
        Ok(conn)
    }

    fn connect_read_only(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| CopilotError::Database(format!("Failed to open database: {}", e)))?;
        configure(&conn)?;
        Ok(conn)
    }

    fn table_exists(&self, conn: &Connection) -> Result<bool> {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        let exists = stmt.exists([&self.table])?;
        Ok(exists)
    }

    fn query_with(&self, conn: &Connection, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CopilotError::MalformedQuery(e.to_string()))?;
        if !stmt.readonly() {
            return Err(CopilotError::MalformedQuery("statement is not read-only".to_string()));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt
            .query([])
            .map_err(|e| CopilotError::MalformedQuery(e.to_string()))?;
        while let Some(row) = cursor
            .next()
            .map_err(|e| CopilotError::MalformedQuery(e.to_string()))?
        {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| CopilotError::MalformedQuery(e.to_string()))?;
                values.push(CellValue::from(value));
            }
            rows.push(values);
        }

        let elapsed = start.elapsed().as_millis() as u64;
        Ok(QueryResult::new(columns, rows, ResultSource::Store, elapsed))
    }

    fn read_gate(&self) -> Result<std::sync::RwLockReadGuard<'_, ()>> {
        self.gate
            .read()
            .map_err(|_| CopilotError::Database("store lock poisoned".to_string()))
    }
}

impl TabularStore for SqliteStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn store_table(&self, frame: &DataFrame) -> Result<usize> {
        if frame.height() == 0 || frame.width() == 0 {
            warn!("Refusing to store an empty dataset");
            return Err(CopilotError::EmptyDataset);
        }

        let table = quote_identifier(&self.table);
        let column_defs: Vec<String> = frame
            .get_columns()
            .iter()
            .map(|s| format!("{} {}", quote_identifier(s.name()), sql_type_for(s.dtype())))
            .collect();
        let column_names: Vec<String> = frame.get_columns().iter().map(|s| quote_identifier(s.name())).collect();
        let placeholders: Vec<String> = (1..=frame.width()).map(|i| format!("?{}", i)).collect();
        let create_sql = format!("CREATE TABLE {} ({})", table, column_defs.join(", "));
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            column_names.join(", "),
            placeholders.join(", ")
        );

        let _guard = self
            .gate
            .write()
            .map_err(|_| CopilotError::Database("store lock poisoned".to_string()))?;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
        tx.execute(&create_sql, [])?;
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            let columns = frame.get_columns();
            for row_idx in 0..frame.height() {
                let mut values = Vec::with_capacity(columns.len());
                for series in columns {
                    values.push(sql_value(series.get(row_idx)?));
                }
                stmt.execute(rusqlite::params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;

        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        if count as usize != frame.height() {
            return Err(CopilotError::Database(format!(
                "Stored {} rows but dataset has {}",
                count,
                frame.height()
            )));
        }
        info!("Stored {} rows into {}", count, self.table);
        Ok(count as usize)
    }

    fn run_query(&self, sql: &str) -> Result<QueryResult> {
        let _guard = self.read_gate()?;
        let conn = self.connect_read_only()?;
        if !self.table_exists(&conn)? {
            return Err(CopilotError::MissingTable(self.table.clone()));
        }
        debug!("Executing SQL on store: {}", sql);
        let result = self.query_with(&conn, sql)?;
        debug!("Store returned {} rows in {}ms", result.row_count, result.execution_time_ms);
        Ok(result)
    }

    fn describe_schema(&self) -> Result<String> {
        let _guard = self.read_gate()?;
        let conn = self.connect_read_only()?;
        if !self.table_exists(&conn)? {
            return Err(CopilotError::MissingTable(self.table.clone()));
        }
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(&self.table)))?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(CopilotError::Database(format!("No columns found in table '{}'", self.table)));
        }

        let mut lines = vec![format!("CREATE TABLE {} (", self.table)];
        for (name, sql_type) in columns {
            lines.push(format!("  {} {},", quote_identifier(&name), sql_type));
        }
        lines.push(");".to_string());
        Ok(lines.join("\n"))
    }

    fn sample_rows(&self, n: usize) -> Result<String> {
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(&self.table), n);
        Ok(self.run_query(&sql)?.to_markdown())
    }
}

/// Per-connection settings. Double-quoted text is always an identifier, so a
/// quoted column that does not exist is an error rather than a string literal.
fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
    Ok(())
}

fn sql_value(value: AnyValue<'_>) -> SqlValue {
    match CellValue::from(value) {
        CellValue::Null => SqlValue::Null,
        CellValue::Boolean(b) => SqlValue::Integer(b as i64),
        CellValue::Integer(i) => SqlValue::Integer(i),
        CellValue::Real(f) => SqlValue::Real(f),
        CellValue::Text(s) => SqlValue::Text(s),
    }
}
