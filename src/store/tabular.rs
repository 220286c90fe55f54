//! Per-user tabular databases backing spreadsheet uploads.
//!
//! Every user gets their own SQLite file under the configured tabular
//! directory. Uploaded sheets become real tables there, so user-written SQL
//! runs verbatim against the user's own database and never sees anyone
//! else's data. A `_sources` side table maps registered tables back to the
//! file they came from so deletion can drop them.

use std::path::PathBuf;

use rusqlite::{Connection, params};
use serde_json::Value;

use crate::service::types::{ColumnInfo, ServiceError, TableInfo, TablePayload};

/// Raw grid parsed from one sheet of a structured upload.
#[derive(Debug, Clone)]
pub struct SheetGrid {
    /// Header row, possibly blank or duplicated; sanitized at registration.
    pub headers: Vec<String>,
    /// Data rows as unparsed cell strings.
    pub rows: Vec<Vec<String>>,
}

/// Outcome of registering one sheet as a SQL table.
#[derive(Debug, Clone)]
pub struct RegisteredTable {
    /// Final table name as usable in SQL.
    pub name: String,
    /// Sanitized columns with their inferred SQLite types.
    pub columns: Vec<ColumnInfo>,
    /// Number of rows inserted.
    pub row_count: u64,
}

/// Comparison operators accepted by [`TabularStore::filtered_rows`].
pub const FILTER_OPERATORS: [&str; 7] = [">", "<", ">=", "<=", "==", "!=", "contains"];

/// Manages one SQLite database per user for tabular data.
pub struct TabularStore {
    root: PathBuf,
}

impl TabularStore {
    /// Create a store rooted at `root`; the directory is created lazily.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn connect(&self, owner_id: &str) -> Result<Connection, ServiceError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(format!("{owner_id}.db"));
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS _sources (
                table_name TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                source TEXT NOT NULL
            );
            ",
        )?;
        Ok(conn)
    }

    /// Register one sheet as a table, replacing any previous table of the same name.
    pub fn register_sheet(
        &self,
        owner_id: &str,
        file_id: &str,
        source: &str,
        desired_name: &str,
        grid: &SheetGrid,
    ) -> Result<RegisteredTable, ServiceError> {
        let table = sanitize_table_name(desired_name);
        let columns = sanitize_column_names(&grid.headers);
        if columns.is_empty() {
            return Err(ServiceError::InvalidInput(format!(
                "Sheet '{desired_name}' has no columns"
            )));
        }
        let types = infer_column_types(&columns, &grid.rows);

        let mut conn = self.connect(owner_id)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM _sources WHERE table_name = ?1",
            params![table],
        )?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\""))?;

        let column_defs: Vec<String> = columns
            .iter()
            .zip(types.iter())
            .map(|(name, ty)| format!("\"{name}\" {ty}"))
            .collect();
        tx.execute_batch(&format!(
            "CREATE TABLE \"{table}\" ({})",
            column_defs.join(", ")
        ))?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("?{n}")).collect();
        let insert_sql = format!(
            "INSERT INTO \"{table}\" VALUES ({})",
            placeholders.join(", ")
        );
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            for row in &grid.rows {
                let values: Vec<rusqlite::types::Value> = (0..columns.len())
                    .map(|idx| cell_to_sql(row.get(idx), types[idx]))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(values))?;
            }
        }

        tx.execute(
            "INSERT INTO _sources (table_name, file_id, source) VALUES (?1, ?2, ?3)",
            params![table, file_id, source],
        )?;
        tx.commit()?;

        let registered = RegisteredTable {
            name: table,
            columns: columns
                .into_iter()
                .zip(types)
                .map(|(name, ty)| ColumnInfo {
                    name,
                    data_type: ty.to_string(),
                })
                .collect(),
            row_count: grid.rows.len() as u64,
        };
        tracing::info!(
            table = %registered.name,
            rows = registered.row_count,
            source,
            "Registered tabular sheet"
        );
        Ok(registered)
    }

    /// Execute a read-only SELECT statement against the user's database.
    pub fn execute_select(&self, owner_id: &str, sql: &str) -> Result<TablePayload, ServiceError> {
        if !sql.trim().to_uppercase().starts_with("SELECT") {
            return Err(ServiceError::InvalidInput("Invalid SQL query".into()));
        }
        let conn = self.connect(owner_id)?;
        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(err) => return Err(self.rewrite_sql_error(owner_id, err)),
        };
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();
        let mapped = stmt.query_map([], |row| {
            let mut cells = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                cells.push(ref_to_json(row.get_ref(idx)?));
            }
            Ok(cells)
        });
        let rows: Vec<Vec<Value>> = match mapped {
            Ok(iter) => match iter.collect() {
                Ok(rows) => rows,
                Err(err) => return Err(self.rewrite_sql_error(owner_id, err)),
            },
            Err(err) => return Err(self.rewrite_sql_error(owner_id, err)),
        };
        Ok(TablePayload { columns, rows })
    }

    /// Names of the user's registered tables, sorted.
    pub fn table_names(&self, owner_id: &str) -> Result<Vec<String>, ServiceError> {
        let conn = self.connect(owner_id)?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sources'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(ServiceError::from)
    }

    /// Table descriptions (name, row count, columns) for the user's database.
    pub fn list_tables(&self, owner_id: &str) -> Result<Vec<TableInfo>, ServiceError> {
        let conn = self.connect(owner_id)?;
        let names = self.table_names(owner_id)?;
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let rows: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |row| {
                    row.get(0)
                })?;
            let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{name}\")"))?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            tables.push(TableInfo {
                name,
                rows: rows as u64,
                columns,
            });
        }
        Ok(tables)
    }

    /// Distinct non-null values of one column, sorted, capped at `limit`.
    pub fn distinct_values(
        &self,
        owner_id: &str,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>, ServiceError> {
        let conn = self.connect(owner_id)?;
        let (table, column) = self.resolve_column(owner_id, &conn, table, column)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT \"{column}\" FROM \"{table}\"
             WHERE \"{column}\" IS NOT NULL ORDER BY 1 LIMIT ?1",
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(match ref_to_json(row.get_ref(0)?) {
                Value::String(text) => text,
                other => other.to_string(),
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(ServiceError::from)
    }

    /// Rows of `table` where `column <operator> value` holds.
    pub fn filtered_rows(
        &self,
        owner_id: &str,
        table: &str,
        column: &str,
        operator: &str,
        value: &str,
    ) -> Result<TablePayload, ServiceError> {
        if !FILTER_OPERATORS.contains(&operator) {
            return Err(ServiceError::InvalidInput(format!(
                "Unsupported operator '{operator}'. Supported operators are: {}.",
                FILTER_OPERATORS.join(", ")
            )));
        }
        let conn = self.connect(owner_id)?;
        let (table, column) = self.resolve_column(owner_id, &conn, table, column)?;

        let column_type = declared_column_type(&conn, &table, &column)?;
        let sql = match operator {
            "contains" => format!(
                "SELECT * FROM \"{table}\" WHERE instr(lower(\"{column}\"), lower(?1)) > 0"
            ),
            "==" => format!("SELECT * FROM \"{table}\" WHERE \"{column}\" = ?1"),
            op => format!("SELECT * FROM \"{table}\" WHERE \"{column}\" {op} ?1"),
        };

        let bound: rusqlite::types::Value = if operator != "contains" && column_type == "REAL" {
            match value.trim().parse::<f64>() {
                Ok(number) => rusqlite::types::Value::Real(number),
                Err(_) => {
                    return Err(ServiceError::InvalidInput(format!(
                        "Could not compare numeric column '{column}' with value '{value}'"
                    )));
                }
            }
        } else {
            rusqlite::types::Value::Text(value.to_string())
        };

        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();
        let rows = stmt
            .query_map(params![bound], |row| {
                let mut cells = Vec::with_capacity(column_count);
                for idx in 0..column_count {
                    cells.push(ref_to_json(row.get_ref(idx)?));
                }
                Ok(cells)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TablePayload { columns, rows })
    }

    /// Drop every table registered for `file_id`, returning the dropped names.
    pub fn drop_tables_for_file(
        &self,
        owner_id: &str,
        file_id: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let mut conn = self.connect(owner_id)?;
        let tx = conn.transaction()?;
        let names: Vec<String> = {
            let mut stmt = tx.prepare("SELECT table_name FROM _sources WHERE file_id = ?1")?;
            let rows = stmt.query_map(params![file_id], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for name in &names {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\""))?;
        }
        tx.execute("DELETE FROM _sources WHERE file_id = ?1", params![file_id])?;
        tx.commit()?;
        Ok(names)
    }

    fn resolve_column(
        &self,
        owner_id: &str,
        conn: &Connection,
        table: &str,
        column: &str,
    ) -> Result<(String, String), ServiceError> {
        let names = self.table_names(owner_id)?;
        let table = match names.iter().find(|name| name.eq_ignore_ascii_case(table)) {
            Some(name) => name.clone(),
            None => return Err(missing_table_error(table, &names)),
        };
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        match columns.iter().find(|name| name.eq_ignore_ascii_case(column)) {
            Some(name) => Ok((table, name.clone())),
            None => Err(ServiceError::InvalidInput(format!(
                "Column '{column}' not found in table '{table}'. Available columns are: {}.",
                columns.join(", ")
            ))),
        }
    }

    fn rewrite_sql_error(&self, owner_id: &str, err: rusqlite::Error) -> ServiceError {
        let message = err.to_string();
        if let Some(position) = message.to_lowercase().find("no such table") {
            let missing = message[position..]
                .split(':')
                .nth(1)
                .map(|rest| rest.trim().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let names = self.table_names(owner_id).unwrap_or_default();
            return missing_table_error(&missing, &names);
        }
        ServiceError::InvalidInput(format!("SQL Error: {message}"))
    }
}

fn declared_column_type(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<String, ServiceError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;
    for row in rows {
        let (name, declared) = row?;
        if name == column {
            return Ok(declared);
        }
    }
    Ok("TEXT".to_string())
}

fn missing_table_error(missing: &str, available: &[String]) -> ServiceError {
    let suggestion = if available.is_empty() {
        " No tables are currently available. Try uploading some Excel or CSV files first.".to_string()
    } else {
        format!(" Available tables are: {}.", available.join(", "))
    };
    ServiceError::InvalidInput(format!("Table '{missing}' not found.{suggestion}"))
}

/// Sanitize a table name the way sheet registration does.
pub fn sanitize_table_name(name: &str) -> String {
    let mut sanitized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized = format!("t_{sanitized}");
    }
    sanitized
}

/// Sanitize header cells into unique SQL column names.
pub fn sanitize_column_names(headers: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let mut name: String = header
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if name.is_empty() {
            name = format!("col_{}", idx + 1);
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            name = format!("c_{name}");
        }
        if seen.iter().any(|existing| existing == &name) {
            let mut suffix = 1;
            while seen.iter().any(|existing| *existing == format!("{name}_{suffix}")) {
                suffix += 1;
            }
            name = format!("{name}_{suffix}");
        }
        seen.push(name);
    }
    seen
}

fn infer_column_types(columns: &[String], rows: &[Vec<String>]) -> Vec<&'static str> {
    (0..columns.len())
        .map(|idx| {
            let mut any_value = false;
            let numeric = rows.iter().all(|row| match row.get(idx) {
                Some(cell) if !cell.trim().is_empty() => {
                    any_value = true;
                    cell.trim().parse::<f64>().is_ok()
                }
                _ => true,
            });
            if numeric && any_value { "REAL" } else { "TEXT" }
        })
        .collect()
}

fn cell_to_sql(cell: Option<&String>, declared: &str) -> rusqlite::types::Value {
    match cell {
        Some(text) if !text.trim().is_empty() => {
            if declared == "REAL" {
                match text.trim().parse::<f64>() {
                    Ok(number) => rusqlite::types::Value::Real(number),
                    Err(_) => rusqlite::types::Value::Text(text.clone()),
                }
            } else {
                rusqlite::types::Value::Text(text.clone())
            }
        }
        _ => rusqlite::types::Value::Null,
    }
}

fn ref_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::from(i),
        rusqlite::types::ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        rusqlite::types::ValueRef::Text(text) => {
            Value::String(String::from_utf8_lossy(text).into_owned())
        }
        rusqlite::types::ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}
