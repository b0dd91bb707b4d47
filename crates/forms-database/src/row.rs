//! Row model and the synchronous statement helpers that run on the
//! connection thread.

use crate::DatabaseResult;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// One result row: column name to JSON value.
///
/// INTEGER and REAL map to numbers, TEXT to strings, NULL to null and BLOB
/// to a lowercase hex string.
pub type Row = Map<String, Value>;

/// A positional statement parameter.
pub type SqlValue = rusqlite::types::Value;

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub last_insert_id: i64,
    pub rows_affected: usize,
}

pub(crate) fn select(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    limit: Option<usize>,
) -> DatabaseResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(record);

        if limit.is_some_and(|max| out.len() >= max) {
            break;
        }
    }
    Ok(out)
}

pub(crate) fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> DatabaseResult<ExecuteResult> {
    let mut stmt = conn.prepare(sql)?;
    let rows_affected = stmt.execute(params_from_iter(params.iter()))?;
    Ok(ExecuteResult {
        last_insert_id: conn.last_insert_rowid(),
        rows_affected,
    })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}
