//! Conversion between [`Value`]/[`Row`] and SQLite types.
//!
//! Parameters are bound by reference through [`SqlParam`] so row values are
//! never cloned on their way into a statement. Result rows are read column by
//! column into an ordered [`Row`] keyed by the statement's column names.

use normsql_core::{Row, Value};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ParamsFromIter, ToSql, params_from_iter};

/// Borrowed [`Value`] bound as a statement parameter.
pub(crate) struct SqlParam<'a>(pub(crate) &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self.0 {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

/// Positional parameters for a list of values.
pub(crate) fn params<'a, I>(values: I) -> ParamsFromIter<impl Iterator<Item = SqlParam<'a>>>
where
    I: IntoIterator<Item = &'a Value>,
{
    params_from_iter(values.into_iter().map(SqlParam))
}

/// Copies a column value out of the engine.
pub(crate) fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Reads one result row into an ordered [`Row`].
pub(crate) fn row_from_sql(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut record = Row::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        record.insert(column.as_str(), value_from_ref(row.get_ref(index)?));
    }
    Ok(record)
}
