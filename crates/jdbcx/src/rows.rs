//! Row results produced by extension listeners and backend statements.
//!
//! A [`Rows`] carries a column [`Schema`] and a drain-once row sequence.
//! Two implementations exist: the eagerly materialized [`VecOfRows`] and the
//! iterator-backed [`RowStream`]. The expansion engine consumes only the
//! string form of the first cell of each row; the typed accessors on
//! [`Value`] exist for listener implementations.

use core::fmt;
use std::collections::VecDeque;

use crate::error::Result;

/// A named column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered list of columns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    pub fn of(names: &[&str]) -> Self {
        Schema {
            fields: names.iter().copied().map(Field::new).collect(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn num_columns(&self) -> usize {
        self.fields.len()
    }

    /// Result sets can be combined when their column counts agree.
    pub fn compatible_with(&self, other: &Schema) -> bool {
        self.num_columns() == other.num_columns()
    }
}

/// A string-normalized cell value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Value(String);

impl Value {
    pub fn as_string(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.trim().parse().ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.trim().parse().ok()
    }

    pub fn as_bool(&self) -> bool {
        crate::options::as_bool(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value(value.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of cells.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<Value>,
}

impl Row {
    pub fn new(cells: Vec<Value>) -> Self {
        Row { cells }
    }

    pub fn of<T: Into<Value>, I: IntoIterator<Item = T>>(cells: I) -> Self {
        Row {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }

    pub fn value(&self, index: usize) -> &Value {
        static EMPTY: Value = Value(String::new());
        self.cells.get(index).unwrap_or(&EMPTY)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A drain-once sequence of rows under a schema.
pub trait Rows: Send {
    fn schema(&self) -> &Schema;

    /// Produces the next row, or `None` once drained.
    fn next_row(&mut self) -> Option<Result<Row>>;
}

impl fmt::Debug for dyn Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn Rows({} columns)", self.schema().num_columns())
    }
}

/// Drains every remaining row into memory.
pub fn drain(rows: &mut dyn Rows) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next_row() {
        out.push(row?);
    }
    Ok(out)
}

/// Eagerly materialized rows.
#[derive(Clone, Debug, Default)]
pub struct VecOfRows {
    schema: Schema,
    rows: VecDeque<Row>,
}

impl VecOfRows {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        VecOfRows {
            schema,
            rows: rows.into(),
        }
    }

    /// A zero-row result under the given schema.
    pub fn empty(schema: Schema) -> Self {
        VecOfRows::new(schema, Vec::new())
    }

    /// A one-row, one-column result, the shape a no-output block expands to.
    pub fn single(column: &str, value: impl Into<Value>) -> Self {
        VecOfRows::new(Schema::of(&[column]), vec![Row::of([value.into()])])
    }

    /// One row per string under a one-column schema.
    pub fn from_strings(column: &str, values: Vec<String>) -> Self {
        VecOfRows::new(
            Schema::of(&[column]),
            values.into_iter().map(|v| Row::of([v])).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Rows for VecOfRows {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        self.rows.pop_front().map(Ok)
    }
}

/// Iterator-backed rows, drained as they are produced.
pub struct RowStream {
    schema: Schema,
    iter: Box<dyn Iterator<Item = Result<Row>> + Send>,
}

impl RowStream {
    pub fn new(schema: Schema, iter: Box<dyn Iterator<Item = Result<Row>> + Send>) -> Self {
        RowStream { schema, iter }
    }
}

impl Rows for RowStream {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        self.iter.next()
    }
}
