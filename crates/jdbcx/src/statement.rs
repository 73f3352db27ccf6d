//! Expansion-aware statement layer.
//!
//! A [`WrappedStatement`] runs the expansion engine over the submitted
//! text, fans the expanded queries out to the backend, and combines the
//! returned result sets into one logical cursor. A [`WrappedConnection`]
//! ties statements to their [`ConnectionManager`]; both implement the
//! backend traits so wrapped connections compose.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::ConfigManager;
use crate::driver::{
    BackendConnection, BackendDriver, BackendStatement, ConnectionMetaData, ExecuteOutcome,
    StatementAttributes,
};
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use crate::manager::ConnectionManager;
use crate::metadata::DatabaseMetaData;
use crate::parser::{ParsedQuery, QueryParser};
use crate::properties::Properties;
use crate::query_builder::QueryBuilder;
use crate::query_result::QueryResult;
use crate::rows::{Row, Rows, Schema, VecOfRows};

/// Result sets combined into one cursor: children drain in order under the
/// first child's schema. Column counts must agree.
#[derive(Debug)]
pub struct CombinedRows {
    schema: Schema,
    children: VecDeque<Box<dyn Rows>>,
}

impl CombinedRows {
    pub fn try_new(children: Vec<Box<dyn Rows>>) -> Result<Self> {
        let schema = children
            .first()
            .map(|c| c.schema().clone())
            .unwrap_or_default();
        for child in &children {
            if !schema.compatible_with(child.schema()) {
                return Err(Error::config(format!(
                    "cannot combine result sets: {} columns vs {}",
                    schema.num_columns(),
                    child.schema().num_columns()
                )));
            }
        }
        Ok(CombinedRows {
            schema,
            children: children.into(),
        })
    }
}

impl Rows for CombinedRows {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        loop {
            let front = self.children.front_mut()?;
            match front.next_row() {
                Some(row) => return Some(row),
                None => {
                    self.children.pop_front();
                }
            }
        }
    }
}

/// A connection whose statements rewrite queries before execution.
pub struct WrappedConnection {
    manager: Arc<ConnectionManager>,
}

impl WrappedConnection {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        WrappedConnection { manager }
    }

    /// Connects and wraps in one step.
    pub fn open(
        driver: Arc<dyn BackendDriver>,
        registry: Arc<ExtensionRegistry>,
        config: Arc<dyn ConfigManager>,
        url: &str,
        props: &Properties,
    ) -> Result<Self> {
        let manager = ConnectionManager::try_new(driver, registry, config, url, props)?;
        Ok(WrappedConnection::new(Arc::new(manager)))
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn create_wrapped_statement(&self) -> Result<WrappedStatement> {
        WrappedStatement::new(self.manager.clone())
    }

    /// The metadata facade over this connection's extensions.
    pub fn metadata_facade(&self) -> DatabaseMetaData<'_> {
        DatabaseMetaData::new(self.manager.as_ref())
    }
}

impl BackendConnection for WrappedConnection {
    fn create_statement(&mut self) -> Result<Box<dyn BackendStatement>> {
        Ok(Box::new(WrappedStatement::new(self.manager.clone())?))
    }

    fn metadata(&self) -> Result<ConnectionMetaData> {
        Ok(self.manager.get_metadata())
    }

    fn cancel(&mut self) -> Result<()> {
        self.manager.cancel()
    }

    fn close(&mut self) -> Result<()> {
        self.manager.close()
    }

    fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    fn debug_fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WrappedConnection({})", self.manager.url())
    }
}

/// The expansion-aware statement.
pub struct WrappedStatement {
    manager: Arc<ConnectionManager>,
    backend: Box<dyn BackendStatement>,
    attrs: StatementAttributes,
    result: QueryResult,
    update_count: i64,
}

impl WrappedStatement {
    pub fn new(manager: Arc<ConnectionManager>) -> Result<Self> {
        let backend = manager.new_backend_statement()?;
        let attrs = backend.attributes();
        Ok(WrappedStatement {
            manager,
            backend,
            attrs,
            result: QueryResult::new(),
            update_count: 0,
        })
    }

    fn parse_template(&self, text: &str) -> Result<ParsedQuery> {
        QueryParser::new(self.manager.tag(), IndexMap::new())
            .with_config(self.manager.config().as_ref())
            .parse(text)
    }

    /// Expands the template into concrete queries, resetting the sink. An
    /// empty list with a populated sink is the direct-query short-circuit.
    fn expand(&mut self, text: &str) -> Result<Vec<String>> {
        self.result.reset();
        let parsed = self.parse_template(text)?;
        let mut ctx = self.manager.create_context();
        let mut builder = QueryBuilder::new(&parsed, &self.manager, &mut ctx);
        builder.build(&mut self.result)
    }

    /// Runs one expanded query, honoring the dialect's statement-reuse
    /// rule: a fresh backend statement (with attributes copied) per query
    /// when one statement cannot carry several result sets.
    fn run_one<T>(
        &mut self,
        query: &str,
        reuse: bool,
        keys: &mut Vec<Box<dyn Rows>>,
        run: impl Fn(&mut dyn BackendStatement, &str) -> Result<T>,
    ) -> Result<T> {
        if reuse {
            let out = run(self.backend.as_mut(), query)?;
            if let Some(generated) = self.backend.generated_keys()? {
                keys.push(generated);
            }
            Ok(out)
        } else {
            let mut stmt = self.manager.new_backend_statement()?;
            stmt.set_attributes(self.attrs)?;
            let out = run(stmt.as_mut(), query)?;
            if let Some(generated) = stmt.generated_keys()? {
                keys.push(generated);
            }
            stmt.close()?;
            Ok(out)
        }
    }

    /// Executes the template. Returns true when a result set is available
    /// through [`WrappedStatement::take_rows`].
    pub fn execute(&mut self, text: &str) -> Result<bool> {
        let queries = self.expand(text)?;
        if queries.is_empty() {
            if self.result.has_rows() {
                self.update_count = -1;
                return Ok(true);
            }
            self.update_count = 0;
            return Ok(false);
        }
        let reuse = self
            .manager
            .get_dialect()
            .support_multiple_result_sets_per_statement();
        let mut row_sets: Vec<Box<dyn Rows>> = Vec::new();
        let mut key_sets: Vec<Box<dyn Rows>> = Vec::new();
        let mut total: i64 = 0;
        let mut saw_rows = false;
        for query in &queries {
            let outcome = self
                .run_one(query, reuse, &mut key_sets, |stmt, q| stmt.execute(q))
                .map_err(|e| with_queries(e, &queries))?;
            match outcome {
                ExecuteOutcome::RowSet(rows) => {
                    saw_rows = true;
                    row_sets.push(rows);
                }
                ExecuteOutcome::UpdateCount(count) => total = total.saturating_add(count),
            }
        }
        if !key_sets.is_empty() {
            self.result
                .set_generated_keys(Box::new(CombinedRows::try_new(key_sets)?))?;
        }
        if saw_rows {
            self.result
                .set_rows(Box::new(CombinedRows::try_new(row_sets)?))?;
            self.update_count = -1;
            Ok(true)
        } else {
            self.update_count = total;
            Ok(false)
        }
    }

    /// Executes the template, combining every produced result set.
    pub fn execute_query(&mut self, text: &str) -> Result<Box<dyn Rows>> {
        let queries = self.expand(text)?;
        if queries.is_empty() {
            if let Some(rows) = self.result.take_rows() {
                self.update_count = -1;
                return Ok(rows);
            }
            self.update_count = 0;
            return Ok(Box::new(VecOfRows::empty(Schema::default())));
        }
        let reuse = self
            .manager
            .get_dialect()
            .support_multiple_result_sets_per_statement();
        let mut row_sets: Vec<Box<dyn Rows>> = Vec::new();
        let mut key_sets: Vec<Box<dyn Rows>> = Vec::new();
        for query in &queries {
            let rows = self
                .run_one(query, reuse, &mut key_sets, |stmt, q| stmt.execute_query(q))
                .map_err(|e| with_queries(e, &queries))?;
            row_sets.push(rows);
        }
        self.update_count = -1;
        Ok(Box::new(CombinedRows::try_new(row_sets)?))
    }

    /// Executes the template without opening a result set; update counts
    /// sum up.
    pub fn execute_update(&mut self, text: &str) -> Result<i64> {
        let queries = self.expand(text)?;
        if queries.is_empty() {
            // a direct result is not for user inspection here
            self.result.take_rows();
            self.update_count = 0;
            return Ok(0);
        }
        let reuse = self
            .manager
            .get_dialect()
            .support_multiple_result_sets_per_statement();
        let mut key_sets: Vec<Box<dyn Rows>> = Vec::new();
        let mut total: i64 = 0;
        for query in &queries {
            let count = self
                .run_one(query, reuse, &mut key_sets, |stmt, q| stmt.execute_update(q))
                .map_err(|e| with_queries(e, &queries))?;
            total = total.saturating_add(count);
        }
        if !key_sets.is_empty() {
            self.result
                .set_generated_keys(Box::new(CombinedRows::try_new(key_sets)?))?;
        }
        self.update_count = total;
        Ok(total)
    }

    /// Single-string expansion; the result goes to the backend batch.
    pub fn add_batch(&mut self, text: &str) -> Result<()> {
        self.result.reset();
        let parsed = self.parse_template(text)?;
        let mut ctx = self.manager.create_context();
        let batched =
            QueryBuilder::new(&parsed, &self.manager, &mut ctx).build_single(&mut self.result)?;
        self.backend.add_batch(&batched)
    }

    /// Affected-row count of the last execution; `-1` when the last
    /// execution produced a result set instead.
    pub fn update_count(&self) -> i64 {
        self.update_count
    }

    pub fn take_rows(&mut self) -> Option<Box<dyn Rows>> {
        self.result.take_rows()
    }

    pub fn take_generated_keys(&mut self) -> Option<Box<dyn Rows>> {
        self.result.take_generated_keys()
    }

    pub fn warnings(&self) -> &[Error] {
        self.result.warnings()
    }
}

fn with_queries(e: Error, queries: &[String]) -> Error {
    match e {
        Error::Backend {
            message,
            queries: existing,
        } if existing.is_empty() => Error::backend(message, queries.to_vec()),
        other => other,
    }
}

impl BackendStatement for WrappedStatement {
    fn execute(&mut self, sql: &str) -> Result<ExecuteOutcome> {
        if WrappedStatement::execute(self, sql)? {
            let rows = self
                .take_rows()
                .unwrap_or_else(|| Box::new(VecOfRows::empty(Schema::default())));
            Ok(ExecuteOutcome::RowSet(rows))
        } else {
            Ok(ExecuteOutcome::UpdateCount(self.update_count))
        }
    }

    fn execute_query(&mut self, sql: &str) -> Result<Box<dyn Rows>> {
        WrappedStatement::execute_query(self, sql)
    }

    fn execute_update(&mut self, sql: &str) -> Result<i64> {
        WrappedStatement::execute_update(self, sql)
    }

    fn add_batch(&mut self, sql: &str) -> Result<()> {
        WrappedStatement::add_batch(self, sql)
    }

    fn generated_keys(&mut self) -> Result<Option<Box<dyn Rows>>> {
        Ok(self.take_generated_keys())
    }

    fn attributes(&self) -> StatementAttributes {
        self.attrs
    }

    fn set_attributes(&mut self, attrs: StatementAttributes) -> Result<()> {
        self.attrs = attrs;
        self.backend.set_attributes(attrs)
    }

    fn cancel(&mut self) -> Result<()> {
        self.backend.cancel()
    }

    fn close(&mut self) -> Result<()> {
        self.backend.close()
    }

    fn debug_fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "WrappedStatement({})", self.manager.url())
    }
}
