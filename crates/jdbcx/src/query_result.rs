//! Per-call result sink.
//!
//! One [`QueryResult`] lives per statement call. The expansion engine
//! populates the result-set slot on a direct-query short-circuit, the
//! statement layer populates it (and the generated-keys slot) after
//! dispatch, and listener warnings accumulate in order.

use crate::error::{Error, Result};
use crate::rows::Rows;

#[derive(Default)]
pub struct QueryResult {
    rows: Option<Box<dyn Rows>>,
    generated_keys: Option<Box<dyn Rows>>,
    warnings: Vec<Error>,
}

impl QueryResult {
    pub fn new() -> Self {
        QueryResult::default()
    }

    /// Publishes the result set. Publishing twice breaks an internal
    /// invariant and is reported as a configuration error.
    pub fn set_rows(&mut self, rows: Box<dyn Rows>) -> Result<()> {
        if self.rows.is_some() {
            return Err(Error::config("result set already populated"));
        }
        self.rows = Some(rows);
        Ok(())
    }

    pub fn has_rows(&self) -> bool {
        self.rows.is_some()
    }

    pub fn take_rows(&mut self) -> Option<Box<dyn Rows>> {
        self.rows.take()
    }

    /// Publishes generated keys; the same publish-once rule applies.
    pub fn set_generated_keys(&mut self, keys: Box<dyn Rows>) -> Result<()> {
        if self.generated_keys.is_some() {
            return Err(Error::config("generated keys already populated"));
        }
        self.generated_keys = Some(keys);
        Ok(())
    }

    pub fn take_generated_keys(&mut self) -> Option<Box<dyn Rows>> {
        self.generated_keys.take()
    }

    /// Appends a warning; order is preserved.
    pub fn add_warning(&mut self, warning: Error) {
        debug_assert!(warning.is_warning());
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Error] {
        &self.warnings
    }

    /// Resets the sink for the next call.
    pub fn reset(&mut self) {
        self.rows = None;
        self.generated_keys = None;
        self.warnings.clear();
    }
}
