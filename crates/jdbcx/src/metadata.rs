//! Metadata facade.
//!
//! Routes the handful of metadata surfaces the shim can answer itself:
//! catalogs map to extension names, schemas and tables come from the
//! matched extensions. Everything else is a fixed-shape empty table.

use crate::manager::ConnectionManager;
use crate::rows::{Row, Schema, VecOfRows};

pub struct DatabaseMetaData<'a> {
    manager: &'a ConnectionManager,
}

impl<'a> DatabaseMetaData<'a> {
    pub fn new(manager: &'a ConnectionManager) -> Self {
        DatabaseMetaData { manager }
    }

    /// One catalog per admitted extension.
    pub fn get_catalogs(&self) -> VecOfRows {
        let rows = self
            .manager
            .registry()
            .list()
            .iter()
            .map(|ext| Row::of([ext.name()]))
            .collect();
        VecOfRows::new(Schema::of(&["TABLE_CAT"]), rows)
    }

    /// Schemas of the extensions matching the catalog filter.
    pub fn get_schemas(&self, catalog: Option<&str>) -> VecOfRows {
        let config = self.manager.config().as_ref();
        let mut rows = Vec::new();
        for ext in self.matched(catalog) {
            for schema in ext.db_schemas(config) {
                rows.push(Row::of([schema, ext.name().to_string()]));
            }
        }
        VecOfRows::new(Schema::of(&["TABLE_SCHEM", "TABLE_CATALOG"]), rows)
    }

    /// Tables of the extensions matching the catalog filter.
    pub fn get_tables(&self, catalog: Option<&str>, schema: Option<&str>) -> VecOfRows {
        let config = self.manager.config().as_ref();
        let mut rows = Vec::new();
        for ext in self.matched(catalog) {
            for table in ext.db_tables(config, schema) {
                rows.push(Row::of([
                    ext.name().to_string(),
                    schema.unwrap_or_default().to_string(),
                    table,
                    "TABLE".to_string(),
                ]));
            }
        }
        VecOfRows::new(
            Schema::of(&["TABLE_CAT", "TABLE_SCHEM", "TABLE_NAME", "TABLE_TYPE"]),
            rows,
        )
    }

    /// The trivial answer for every other metadata surface.
    pub fn empty_table(columns: &[&str]) -> VecOfRows {
        VecOfRows::empty(Schema::of(columns))
    }

    pub fn get_table_types(&self) -> VecOfRows {
        VecOfRows::new(Schema::of(&["TABLE_TYPE"]), vec![Row::of(["TABLE"])])
    }

    pub fn get_columns(&self) -> VecOfRows {
        Self::empty_table(&[
            "TABLE_CAT",
            "TABLE_SCHEM",
            "TABLE_NAME",
            "COLUMN_NAME",
            "DATA_TYPE",
            "TYPE_NAME",
        ])
    }

    pub fn get_procedures(&self) -> VecOfRows {
        Self::empty_table(&["PROCEDURE_CAT", "PROCEDURE_SCHEM", "PROCEDURE_NAME"])
    }

    pub fn get_type_info(&self) -> VecOfRows {
        Self::empty_table(&["TYPE_NAME", "DATA_TYPE", "PRECISION"])
    }

    fn matched(
        &self,
        catalog: Option<&str>,
    ) -> Vec<std::sync::Arc<dyn crate::extension::DriverExtension>> {
        self.manager
            .registry()
            .list()
            .into_iter()
            .filter(|ext| match catalog {
                Some(name) => ext.name().eq_ignore_ascii_case(name),
                None => true,
            })
            .collect()
    }
}
