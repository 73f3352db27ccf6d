//! Expansion engine.
//!
//! Turns a [`ParsedQuery`] into the finite list of concrete backend
//! queries: rewrites bridge-keyword blocks, evaluates each block through
//! its extension (deduplicating equivalent blocks), and explodes the
//! Cartesian product of the block results against the static parts.

use indexmap::IndexMap;
use uuid::Uuid;

use crate::bridge::{
    BRIDGE_EXTENSION, KEYWORD_VALUES, KEY_BRIDGE_FORMAT, KEY_BRIDGE_PATH, PATH_ASYNC, PATH_DIRECT,
};
use crate::dialect::Format;
use crate::error::{Error, Result};
use crate::extension::DriverExtension;
use crate::manager::ConnectionManager;
use crate::options::{
    KEY_ID, OPTION_EXEC_DRYRUN, OPTION_RESULT_STRING_ESCAPE, OPTION_RESULT_STRING_ESCAPE_CHAR,
    OPTION_RESULT_STRING_ESCAPE_TARGET, OPTION_RESULT_STRING_REPLACE, OPTION_RESULT_STRING_TRIM,
};
use crate::parser::{ExecutableBlock, ParsedQuery};
use crate::properties::Properties;
use crate::query_ctx::QueryContext;
use crate::query_result::QueryResult;
use crate::rows::{drain, Row, Rows, Schema, VecOfRows};
use crate::tag::substitute_variables;

/// One expansion over one parsed query.
pub struct QueryBuilder<'a> {
    parsed: &'a ParsedQuery,
    manager: &'a ConnectionManager,
    ctx: &'a mut QueryContext,
}

enum Evaluation {
    /// The sink holds the result set; no queries to run.
    Direct,
    /// Per-block normalized first-column cells, ready for expansion.
    Cells {
        blocks: Vec<ExecutableBlock>,
        alias: Vec<Option<usize>>,
        cells: Vec<Vec<String>>,
    },
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        parsed: &'a ParsedQuery,
        manager: &'a ConnectionManager,
        ctx: &'a mut QueryContext,
    ) -> Self {
        QueryBuilder {
            parsed,
            manager,
            ctx,
        }
    }

    /// Produces the ordered list of concrete queries. An empty list with a
    /// populated sink means the build short-circuited to a direct result.
    pub fn build(&mut self, sink: &mut QueryResult) -> Result<Vec<String>> {
        match self.evaluate(sink, true)? {
            Evaluation::Direct => Ok(Vec::new()),
            Evaluation::Cells {
                blocks,
                alias,
                cells,
            } => {
                let n = blocks.len();
                let mut matrix: Vec<Vec<String>> = vec![vec![String::new(); n]];
                for i in 0..n {
                    if let Some(k) = alias[i] {
                        for row in &mut matrix {
                            row[i] = row[k].clone();
                        }
                        continue;
                    }
                    let mut next = Vec::with_capacity(matrix.len() * cells[i].len().max(1));
                    for row in &matrix {
                        for cell in &cells[i] {
                            let mut expanded = row.clone();
                            expanded[i] = cell.clone();
                            next.push(expanded);
                        }
                    }
                    matrix = next;
                }
                let mut out = Vec::with_capacity(matrix.len());
                for row in matrix {
                    out.push(self.materialize(&blocks, &row));
                }
                Ok(out)
            }
        }
    }

    /// Single-string expansion used by batching: block results substitute
    /// in place and the template collapses to one final string. An output
    /// block with more than one row contributes its first row and raises a
    /// warning.
    pub fn build_single(&mut self, sink: &mut QueryResult) -> Result<String> {
        match self.evaluate(sink, false)? {
            Evaluation::Direct => unreachable!("direct path is disabled for single-string builds"),
            Evaluation::Cells {
                blocks,
                alias,
                cells,
            } => {
                let n = blocks.len();
                let mut slots = vec![String::new(); n];
                for i in 0..n {
                    if let Some(k) = alias[i] {
                        slots[i] = slots[k].clone();
                        continue;
                    }
                    match cells[i].len() {
                        0 => {}
                        1 => slots[i] = cells[i][0].clone(),
                        more => {
                            sink.add_warning(Error::warning(format!(
                                "block at slot {} produced {more} rows; using the first",
                                blocks[i].index()
                            )));
                            slots[i] = cells[i][0].clone();
                        }
                    }
                }
                Ok(self.materialize(&blocks, &slots))
            }
        }
    }

    fn materialize(&self, blocks: &[ExecutableBlock], row: &[String]) -> String {
        let mut parts = self.parsed.parts().to_vec();
        for (i, block) in blocks.iter().enumerate() {
            parts[block.index()] = row[i].clone();
        }
        let joined = parts.concat();
        substitute_variables(&joined, self.ctx.tag(), self.ctx.variables())
    }

    fn evaluate(&mut self, sink: &mut QueryResult, allow_direct: bool) -> Result<Evaluation> {
        let mut blocks = Vec::with_capacity(self.parsed.blocks().len());
        for block in self.parsed.blocks() {
            blocks.push(if block.use_bridge() {
                self.rewrite_bridge(block)
            } else {
                block.clone()
            });
        }

        let n = blocks.len();
        let mut alias: Vec<Option<usize>> = vec![None; n];
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); n];
        for i in 0..n {
            // dedup: alias to the first equivalent block
            if let Some(k) =
                (0..i).find(|&k| alias[k].is_none() && blocks[k].equivalent(&blocks[i]))
            {
                alias[i] = Some(k);
                continue;
            }
            let block = &blocks[i];
            let ext = if block.extension().is_empty() {
                self.manager.default_extension()
            } else {
                self.manager
                    .registry()
                    .resolve(block.extension())
                    .ok_or_else(|| Error::resolution(block.extension()))?
            };
            let props = self.effective_props(&*ext, block);
            let ids: Vec<String> = if block.ids().is_empty() {
                props.get(KEY_ID).into_iter().collect()
            } else {
                block.ids().to_vec()
            };
            let dryrun = OPTION_EXEC_DRYRUN.get_bool(&props);

            if allow_direct && self.parsed.direct_query() && block.output() {
                if ext.supports_direct_query() || dryrun {
                    let rows = self.invoke(&*ext, block, &props, &ids)?;
                    sink.set_rows(rows)?;
                    return Ok(Evaluation::Direct);
                }
                if !block.has_arguments() && !ext.supports_no_arguments() {
                    sink.set_rows(Box::new(describe_extension(&*ext)))?;
                    return Ok(Evaluation::Direct);
                }
            }

            let evaluated = self
                .invoke(&*ext, block, &props, &ids)
                .and_then(|mut rows| drain(rows.as_mut()));
            cells[i] = match evaluated {
                Ok(rows) if block.output() => rows
                    .iter()
                    .map(|r| self.normalize(r.value(0).as_string(), &props))
                    .collect(),
                // evaluated for side effects only; the slot goes blank
                Ok(_) => vec![String::new()],
                Err(e) if e.is_warning() => {
                    sink.add_warning(e);
                    if block.output() {
                        vec![block.content().to_string()]
                    } else {
                        vec![String::new()]
                    }
                }
                Err(e) => return Err(e),
            };
        }
        Ok(Evaluation::Cells {
            blocks,
            alias,
            cells,
        })
    }

    /// Layers properties for one block: extension defaults under the
    /// connection's extension-scoped layer, block properties on top, with
    /// variables resolved in keys and values.
    fn effective_props(&self, ext: &dyn DriverExtension, block: &ExecutableBlock) -> Properties {
        let mut props = self.manager.extract_properties(ext.name());
        for option in ext.default_options() {
            if props.get(option.name()).is_none() {
                props.set(option.name(), option.default_value());
            }
        }
        if ext.requires_bridge_context() {
            props.merge(&self.manager.get_bridge_context());
        }
        for (key, value) in block.props().iter() {
            props.set(
                substitute_variables(key, self.ctx.tag(), self.ctx.variables()),
                substitute_variables(value, self.ctx.tag(), self.ctx.variables()),
            );
        }
        props
    }

    /// Invokes the listener once, or once per id with the rows merged.
    fn invoke(
        &mut self,
        ext: &dyn DriverExtension,
        block: &ExecutableBlock,
        props: &Properties,
        ids: &[String],
    ) -> Result<Box<dyn Rows>> {
        match ids {
            [] => ext.create_listener(self.ctx, props)?.on_query(block.content()),
            [id] => {
                let mut scoped = props.clone();
                scoped.set(KEY_ID, id);
                ext.create_listener(self.ctx, &scoped)?
                    .on_query(block.content())
            }
            many => {
                let mut schema: Option<Schema> = None;
                let mut merged: Vec<Row> = Vec::new();
                for id in many {
                    let mut scoped = props.clone();
                    scoped.set(KEY_ID, id);
                    let mut rows = ext
                        .create_listener(self.ctx, &scoped)?
                        .on_query(block.content())?;
                    if schema.is_none() {
                        schema = Some(rows.schema().clone());
                    }
                    merged.extend(drain(rows.as_mut())?);
                }
                Ok(Box::new(VecOfRows::new(
                    schema.unwrap_or_default(),
                    merged,
                )))
            }
        }
    }

    /// Applies the per-block cell normalization toggles.
    fn normalize(&self, cell: &str, props: &Properties) -> String {
        let mut value = cell.to_string();
        if OPTION_RESULT_STRING_REPLACE.get_bool(props) {
            let vars: IndexMap<String, String> = props.effective();
            value = substitute_variables(&value, self.ctx.tag(), &vars);
        }
        if OPTION_RESULT_STRING_TRIM.get_bool(props) {
            value = value.trim().to_string();
        }
        if OPTION_RESULT_STRING_ESCAPE.get_bool(props) {
            let target = OPTION_RESULT_STRING_ESCAPE_TARGET
                .get(props)
                .chars()
                .next()
                .unwrap_or('\'');
            let escape = OPTION_RESULT_STRING_ESCAPE_CHAR
                .get(props)
                .chars()
                .next()
                .unwrap_or('\\');
            let mut escaped = String::with_capacity(value.len() + 4);
            for c in value.chars() {
                if c == target {
                    escaped.push(escape);
                }
                escaped.push(c);
            }
            value = escaped;
        }
        value
    }

    /// Synthesizes the replacement block for a bridge keyword: the body is
    /// wrapped back into its syntactic form, and the properties carry the
    /// bridge context plus the query-mode path.
    fn rewrite_bridge(&self, block: &ExecutableBlock) -> ExecutableBlock {
        let mut props = self.manager.get_bridge_context();
        let path = if block.extension() == KEYWORD_VALUES {
            format!("{PATH_DIRECT}{}", Uuid::new_v4())
        } else {
            PATH_ASYNC.to_string()
        };
        props.set(KEY_BRIDGE_PATH, path);
        for id in block.ids() {
            let binary = self
                .ctx
                .config()
                .config(block.extension(), id)
                .and_then(|cfg| cfg.get("format"))
                .filter(|f| f.parse::<Format>().map(|f| f.is_binary()).unwrap_or(false));
            if let Some(format) = binary {
                props.set(KEY_BRIDGE_FORMAT, format);
                break;
            }
        }
        let tag = block.tag();
        let content = if block.output() {
            format!(
                "{} {}: {} {}",
                tag.function_open(),
                block.extension(),
                block.content(),
                tag.function_close()
            )
        } else {
            format!(
                "{} {}: {} {}",
                tag.procedure_open(),
                block.extension(),
                block.content(),
                tag.procedure_close()
            )
        };
        ExecutableBlock::new(
            block.index(),
            BRIDGE_EXTENSION.to_string(),
            *tag,
            props,
            content,
            block.output(),
            None,
            Vec::new(),
        )
    }
}

/// The synthetic table answering a zero-argument invocation of an extension
/// that requires arguments: its declared options, one per row.
fn describe_extension(ext: &dyn DriverExtension) -> VecOfRows {
    let schema = Schema::of(&["option", "value"]);
    let rows = ext
        .default_options()
        .iter()
        .map(|o| Row::of([o.name(), o.default_value()]))
        .collect();
    VecOfRows::new(schema, rows)
}
