//! Query template parser.
//!
//! Converts a template into a [`ParsedQuery`]: the ordered static parts plus
//! the executable blocks whose results refill the placeholder slots. Pure
//! function of its inputs; no I/O beyond the optional
//! [`ConfigManager`](crate::ConfigManager) lookups used to expand id
//! patterns.
//!
//! Block syntax (function / procedure form):
//!
//! ```text
//! {{  [-] [ ext [ "." id-pattern ] [ "(" k=v,k="v",… ")" ] [":" body] ] }}
//! {%  [-] [ ext [ "." id-pattern ] [ "(" k=v,k="v",… ")" ] [":" body] %}
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::bridge::{KEYWORD_TABLE, KEYWORD_VALUES};
use crate::config::ConfigManager;
use crate::error::{Error, Result};
use crate::options::{KEY_ID, KEY_POST_QUERY, KEY_PRE_QUERY};
use crate::properties::Properties;
use crate::tag::{substitute_variables, VariableTag};

/// A syntactic region of the template evaluated at build time.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutableBlock {
    index: usize,
    extension: String,
    tag: VariableTag,
    props: Properties,
    content: String,
    output: bool,
    id_pattern: Option<String>,
    ids: Vec<String>,
}

impl ExecutableBlock {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        extension: String,
        tag: VariableTag,
        props: Properties,
        content: String,
        output: bool,
        id_pattern: Option<String>,
        ids: Vec<String>,
    ) -> Self {
        ExecutableBlock {
            index,
            extension,
            tag,
            props,
            content,
            output,
            id_pattern,
            ids,
        }
    }

    /// Slot in the parts array that this block refills.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Extension name; empty means the connection's default extension.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn tag(&self) -> &VariableTag {
        &self.tag
    }

    /// Block-local properties (the arguments inside parentheses).
    pub fn props(&self) -> &Properties {
        &self.props
    }

    /// Block body: everything after the `:` separator.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// True for function-style `{{…}}`; false for procedure-style `{%…%}`
    /// whose row result is discarded.
    pub fn output(&self) -> bool {
        self.output
    }

    /// Config ids this block resolves to after glob expansion. Empty means
    /// "use the value under `id` in the block properties, if any".
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// True iff the extension name is one of the reserved bridge keywords.
    pub fn use_bridge(&self) -> bool {
        self.extension == KEYWORD_TABLE || self.extension == KEYWORD_VALUES
    }

    /// True when the block carries a body to hand to its extension.
    pub fn has_arguments(&self) -> bool {
        !self.content.trim().is_empty()
    }

    fn config_id(&self) -> String {
        if self.ids.is_empty() {
            self.props.get(KEY_ID).unwrap_or_default()
        } else {
            self.ids.join(",")
        }
    }

    /// Blocks with identical output flag, extension, content and config id
    /// evaluate once and share their rows.
    pub fn equivalent(&self, other: &ExecutableBlock) -> bool {
        self.output == other.output
            && self.extension == other.extension
            && self.content == other.content
            && self.config_id() == other.config_id()
    }

    /// Canonical textual form; reparsing it yields an equal block.
    pub fn render(&self) -> String {
        let (open, close) = if self.output {
            (self.tag.function_open(), self.tag.function_close())
        } else {
            (self.tag.procedure_open(), self.tag.procedure_close())
        };
        let mut s = String::new();
        s.push_str(&open);
        s.push(' ');
        s.push_str(&self.extension);
        if let Some(pattern) = &self.id_pattern {
            s.push('.');
            s.push_str(pattern);
        }
        if !self.props.is_empty() {
            s.push('(');
            for (i, (k, v)) in self.props.iter().enumerate() {
                if i > 0 {
                    s.push(',');
                }
                s.push_str(k);
                s.push('=');
                render_property_value(&mut s, v);
            }
            s.push(')');
        }
        if !self.content.is_empty() {
            s.push_str(": ");
            s.push_str(&self.content);
        }
        s.push(' ');
        s.push_str(&close);
        s
    }
}

fn render_property_value(out: &mut String, value: &str) {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | ')' | '(' | '\'' | '"' | '`' | '='));
    if needs_quoting {
        out.push('"');
        for c in value.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
    } else {
        out.push_str(value);
    }
}

/// The parsed form of a template.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedQuery {
    parts: Vec<String>,
    blocks: Vec<ExecutableBlock>,
    direct_query: bool,
    static_query: bool,
}

impl ParsedQuery {
    pub(crate) fn new(parts: Vec<String>, blocks: Vec<ExecutableBlock>) -> Self {
        debug_assert!(blocks.iter().all(|b| b.index() < parts.len()));
        let slots: Vec<usize> = blocks.iter().map(|b| b.index()).collect();
        let all_parts_blank = parts
            .iter()
            .enumerate()
            .all(|(i, p)| slots.contains(&i) || p.trim().is_empty());
        let output_blocks = blocks.iter().filter(|b| b.output()).count();
        let direct_query = all_parts_blank && output_blocks <= 1;
        let static_query = output_blocks == 0;
        ParsedQuery {
            parts,
            blocks,
            direct_query,
            static_query,
        }
    }

    /// Static fragments, with empty placeholder slots at block indices.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn blocks(&self) -> &[ExecutableBlock] {
        &self.blocks
    }

    /// True iff every static part is blank and at most one block produces
    /// output; such a query may short-circuit to the block's rows.
    pub fn direct_query(&self) -> bool {
        self.direct_query
    }

    /// True iff no block produces output.
    pub fn static_query(&self) -> bool {
        self.static_query
    }

    /// Reassembles the parts, interleaving the canonical form of each block
    /// at its slot.
    pub fn render(&self) -> String {
        let by_index: HashMap<usize, &ExecutableBlock> =
            self.blocks.iter().map(|b| (b.index(), b)).collect();
        let mut out = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            match by_index.get(&i) {
                Some(block) => out.push_str(&block.render()),
                None => out.push_str(part),
            }
        }
        out
    }
}

struct BlockParts {
    extension: String,
    id_pattern: Option<String>,
    props: Properties,
    content: String,
}

/// Template parser. Holds the tag dialect, the variables substituted into
/// property values and id patterns, and the config manager that id patterns
/// are glob-expanded against.
pub struct QueryParser<'a> {
    tag: VariableTag,
    variables: IndexMap<String, String>,
    config: Option<&'a dyn ConfigManager>,
}

impl Default for QueryParser<'_> {
    fn default() -> Self {
        QueryParser::new(VariableTag::BRACE, IndexMap::new())
    }
}

impl<'a> QueryParser<'a> {
    pub fn new(tag: VariableTag, variables: IndexMap<String, String>) -> Self {
        QueryParser {
            tag,
            variables,
            config: None,
        }
    }

    pub fn with_config(mut self, config: &'a dyn ConfigManager) -> Self {
        self.config = Some(config);
        self
    }

    pub fn parse(&self, template: &str) -> Result<ParsedQuery> {
        let tag = &self.tag;
        let chars: Vec<char> = template.chars().collect();
        let len = chars.len();
        let mut parts: Vec<String> = Vec::new();
        let mut blocks: Vec<ExecutableBlock> = Vec::new();
        let mut buf = String::new();
        let mut i = 0;
        while i < len {
            let c = chars[i];
            if c == tag.escape_char() && i + 1 < len {
                let next = chars[i + 1];
                if next == tag.left_char() || next == tag.escape_char() {
                    buf.push(next);
                    i += 2;
                    continue;
                }
                buf.push(c);
                i += 1;
                continue;
            }
            if c == tag.left_char() && i + 1 < len {
                let next = chars[i + 1];
                if next == tag.left_char() || next == tag.procedure_char() {
                    let output = next == tag.left_char();
                    match find_block_end(&chars, i + 2, tag, output) {
                        Some(end) => {
                            let inner: String = chars[i + 2..end].iter().collect();
                            self.emit_block(
                                &inner,
                                i + 2,
                                output,
                                &mut parts,
                                &mut blocks,
                                &mut buf,
                            )?;
                            i = end + 2;
                            continue;
                        }
                        None => {
                            log::debug!(
                                "unterminated block at offset {i}; keeping the text as-is"
                            );
                            buf.push(c);
                            i += 1;
                            continue;
                        }
                    }
                }
            }
            buf.push(c);
            i += 1;
        }
        parts.push(buf);
        Ok(ParsedQuery::new(parts, blocks))
    }

    fn emit_block(
        &self,
        inner: &str,
        offset: usize,
        output: bool,
        parts: &mut Vec<String>,
        blocks: &mut Vec<ExecutableBlock>,
        buf: &mut String,
    ) -> Result<()> {
        if inner.trim_start().starts_with('-') {
            // skip marker: dropped with no evaluation and no slot
            return Ok(());
        }
        let mut main = self.parse_block_content(inner, offset)?;
        let pre = main.props.remove(KEY_PRE_QUERY);
        let post = main.props.remove(KEY_POST_QUERY);

        parts.push(std::mem::take(buf));
        if let Some(pre) = pre {
            let aux = self.parse_block_content(&pre, offset)?;
            blocks.push(self.build_block(aux, parts.len(), false)?);
            parts.push(String::new());
        }
        blocks.push(self.build_block(main, parts.len(), output)?);
        parts.push(String::new());
        if let Some(post) = post {
            let aux = self.parse_block_content(&post, offset)?;
            blocks.push(self.build_block(aux, parts.len(), false)?);
            parts.push(String::new());
        }
        Ok(())
    }

    fn build_block(
        &self,
        parsed: BlockParts,
        index: usize,
        output: bool,
    ) -> Result<ExecutableBlock> {
        let ids = match &parsed.id_pattern {
            Some(pattern) if has_glob_chars(pattern) => {
                let known = self
                    .config
                    .map(|c| c.ids(&parsed.extension))
                    .unwrap_or_default();
                let matcher = glob::Pattern::new(pattern).map_err(|e| {
                    Error::parse(e.pos, format!("bad id pattern '{pattern}': {}", e.msg))
                })?;
                known.into_iter().filter(|id| matcher.matches(id)).collect()
            }
            Some(pattern) => vec![pattern.clone()],
            None => Vec::new(),
        };
        Ok(ExecutableBlock::new(
            index,
            parsed.extension,
            self.tag,
            parsed.props,
            parsed.content,
            output,
            parsed.id_pattern,
            ids,
        ))
    }

    fn parse_block_content(&self, inner: &str, offset: usize) -> Result<BlockParts> {
        let chars: Vec<char> = inner.chars().collect();
        let len = chars.len();
        let mut i = 0;
        while i < len && chars[i].is_whitespace() {
            i += 1;
        }
        let name_start = i;
        while i < len && is_extension_char(chars[i]) {
            i += 1;
        }
        let extension: String = chars[name_start..i].iter().collect();

        // bridge keywords preserve the remainder verbatim
        if extension == KEYWORD_TABLE || extension == KEYWORD_VALUES {
            let mut j = i;
            if j < len && (chars[j] == '.' || chars[j] == ':') {
                j += 1;
            }
            let content: String = chars[j..].iter().collect();
            return Ok(BlockParts {
                extension,
                id_pattern: None,
                props: Properties::new(),
                content: content.trim().to_string(),
            });
        }

        let mut id_pattern = None;
        let mut props = Properties::new();
        loop {
            if i >= len {
                return Ok(BlockParts {
                    extension,
                    id_pattern,
                    props,
                    content: String::new(),
                });
            }
            let c = chars[i];
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            match c {
                '.' if id_pattern.is_none() && props.is_empty() => {
                    i += 1;
                    let start = i;
                    while i < len
                        && !chars[i].is_whitespace()
                        && chars[i] != '('
                        && chars[i] != ':'
                    {
                        i += 1;
                    }
                    let raw: String = chars[start..i].iter().collect();
                    id_pattern = Some(substitute_variables(&raw, &self.tag, &self.variables));
                }
                '(' => {
                    let (parsed, next) = self.parse_props(&chars, i + 1, offset)?;
                    props = parsed;
                    i = next;
                }
                ':' => {
                    let content: String = chars[i + 1..].iter().collect();
                    return Ok(BlockParts {
                        extension,
                        id_pattern,
                        props,
                        content: content.trim().to_string(),
                    });
                }
                _ => {
                    // not a structured block: the whole content is the body
                    // handed to the default extension
                    return Ok(BlockParts {
                        extension: String::new(),
                        id_pattern: None,
                        props: Properties::new(),
                        content: inner.trim().to_string(),
                    });
                }
            }
        }
    }

    fn parse_props(
        &self,
        chars: &[char],
        start: usize,
        offset: usize,
    ) -> Result<(Properties, usize)> {
        let len = chars.len();
        let escape = self.tag.escape_char();
        let mut props = Properties::new();
        let mut i = start;
        loop {
            while i < len && (chars[i].is_whitespace() || chars[i] == ',') {
                i += 1;
            }
            if i >= len {
                return Err(Error::parse(offset + i, "unterminated property list"));
            }
            if chars[i] == ')' {
                return Ok((props, i + 1));
            }
            let key_start = i;
            while i < len && is_property_name_char(chars[i]) {
                i += 1;
            }
            if i == key_start {
                return Err(Error::parse(
                    offset + i,
                    format!("malformed property name at '{}'", chars[i]),
                ));
            }
            let key: String = chars[key_start..i].iter().collect();
            while i < len && chars[i].is_whitespace() {
                i += 1;
            }
            if i >= len || chars[i] != '=' {
                return Err(Error::parse(
                    offset + i,
                    format!("missing '=' after property '{key}'"),
                ));
            }
            i += 1;
            while i < len && chars[i].is_whitespace() {
                i += 1;
            }
            let value = if i < len && matches!(chars[i], '\'' | '"' | '`') {
                let quote = chars[i];
                i += 1;
                let mut v = String::new();
                loop {
                    if i >= len {
                        return Err(Error::parse(offset + i, "unterminated quote"));
                    }
                    let c = chars[i];
                    if c == escape && i + 1 < len {
                        v.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if c == quote {
                        if i + 1 < len && chars[i + 1] == quote {
                            v.push(quote);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    v.push(c);
                    i += 1;
                }
                while i < len && chars[i].is_whitespace() {
                    i += 1;
                }
                if i >= len || (chars[i] != ',' && chars[i] != ')') {
                    return Err(Error::parse(
                        offset + i,
                        format!("unexpected characters after quoted value of '{key}'"),
                    ));
                }
                v
            } else {
                let value_start = i;
                while i < len && chars[i] != ',' && chars[i] != ')' {
                    i += 1;
                }
                if i >= len {
                    return Err(Error::parse(offset + i, "unterminated property list"));
                }
                let raw: String = chars[value_start..i].iter().collect();
                raw.trim_end().to_string()
            };
            let value = substitute_variables(&value, &self.tag, &self.variables);
            props.set(key, value);
        }
    }
}

fn is_extension_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn is_property_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['?', '*', '['])
}

/// Finds the index of the closing delimiter of a block opened right before
/// `start`, honoring escapes and nested brace pairs.
fn find_block_end(
    chars: &[char],
    start: usize,
    tag: &VariableTag,
    output: bool,
) -> Option<usize> {
    let len = chars.len();
    let mut depth = 0usize;
    let mut j = start;
    while j < len {
        let c = chars[j];
        if c == tag.escape_char() {
            j += 2;
            continue;
        }
        if output {
            if c == tag.right_char() {
                if depth == 0 && j + 1 < len && chars[j + 1] == tag.right_char() {
                    return Some(j);
                }
                depth = depth.saturating_sub(1);
                j += 1;
                continue;
            }
            if c == tag.left_char() {
                depth += 1;
            }
        } else {
            if c == tag.procedure_char()
                && depth == 0
                && j + 1 < len
                && chars[j + 1] == tag.right_char()
            {
                return Some(j);
            }
            if c == tag.left_char() {
                depth += 1;
            } else if c == tag.right_char() {
                depth = depth.saturating_sub(1);
            }
        }
        j += 1;
    }
    None
}

/// Partitions a multi-query text on `--;; <label>` delimiter lines into
/// `(label, body)` pairs. The label defaults to `Query #i` when the
/// delimiter line carries no comment; bodies are trimmed and empty bodies
/// are dropped.
pub fn split(query: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(Option<String>, Vec<&str>)> = Vec::new();
    let mut current: (Option<String>, Vec<&str>) = (None, Vec::new());
    for line in query.lines() {
        if let Some(rest) = line.trim_end().strip_prefix("--;;") {
            sections.push(std::mem::replace(&mut current, (None, Vec::new())));
            let label = rest.trim();
            current.0 = (!label.is_empty()).then(|| label.to_string());
        } else {
            current.1.push(line);
        }
    }
    sections.push(current);

    let mut out = Vec::new();
    for (label, lines) in sections {
        let body = lines.join("\n").trim().to_string();
        if body.is_empty() {
            continue;
        }
        let n = out.len() + 1;
        out.push((label.unwrap_or_else(|| format!("Query #{n}")), body));
    }
    out
}
