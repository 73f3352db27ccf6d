//! Variable tags and template variable substitution.
//!
//! A [`VariableTag`] describes the delimiter syntax used for executable
//! blocks and variable interpolation. Two standard instances exist
//! ([`VariableTag::BRACE`] and [`VariableTag::SQUARE`]); callers may build
//! alternates with [`VariableTag::try_new`].

use core::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Delimiter syntax for executable blocks and variables.
///
/// Derived forms: `function_open`/`function_close` double the brace chars
/// (`{{` / `}}`), `procedure_open`/`procedure_close` pair the brace chars
/// with the procedure char (`{%` / `%}`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariableTag {
    escape_char: char,
    left_char: char,
    right_char: char,
    variable_char: char,
    procedure_char: char,
}

impl VariableTag {
    /// The default tag: `{{ … }}`, `{% … %}`, `${name}` with `\` escape.
    pub const BRACE: VariableTag = VariableTag {
        escape_char: '\\',
        left_char: '{',
        right_char: '}',
        variable_char: '$',
        procedure_char: '%',
    };

    /// The square tag: `[[ … ]]`, `[% … %]`, `$[name]` with `\` escape.
    pub const SQUARE: VariableTag = VariableTag {
        escape_char: '\\',
        left_char: '[',
        right_char: ']',
        variable_char: '$',
        procedure_char: '%',
    };

    /// Builds a custom tag. The escape char must differ from all delimiter
    /// chars.
    pub fn try_new(
        escape_char: char,
        left_char: char,
        right_char: char,
        variable_char: char,
        procedure_char: char,
    ) -> Result<Self> {
        let delimiters = [left_char, right_char, variable_char, procedure_char];
        if delimiters.contains(&escape_char) {
            return Err(Error::config(format!(
                "escape char '{escape_char}' collides with a delimiter char"
            )));
        }
        Ok(VariableTag {
            escape_char,
            left_char,
            right_char,
            variable_char,
            procedure_char,
        })
    }

    pub fn escape_char(&self) -> char {
        self.escape_char
    }

    pub fn left_char(&self) -> char {
        self.left_char
    }

    pub fn right_char(&self) -> char {
        self.right_char
    }

    pub fn variable_char(&self) -> char {
        self.variable_char
    }

    pub fn procedure_char(&self) -> char {
        self.procedure_char
    }

    /// Opening delimiter of a function block, e.g. `{{`.
    pub fn function_open(&self) -> String {
        let mut s = String::with_capacity(2);
        s.push(self.left_char);
        s.push(self.left_char);
        s
    }

    /// Closing delimiter of a function block, e.g. `}}`.
    pub fn function_close(&self) -> String {
        let mut s = String::with_capacity(2);
        s.push(self.right_char);
        s.push(self.right_char);
        s
    }

    /// Opening delimiter of a procedure block, e.g. `{%`.
    pub fn procedure_open(&self) -> String {
        let mut s = String::with_capacity(2);
        s.push(self.left_char);
        s.push(self.procedure_char);
        s
    }

    /// Closing delimiter of a procedure block, e.g. `%}`.
    pub fn procedure_close(&self) -> String {
        let mut s = String::with_capacity(2);
        s.push(self.procedure_char);
        s.push(self.right_char);
        s
    }
}

impl Default for VariableTag {
    fn default() -> Self {
        VariableTag::BRACE
    }
}

impl fmt::Display for VariableTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == VariableTag::SQUARE {
            write!(f, "square")
        } else if *self == VariableTag::BRACE {
            write!(f, "brace")
        } else {
            write!(
                f,
                "custom({}{}{}{}{})",
                self.escape_char,
                self.left_char,
                self.right_char,
                self.variable_char,
                self.procedure_char
            )
        }
    }
}

impl FromStr for VariableTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "brace" => Ok(VariableTag::BRACE),
            "square" => Ok(VariableTag::SQUARE),
            other => Err(Error::config(format!(
                "invalid variable tag: {other} (possible values: brace, square)"
            ))),
        }
    }
}

/// Applies a name→string mapping over a template, honoring the tag.
///
/// `${name}` substitutes the variable's value, `${name:default}` falls back
/// to the default when the name is unbound, and an unbound name without a
/// default is left untouched. The escape char suppresses the sigil.
pub fn substitute_variables(
    template: &str,
    tag: &VariableTag,
    variables: &IndexMap<String, String>,
) -> String {
    if template.is_empty() || !template.contains(tag.variable_char()) {
        return template.to_string();
    }

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == tag.escape_char() && i + 1 < chars.len() {
            let next = chars[i + 1];
            if next == tag.escape_char() || next == tag.variable_char() {
                out.push(next);
                i += 2;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if c == tag.variable_char() && i + 1 < chars.len() && chars[i + 1] == tag.left_char() {
            if let Some(end) = find_char(&chars, i + 2, tag.right_char()) {
                let inner: String = chars[i + 2..end].iter().collect();
                let (name, default) = match inner.split_once(':') {
                    Some((n, d)) => (n.trim(), Some(d)),
                    None => (inner.trim(), None),
                };
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => match default {
                        Some(d) => out.push_str(d),
                        // unbound and no default: keep the reference as-is
                        None => out.extend(&chars[i..=end]),
                    },
                }
                i = end + 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn find_char(chars: &[char], from: usize, target: char) -> Option<usize> {
    chars[from..]
        .iter()
        .position(|&c| c == target)
        .map(|p| from + p)
}
