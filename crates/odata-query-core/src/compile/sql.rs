//! SQL fragments with positional parameters.
//!
//! A [`SqlFragment`] is a sequence of SQL text and bound values. Placeholders
//! are only numbered when the final statement is rendered, so fragments can
//! be built in any order and concatenated freely.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dialect::Dialect;

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum SqlParam {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Instant with offset.
    DateTime(DateTime<FixedOffset>),
    /// Wall-clock time.
    Time(NaiveTime),
    /// GUID.
    Guid(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Sql(String),
    Param(SqlParam),
}

/// SQL text interleaved with bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pieces: Vec<Piece>,
}

/// A rendered statement: SQL text plus parameters in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStatement {
    /// Statement text with dialect placeholders.
    pub sql: String,
    /// Values for `$1..$n` / `?` in order.
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    /// An empty fragment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fragment of raw SQL text.
    #[must_use]
    pub fn sql(text: impl Into<String>) -> Self {
        Self {
            pieces: vec![Piece::Sql(text.into())],
        }
    }

    /// A single placeholder bound to `param`.
    #[must_use]
    pub fn param(param: SqlParam) -> Self {
        Self {
            pieces: vec![Piece::Param(param)],
        }
    }

    /// Append raw SQL text.
    pub fn push_sql(&mut self, text: &str) -> &mut Self {
        if let Some(Piece::Sql(last)) = self.pieces.last_mut() {
            last.push_str(text);
        } else {
            self.pieces.push(Piece::Sql(text.to_owned()));
        }
        self
    }

    /// Append a placeholder.
    pub fn push_param(&mut self, param: SqlParam) -> &mut Self {
        self.pieces.push(Piece::Param(param));
        self
    }

    /// Append another fragment.
    pub fn push(&mut self, other: &SqlFragment) -> &mut Self {
        for piece in &other.pieces {
            match piece {
                Piece::Sql(text) => {
                    self.push_sql(text);
                }
                Piece::Param(p) => {
                    self.push_param(p.clone());
                }
            }
        }
        self
    }

    /// `prefix || self || suffix`.
    #[must_use]
    pub fn wrap(&self, prefix: &str, suffix: &str) -> Self {
        let mut out = Self::sql(prefix);
        out.push(self).push_sql(suffix);
        out
    }

    /// Join fragments with `sep`.
    #[must_use]
    pub fn join<'f>(parts: impl IntoIterator<Item = &'f SqlFragment>, sep: &str) -> Self {
        let mut out = Self::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push_sql(sep);
            }
            out.push(part);
        }
        out
    }

    /// Returns `true` if the fragment has no text and no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.iter().all(|p| matches!(p, Piece::Sql(s) if s.is_empty()))
    }

    /// Bound parameters in order.
    pub fn params(&self) -> impl Iterator<Item = &SqlParam> {
        self.pieces.iter().filter_map(|p| match p {
            Piece::Param(param) => Some(param),
            Piece::Sql(_) => None,
        })
    }

    /// Number placeholders from 1 and collect parameters.
    #[must_use]
    pub fn render(&self, dialect: Dialect) -> CompiledStatement {
        let mut sql = String::new();
        let mut params = Vec::new();
        for piece in &self.pieces {
            match piece {
                Piece::Sql(text) => sql.push_str(text),
                Piece::Param(p) => {
                    params.push(p.clone());
                    sql.push_str(&dialect.placeholder(params.len()));
                }
            }
        }
        CompiledStatement { sql, params }
    }
}

impl fmt::Display for SqlFragment {
    /// Renders with `?` placeholders.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for piece in &self.pieces {
            match piece {
                Piece::Sql(text) => f.write_str(text)?,
                Piece::Param(_) => f.write_str("?")?,
            }
        }
        Ok(())
    }
}

/// Double-quote an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"qualifier"."column"`.
#[must_use]
pub fn qualified(qualifier: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(qualifier), quote_ident(column))
}

/// Escape `%`, `_` and `\` for use in `LIKE ... ESCAPE '\'`.
#[must_use]
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_number_placeholders_at_render_time() {
        let mut right = SqlFragment::sql("\"b\" = ");
        right.push_param(SqlParam::Int(2));
        let mut left = SqlFragment::sql("\"a\" = ");
        left.push_param(SqlParam::Int(1));
        let both = SqlFragment::join([&left, &right], " AND ");

        let pg = both.render(Dialect::Postgres);
        assert_eq!(pg.sql, "\"a\" = $1 AND \"b\" = $2");
        assert_eq!(pg.params, vec![SqlParam::Int(1), SqlParam::Int(2)]);

        let lite = both.render(Dialect::Sqlite);
        assert_eq!(lite.sql, "\"a\" = ? AND \"b\" = ?");
    }

    #[test]
    fn test_should_quote_identifiers() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
        assert_eq!(qualified("products", "unit_price"), "\"products\".\"unit_price\"");
    }

    #[test]
    fn test_should_escape_like_metacharacters() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn test_should_serialize_params_with_type_tag() {
        let json = serde_json::to_string(&SqlParam::Float(99.99)).unwrap();
        assert_eq!(json, r#"{"type":"float","value":99.99}"#);
        let json = serde_json::to_string(&SqlParam::Null).unwrap();
        assert_eq!(json, r#"{"type":"null"}"#);
    }
}
