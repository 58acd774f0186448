//! SQL dialects.
//!
//! The dialect decides placeholder syntax and the spelling of every
//! function the compiler emits. Each operation has an exhaustive match, so
//! adding a dialect means every spelling must be decided.

use std::fmt;
use std::str::FromStr;

use odata_query_model::{EdmType, QueryError, QueryResult};
use serde::{Deserialize, Serialize};

use super::sql::SqlFragment;
use crate::expression::{BinaryFn, UnaryFn};

/// Target SQL flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL: `$n` placeholders, `EXTRACT`, `STRPOS`.
    #[default]
    Postgres,
    /// SQLite: `?` placeholders, `strftime`, `INSTR`.
    Sqlite,
}

impl Dialect {
    /// Placeholder for the `n`th (1-based) parameter.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite => "?".to_owned(),
        }
    }

    /// Column type used by `CAST(... AS <type>)`.
    #[must_use]
    pub fn type_name(self, ty: EdmType) -> &'static str {
        match self {
            Self::Postgres => match ty {
                EdmType::Boolean => "BOOLEAN",
                EdmType::Byte | EdmType::SByte | EdmType::Int16 => "SMALLINT",
                EdmType::Int32 => "INTEGER",
                EdmType::Int64 => "BIGINT",
                EdmType::Single => "REAL",
                EdmType::Double => "DOUBLE PRECISION",
                EdmType::Decimal => "NUMERIC",
                EdmType::String => "TEXT",
                EdmType::Date => "DATE",
                EdmType::DateTimeOffset => "TIMESTAMPTZ",
                EdmType::TimeOfDay => "TIME",
                EdmType::Guid => "UUID",
                EdmType::Binary => "BYTEA",
            },
            Self::Sqlite => match ty {
                EdmType::Boolean
                | EdmType::Byte
                | EdmType::SByte
                | EdmType::Int16
                | EdmType::Int32
                | EdmType::Int64 => "INTEGER",
                EdmType::Single | EdmType::Double => "REAL",
                EdmType::Decimal => "NUMERIC",
                EdmType::String
                | EdmType::Date
                | EdmType::DateTimeOffset
                | EdmType::TimeOfDay
                | EdmType::Guid => "TEXT",
                EdmType::Binary => "BLOB",
            },
        }
    }

    /// Current instant.
    #[must_use]
    pub fn now(self) -> SqlFragment {
        match self {
            Self::Postgres => SqlFragment::sql("CURRENT_TIMESTAMP"),
            Self::Sqlite => SqlFragment::sql("strftime('%Y-%m-%dT%H:%M:%SZ', 'now')"),
        }
    }

    /// Floating-point division.
    #[must_use]
    pub fn fractional_div(self, left: &SqlFragment, right: &SqlFragment) -> SqlFragment {
        let mut out = left.wrap("(CAST(", &format!(" AS {}) / ", self.type_name(EdmType::Double)));
        out.push(right).push_sql(")");
        out
    }

    /// One-argument functions.
    pub fn unary(self, func: UnaryFn, arg: &SqlFragment) -> QueryResult<SqlFragment> {
        let out = match func {
            UnaryFn::ToLower => arg.wrap("LOWER(", ")"),
            UnaryFn::ToUpper => arg.wrap("UPPER(", ")"),
            UnaryFn::Trim => arg.wrap("TRIM(", ")"),
            UnaryFn::Length => arg.wrap("LENGTH(", ")"),
            UnaryFn::Year => self.date_part(arg, "YEAR", "%Y"),
            UnaryFn::Month => self.date_part(arg, "MONTH", "%m"),
            UnaryFn::Day => self.date_part(arg, "DAY", "%d"),
            UnaryFn::Hour => self.date_part(arg, "HOUR", "%H"),
            UnaryFn::Minute => self.date_part(arg, "MINUTE", "%M"),
            UnaryFn::Second => match self {
                Self::Postgres => arg.wrap("CAST(FLOOR(EXTRACT(SECOND FROM ", ")) AS INTEGER)"),
                Self::Sqlite => arg.wrap("CAST(strftime('%S', ", ") AS INTEGER)"),
            },
            UnaryFn::FractionalSeconds => match self {
                Self::Postgres => {
                    let mut out = arg.wrap("(EXTRACT(SECOND FROM ", ") - FLOOR(EXTRACT(SECOND FROM ");
                    out.push(arg).push_sql(")))");
                    out
                }
                Self::Sqlite => {
                    let mut out = arg.wrap("(CAST(strftime('%f', ", ") AS REAL) - CAST(strftime('%S', ");
                    out.push(arg).push_sql(") AS INTEGER))");
                    out
                }
            },
            UnaryFn::Date => match self {
                Self::Postgres => arg.wrap("CAST(", " AS DATE)"),
                Self::Sqlite => arg.wrap("date(", ")"),
            },
            UnaryFn::Time => match self {
                Self::Postgres => arg.wrap("CAST(", " AS TIME)"),
                Self::Sqlite => arg.wrap("time(", ")"),
            },
            UnaryFn::Ceiling => match self {
                Self::Postgres => arg.wrap("CEILING(", ")"),
                Self::Sqlite => {
                    let truncated = arg.wrap("CAST(", " AS INTEGER)");
                    let mut out = truncated.wrap("(", " + (");
                    out.push(arg).push_sql(" > ").push(&truncated).push_sql("))");
                    out
                }
            },
            UnaryFn::Floor => match self {
                Self::Postgres => arg.wrap("FLOOR(", ")"),
                Self::Sqlite => {
                    let truncated = arg.wrap("CAST(", " AS INTEGER)");
                    let mut out = truncated.wrap("(", " - (");
                    out.push(arg).push_sql(" < ").push(&truncated).push_sql("))");
                    out
                }
            },
            UnaryFn::Round => arg.wrap("ROUND(", ")"),
        };
        Ok(out)
    }

    fn date_part(self, arg: &SqlFragment, field: &str, format: &str) -> SqlFragment {
        match self {
            Self::Postgres => arg.wrap(&format!("CAST(EXTRACT({field} FROM "), ") AS INTEGER)"),
            Self::Sqlite => arg.wrap(&format!("CAST(strftime('{format}', "), ") AS INTEGER)"),
        }
    }

    /// Whether `LIKE` compares case-sensitively. SQLite folds ASCII case, so
    /// literal patterns go through `INSTR` there.
    #[must_use]
    pub fn case_sensitive_like(self) -> bool {
        matches!(self, Self::Postgres)
    }

    fn position(self, haystack: &SqlFragment, needle: &SqlFragment) -> SqlFragment {
        let name = match self {
            Self::Postgres => "STRPOS(",
            Self::Sqlite => "INSTR(",
        };
        let mut out = haystack.wrap(name, ", ");
        out.push(needle).push_sql(")");
        out
    }

    /// Two-argument functions with non-literal operands.
    pub fn binary(
        self,
        func: BinaryFn,
        left: &SqlFragment,
        right: &SqlFragment,
    ) -> QueryResult<SqlFragment> {
        let out = match func {
            BinaryFn::Contains => self.position(left, right).wrap("(", " > 0)"),
            BinaryFn::StartsWith => self.position(left, right).wrap("(", " = 1)"),
            BinaryFn::EndsWith => {
                let mut out = left.wrap("(LENGTH(", ") >= LENGTH(");
                out.push(right)
                    .push_sql(") AND SUBSTR(")
                    .push(left)
                    .push_sql(", LENGTH(")
                    .push(left)
                    .push_sql(") - LENGTH(")
                    .push(right)
                    .push_sql(") + 1) = ")
                    .push(right)
                    .push_sql(")");
                out
            }
            BinaryFn::IndexOf => self.position(left, right).wrap("(", " - 1)"),
            BinaryFn::Concat => {
                let mut out = left.wrap("(", " || ");
                out.push(right).push_sql(")");
                out
            }
            BinaryFn::MatchesPattern => match self {
                Self::Postgres => {
                    let mut out = left.wrap("(", " ~ ");
                    out.push(right).push_sql(")");
                    out
                }
                Self::Sqlite => return Err(QueryError::unsupported("matchespattern on sqlite")),
            },
            BinaryFn::GeoDistance | BinaryFn::GeoIntersects => {
                return Err(QueryError::unsupported(format!(
                    "{func}: no geography types are modeled"
                )));
            }
        };
        Ok(out)
    }

    /// `substring(s, start[, length])` with a zero-based start.
    #[must_use]
    pub fn substring(
        self,
        source: &SqlFragment,
        start: &SqlFragment,
        length: Option<&SqlFragment>,
    ) -> SqlFragment {
        let mut out = source.wrap("SUBSTR(", ", (");
        out.push(start).push_sql(") + 1");
        if let Some(length) = length {
            out.push_sql(", ").push(length);
        }
        out.push_sql(")");
        out
    }

    /// Row limit clause for the given limit/offset placeholders.
    #[must_use]
    pub fn limit_offset(self, limit: Option<&SqlFragment>, offset: Option<&SqlFragment>) -> SqlFragment {
        let mut out = SqlFragment::new();
        match (limit, offset, self) {
            (Some(limit), _, _) => {
                out.push_sql(" LIMIT ").push(limit);
            }
            (None, Some(_), Self::Sqlite) => {
                out.push_sql(" LIMIT -1");
            }
            (None, _, _) => {}
        }
        if let Some(offset) = offset {
            out.push_sql(" OFFSET ").push(offset);
        }
        out
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        })
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(format!("unknown SQL dialect '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col() -> SqlFragment {
        SqlFragment::sql("\"t\".\"name\"")
    }

    #[test]
    fn test_should_parse_dialect_names() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("sqlite3".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("mysql".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_should_spell_position_functions_per_dialect() {
        let needle = SqlFragment::sql("\"t\".\"code\"");
        let pg = Dialect::Postgres.binary(BinaryFn::Contains, &col(), &needle).unwrap();
        assert_eq!(pg.to_string(), "(STRPOS(\"t\".\"name\", \"t\".\"code\") > 0)");
        let lite = Dialect::Sqlite.binary(BinaryFn::IndexOf, &col(), &needle).unwrap();
        assert_eq!(lite.to_string(), "(INSTR(\"t\".\"name\", \"t\".\"code\") - 1)");
    }

    #[test]
    fn test_should_spell_date_parts_per_dialect() {
        let pg = Dialect::Postgres.unary(UnaryFn::Year, &col()).unwrap();
        assert_eq!(pg.to_string(), "CAST(EXTRACT(YEAR FROM \"t\".\"name\") AS INTEGER)");
        let lite = Dialect::Sqlite.unary(UnaryFn::Month, &col()).unwrap();
        assert_eq!(lite.to_string(), "CAST(strftime('%m', \"t\".\"name\") AS INTEGER)");
    }

    #[test]
    fn test_should_reject_unsupported_functions() {
        let err = Dialect::Sqlite
            .binary(BinaryFn::MatchesPattern, &col(), &col())
            .unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { .. }));
        assert!(Dialect::Postgres
            .binary(BinaryFn::GeoDistance, &col(), &col())
            .is_err());
    }

    #[test]
    fn test_should_emit_sqlite_offset_without_limit() {
        let offset = SqlFragment::sql("5");
        assert_eq!(
            Dialect::Sqlite.limit_offset(None, Some(&offset)).to_string(),
            " LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            Dialect::Postgres.limit_offset(None, Some(&offset)).to_string(),
            " OFFSET 5"
        );
    }
}
