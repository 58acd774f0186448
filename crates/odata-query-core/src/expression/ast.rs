//! AST types for OData expressions.
//!
//! The tree is produced by the parser and consumed by the SQL compiler and the
//! in-memory evaluator. Nodes are immutable once built. Explicit parentheses
//! are kept as [`Expr::Group`] so the written shape survives.
//!
//! Functions are sealed per arity class: the parser resolves a name to one of
//! the enums below, and everything downstream matches exhaustively.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use odata_query_model::EdmType;
use uuid::Uuid;

/// Expression AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical or arithmetic binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `not x` or `-x`.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Comparison: `left op right`.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `value in (a, b, ...)`.
    In {
        /// Tested value.
        value: Box<Expr>,
        /// Candidates.
        list: Vec<Expr>,
    },
    /// Built-in function call.
    Call(Call),
    /// Property path.
    Identifier(PropertyPath),
    /// Typed literal.
    Literal(Literal),
    /// Explicit parentheses.
    Group(Box<Expr>),
    /// `any` / `all` over a collection.
    Lambda(Lambda),
}

impl Expr {
    /// Strip any number of enclosing [`Expr::Group`] nodes.
    #[must_use]
    pub fn ungrouped(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Group(inner) = expr {
            expr = inner;
        }
        expr
    }

    /// The property path, if this is a (possibly parenthesized) identifier.
    #[must_use]
    pub fn as_path(&self) -> Option<&PropertyPath> {
        match self.ungrouped() {
            Expr::Identifier(path) => Some(path),
            _ => None,
        }
    }

    /// The literal, if this is a (possibly parenthesized) literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match self.ungrouped() {
            Expr::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

/// Binary logical and arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `and`
    And,
    /// `or`
    Or,
    /// `add`, `+`
    Add,
    /// `sub`, `-`
    Sub,
    /// `mul`, `*`
    Mul,
    /// `div`, `/`
    Div,
    /// `divby` (always fractional)
    DivBy,
    /// `mod`
    Mod,
}

impl BinaryOp {
    /// Returns `true` for `and` / `or`.
    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::DivBy => "divby",
            Self::Mod => "mod",
        };
        f.write_str(s)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `not`
    Not,
    /// `-`
    Negate,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `gt`
    Gt,
    /// `ge`
    Ge,
    /// `lt`
    Lt,
    /// `le`
    Le,
    /// `has` (flags test)
    Has,
}

impl CompareOp {
    /// Returns `true` for `gt`, `ge`, `lt`, `le`.
    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Has => "has",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Literals and paths
// ---------------------------------------------------------------------------

/// A typed literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Integer (Int64).
    Int(i64),
    /// Decimal or exponent literal.
    Decimal(f64),
    /// Quoted string.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Instant with offset.
    DateTimeOffset(DateTime<FixedOffset>),
    /// Wall-clock time.
    TimeOfDay(NaiveTime),
    /// GUID.
    Guid(Uuid),
    /// Qualified enum member, `Ns.Type'Member'`.
    Enum {
        /// Qualified type name.
        type_name: String,
        /// Member name(s).
        member: String,
    },
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Decimal(n) => write!(f, "{n:?}"),
            Self::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTimeOffset(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::TimeOfDay(t) => write!(f, "{t}"),
            Self::Guid(g) => write!(f, "{g}"),
            Self::Enum { type_name, member } => write!(f, "{type_name}'{member}'"),
        }
    }
}

/// What a property path starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRoot {
    /// The entity being filtered; lambda bodies reach their own rows through the range variable.
    Implicit,
    /// `$it`, the outermost entity.
    It,
    /// A lambda range variable.
    Variable(String),
}

/// A `/`-separated property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    /// Where the path starts.
    pub root: PathRoot,
    /// Property names after the root; may be empty for a bare range variable.
    pub segments: Vec<String>,
    /// Character offset of the path in the input.
    pub position: usize,
}

impl PropertyPath {
    /// A single-segment path rooted at the current entity.
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            root: PathRoot::Implicit,
            segments: vec![name.into()],
            position: 0,
        }
    }

    /// The single property name, if the path is one implicit segment.
    #[must_use]
    pub fn as_simple(&self) -> Option<&str> {
        match (&self.root, self.segments.as_slice()) {
            (PathRoot::Implicit, [name]) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::with_capacity(self.segments.len() + 1);
        match &self.root {
            PathRoot::Implicit => {}
            PathRoot::It => parts.push("$it"),
            PathRoot::Variable(v) => parts.push(v),
        }
        parts.extend(self.segments.iter().map(String::as_str));
        f.write_str(&parts.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Lambdas
// ---------------------------------------------------------------------------

/// `any` or `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaOp {
    /// True if some related row satisfies the predicate.
    Any,
    /// True if every related row satisfies the predicate.
    All,
}

impl fmt::Display for LambdaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::All => "all",
        })
    }
}

/// `collection/any(v: predicate)` and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    /// The collection being quantified over.
    pub collection: PropertyPath,
    /// Quantifier.
    pub operator: LambdaOp,
    /// Range variable; absent only for `any()`.
    pub variable: Option<String>,
    /// Predicate; absent only for `any()`.
    pub predicate: Option<Box<Expr>>,
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// Functions taking no arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullaryFn {
    /// `now()`
    Now,
    /// `maxdatetime()`
    MaxDateTime,
    /// `mindatetime()`
    MinDateTime,
}

/// Functions taking one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    /// `tolower(s)`
    ToLower,
    /// `toupper(s)`
    ToUpper,
    /// `trim(s)`
    Trim,
    /// `length(s)`
    Length,
    /// `year(d)`
    Year,
    /// `month(d)`
    Month,
    /// `day(d)`
    Day,
    /// `hour(t)`
    Hour,
    /// `minute(t)`
    Minute,
    /// `second(t)`
    Second,
    /// `fractionalseconds(t)`
    FractionalSeconds,
    /// `date(dt)`
    Date,
    /// `time(dt)`
    Time,
    /// `ceiling(n)`
    Ceiling,
    /// `floor(n)`
    Floor,
    /// `round(n)`
    Round,
}

/// Functions taking two arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFn {
    /// `contains(s, sub)`
    Contains,
    /// `startswith(s, prefix)`
    StartsWith,
    /// `endswith(s, suffix)`
    EndsWith,
    /// `indexof(s, sub)`
    IndexOf,
    /// `concat(a, b)`
    Concat,
    /// `matchespattern(s, regex)`
    MatchesPattern,
    /// `geo.distance(a, b)`
    GeoDistance,
    /// `geo.intersects(point, polygon)`
    GeoIntersects,
}

/// A function name resolved at parse time, before arguments are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionSig {
    /// 0 arguments.
    Nullary(NullaryFn),
    /// 1 argument.
    Unary(UnaryFn),
    /// 2 arguments.
    Binary(BinaryFn),
    /// `substring`, 2 or 3 arguments.
    Substring,
    /// `cast(expr, Type)`.
    Cast,
    /// `has(value, flag)`, sugar for the `has` operator.
    Has,
}

impl FunctionSig {
    /// Resolve a function name, ignoring case.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let sig = match name.to_ascii_lowercase().as_str() {
            "now" => Self::Nullary(NullaryFn::Now),
            "maxdatetime" => Self::Nullary(NullaryFn::MaxDateTime),
            "mindatetime" => Self::Nullary(NullaryFn::MinDateTime),
            "tolower" => Self::Unary(UnaryFn::ToLower),
            "toupper" => Self::Unary(UnaryFn::ToUpper),
            "trim" => Self::Unary(UnaryFn::Trim),
            "length" => Self::Unary(UnaryFn::Length),
            "year" => Self::Unary(UnaryFn::Year),
            "month" => Self::Unary(UnaryFn::Month),
            "day" => Self::Unary(UnaryFn::Day),
            "hour" => Self::Unary(UnaryFn::Hour),
            "minute" => Self::Unary(UnaryFn::Minute),
            "second" => Self::Unary(UnaryFn::Second),
            "fractionalseconds" => Self::Unary(UnaryFn::FractionalSeconds),
            "date" => Self::Unary(UnaryFn::Date),
            "time" => Self::Unary(UnaryFn::Time),
            "ceiling" => Self::Unary(UnaryFn::Ceiling),
            "floor" => Self::Unary(UnaryFn::Floor),
            "round" => Self::Unary(UnaryFn::Round),
            "contains" => Self::Binary(BinaryFn::Contains),
            "startswith" => Self::Binary(BinaryFn::StartsWith),
            "endswith" => Self::Binary(BinaryFn::EndsWith),
            "indexof" => Self::Binary(BinaryFn::IndexOf),
            "concat" => Self::Binary(BinaryFn::Concat),
            "matchespattern" => Self::Binary(BinaryFn::MatchesPattern),
            "geo.distance" => Self::Binary(BinaryFn::GeoDistance),
            "geo.intersects" => Self::Binary(BinaryFn::GeoIntersects),
            "substring" => Self::Substring,
            "cast" => Self::Cast,
            "has" => Self::Has,
            _ => return None,
        };
        Some(sig)
    }

    /// Accepted argument counts.
    #[must_use]
    pub fn arity(self) -> std::ops::RangeInclusive<usize> {
        match self {
            Self::Nullary(_) => 0..=0,
            Self::Unary(_) => 1..=1,
            Self::Binary(_) | Self::Cast | Self::Has => 2..=2,
            Self::Substring => 2..=3,
        }
    }
}

/// A resolved function call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// `f()`
    Nullary(NullaryFn),
    /// `f(arg)`
    Unary {
        /// Function.
        func: UnaryFn,
        /// Argument.
        arg: Box<Expr>,
    },
    /// `f(left, right)`
    Binary {
        /// Function.
        func: BinaryFn,
        /// First argument.
        left: Box<Expr>,
        /// Second argument.
        right: Box<Expr>,
    },
    /// `substring(source, start[, length])`
    Substring {
        /// String operand.
        source: Box<Expr>,
        /// Zero-based start.
        start: Box<Expr>,
        /// Optional length.
        length: Option<Box<Expr>>,
    },
    /// `cast(expr, Edm.Type)`
    Cast {
        /// Operand.
        expr: Box<Expr>,
        /// Target type.
        target: EdmType,
    },
}

impl fmt::Display for NullaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Now => "now",
            Self::MaxDateTime => "maxdatetime",
            Self::MinDateTime => "mindatetime",
        })
    }
}

impl fmt::Display for UnaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ToLower => "tolower",
            Self::ToUpper => "toupper",
            Self::Trim => "trim",
            Self::Length => "length",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::FractionalSeconds => "fractionalseconds",
            Self::Date => "date",
            Self::Time => "time",
            Self::Ceiling => "ceiling",
            Self::Floor => "floor",
            Self::Round => "round",
        })
    }
}

impl fmt::Display for BinaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::IndexOf => "indexof",
            Self::Concat => "concat",
            Self::MatchesPattern => "matchespattern",
            Self::GeoDistance => "geo.distance",
            Self::GeoIntersects => "geo.intersects",
        })
    }
}

// ---------------------------------------------------------------------------
// Display (fully parenthesized canonical form)
// ---------------------------------------------------------------------------

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "(not {operand})"),
            Self::Unary {
                op: UnaryOp::Negate,
                operand,
            } => write!(f, "(-{operand})"),
            Self::Compare { op, left, right } => write!(f, "({left} {op} {right})"),
            Self::In { value, list } => {
                let items: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "({value} in ({}))", items.join(", "))
            }
            Self::Call(call) => write!(f, "{call}"),
            Self::Identifier(path) => write!(f, "{path}"),
            Self::Literal(lit) => write!(f, "{lit}"),
            Self::Group(inner) => write!(f, "({inner})"),
            Self::Lambda(lambda) => match (&lambda.variable, &lambda.predicate) {
                (Some(var), Some(pred)) => write!(
                    f,
                    "{}/{}({var}: {pred})",
                    lambda.collection, lambda.operator
                ),
                _ => write!(f, "{}/{}()", lambda.collection, lambda.operator),
            },
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nullary(func) => write!(f, "{func}()"),
            Self::Unary { func, arg } => write!(f, "{func}({arg})"),
            Self::Binary { func, left, right } => write!(f, "{func}({left}, {right})"),
            Self::Substring {
                source,
                start,
                length: Some(length),
            } => write!(f, "substring({source}, {start}, {length})"),
            Self::Substring {
                source,
                start,
                length: None,
            } => write!(f, "substring({source}, {start})"),
            Self::Cast { expr, target } => write!(f, "cast({expr}, {target})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Collect every property path in `expr`, including lambda collections and
/// paths inside lambda predicates.
pub fn collect_paths<'a>(expr: &'a Expr, out: &mut Vec<&'a PropertyPath>) {
    match expr {
        Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => {
            collect_paths(left, out);
            collect_paths(right, out);
        }
        Expr::Unary { operand, .. } | Expr::Group(operand) => collect_paths(operand, out),
        Expr::In { value, list } => {
            collect_paths(value, out);
            for item in list {
                collect_paths(item, out);
            }
        }
        Expr::Call(call) => match call {
            Call::Nullary(_) => {}
            Call::Unary { arg, .. } => collect_paths(arg, out),
            Call::Binary { left, right, .. } => {
                collect_paths(left, out);
                collect_paths(right, out);
            }
            Call::Substring {
                source,
                start,
                length,
            } => {
                collect_paths(source, out);
                collect_paths(start, out);
                if let Some(length) = length {
                    collect_paths(length, out);
                }
            }
            Call::Cast { expr, .. } => collect_paths(expr, out),
        },
        Expr::Identifier(path) => out.push(path),
        Expr::Literal(_) => {}
        Expr::Lambda(lambda) => {
            out.push(&lambda.collection);
            if let Some(pred) = &lambda.predicate {
                collect_paths(pred, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_resolve_function_names_case_insensitively() {
        assert_eq!(
            FunctionSig::lookup("ToLower"),
            Some(FunctionSig::Unary(UnaryFn::ToLower))
        );
        assert_eq!(
            FunctionSig::lookup("GEO.DISTANCE"),
            Some(FunctionSig::Binary(BinaryFn::GeoDistance))
        );
        assert_eq!(FunctionSig::lookup("frobnicate"), None);
        assert_eq!(FunctionSig::Substring.arity(), 2..=3);
    }

    #[test]
    fn test_should_strip_groups() {
        let inner = Expr::Literal(Literal::Int(1));
        let grouped = Expr::Group(Box::new(Expr::Group(Box::new(inner.clone()))));
        assert_eq!(grouped.ungrouped(), &inner);
        assert_eq!(grouped.as_literal(), Some(&Literal::Int(1)));
    }

    #[test]
    fn test_should_render_paths() {
        let path = PropertyPath {
            root: PathRoot::Variable("o".to_owned()),
            segments: vec!["Customer".to_owned(), "Name".to_owned()],
            position: 0,
        };
        assert_eq!(path.to_string(), "o/Customer/Name");
        assert_eq!(path.as_simple(), None);
        assert_eq!(PropertyPath::simple("Price").as_simple(), Some("Price"));
    }

    #[test]
    fn test_should_escape_string_literal_display() {
        assert_eq!(Literal::String("O'Neil".to_owned()).to_string(), "'O''Neil'");
        assert_eq!(Literal::Decimal(2.0).to_string(), "2.0");
    }
}
