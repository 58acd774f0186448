//! `$apply` transformations.
//!
//! A pipeline is a `/`-separated list of transformations applied in order.
//! Parsing is metadata-free; the compiler checks aliases and properties.

mod parser;

use std::fmt;

use crate::expression::{Expr, PropertyPath};

pub use parser::{parse_apply, parse_apply_with, parse_compute, parse_compute_with};

/// One stage of an `$apply` pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyTransformation {
    /// `groupby((p1, p2)[, aggregate(...)])`
    GroupBy {
        /// Grouping properties.
        properties: Vec<PropertyPath>,
        /// Aggregates computed per group.
        aggregate: Option<Vec<AggregateExpression>>,
    },
    /// `aggregate(...)` over the whole input.
    Aggregate {
        /// Aggregates.
        expressions: Vec<AggregateExpression>,
    },
    /// `filter(expr)`
    Filter {
        /// Boolean predicate.
        expression: Expr,
    },
    /// `compute(expr as alias, ...)`
    Compute {
        /// Computed columns.
        expressions: Vec<ComputeExpression>,
    },
}

/// Aggregation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMethod {
    /// `sum`
    Sum,
    /// `average`
    Avg,
    /// `min`
    Min,
    /// `max`
    Max,
    /// `count` (rows)
    Count,
    /// `countdistinct`
    CountDistinct,
}

impl AggregateMethod {
    /// Resolve a method name, ignoring case.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let method = match name.to_ascii_lowercase().as_str() {
            "sum" => Self::Sum,
            "average" | "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "countdistinct" => Self::CountDistinct,
            _ => return None,
        };
        Some(method)
    }
}

impl fmt::Display for AggregateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Avg => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::CountDistinct => "countdistinct",
        })
    }
}

/// `<operand> with <method> as <alias>`, or `$count as <alias>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpression {
    /// Aggregated value; `None` for a bare row count.
    pub operand: Option<Expr>,
    /// Method.
    pub method: AggregateMethod,
    /// Output name.
    pub alias: String,
}

/// `<expr> as <alias>`, used by `$compute` and the `compute` stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeExpression {
    /// Value expression.
    pub expr: Expr,
    /// Output name.
    pub alias: String,
}
