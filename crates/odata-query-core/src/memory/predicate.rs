//! A [`PredicateEvaluator`] that walks the expression tree directly.

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use odata_query_model::{QueryError, QueryResult};
use regex::Regex;

use super::PredicateEvaluator;
use super::value::{FieldAccessor, FieldValue, ValueClass, describe};
use crate::expression::{
    BinaryFn, BinaryOp, Call, CompareOp, Expr, Literal, NullaryFn, PathRoot, PropertyPath,
    UnaryFn, UnaryOp, collect_paths,
};

/// Evaluates `$filter` expressions against any [`FieldAccessor`] item.
///
/// Comparisons, logic, arithmetic, `in`, `has`, and the string, date and
/// math functions are supported. Lambda operators, `cast` and geo functions
/// return an unsupported error.
///
/// Null handling matches SQL three-valued logic: a comparison, `in`, `has`
/// or string predicate over a null operand is unknown, `not` of unknown
/// stays unknown, and a filter that ends unknown excludes the item. The
/// exception is a comparison against the `null` literal itself, which tests
/// for null the way `IS NULL` does.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessorPredicate;

impl<T: FieldAccessor> PredicateEvaluator<T> for AccessorPredicate {
    fn matches(&self, item: &T, filter: &Expr) -> QueryResult<bool> {
        let eval = Eval { item };
        let outcome = eval.boolean(filter, "$filter")?;
        eval.check_paths(filter)?;
        Ok(outcome.unwrap_or(false))
    }
}

struct Eval<'i, T> {
    item: &'i T,
}

impl<T: FieldAccessor> Eval<'_, T> {
    fn value(&self, expr: &Expr) -> QueryResult<FieldValue> {
        match expr {
            Expr::Group(inner) => self.value(inner),
            Expr::Literal(lit) => Ok(literal(lit)),
            Expr::Identifier(path) => self.field(path),
            Expr::Binary { op, left, right } if op.is_logical() => self.logical(*op, left, right),
            Expr::Binary { op, left, right } => {
                arithmetic(*op, &self.value(left)?, &self.value(right)?)
            }
            Expr::Unary { op, operand } => self.unary(*op, operand),
            Expr::Compare { op, left, right } => self.compare(*op, left, right),
            Expr::In { value, list } => {
                let value = self.value(value)?;
                let mut unknown = value.is_null();
                for candidate in list {
                    let candidate = self.value(candidate)?;
                    if value.is_null() || candidate.is_null() {
                        unknown = true;
                    } else if value.try_cmp(&candidate)?.is_eq() {
                        return Ok(FieldValue::Bool(true));
                    }
                }
                Ok(if unknown {
                    FieldValue::Null
                } else {
                    FieldValue::Bool(false)
                })
            }
            Expr::Call(call) => self.call(call),
            Expr::Lambda(lambda) => Err(QueryError::unsupported(format!(
                "'{}' over an in-memory collection",
                lambda.operator
            ))),
        }
    }

    fn field(&self, path: &PropertyPath) -> QueryResult<FieldValue> {
        let name = match (&path.root, path.segments.as_slice()) {
            (PathRoot::Implicit | PathRoot::It, [name]) => name,
            (PathRoot::Variable(variable), _) => {
                return Err(QueryError::unsupported(format!(
                    "range variable '{variable}' outside a lambda"
                )));
            }
            _ => {
                return Err(QueryError::unsupported(format!(
                    "path '{path}' on an in-memory item"
                )));
            }
        };
        self.item
            .field(name)
            .ok_or_else(|| QueryError::UnknownProperty {
                name: name.clone(),
                entity: "item".to_owned(),
            })
    }

    /// Names that evaluation skipped (an `in` list after a match) must still
    /// exist on the item.
    fn check_paths(&self, expr: &Expr) -> QueryResult<()> {
        let mut paths = Vec::new();
        collect_paths(expr, &mut paths);
        for path in paths {
            let simple = matches!(
                (&path.root, path.segments.as_slice()),
                (PathRoot::Implicit | PathRoot::It, [_])
            );
            if simple {
                self.field(path)?;
            }
        }
        Ok(())
    }

    fn boolean(&self, expr: &Expr, what: &str) -> QueryResult<Option<bool>> {
        match self.value(expr)? {
            FieldValue::Bool(b) => Ok(Some(b)),
            FieldValue::Null => Ok(None),
            other => Err(QueryError::type_mismatch(format!(
                "{what} must be boolean, found {}",
                describe(&other)
            ))),
        }
    }

    fn logical(&self, op: BinaryOp, left: &Expr, right: &Expr) -> QueryResult<FieldValue> {
        let what = format!("operand of '{op}'");
        let l = self.boolean(left, &what)?;
        let r = self.boolean(right, &what)?;
        let result = match op {
            BinaryOp::And => match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            _ => match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        };
        Ok(result.map_or(FieldValue::Null, FieldValue::Bool))
    }

    fn unary(&self, op: UnaryOp, operand: &Expr) -> QueryResult<FieldValue> {
        match op {
            UnaryOp::Not => Ok(self
                .boolean(operand, "operand of 'not'")?
                .map_or(FieldValue::Null, |b| FieldValue::Bool(!b))),
            UnaryOp::Negate => match self.value(operand)? {
                FieldValue::Null => Ok(FieldValue::Null),
                FieldValue::Int(n) => n.checked_neg().map(FieldValue::Int).ok_or_else(overflow),
                FieldValue::UInt(n) => i64::try_from(n)
                    .map(|n| FieldValue::Int(-n))
                    .map_err(|_| overflow()),
                FieldValue::Float(n) => Ok(FieldValue::Float(-n)),
                other => Err(QueryError::type_mismatch(format!(
                    "operand of '-' must be numeric, found {}",
                    describe(&other)
                ))),
            },
        }
    }

    fn compare(&self, op: CompareOp, left: &Expr, right: &Expr) -> QueryResult<FieldValue> {
        let holds: fn(Ordering) -> bool = match op {
            CompareOp::Has => return has(&self.value(left)?, &self.value(right)?),
            CompareOp::Eq => Ordering::is_eq,
            CompareOp::Ne => Ordering::is_ne,
            CompareOp::Gt => Ordering::is_gt,
            CompareOp::Ge => Ordering::is_ge,
            CompareOp::Lt => Ordering::is_lt,
            CompareOp::Le => Ordering::is_le,
        };
        let l = self.value(left)?;
        let r = self.value(right)?;

        // A `null` literal operand is a null test, not an unknown comparison.
        let null_test = match (is_null_literal(left), is_null_literal(right)) {
            (false, false) => None,
            _ if op.is_ordering() => {
                return Err(QueryError::InvalidOperand {
                    operation: op.to_string(),
                    message: format!("cannot order against null in '{left} {op} {right}'"),
                });
            }
            (true, true) => Some(true),
            (true, false) => Some(r.is_null()),
            (false, true) => Some(l.is_null()),
        };
        if let Some(is_null) = null_test {
            return Ok(FieldValue::Bool(is_null == (op == CompareOp::Eq)));
        }
        if l.is_null() || r.is_null() {
            return Ok(FieldValue::Null);
        }
        Ok(FieldValue::Bool(holds(l.try_cmp(&r)?)))
    }

    fn call(&self, call: &Call) -> QueryResult<FieldValue> {
        match call {
            Call::Nullary(func) => nullary(*func),
            Call::Unary { func, arg } => unary_fn(*func, self.value(arg)?),
            Call::Binary { func, left, right } => {
                binary_fn(*func, &self.value(left)?, &self.value(right)?)
            }
            Call::Substring {
                source,
                start,
                length,
            } => {
                let source = self.value(source)?;
                let start = self.value(start)?;
                let length = length.as_ref().map(|l| self.value(l)).transpose()?;
                substring(&source, &start, length.as_ref())
            }
            Call::Cast { target, .. } => Err(QueryError::unsupported(format!(
                "cast to {target} over an in-memory collection"
            ))),
        }
    }
}

fn overflow() -> QueryError {
    QueryError::InvalidOperand {
        operation: "arithmetic".to_owned(),
        message: "integer overflow".to_owned(),
    }
}

fn is_null_literal(expr: &Expr) -> bool {
    matches!(expr.ungrouped(), Expr::Literal(Literal::Null))
}

fn literal(lit: &Literal) -> FieldValue {
    match lit {
        Literal::Null => FieldValue::Null,
        Literal::Boolean(b) => FieldValue::Bool(*b),
        Literal::Int(n) => FieldValue::Int(*n),
        Literal::Decimal(n) => FieldValue::Float(*n),
        Literal::String(s) => FieldValue::String(s.clone()),
        Literal::Date(d) => FieldValue::Date(*d),
        Literal::DateTimeOffset(dt) => FieldValue::DateTime(*dt),
        Literal::TimeOfDay(t) => FieldValue::Time(*t),
        Literal::Guid(g) => FieldValue::Guid(*g),
        Literal::Enum { member, .. } => FieldValue::String(member.clone()),
    }
}

fn numeric(op: &str, value: &FieldValue) -> QueryResult<()> {
    if value.class() == Some(ValueClass::Numeric) {
        Ok(())
    } else {
        Err(QueryError::type_mismatch(format!(
            "operand of '{op}' must be numeric, found {}",
            describe(value)
        )))
    }
}

fn arithmetic(op: BinaryOp, l: &FieldValue, r: &FieldValue) -> QueryResult<FieldValue> {
    if l.is_null() || r.is_null() {
        return Ok(FieldValue::Null);
    }
    let name = op.to_string();
    numeric(&name, l)?;
    numeric(&name, r)?;

    if let (Some(a), Some(b), false) = (l.as_i64(), r.as_i64(), op == BinaryOp::DivBy) {
        let out = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                return Err(QueryError::InvalidOperand {
                    operation: name,
                    message: "division by zero".to_owned(),
                });
            }
            BinaryOp::Div => a.checked_div(b),
            _ => a.checked_rem(b),
        };
        return out.map(FieldValue::Int).ok_or_else(overflow);
    }

    let (a, b) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
    Ok(FieldValue::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::DivBy => a / b,
        _ => a % b,
    }))
}

fn has(l: &FieldValue, r: &FieldValue) -> QueryResult<FieldValue> {
    if l.is_null() || r.is_null() {
        return Ok(FieldValue::Null);
    }
    match (l.as_i64(), r.as_i64()) {
        (Some(value), Some(flag)) => Ok(FieldValue::Bool(value & flag == flag)),
        _ => Err(QueryError::InvalidOperand {
            operation: "has".to_owned(),
            message: format!(
                "operands must be integer flags, found {} and {}",
                describe(l),
                describe(r)
            ),
        }),
    }
}

fn nullary(func: NullaryFn) -> QueryResult<FieldValue> {
    let instant = match func {
        NullaryFn::Now => return Ok(FieldValue::DateTime(Utc::now().fixed_offset())),
        NullaryFn::MaxDateTime => {
            NaiveDate::from_ymd_opt(9999, 12, 31).and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
        }
        NullaryFn::MinDateTime => {
            NaiveDate::from_ymd_opt(1, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        }
    };
    instant
        .map(|dt| FieldValue::DateTime(dt.and_utc().fixed_offset()))
        .ok_or_else(|| QueryError::unsupported(format!("{func} outside the chrono range")))
}

fn expect_str<'v>(func: impl std::fmt::Display, value: &'v FieldValue) -> QueryResult<&'v str> {
    value.as_str().ok_or_else(|| {
        QueryError::type_mismatch(format!(
            "argument of '{func}' must be a string, found {}",
            describe(value)
        ))
    })
}

fn unary_fn(func: UnaryFn, arg: FieldValue) -> QueryResult<FieldValue> {
    if arg.is_null() {
        return Ok(FieldValue::Null);
    }
    let out = match func {
        UnaryFn::ToLower => FieldValue::String(expect_str(func, &arg)?.to_lowercase()),
        UnaryFn::ToUpper => FieldValue::String(expect_str(func, &arg)?.to_uppercase()),
        UnaryFn::Trim => FieldValue::String(expect_str(func, &arg)?.trim().to_owned()),
        UnaryFn::Length => {
            let n = expect_str(func, &arg)?.chars().count();
            FieldValue::Int(i64::try_from(n).map_err(|_| overflow())?)
        }
        UnaryFn::Ceiling | UnaryFn::Floor | UnaryFn::Round => {
            numeric(&func.to_string(), &arg)?;
            match arg {
                FieldValue::Float(n) => FieldValue::Float(match func {
                    UnaryFn::Ceiling => n.ceil(),
                    UnaryFn::Floor => n.floor(),
                    _ => n.round(),
                }),
                integral => integral,
            }
        }
        UnaryFn::Date => match arg {
            FieldValue::DateTime(dt) => FieldValue::Date(dt.date_naive()),
            FieldValue::Date(d) => FieldValue::Date(d),
            other => return Err(temporal_mismatch(func, &other)),
        },
        UnaryFn::Time => match arg {
            FieldValue::DateTime(dt) => FieldValue::Time(dt.time()),
            FieldValue::Time(t) => FieldValue::Time(t),
            other => return Err(temporal_mismatch(func, &other)),
        },
        UnaryFn::Year | UnaryFn::Month | UnaryFn::Day => {
            let date = match arg {
                FieldValue::Date(d) => d,
                FieldValue::DateTime(dt) => dt.date_naive(),
                other => return Err(temporal_mismatch(func, &other)),
            };
            date_part(func, date)
        }
        UnaryFn::Hour | UnaryFn::Minute | UnaryFn::Second | UnaryFn::FractionalSeconds => {
            let time = match arg {
                FieldValue::Time(t) => t,
                FieldValue::DateTime(dt) => dt.time(),
                other => return Err(temporal_mismatch(func, &other)),
            };
            match func {
                UnaryFn::Hour => FieldValue::Int(time.hour().into()),
                UnaryFn::Minute => FieldValue::Int(time.minute().into()),
                UnaryFn::Second => FieldValue::Int(time.second().into()),
                _ => FieldValue::Float(f64::from(time.nanosecond()) / 1e9),
            }
        }
    };
    Ok(out)
}

fn date_part(func: UnaryFn, date: NaiveDate) -> FieldValue {
    FieldValue::Int(match func {
        UnaryFn::Year => date.year().into(),
        UnaryFn::Month => date.month().into(),
        _ => date.day().into(),
    })
}

fn temporal_mismatch(func: UnaryFn, value: &FieldValue) -> QueryError {
    QueryError::type_mismatch(format!(
        "argument of '{func}' must be a date or time value, found {}",
        describe(value)
    ))
}

fn binary_fn(func: BinaryFn, left: &FieldValue, right: &FieldValue) -> QueryResult<FieldValue> {
    if let BinaryFn::GeoDistance | BinaryFn::GeoIntersects = func {
        return Err(geo_unsupported(func));
    }
    if left.is_null() || right.is_null() {
        return Ok(FieldValue::Null);
    }
    let (s, arg) = (expect_str(func, left)?, expect_str(func, right)?);
    Ok(match func {
        BinaryFn::Contains => FieldValue::Bool(s.contains(arg)),
        BinaryFn::StartsWith => FieldValue::Bool(s.starts_with(arg)),
        BinaryFn::EndsWith => FieldValue::Bool(s.ends_with(arg)),
        BinaryFn::IndexOf => {
            let index = s.find(arg).map_or(-1, |byte| {
                i64::try_from(s[..byte].chars().count()).unwrap_or(i64::MAX)
            });
            FieldValue::Int(index)
        }
        BinaryFn::Concat => FieldValue::String(format!("{s}{arg}")),
        BinaryFn::MatchesPattern => {
            let re = Regex::new(arg).map_err(|e| QueryError::InvalidOperand {
                operation: func.to_string(),
                message: format!("invalid pattern: {e}"),
            })?;
            FieldValue::Bool(re.is_match(s))
        }
        BinaryFn::GeoDistance | BinaryFn::GeoIntersects => return Err(geo_unsupported(func)),
    })
}

fn geo_unsupported(func: BinaryFn) -> QueryError {
    QueryError::unsupported(format!("{func} over an in-memory collection"))
}

fn substring(
    source: &FieldValue,
    start: &FieldValue,
    length: Option<&FieldValue>,
) -> QueryResult<FieldValue> {
    if source.is_null() {
        return Ok(FieldValue::Null);
    }
    let s = expect_str("substring", source)?;
    let index = |v: &FieldValue| {
        v.as_i64()
            .map(|n| usize::try_from(n.max(0)).unwrap_or(usize::MAX))
            .ok_or_else(|| QueryError::InvalidOperand {
                operation: "substring".to_owned(),
                message: format!("position must be an integer, found {}", describe(v)),
            })
    };
    let chars = s.chars().skip(index(start)?);
    let out: String = match length {
        Some(length) => chars.take(index(length)?).collect(),
        None => chars.collect(),
    };
    Ok(FieldValue::String(out))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use odata_query_model::ErrorKind;

    use super::*;
    use crate::expression::parse_expression;

    fn item() -> HashMap<String, FieldValue> {
        HashMap::from([
            ("Name".to_owned(), FieldValue::from("Widget Pro")),
            ("Price".to_owned(), FieldValue::Float(12.5)),
            ("Stock".to_owned(), FieldValue::UInt(3)),
            ("Flags".to_owned(), FieldValue::Int(5)),
            ("Note".to_owned(), FieldValue::Null),
            (
                "Released".to_owned(),
                FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()),
            ),
        ])
    }

    fn eval(input: &str) -> QueryResult<bool> {
        let expr = parse_expression(input).unwrap();
        AccessorPredicate.matches(&item(), &expr)
    }

    #[test]
    fn test_should_evaluate_comparisons_and_logic() {
        assert!(eval("Price gt 10 and Stock le 3").unwrap());
        assert!(eval("Price lt 10 or Name eq 'Widget Pro'").unwrap());
        assert!(!eval("not (Stock eq 3)").unwrap());
        assert!(eval("Stock add 2 eq 5").unwrap());
        assert!(eval("Price mul 2 eq 25").unwrap());
        assert!(eval("Stock in (1, 3)").unwrap());
    }

    #[test]
    fn test_should_treat_null_comparisons_as_unknown() {
        assert!(eval("Note eq null").unwrap());
        assert!(!eval("Note ne null").unwrap());
        assert!(eval("null eq null").unwrap());
        assert!(!eval("Note gt 'a'").unwrap());
        assert!(!eval("contains(Note, 'a')").unwrap());
    }

    #[test]
    fn test_should_keep_unknown_through_not() {
        assert!(!eval("not (Note eq 'x')").unwrap());
        assert!(!eval("not contains(Note, 'a')").unwrap());
        assert!(!eval("not (Note in ('a', 'b'))").unwrap());
        assert!(!eval("not (Stock in (1, null))").unwrap());
        assert!(eval("not (Note eq 'x') or Price gt 1").unwrap());
        assert!(!eval("not (Note eq 'x' and Price gt 1)").unwrap());
        assert!(eval("not (Note eq 'x' and Price lt 1)").unwrap());
    }

    #[test]
    fn test_should_reject_ordering_against_null_literal() {
        let err = eval("Price gt null").unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
    }

    #[test]
    fn test_should_report_unknown_property_on_either_side_of_logic() {
        for input in [
            "Price lt 0 and Foo eq 1",
            "Price gt 0 or Foo eq 1",
            "Stock in (3, Foo)",
        ] {
            let err = eval(input).unwrap_err();
            assert!(
                matches!(err, QueryError::UnknownProperty { ref name, .. } if name == "Foo"),
                "{input}: {err:?}"
            );
        }
    }

    #[test]
    fn test_should_evaluate_string_functions() {
        assert!(eval("contains(Name, 'dget')").unwrap());
        assert!(eval("contains(Name, '')").unwrap());
        assert!(eval("startswith(tolower(Name), 'widget')").unwrap());
        assert!(eval("length(Name) eq 10").unwrap());
        assert!(eval("indexof(Name, 'Pro') eq 7").unwrap());
        assert!(eval("substring(Name, 7) eq 'Pro'").unwrap());
        assert!(eval("matchesPattern(Name, '^W.*o$')").unwrap());
        assert!(eval("year(Released) eq 2024 and day(Released) eq 9").unwrap());
    }

    #[test]
    fn test_should_test_flags_with_has() {
        assert!(eval("Flags has 4").unwrap());
        assert!(!eval("Flags has 2").unwrap());
    }

    #[test]
    fn test_should_report_unknown_and_mismatched_operands() {
        let err = eval("Foo eq 1").unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { ref name, .. } if name == "Foo"));
        assert_eq!(eval("Name eq 1").unwrap_err().kind(), ErrorKind::Semantic);
        assert_eq!(eval("Name add 1 eq 2").unwrap_err().kind(), ErrorKind::Semantic);
        assert!(eval("Price").is_err());
    }

    #[test]
    fn test_should_reject_lambdas_and_casts() {
        assert_eq!(
            eval("Tags/any(t: t eq 'a')").unwrap_err().kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            eval("cast(Stock, Edm.String) eq '3'").unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_should_reject_integer_division_by_zero() {
        assert!(eval("Stock div 0 eq 1").is_err());
        assert!(eval("Stock divby 2 eq 1.5").unwrap());
    }
}
