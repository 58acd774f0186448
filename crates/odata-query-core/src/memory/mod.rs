//! Query options over already-materialized collections.
//!
//! [`evaluate`] applies `$filter`, then a stable multi-key `$orderby`, then
//! `$skip` and `$top`, and returns a new `Vec`. Items expose their properties
//! through [`FieldAccessor`]; filtering is delegated to a
//! [`PredicateEvaluator`], of which [`AccessorPredicate`] is a ready-made one.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//!
//! use odata_query_core::config::EngineConfig;
//! use odata_query_core::memory::{AccessorPredicate, FieldValue, evaluate};
//! use odata_query_core::options::QueryOptions;
//!
//! let items: Vec<HashMap<String, FieldValue>> = [("a", 3), ("b", 1), ("c", 2)]
//!     .into_iter()
//!     .map(|(name, rank)| {
//!         HashMap::from([
//!             ("Name".to_owned(), FieldValue::from(name)),
//!             ("Rank".to_owned(), FieldValue::from(rank)),
//!         ])
//!     })
//!     .collect();
//! let options = QueryOptions::parse_query_string(
//!     "$filter=Rank gt 1&$orderby=Rank desc",
//!     &EngineConfig::default(),
//! )
//! .unwrap();
//! let out = evaluate(&items, &options, &AccessorPredicate).unwrap();
//! assert_eq!(out[0]["Name"], FieldValue::from("a"));
//! assert_eq!(out.len(), 2);
//! ```

mod predicate;
mod value;

use std::cmp::Ordering;

use odata_query_model::{QueryError, QueryResult};
use tracing::{debug, trace};

pub use predicate::AccessorPredicate;
pub use value::{FieldAccessor, FieldValue};

use self::value::describe;
use crate::expression::Expr;
use crate::options::{OrderByItem, QueryOptions};

/// Decides whether an item satisfies a `$filter` expression.
///
/// Implemented for closures `Fn(&T, &Expr) -> QueryResult<bool>`, so a
/// caller with its own filter semantics can pass one directly.
pub trait PredicateEvaluator<T: ?Sized> {
    /// Returns `true` if `item` matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error when `filter` cannot be evaluated against `item`.
    fn matches(&self, item: &T, filter: &Expr) -> QueryResult<bool>;
}

impl<T: ?Sized, F> PredicateEvaluator<T> for F
where
    F: Fn(&T, &Expr) -> QueryResult<bool>,
{
    fn matches(&self, item: &T, filter: &Expr) -> QueryResult<bool> {
        self(item, filter)
    }
}

/// Apply `options` to `items`: filter, order, skip, then top.
///
/// The input is not modified. `$select`, `$expand` and `$count` are shaping
/// concerns of the caller and are ignored here.
///
/// # Errors
///
/// - `UnknownProperty` when an `$orderby` key names a property an item does
///   not have. Keys are checked against the first input item before
///   filtering, so the error does not depend on how many items match.
/// - `TypeMismatch` when one `$orderby` key yields values of incompatible
///   types across items.
/// - `Unsupported` for an `$orderby` key that is not a plain property, and
///   for `$apply` or `$compute`.
/// - Any error returned by `predicate`.
pub fn evaluate<T, P>(items: &[T], options: &QueryOptions, predicate: &P) -> QueryResult<Vec<T>>
where
    T: FieldAccessor + Clone,
    P: PredicateEvaluator<T> + ?Sized,
{
    if !options.apply.is_empty() {
        return Err(QueryError::unsupported("$apply over an in-memory collection"));
    }
    if !options.compute.is_empty() {
        return Err(QueryError::unsupported("$compute over an in-memory collection"));
    }
    debug!(
        items = items.len(),
        filter = options.filter.is_some(),
        order_keys = options.order_by.len(),
        top = ?options.top,
        skip = ?options.skip,
        "evaluating in-memory collection"
    );

    let names = order_names(&options.order_by)?;
    if let Some(first) = items.first() {
        for name in &names {
            if first.field(name).is_none() {
                return Err(unknown_property(name));
            }
        }
    }

    let mut rows: Vec<&T> = match &options.filter {
        Some(filter) => {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if predicate.matches(item, filter)? {
                    kept.push(item);
                }
            }
            kept
        }
        None => items.iter().collect(),
    };
    trace!(matched = rows.len(), "filtered");

    if !options.order_by.is_empty() {
        rows = order(rows, &options.order_by, &names)?;
    }

    let skip = options.skip.map_or(0, to_usize);
    let top = options.top.map_or(usize::MAX, to_usize);
    let out: Vec<T> = rows.into_iter().skip(skip).take(top).cloned().collect();
    debug!(returned = out.len(), "evaluated in-memory collection");
    Ok(out)
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn unknown_property(name: &str) -> QueryError {
    QueryError::UnknownProperty {
        name: name.to_owned(),
        entity: "item".to_owned(),
    }
}

fn order_names(keys: &[OrderByItem]) -> QueryResult<Vec<&str>> {
    keys.iter()
        .map(|key| {
            key.expr.as_path().and_then(|p| p.as_simple()).ok_or_else(|| {
                QueryError::unsupported(format!(
                    "$orderby on '{}' over an in-memory collection; only properties are supported",
                    key.expr
                ))
            })
        })
        .collect()
}

/// Stable sort by every key in turn; nulls first ascending.
fn order<'t, T: FieldAccessor>(
    rows: Vec<&'t T>,
    keys: &[OrderByItem],
    names: &[&str],
) -> QueryResult<Vec<&'t T>> {
    let mut keyed: Vec<(Vec<FieldValue>, &T)> = Vec::with_capacity(rows.len());
    for row in rows {
        let values = names
            .iter()
            .map(|name| row.field(name).ok_or_else(|| unknown_property(name)))
            .collect::<QueryResult<Vec<_>>>()?;
        keyed.push((values, row));
    }

    for (i, name) in names.iter().enumerate() {
        let mut seen: Option<&FieldValue> = None;
        for (values, _) in &keyed {
            let value = &values[i];
            if value.is_null() {
                continue;
            }
            match seen {
                Some(first) if first.class() != value.class() => {
                    return Err(QueryError::type_mismatch(format!(
                        "$orderby key '{name}' mixes {} and {} values",
                        describe(first),
                        describe(value)
                    )));
                }
                Some(_) => {}
                None => seen = Some(value),
            }
        }
    }

    keyed.sort_by(|(a, _), (b, _)| {
        keys.iter()
            .zip(a.iter().zip(b))
            .map(|(key, (x, y))| {
                let ordering = x.try_cmp(y).unwrap_or(Ordering::Equal);
                if key.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use odata_query_model::ErrorKind;

    use super::*;
    use crate::config::EngineConfig;

    #[derive(Debug, Clone, PartialEq)]
    struct Product {
        name: &'static str,
        category: Option<&'static str>,
        price: f64,
        stock: u32,
    }

    impl FieldAccessor for Product {
        fn field(&self, name: &str) -> Option<FieldValue> {
            Some(match name {
                "Name" => self.name.into(),
                "Category" => self.category.into(),
                "Price" => self.price.into(),
                "Stock" => self.stock.into(),
                _ => return None,
            })
        }
    }

    fn products() -> Vec<Product> {
        let p = |name, category, price, stock| Product {
            name,
            category,
            price,
            stock,
        };
        vec![
            p("bolt", Some("B"), 0.5, 100),
            p("anvil", Some("A"), 120.0, 2),
            p("cable", None, 4.0, 30),
            p("drill", Some("A"), 80.0, 5),
            p("epoxy", Some("B"), 9.5, 0),
        ]
    }

    fn options(query: &str) -> QueryOptions {
        QueryOptions::parse_query_string(query, &EngineConfig::default()).unwrap()
    }

    fn names(items: &[Product]) -> Vec<&'static str> {
        items.iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_should_filter_order_and_page() {
        let items = products();
        let out = evaluate(
            &items,
            &options("$filter=Stock gt 0&$orderby=Price desc&$skip=1&$top=2"),
            &AccessorPredicate,
        )
        .unwrap();
        assert_eq!(names(&out), ["drill", "cable"]);
        assert_eq!(items, products());
    }

    #[test]
    fn test_should_sort_stably_on_multiple_keys() {
        let items = products();
        let out = evaluate(&items, &options("$orderby=Category,Price desc"), &AccessorPredicate)
            .unwrap();
        assert_eq!(names(&out), ["cable", "anvil", "drill", "epoxy", "bolt"]);

        let out = evaluate(&items, &options("$orderby=Category desc"), &AccessorPredicate).unwrap();
        assert_eq!(names(&out), ["bolt", "epoxy", "anvil", "drill", "cable"]);
    }

    #[test]
    fn test_should_error_on_missing_order_property() {
        let err = evaluate(&products(), &options("$orderby=Missing"), &AccessorPredicate)
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownProperty {
                name: "Missing".to_owned(),
                entity: "item".to_owned(),
            }
        );
    }

    #[test]
    fn test_should_error_on_missing_order_property_when_nothing_matches() {
        let err = evaluate(
            &products(),
            &options("$filter=Price lt 0&$orderby=Missing"),
            &AccessorPredicate,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { ref name, .. } if name == "Missing"));

        let out = evaluate(
            &products(),
            &options("$filter=Price lt 0&$orderby=Price"),
            &AccessorPredicate,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_should_error_on_mixed_order_types() {
        let items = vec![
            HashMap::from([("Code".to_owned(), FieldValue::from(1))]),
            HashMap::from([("Code".to_owned(), FieldValue::from("x"))]),
        ];
        let err = evaluate(&items, &options("$orderby=Code"), &AccessorPredicate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Semantic);
    }

    #[test]
    fn test_should_compare_numeric_classes_when_ordering() {
        let items = vec![
            HashMap::from([("N".to_owned(), FieldValue::Float(1.5))]),
            HashMap::from([("N".to_owned(), FieldValue::UInt(1))]),
            HashMap::from([("N".to_owned(), FieldValue::Int(-2))]),
        ];
        let out = evaluate(&items, &options("$orderby=N"), &AccessorPredicate).unwrap();
        let values: Vec<FieldValue> = out.iter().map(|m| m["N"].clone()).collect();
        assert_eq!(
            values,
            [FieldValue::Int(-2), FieldValue::UInt(1), FieldValue::Float(1.5)]
        );
    }

    #[test]
    fn test_should_reject_computed_order_keys() {
        let err = evaluate(&products(), &options("$orderby=Price mul 2"), &AccessorPredicate)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = evaluate(
            &products(),
            &options("$apply=groupby((Category))"),
            &AccessorPredicate,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_should_accept_closure_predicate() {
        let only_a = |p: &Product, _: &Expr| -> QueryResult<bool> { Ok(p.category == Some("A")) };
        let out = evaluate(&products(), &options("$filter=true"), &only_a).unwrap();
        assert_eq!(names(&out), ["anvil", "drill"]);
    }

    #[test]
    fn test_should_propagate_predicate_errors() {
        let err = evaluate(&products(), &options("$filter=Weight gt 1"), &AccessorPredicate)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { .. }));
    }

    #[test]
    fn test_should_return_everything_without_options() {
        let out = evaluate(&products(), &QueryOptions::default(), &AccessorPredicate).unwrap();
        assert_eq!(out, products());
    }
}
