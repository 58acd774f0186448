//! SQL compiler for parsed query options.
//!
//! Produces parameterized SQL: literal values are always bound, never
//! interpolated. Identifiers come from metadata only and are double-quoted.
//!
//! # Example
//!
//! ```
//! use odata_query_core::compile::{Dialect, compile_query};
//! use odata_query_core::config::EngineConfig;
//! use odata_query_core::options::QueryOptions;
//! use odata_query_model::{EdmType, EntityMetadata, PropertyMetadata, Schema};
//!
//! let schema = Schema::new(vec![EntityMetadata::new(
//!     "Products",
//!     vec![
//!         PropertyMetadata::new("ID", EdmType::Int32).key(),
//!         PropertyMetadata::new("Price", EdmType::Decimal),
//!     ],
//! )]);
//! let options =
//!     QueryOptions::parse_pairs([("$filter", "Price gt 5")], &EngineConfig::default()).unwrap();
//! let query = compile_query(&schema, "Products", &options, Dialect::Sqlite).unwrap();
//! assert_eq!(
//!     query.statement.sql,
//!     "SELECT \"products\".\"id\" AS \"ID\", \"products\".\"price\" AS \"Price\" \
//!      FROM \"products\" WHERE (\"products\".\"price\" > ?)"
//! );
//! ```

pub mod dialect;
pub(crate) mod expr;
pub(crate) mod pipeline;
pub mod shape;
pub mod sql;

use odata_query_model::{EntityMetadata, QueryError, QueryResult, Schema};
use serde::Serialize;
use tracing::debug;

pub use dialect::Dialect;
pub use shape::{FromClause, OrderTerm, QueryShape, SelectColumn};
pub use sql::{CompiledStatement, SqlFragment, SqlParam, escape_like, quote_ident};

use self::expr::{CompileContext, ExprCompiler, RowView};
use self::pipeline::{Stage, row_window};
use self::sql::qualified;
use crate::expression::Expr;
use crate::options::{ExpandItem, OrderByItem, QueryOptions};

/// Output column carrying the parent's join value in expanded rows.
pub const PARENT_KEY_COLUMN: &str = "$parent";

const ROW_NUMBER_COLUMN: &str = "$row";

/// The statements compiled for one request.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledQuery {
    /// Structured form of the main statement.
    #[serde(skip)]
    pub shape: QueryShape,
    /// The main SELECT.
    pub statement: CompiledStatement,
    /// `SELECT COUNT(*)` over the unpaged result when `$count=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<CompiledStatement>,
    /// One statement per `$expand` item.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<CompiledExpand>,
}

/// Related rows for one `$expand` item.
///
/// The statement returns target rows whose join column matches a row of the
/// parent statement; [`PARENT_KEY_COLUMN`] holds that join value.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledExpand {
    /// Navigation property name.
    pub navigation: String,
    /// Target entity name.
    pub target: String,
    /// SELECT over the related rows.
    pub statement: CompiledStatement,
    /// Per-parent counts when the nested options ask for `$count=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<CompiledStatement>,
    /// Nested expansions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<CompiledExpand>,
}

/// Compile all options for `entity` into SELECT (and COUNT) statements.
///
/// # Errors
///
/// Returns semantic errors for names that do not resolve, type mismatches,
/// duplicate or unreachable aliases, and unsupported errors for constructs
/// without a SQL form on `dialect`.
pub fn compile_query(
    schema: &Schema,
    entity: &str,
    options: &QueryOptions,
    dialect: Dialect,
) -> QueryResult<CompiledQuery> {
    let entity = lookup_entity(schema, entity)?;
    debug!(
        entity = %entity.name,
        %dialect,
        apply_stages = options.apply.len(),
        expand = options.expand.len(),
        "compiling query"
    );

    let ctx = CompileContext::new(schema, dialect);
    let aliases = options.aliases();
    let mut stage = Stage::base(entity);

    if let Some(filter) = &options.filter {
        stage.where_clause(&ctx, filter, "$filter", &aliases)?;
    }
    for transformation in &options.apply {
        stage.apply(&ctx, transformation)?;
    }
    if !options.compute.is_empty() {
        stage.compute(&ctx, &options.compute)?;
    }
    if !options.select.is_empty() || !options.order_by.is_empty() {
        stage.ensure_rows(&ctx);
    }
    stage.project(&options.select)?;
    stage.order(&ctx, &options.order_by, &aliases)?;
    stage.shape.limit = options.top;
    stage.shape.offset = options.skip;

    let mut expand = Vec::with_capacity(options.expand.len());
    for item in &options.expand {
        expand.push(compile_expand(&ctx, &stage, item, 1)?);
    }

    let statement = stage.shape.render(dialect);
    let count = options.count.then(|| stage.shape.render_count(dialect));
    debug!(
        sql_len = statement.sql.len(),
        params = statement.params.len(),
        count = count.is_some(),
        "compiled query"
    );
    Ok(CompiledQuery {
        shape: stage.shape,
        statement,
        count,
        expand,
    })
}

/// Compile a boolean expression against `entity` for use in a caller-built
/// statement. Columns are qualified with the entity's table name.
///
/// # Errors
///
/// See [`compile_query`].
pub fn compile_filter(
    schema: &Schema,
    entity: &str,
    expr: &Expr,
    dialect: Dialect,
) -> QueryResult<SqlFragment> {
    let entity = lookup_entity(schema, entity)?;
    let ctx = CompileContext::new(schema, dialect);
    let view = RowView::base(entity);
    ExprCompiler::new(&ctx, &view, "$filter").compile_predicate(expr)
}

/// Compile `$orderby` keys against `entity`.
///
/// # Errors
///
/// See [`compile_query`].
pub fn compile_order_by(
    schema: &Schema,
    entity: &str,
    items: &[OrderByItem],
    dialect: Dialect,
) -> QueryResult<Vec<OrderTerm>> {
    let entity = lookup_entity(schema, entity)?;
    let ctx = CompileContext::new(schema, dialect);
    let mut stage = Stage::base(entity);
    stage.order(&ctx, items, &[])?;
    Ok(stage.shape.order_by)
}

fn lookup_entity<'a>(schema: &'a Schema, name: &str) -> QueryResult<&'a EntityMetadata> {
    schema.entity(name).ok_or_else(|| QueryError::UnknownEntity {
        name: name.to_owned(),
    })
}

fn compile_expand<'a>(
    ctx: &CompileContext<'a>,
    parent: &Stage<'a>,
    item: &ExpandItem,
    depth: usize,
) -> QueryResult<CompiledExpand> {
    let Some(parent_entity) = parent.view.entity.filter(|_| parent.is_base_rows()) else {
        return Err(QueryError::unsupported("$expand together with $apply grouping"));
    };
    let prop = parent_entity
        .property(&item.navigation)
        .ok_or_else(|| QueryError::UnknownProperty {
            name: item.navigation.clone(),
            entity: parent_entity.name.clone(),
        })?;
    let Some(nav) = &prop.navigation else {
        return Err(QueryError::InvalidOperand {
            operation: "$expand".to_owned(),
            message: format!("'{}' is not a navigation property", item.navigation),
        });
    };
    let target = ctx.target(nav)?;
    let options = &item.options;
    debug!(navigation = %item.navigation, target = %target.name, depth, "compiling expand");

    let mut child = Stage::base(target);
    if let Some(filter) = &options.filter {
        child.where_clause(ctx, filter, "$filter", &[])?;
    }
    let join = SqlFragment::sql(expr_column(&child, &nav.target_column));
    let keys = parent.key_subquery(&nav.source_column);
    let mut correlation = join.wrap("", " IN (");
    correlation
        .push(&keys.to_fragment(ctx.dialect))
        .push_sql(")");
    child.shape.and_where(correlation);

    let count = options.count.then(|| {
        let mut counts = child.shape.clone();
        counts.select = vec![
            select_column(join.clone(), PARENT_KEY_COLUMN),
            select_column(SqlFragment::sql("COUNT(*)"), "count"),
        ];
        counts.group_by = vec![join.clone()];
        counts.aggregated = true;
        counts.render(ctx.dialect)
    });

    child.project(&options.select)?;
    child
        .shape
        .select
        .push(select_column(join.clone(), PARENT_KEY_COLUMN));
    child.order(ctx, &options.order_by, &[])?;

    let mut nested = Vec::with_capacity(options.expand.len());
    for inner in &options.expand {
        nested.push(compile_expand(ctx, &child, inner, depth + 1)?);
    }

    let shape = if options.top.is_some() || options.skip.is_some() {
        let mut order = SqlFragment::new();
        if child.shape.order_by.is_empty() {
            order.push(&join);
        } else {
            for (i, term) in child.shape.order_by.iter().enumerate() {
                if i > 0 {
                    order.push_sql(", ");
                }
                order
                    .push(&term.expr)
                    .push_sql(if term.descending { " DESC" } else { " ASC" });
            }
        }
        let mut window = join.wrap("ROW_NUMBER() OVER (PARTITION BY ", " ORDER BY ");
        window.push(&order).push_sql(")");

        let mut inner = child.shape.clone();
        inner.order_by.clear();
        let outputs: Vec<String> = inner.select.iter().map(|c| c.alias.clone()).collect();
        inner.select.push(select_column(window, ROW_NUMBER_COLUMN));

        let alias = ctx.fresh_alias('d');
        let mut outer = inner.into_derived(alias.clone());
        outer.select = outputs
            .iter()
            .map(|name| select_column(SqlFragment::sql(qualified(&alias, name)), name))
            .collect();
        outer.and_where(row_window(&alias, ROW_NUMBER_COLUMN, options.top, options.skip));
        outer.order_by = vec![
            order_term(qualified(&alias, PARENT_KEY_COLUMN)),
            order_term(qualified(&alias, ROW_NUMBER_COLUMN)),
        ];
        outer
    } else {
        let mut shape = child.shape.clone();
        shape.order_by.insert(
            0,
            OrderTerm {
                expr: join,
                descending: false,
            },
        );
        shape
    };

    Ok(CompiledExpand {
        navigation: item.navigation.clone(),
        target: target.name.clone(),
        statement: shape.render(ctx.dialect),
        count,
        expand: nested,
    })
}

fn expr_column(stage: &Stage<'_>, column: &str) -> String {
    qualified(&stage.view.qualifier, column)
}

fn select_column(expr: SqlFragment, alias: &str) -> SelectColumn {
    SelectColumn {
        expr,
        alias: alias.to_owned(),
    }
}

fn order_term(column: String) -> OrderTerm {
    OrderTerm {
        expr: SqlFragment::sql(column),
        descending: false,
    }
}

#[cfg(test)]
mod tests {
    use odata_query_model::{
        EdmType, ErrorKind, Multiplicity, NavigationDescriptor, PropertyMetadata,
    };

    use super::*;
    use crate::config::EngineConfig;

    fn schema() -> Schema {
        Schema::new(vec![
            EntityMetadata::new(
                "Products",
                vec![
                    PropertyMetadata::new("ID", EdmType::Int32).key(),
                    PropertyMetadata::new("Name", EdmType::String),
                    PropertyMetadata::new("Price", EdmType::Decimal),
                    PropertyMetadata::new("Category", EdmType::String),
                ],
            ),
            EntityMetadata::new(
                "Customers",
                vec![
                    PropertyMetadata::new("ID", EdmType::Int32).key(),
                    PropertyMetadata::new("Name", EdmType::String),
                    PropertyMetadata::navigation(
                        "Orders",
                        NavigationDescriptor {
                            target: "Orders".to_owned(),
                            multiplicity: Multiplicity::Many,
                            source_column: "id".to_owned(),
                            target_column: "customer_id".to_owned(),
                        },
                    ),
                ],
            ),
            EntityMetadata::new(
                "Orders",
                vec![
                    PropertyMetadata::new("ID", EdmType::Int32).key(),
                    PropertyMetadata::new("CustomerID", EdmType::Int32),
                    PropertyMetadata::new("Amount", EdmType::Decimal),
                ],
            ),
        ])
    }

    fn compile(entity: &str, pairs: &[(&str, &str)]) -> QueryResult<CompiledQuery> {
        let options = QueryOptions::parse_pairs(pairs.iter().copied(), &EngineConfig::default())?;
        compile_query(&schema(), entity, &options, Dialect::Postgres)
    }

    #[test]
    fn test_should_compile_filter_order_and_paging() {
        let query = compile(
            "Products",
            &[
                ("$filter", "Price gt 5"),
                ("$orderby", "Name desc"),
                ("$top", "10"),
                ("$skip", "5"),
                ("$select", "Name,Price"),
            ],
        )
        .unwrap();
        assert_eq!(
            query.statement.sql,
            "SELECT \"products\".\"name\" AS \"Name\", \"products\".\"price\" AS \"Price\" FROM \"products\" WHERE (\"products\".\"price\" > $1) ORDER BY \"products\".\"name\" DESC LIMIT $2 OFFSET $3"
        );
        assert_eq!(
            query.statement.params,
            vec![SqlParam::Int(5), SqlParam::Int(10), SqlParam::Int(5)]
        );
        assert!(query.count.is_none());
    }

    #[test]
    fn test_should_compile_groupby_with_sum() {
        let query = compile(
            "Products",
            &[("$apply", "groupby((Category), aggregate(Price with sum as Total))")],
        )
        .unwrap();
        assert_eq!(
            query.statement.sql,
            "SELECT \"products\".\"category\" AS \"Category\", SUM(\"products\".\"price\") AS \"Total\" FROM \"products\" GROUP BY \"products\".\"category\""
        );
    }

    #[test]
    fn test_should_wrap_grouping_for_later_stages() {
        let query = compile(
            "Products",
            &[
                (
                    "$apply",
                    "groupby((Category), aggregate(Price with sum as Total))/filter(Total gt 10)",
                ),
                ("$orderby", "Category"),
            ],
        )
        .unwrap();
        assert_eq!(
            query.statement.sql,
            "SELECT \"d1\".\"Category\" AS \"Category\", \"d1\".\"Total\" AS \"Total\" FROM (SELECT \"products\".\"category\" AS \"Category\", SUM(\"products\".\"price\") AS \"Total\" FROM \"products\" GROUP BY \"products\".\"category\") AS \"d1\" WHERE (\"d1\".\"Total\" > $1) ORDER BY \"d1\".\"Category\" ASC"
        );
    }

    #[test]
    fn test_should_apply_top_level_filter_before_pipeline() {
        let query = compile(
            "Products",
            &[
                ("$filter", "Price gt 1"),
                ("$apply", "aggregate($count as N)"),
            ],
        )
        .unwrap();
        assert_eq!(
            query.statement.sql,
            "SELECT COUNT(*) AS \"N\" FROM \"products\" WHERE (\"products\".\"price\" > $1)"
        );
    }

    #[test]
    fn test_should_reject_alias_from_filter_and_orderby() {
        let apply = ("$apply", "groupby((Category), aggregate(Price with sum as Total))");
        let err = compile("Products", &[apply, ("$filter", "Total gt 5")]).unwrap_err();
        assert_eq!(
            err,
            QueryError::UnreachableAlias {
                alias: "Total".to_owned(),
                option: "$filter".to_owned(),
            }
        );
        let err = compile("Products", &[apply, ("$orderby", "Total desc")]).unwrap_err();
        assert!(matches!(err, QueryError::UnreachableAlias { ref option, .. } if option == "$orderby"));
    }

    #[test]
    fn test_should_reject_orderby_on_dropped_property() {
        let err = compile(
            "Products",
            &[("$apply", "groupby((Category))"), ("$orderby", "Price")],
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownProperty {
                name: "Price".to_owned(),
                entity: "$apply output".to_owned(),
            }
        );
    }

    #[test]
    fn test_should_reject_duplicate_aliases() {
        let err = compile(
            "Products",
            &[("$apply", "aggregate(Price with sum as T, Price with max as T)")],
        )
        .unwrap_err();
        assert_eq!(err, QueryError::DuplicateAlias { alias: "T".to_owned() });
        let err = compile("Products", &[("$compute", "Price mul 2 as Name")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Semantic);
    }

    #[test]
    fn test_should_require_numeric_sum_operand() {
        let err = compile("Products", &[("$apply", "aggregate(Name with sum as S)")]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { ref operation, .. } if operation == "sum"));
    }

    #[test]
    fn test_should_select_computed_alias() {
        let query = compile(
            "Products",
            &[
                ("$compute", "Price mul 2 as Double"),
                ("$select", "Name,Double"),
            ],
        )
        .unwrap();
        assert_eq!(
            query.statement.sql,
            "SELECT \"products\".\"name\" AS \"Name\", (\"products\".\"price\" * $1) AS \"Double\" FROM \"products\""
        );
    }

    #[test]
    fn test_should_validate_select_items() {
        let err = compile("Customers", &[("$select", "Orders")]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
        let err = compile("Customers", &[("$select", "Missing")]).unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { .. }));
    }

    #[test]
    fn test_should_render_count_without_paging() {
        let query = compile("Products", &[("$count", "true"), ("$top", "1")]).unwrap();
        let count = query.count.unwrap();
        assert_eq!(count.sql, "SELECT COUNT(*) AS \"count\" FROM \"products\"");
        assert!(count.params.is_empty());
    }

    #[test]
    fn test_should_compile_expand_correlated_to_parent() {
        let query = compile("Customers", &[("$expand", "Orders")]).unwrap();
        assert_eq!(query.expand.len(), 1);
        let orders = &query.expand[0];
        assert_eq!(orders.target, "Orders");
        assert_eq!(
            orders.statement.sql,
            "SELECT \"orders\".\"id\" AS \"ID\", \"orders\".\"customer_id\" AS \"CustomerID\", \"orders\".\"amount\" AS \"Amount\", \"orders\".\"customer_id\" AS \"$parent\" FROM \"orders\" WHERE \"orders\".\"customer_id\" IN (SELECT \"customers\".\"id\" AS \"key\" FROM \"customers\") ORDER BY \"orders\".\"customer_id\" ASC"
        );
    }

    #[test]
    fn test_should_window_nested_top() {
        let query = compile(
            "Customers",
            &[
                ("$filter", "Name eq 'A'"),
                ("$expand", "Orders($filter=Amount gt 5;$orderby=Amount desc;$top=2;$count=true)"),
            ],
        )
        .unwrap();
        let orders = &query.expand[0];
        let sql = &orders.statement.sql;
        assert!(sql.contains(
            "ROW_NUMBER() OVER (PARTITION BY \"orders\".\"customer_id\" ORDER BY \"orders\".\"amount\" DESC) AS \"$row\""
        ));
        assert!(sql.contains("WHERE (\"d1\".\"$row\" > $3 AND \"d1\".\"$row\" <= $4)"));
        assert_eq!(
            orders.statement.params,
            vec![
                SqlParam::Int(5),
                SqlParam::Text("A".to_owned()),
                SqlParam::Int(0),
                SqlParam::Int(2),
            ]
        );
        assert!(orders.count.as_ref().unwrap().sql.contains("GROUP BY \"orders\".\"customer_id\""));
    }

    #[test]
    fn test_should_validate_expand_targets() {
        let err = compile("Customers", &[("$expand", "Name")]).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
        let err = compile("Customers", &[("$expand", "Invoices")]).unwrap_err();
        assert!(matches!(err, QueryError::UnknownProperty { .. }));
        let err = compile(
            "Customers",
            &[("$apply", "groupby((Name))"), ("$expand", "Orders")],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_should_reject_unknown_entity() {
        let err = compile("Nope", &[]).unwrap_err();
        assert_eq!(err, QueryError::UnknownEntity { name: "Nope".to_owned() });
    }

    #[test]
    fn test_should_use_sqlite_placeholders() {
        let options = QueryOptions::parse_pairs(
            [("$filter", "Name eq 'a' or Price lt 3")],
            &EngineConfig::default(),
        )
        .unwrap();
        let query = compile_query(&schema(), "Products", &options, Dialect::Sqlite).unwrap();
        assert!(query.statement.sql.ends_with("WHERE ((\"products\".\"name\" = ?) OR (\"products\".\"price\" < ?))"));
    }

    #[test]
    fn test_should_compile_standalone_filter_and_order() {
        let expr = crate::expression::parse_expression("Price ge 2").unwrap();
        let sql = compile_filter(&schema(), "Products", &expr, Dialect::Postgres).unwrap();
        assert_eq!(sql.to_string(), "(\"products\".\"price\" >= ?)");
        let options =
            QueryOptions::parse_pairs([("$orderby", "Name")], &EngineConfig::default()).unwrap();
        let terms = compile_order_by(&schema(), "Products", &options.order_by, Dialect::Postgres)
            .unwrap();
        assert_eq!(terms[0].expr.to_string(), "\"products\".\"name\"");
    }
}
