//! Folding query options into a [`QueryShape`].
//!
//! `$filter` applies to source rows first, then `$apply` stages run in
//! written order, then `$compute`, `$select`, `$orderby` and paging. A
//! grouping stage leaves its outputs pending; the next stage that needs to
//! reference rows wraps the grouped statement as a derived table.

use odata_query_model::{EdmType, EntityMetadata, QueryError, QueryResult};
use tracing::trace;

use super::expr::{Column, CompileContext, ExprCompiler, RowView};
use super::shape::{OrderTerm, QueryShape, SelectColumn};
use super::sql::{SqlFragment, SqlParam, qualified};
use crate::apply::{AggregateExpression, AggregateMethod, ApplyTransformation, ComputeExpression};
use crate::expression::{Expr, PropertyPath};
use crate::options::{OrderByItem, SelectItem};

/// Running state of one statement.
#[derive(Debug)]
pub(crate) struct Stage<'a> {
    pub(crate) shape: QueryShape,
    pub(crate) view: RowView<'a>,
    /// Outputs of a grouping that has not been wrapped yet.
    outputs: Option<Vec<Column<'a>>>,
    /// The entity the statement started from; aliases may not shadow it.
    entity: &'a EntityMetadata,
}

impl<'a> Stage<'a> {
    pub(crate) fn base(entity: &'a EntityMetadata) -> Self {
        Self {
            shape: QueryShape::table(entity.table_name()),
            view: RowView::base(entity),
            outputs: None,
            entity,
        }
    }

    /// Returns `true` while the shape is a plain (ungrouped) read of base rows.
    pub(crate) fn is_base_rows(&self) -> bool {
        self.outputs.is_none() && self.view.entity.is_some()
    }

    pub(crate) fn where_clause(
        &mut self,
        ctx: &CompileContext<'a>,
        expr: &Expr,
        option: &'static str,
        hidden: &[&str],
    ) -> QueryResult<()> {
        let predicate = ExprCompiler::new(ctx, &self.view, option)
            .hiding(hidden)
            .compile_predicate(expr)?;
        self.shape.and_where(predicate);
        Ok(())
    }

    /// Make grouped outputs addressable as rows of a derived table.
    pub(crate) fn ensure_rows(&mut self, ctx: &CompileContext<'a>) {
        if let Some(outputs) = self.outputs.take() {
            let alias = ctx.fresh_alias('d');
            trace!(alias = %alias, columns = outputs.len(), "wrapping grouped statement");
            let inner = std::mem::replace(&mut self.shape, QueryShape::table(String::new()));
            self.shape = inner.into_derived(alias.clone());
            self.view = RowView::derived(alias, outputs);
        }
    }

    pub(crate) fn apply(
        &mut self,
        ctx: &CompileContext<'a>,
        stage: &ApplyTransformation,
    ) -> QueryResult<()> {
        match stage {
            ApplyTransformation::Filter { expression } => {
                self.ensure_rows(ctx);
                self.where_clause(ctx, expression, "$apply", &[])
            }
            ApplyTransformation::Compute { expressions } => self.compute(ctx, expressions),
            ApplyTransformation::GroupBy {
                properties,
                aggregate,
            } => self.group(ctx, properties, aggregate.as_deref().unwrap_or_default()),
            ApplyTransformation::Aggregate { expressions } => self.group(ctx, &[], expressions),
        }
    }

    fn check_alias(&self, alias: &str, taken: &[Column<'a>]) -> QueryResult<()> {
        if self.view.defines(alias)
            || self.entity.property(alias).is_some()
            || taken.iter().any(|c| c.name == alias)
        {
            return Err(QueryError::DuplicateAlias {
                alias: alias.to_owned(),
            });
        }
        Ok(())
    }

    pub(crate) fn compute(
        &mut self,
        ctx: &CompileContext<'a>,
        items: &[ComputeExpression],
    ) -> QueryResult<()> {
        self.ensure_rows(ctx);
        let mut added = Vec::with_capacity(items.len());
        for item in items {
            self.check_alias(&item.alias, &added)?;
            let typed = ExprCompiler::new(ctx, &self.view, "$compute").compile_value(&item.expr)?;
            added.push(Column {
                name: item.alias.clone(),
                sql: typed.sql,
                ty: typed.ty.unwrap_or(EdmType::String),
                property: typed.property,
                alias: true,
            });
        }
        self.view.columns.extend(added);
        Ok(())
    }

    fn group(
        &mut self,
        ctx: &CompileContext<'a>,
        properties: &[PropertyPath],
        aggregates: &[AggregateExpression],
    ) -> QueryResult<()> {
        self.ensure_rows(ctx);
        let mut outputs: Vec<Column<'a>> = Vec::new();
        let mut select = Vec::new();
        let mut group_by = Vec::new();

        for path in properties {
            let name = path.to_string();
            if outputs.iter().any(|c| c.name == name) {
                continue;
            }
            let typed = ExprCompiler::new(ctx, &self.view, "$apply")
                .compile_value(&Expr::Identifier(path.clone()))?;
            let alias = self.view.column(&name).is_some_and(|c| c.alias);
            select.push(SelectColumn {
                expr: typed.sql.clone(),
                alias: name.clone(),
            });
            group_by.push(typed.sql.clone());
            outputs.push(Column {
                name,
                sql: typed.sql,
                ty: typed.ty.unwrap_or(EdmType::String),
                property: typed.property,
                alias,
            });
        }

        for agg in aggregates {
            self.check_alias(&agg.alias, &outputs)?;
            let (sql, ty) = self.aggregate(ctx, agg)?;
            select.push(SelectColumn {
                expr: sql.clone(),
                alias: agg.alias.clone(),
            });
            outputs.push(Column {
                name: agg.alias.clone(),
                sql,
                ty,
                property: None,
                alias: true,
            });
        }

        self.shape.select = select;
        self.shape.group_by = group_by;
        self.shape.aggregated = true;
        self.outputs = Some(outputs);
        Ok(())
    }

    fn aggregate(
        &self,
        ctx: &CompileContext<'a>,
        agg: &AggregateExpression,
    ) -> QueryResult<(SqlFragment, EdmType)> {
        let Some(operand) = &agg.operand else {
            return Ok((SqlFragment::sql("COUNT(*)"), EdmType::Int64));
        };
        let typed = ExprCompiler::new(ctx, &self.view, "$apply").compile_value(operand)?;
        let numeric = |ty: Option<EdmType>| {
            ty.filter(|t| t.is_numeric())
                .ok_or_else(|| QueryError::InvalidOperand {
                    operation: agg.method.to_string(),
                    message: format!("'{operand}' is not numeric"),
                })
        };
        let out = match agg.method {
            AggregateMethod::Sum => {
                let ty = numeric(typed.ty)?;
                let ty = if ty.is_integral() {
                    EdmType::Int64
                } else if ty == EdmType::Decimal {
                    EdmType::Decimal
                } else {
                    EdmType::Double
                };
                (typed.sql.wrap("SUM(", ")"), ty)
            }
            AggregateMethod::Avg => {
                let ty = numeric(typed.ty)?;
                let ty = if ty == EdmType::Decimal {
                    EdmType::Decimal
                } else {
                    EdmType::Double
                };
                (typed.sql.wrap("AVG(", ")"), ty)
            }
            AggregateMethod::Min | AggregateMethod::Max => {
                let ty = typed.ty.ok_or_else(|| QueryError::InvalidOperand {
                    operation: agg.method.to_string(),
                    message: "operand is null".to_owned(),
                })?;
                let name = if agg.method == AggregateMethod::Min {
                    "MIN("
                } else {
                    "MAX("
                };
                (typed.sql.wrap(name, ")"), ty)
            }
            AggregateMethod::Count => (typed.sql.wrap("COUNT(", ")"), EdmType::Int64),
            AggregateMethod::CountDistinct => {
                (typed.sql.wrap("COUNT(DISTINCT ", ")"), EdmType::Int64)
            }
        };
        Ok(out)
    }

    /// Set the projection from `$select`; empty means every visible column.
    pub(crate) fn project(&mut self, items: &[SelectItem]) -> QueryResult<()> {
        if self.outputs.is_some() && items.is_empty() {
            return Ok(());
        }

        let mut select: Vec<SelectColumn> = Vec::new();
        let mut add = |column: &Column<'a>| {
            if !select.iter().any(|s| s.alias == column.name) {
                select.push(SelectColumn {
                    expr: column.sql.clone(),
                    alias: column.name.clone(),
                });
            }
        };

        if items.is_empty() {
            self.view.columns.iter().for_each(&mut add);
        }
        for item in items {
            match item {
                SelectItem::Wildcard => self
                    .view
                    .columns
                    .iter()
                    .filter(|c| !c.alias)
                    .for_each(&mut add),
                SelectItem::Path(path) => {
                    let name = path.segments.join("/");
                    if let Some(column) = self.view.column(&name) {
                        add(column);
                    } else if self
                        .view
                        .entity
                        .and_then(|e| e.property(&path.segments[0]))
                        .is_some_and(|p| p.is_navigation())
                    {
                        return Err(QueryError::InvalidOperand {
                            operation: "$select".to_owned(),
                            message: format!("'{name}' is a navigation path; use $expand"),
                        });
                    } else {
                        return Err(QueryError::UnknownProperty {
                            name,
                            entity: self.view.label.clone(),
                        });
                    }
                }
            }
        }
        self.shape.select = select;
        Ok(())
    }

    pub(crate) fn order(
        &mut self,
        ctx: &CompileContext<'a>,
        items: &[OrderByItem],
        hidden: &[&str],
    ) -> QueryResult<()> {
        for item in items {
            let typed = ExprCompiler::new(ctx, &self.view, "$orderby")
                .hiding(hidden)
                .compile_value(&item.expr)?;
            if typed.ty.is_none() {
                return Err(QueryError::InvalidOperand {
                    operation: "$orderby".to_owned(),
                    message: "cannot order by null".to_owned(),
                });
            }
            self.shape.order_by.push(OrderTerm {
                expr: typed.sql,
                descending: item.descending,
            });
        }
        Ok(())
    }

    /// The source-column value of every row this statement returns, for
    /// correlating expanded rows.
    pub(crate) fn key_subquery(&self, source_column: &str) -> QueryShape {
        let mut keys = self.shape.clone();
        keys.select = vec![SelectColumn {
            expr: SqlFragment::sql(qualified(&self.view.qualifier, source_column)),
            alias: "key".to_owned(),
        }];
        if keys.limit.is_none() && keys.offset.is_none() {
            keys.order_by.clear();
        }
        keys
    }
}

/// `"d"."$row" > skip AND "d"."$row" <= skip + top`.
pub(crate) fn row_window(alias: &str, row: &str, top: Option<u64>, skip: Option<u64>) -> SqlFragment {
    let skip = skip.unwrap_or(0);
    let column = qualified(alias, row);
    let mut sql = SqlFragment::sql(format!("({column} > "));
    sql.push_param(int_param(skip));
    if let Some(top) = top {
        sql.push_sql(&format!(" AND {column} <= "))
            .push_param(int_param(skip.saturating_add(top)));
    }
    sql.push_sql(")");
    sql
}

fn int_param(n: u64) -> SqlParam {
    SqlParam::Int(i64::try_from(n).unwrap_or(i64::MAX))
}
