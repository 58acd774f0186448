//! Structured SELECT statements.

use super::dialect::Dialect;
use super::sql::{CompiledStatement, SqlFragment, SqlParam, quote_ident};

/// One projected column: `expr AS "alias"`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    /// Column expression.
    pub expr: SqlFragment,
    /// Output name (the OData property or alias name).
    pub alias: String,
}

/// Row source of a [`QueryShape`].
#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    /// A base table, referenced by its own name.
    Table {
        /// Table name.
        name: String,
    },
    /// A nested statement: `(SELECT ...) AS "alias"`.
    Derived {
        /// Inner statement.
        shape: Box<QueryShape>,
        /// Alias the outer statement qualifies columns with.
        alias: String,
    },
}

/// One `ORDER BY` key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    /// Sort expression.
    pub expr: SqlFragment,
    /// `DESC` instead of `ASC`.
    pub descending: bool,
}

/// A SELECT statement under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryShape {
    /// Projection; empty renders `*`.
    pub select: Vec<SelectColumn>,
    /// Row source.
    pub from: FromClause,
    /// `WHERE` predicate.
    pub filter: Option<SqlFragment>,
    /// `GROUP BY` expressions.
    pub group_by: Vec<SqlFragment>,
    /// The projection contains aggregates (one row per group, or one row).
    pub aggregated: bool,
    /// `ORDER BY` keys.
    pub order_by: Vec<OrderTerm>,
    /// `LIMIT`
    pub limit: Option<u64>,
    /// `OFFSET`
    pub offset: Option<u64>,
}

impl QueryShape {
    /// `SELECT * FROM "table"`.
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self::from_clause(FromClause::Table { name: name.into() })
    }

    fn from_clause(from: FromClause) -> Self {
        Self {
            select: Vec::new(),
            from,
            filter: None,
            group_by: Vec::new(),
            aggregated: false,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Wrap `self` as a derived table named `alias`.
    #[must_use]
    pub fn into_derived(self, alias: impl Into<String>) -> Self {
        Self::from_clause(FromClause::Derived {
            shape: Box::new(self),
            alias: alias.into(),
        })
    }

    /// AND `predicate` into the `WHERE` clause.
    pub fn and_where(&mut self, predicate: SqlFragment) {
        match &mut self.filter {
            Some(existing) => {
                existing.push_sql(" AND ").push(&predicate);
            }
            None => self.filter = Some(predicate),
        }
    }

    /// The statement as one fragment, placeholders not yet numbered.
    #[must_use]
    pub fn to_fragment(&self, dialect: Dialect) -> SqlFragment {
        let mut sql = SqlFragment::sql("SELECT ");
        if self.select.is_empty() {
            sql.push_sql("*");
        } else {
            for (i, column) in self.select.iter().enumerate() {
                if i > 0 {
                    sql.push_sql(", ");
                }
                sql.push(&column.expr)
                    .push_sql(" AS ")
                    .push_sql(&quote_ident(&column.alias));
            }
        }
        self.push_source(&mut sql, dialect);

        if !self.order_by.is_empty() {
            sql.push_sql(" ORDER BY ");
            for (i, term) in self.order_by.iter().enumerate() {
                if i > 0 {
                    sql.push_sql(", ");
                }
                sql.push(&term.expr)
                    .push_sql(if term.descending { " DESC" } else { " ASC" });
            }
        }

        let limit = self.limit.map(count_param);
        let offset = self.offset.map(count_param);
        sql.push(&dialect.limit_offset(limit.as_ref(), offset.as_ref()));
        sql
    }

    /// FROM, WHERE and GROUP BY.
    fn push_source(&self, sql: &mut SqlFragment, dialect: Dialect) {
        sql.push_sql(" FROM ");
        match &self.from {
            FromClause::Table { name } => {
                sql.push_sql(&quote_ident(name));
            }
            FromClause::Derived { shape, alias } => {
                sql.push(&shape.to_fragment(dialect).wrap("(", ") AS "))
                    .push_sql(&quote_ident(alias));
            }
        }
        if let Some(filter) = &self.filter {
            sql.push_sql(" WHERE ").push(filter);
        }
        if !self.group_by.is_empty() {
            sql.push_sql(" GROUP BY ")
                .push(&SqlFragment::join(&self.group_by, ", "));
        }
    }

    /// `SELECT COUNT(*)` over the rows this statement would return before
    /// `ORDER BY`, `LIMIT` and `OFFSET`.
    #[must_use]
    pub fn count_fragment(&self, dialect: Dialect) -> SqlFragment {
        let mut sql = SqlFragment::sql("SELECT COUNT(*) AS \"count\"");
        if self.aggregated {
            let mut rows = self.clone();
            rows.order_by.clear();
            rows.limit = None;
            rows.offset = None;
            sql.push_sql(" FROM ")
                .push(&rows.to_fragment(dialect).wrap("(", ") AS \"c\""));
        } else {
            self.push_source(&mut sql, dialect);
        }
        sql
    }

    /// Render the SELECT statement.
    #[must_use]
    pub fn render(&self, dialect: Dialect) -> CompiledStatement {
        self.to_fragment(dialect).render(dialect)
    }

    /// Render the COUNT statement.
    #[must_use]
    pub fn render_count(&self, dialect: Dialect) -> CompiledStatement {
        self.count_fragment(dialect).render(dialect)
    }
}

fn count_param(n: u64) -> SqlFragment {
    SqlFragment::param(SqlParam::Int(i64::try_from(n).unwrap_or(i64::MAX)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> QueryShape {
        let mut shape = QueryShape::table("products");
        shape.select.push(SelectColumn {
            expr: SqlFragment::sql("\"products\".\"name\""),
            alias: "Name".to_owned(),
        });
        let mut pred = SqlFragment::sql("(\"products\".\"price\" > ");
        pred.push_param(SqlParam::Int(5)).push_sql(")");
        shape.and_where(pred);
        shape
    }

    #[test]
    fn test_should_render_select_with_limit_and_offset() {
        let mut shape = products();
        shape.order_by.push(OrderTerm {
            expr: SqlFragment::sql("\"products\".\"name\""),
            descending: true,
        });
        shape.limit = Some(10);
        shape.offset = Some(20);

        let stmt = shape.render(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            "SELECT \"products\".\"name\" AS \"Name\" FROM \"products\" WHERE (\"products\".\"price\" > $1) ORDER BY \"products\".\"name\" DESC LIMIT $2 OFFSET $3"
        );
        assert_eq!(
            stmt.params,
            vec![SqlParam::Int(5), SqlParam::Int(10), SqlParam::Int(20)]
        );
    }

    #[test]
    fn test_should_count_without_paging() {
        let mut shape = products();
        shape.limit = Some(1);
        let stmt = shape.render_count(Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"products\" WHERE (\"products\".\"price\" > ?)"
        );
        assert_eq!(stmt.params, vec![SqlParam::Int(5)]);
    }

    #[test]
    fn test_should_count_groups_through_subquery() {
        let mut shape = QueryShape::table("products");
        shape.select.push(SelectColumn {
            expr: SqlFragment::sql("\"products\".\"category\""),
            alias: "Category".to_owned(),
        });
        shape.group_by.push(SqlFragment::sql("\"products\".\"category\""));
        shape.aggregated = true;
        assert_eq!(
            shape.render_count(Dialect::Postgres).sql,
            "SELECT COUNT(*) AS \"count\" FROM (SELECT \"products\".\"category\" AS \"Category\" FROM \"products\" GROUP BY \"products\".\"category\") AS \"c\""
        );
    }

    #[test]
    fn test_should_number_placeholders_through_derived_tables() {
        let outer = {
            let mut outer = products().into_derived("d1");
            let mut pred = SqlFragment::sql("(\"d1\".\"Name\" = ");
            pred.push_param(SqlParam::Text("x".to_owned())).push_sql(")");
            outer.and_where(pred);
            outer
        };
        let stmt = outer.render(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM (SELECT \"products\".\"name\" AS \"Name\" FROM \"products\" WHERE (\"products\".\"price\" > $1)) AS \"d1\" WHERE (\"d1\".\"Name\" = $2)"
        );
    }
}
