//! Expression compiler: AST to typed SQL fragments.
//!
//! Every node is assigned an [`EdmType`] while it is compiled, so operand
//! classes can be checked before any SQL is emitted. Identifiers resolve
//! case-sensitively against a [`RowView`]: the base entity's columns and
//! navigation properties, or the named outputs of an earlier `$apply` stage.

use std::cell::Cell;

use chrono::{DateTime, FixedOffset, NaiveDate};
use odata_query_model::{
    EdmType, EntityMetadata, Multiplicity, NavigationDescriptor, PropertyMetadata, QueryError,
    QueryResult, Schema, TypeClass,
};
use tracing::trace;

use super::dialect::Dialect;
use super::sql::{SqlFragment, SqlParam, escape_like, qualified, quote_ident};
use crate::expression::{
    BinaryFn, BinaryOp, Call, CompareOp, Expr, Lambda, LambdaOp, Literal, NullaryFn, PathRoot,
    PropertyPath, UnaryFn, UnaryOp,
};

// ---------------------------------------------------------------------------
// Compile context and row views
// ---------------------------------------------------------------------------

/// State shared by every compiler working on one statement.
#[derive(Debug)]
pub(crate) struct CompileContext<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) dialect: Dialect,
    next_alias: Cell<usize>,
}

impl<'a> CompileContext<'a> {
    pub(crate) fn new(schema: &'a Schema, dialect: Dialect) -> Self {
        Self {
            schema,
            dialect,
            next_alias: Cell::new(0),
        }
    }

    /// A statement-unique SQL alias such as `r3` or `d4`.
    pub(crate) fn fresh_alias(&self, prefix: char) -> String {
        let n = self.next_alias.get() + 1;
        self.next_alias.set(n);
        format!("{prefix}{n}")
    }

    pub(crate) fn target(&self, nav: &NavigationDescriptor) -> QueryResult<&'a EntityMetadata> {
        self.schema
            .entity(&nav.target)
            .ok_or_else(|| QueryError::UnknownEntity {
                name: nav.target.clone(),
            })
    }
}

/// A named value an unqualified path can resolve to.
#[derive(Debug, Clone)]
pub(crate) struct Column<'a> {
    pub(crate) name: String,
    pub(crate) sql: SqlFragment,
    pub(crate) ty: EdmType,
    /// Declaring property, kept for enum member lookup.
    pub(crate) property: Option<&'a PropertyMetadata>,
    /// Introduced by `$compute` or `$apply` rather than declared.
    pub(crate) alias: bool,
}

/// The rows a compiler resolves unqualified paths against.
#[derive(Debug, Clone)]
pub(crate) struct RowView<'a> {
    /// Name used in error messages.
    pub(crate) label: String,
    /// SQL alias of the row source.
    pub(crate) qualifier: String,
    /// Present while rows are still base-entity rows (navigation allowed).
    pub(crate) entity: Option<&'a EntityMetadata>,
    pub(crate) columns: Vec<Column<'a>>,
}

impl<'a> RowView<'a> {
    /// Rows of `entity`'s table, qualified by the table name.
    pub(crate) fn base(entity: &'a EntityMetadata) -> Self {
        Self::entity_rows(entity, entity.table_name())
    }

    pub(crate) fn entity_rows(entity: &'a EntityMetadata, qualifier: String) -> Self {
        let columns = entity
            .structural()
            .map(|p| Column {
                name: p.name.clone(),
                sql: SqlFragment::sql(qualified(&qualifier, &p.column())),
                ty: p.declared_type,
                property: Some(p),
                alias: false,
            })
            .collect();
        Self {
            label: entity.name.clone(),
            qualifier,
            entity: Some(entity),
            columns,
        }
    }

    /// Rows of a derived table whose columns are `outputs`.
    pub(crate) fn derived(qualifier: String, outputs: Vec<Column<'a>>) -> Self {
        let columns = outputs
            .into_iter()
            .map(|c| Column {
                sql: SqlFragment::sql(qualified(&qualifier, &c.name)),
                ..c
            })
            .collect();
        Self {
            label: "$apply output".to_owned(),
            qualifier,
            entity: None,
            columns,
        }
    }

    pub(crate) fn column(&self, name: &str) -> Option<&Column<'a>> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns `true` if `name` is a column or a navigation property here.
    pub(crate) fn defines(&self, name: &str) -> bool {
        self.column(name).is_some() || self.entity.is_some_and(|e| e.property(name).is_some())
    }
}

// ---------------------------------------------------------------------------
// Typed fragments
// ---------------------------------------------------------------------------

/// A compiled expression and its type (`None` for the `null` literal).
#[derive(Debug, Clone)]
pub(crate) struct Typed<'a> {
    pub(crate) sql: SqlFragment,
    pub(crate) ty: Option<EdmType>,
    pub(crate) property: Option<&'a PropertyMetadata>,
}

impl<'a> Typed<'a> {
    fn new(sql: SqlFragment, ty: EdmType) -> Self {
        Self {
            sql,
            ty: Some(ty),
            property: None,
        }
    }

    fn boolean(sql: SqlFragment) -> Self {
        Self::new(sql, EdmType::Boolean)
    }

    fn class(&self) -> Option<TypeClass> {
        self.ty.map(EdmType::class)
    }

    fn enum_property(&self) -> Option<&'a PropertyMetadata> {
        self.property.filter(|p| p.is_enum)
    }
}

fn describe(class: Option<TypeClass>) -> String {
    class.map_or_else(|| "null".to_owned(), |c| c.to_string())
}

/// Result type of arithmetic over two numeric operands.
fn promote(left: EdmType, right: EdmType) -> EdmType {
    let float = |t: EdmType| matches!(t, EdmType::Single | EdmType::Double);
    if float(left) || float(right) {
        EdmType::Double
    } else if left == EdmType::Decimal || right == EdmType::Decimal {
        EdmType::Decimal
    } else {
        EdmType::Int64
    }
}

// ---------------------------------------------------------------------------
// Expression compiler
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LambdaScope<'a> {
    variable: String,
    entity: &'a EntityMetadata,
    qualifier: String,
}

/// Compiles expressions evaluated against one [`RowView`].
#[derive(Debug)]
pub(crate) struct ExprCompiler<'a, 'v> {
    ctx: &'v CompileContext<'a>,
    view: &'v RowView<'a>,
    /// Option name used in alias errors, e.g. `$filter`.
    option: &'static str,
    /// Aliases this option may not reference.
    hidden: Vec<String>,
    lambdas: Vec<LambdaScope<'a>>,
}

impl<'a, 'v> ExprCompiler<'a, 'v> {
    pub(crate) fn new(
        ctx: &'v CompileContext<'a>,
        view: &'v RowView<'a>,
        option: &'static str,
    ) -> Self {
        Self {
            ctx,
            view,
            option,
            hidden: Vec::new(),
            lambdas: Vec::new(),
        }
    }

    /// Make `aliases` unreachable: referencing one is an `UnreachableAlias` error.
    pub(crate) fn hiding<S: AsRef<str>>(mut self, aliases: &[S]) -> Self {
        self.hidden = aliases.iter().map(|a| a.as_ref().to_owned()).collect();
        self
    }

    /// Compile an expression that must be boolean.
    pub(crate) fn compile_predicate(&mut self, expr: &Expr) -> QueryResult<SqlFragment> {
        let option = self.option;
        self.compile_boolean(expr, option)
    }

    /// Compile a value expression of any type.
    pub(crate) fn compile_value(&mut self, expr: &Expr) -> QueryResult<Typed<'a>> {
        self.compile(expr)
    }

    fn compile_boolean(&mut self, expr: &Expr, what: &str) -> QueryResult<SqlFragment> {
        let typed = self.compile(expr)?;
        if typed.class() == Some(TypeClass::Boolean) {
            Ok(typed.sql)
        } else {
            Err(QueryError::type_mismatch(format!(
                "{what} must be boolean, found {} in '{expr}'",
                describe(typed.class())
            )))
        }
    }

    fn compile(&mut self, expr: &Expr) -> QueryResult<Typed<'a>> {
        match expr {
            Expr::Group(inner) => self.compile(inner),
            Expr::Literal(lit) => literal(lit),
            Expr::Identifier(path) => self.resolve_path(path),
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right),
            Expr::Unary { op, operand } => self.compile_unary(*op, operand),
            Expr::Compare { op, left, right } => self.compile_compare(*op, left, right),
            Expr::In { value, list } => self.compile_in(value, list),
            Expr::Call(call) => self.compile_call(call),
            Expr::Lambda(lambda) => self.compile_lambda(lambda),
        }
    }

    // -- operators ----------------------------------------------------------

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> QueryResult<Typed<'a>> {
        if op.is_logical() {
            let what = format!("operand of '{op}'");
            let l = self.compile_boolean(left, &what)?;
            let r = self.compile_boolean(right, &what)?;
            let keyword = if op == BinaryOp::And { " AND " } else { " OR " };
            let mut sql = l.wrap("(", keyword);
            sql.push(&r).push_sql(")");
            return Ok(Typed::boolean(sql));
        }

        let l = self.numeric_operand(op, left)?;
        let r = self.numeric_operand(op, right)?;
        let (lt, rt) = (l.ty.unwrap_or(EdmType::Int64), r.ty.unwrap_or(EdmType::Int64));
        let (sql, ty) = match op {
            BinaryOp::DivBy => (
                self.ctx.dialect.fractional_div(&l.sql, &r.sql),
                EdmType::Double,
            ),
            _ => {
                let symbol = match op {
                    BinaryOp::Add => " + ",
                    BinaryOp::Sub => " - ",
                    BinaryOp::Mul => " * ",
                    BinaryOp::Div => " / ",
                    _ => " % ",
                };
                let mut sql = l.sql.wrap("(", symbol);
                sql.push(&r.sql).push_sql(")");
                (sql, promote(lt, rt))
            }
        };
        Ok(Typed::new(sql, ty))
    }

    fn numeric_operand(&mut self, op: BinaryOp, expr: &Expr) -> QueryResult<Typed<'a>> {
        let typed = self.compile(expr)?;
        if typed.class() == Some(TypeClass::Numeric) {
            Ok(typed)
        } else {
            Err(QueryError::type_mismatch(format!(
                "operand of '{op}' must be numeric, found {} in '{expr}'",
                describe(typed.class())
            )))
        }
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr) -> QueryResult<Typed<'a>> {
        match op {
            UnaryOp::Not => {
                let inner = self.compile_boolean(operand, "operand of 'not'")?;
                Ok(Typed::boolean(inner.wrap("NOT (", ")")))
            }
            UnaryOp::Negate => {
                let inner = self.compile(operand)?;
                match inner.ty {
                    Some(ty) if ty.is_numeric() => Ok(Typed::new(inner.sql.wrap("(-", ")"), ty)),
                    _ => Err(QueryError::type_mismatch(format!(
                        "operand of '-' must be numeric, found {}",
                        describe(inner.class())
                    ))),
                }
            }
        }
    }

    fn compile_compare(&mut self, op: CompareOp, left: &Expr, right: &Expr) -> QueryResult<Typed<'a>> {
        let symbol = match op {
            CompareOp::Has => return self.compile_has(left, right),
            CompareOp::Eq => " = ",
            CompareOp::Ne => " <> ",
            CompareOp::Gt => " > ",
            CompareOp::Ge => " >= ",
            CompareOp::Lt => " < ",
            CompareOp::Le => " <= ",
        };

        let (l, r) = self.compile_pair(left, right)?;
        match (l.ty, r.ty) {
            (None, _) | (_, None) if op.is_ordering() => Err(QueryError::InvalidOperand {
                operation: op.to_string(),
                message: format!("cannot order against null in '{left} {op} {right}'"),
            }),
            (None, None) => Ok(Typed::boolean(SqlFragment::sql(if op == CompareOp::Eq {
                "(1 = 1)"
            } else {
                "(1 = 0)"
            }))),
            (Some(_), None) | (None, Some(_)) => {
                let subject = if l.ty.is_some() { &l.sql } else { &r.sql };
                let test = if op == CompareOp::Eq {
                    " IS NULL)"
                } else {
                    " IS NOT NULL)"
                };
                Ok(Typed::boolean(subject.wrap("(", test)))
            }
            (Some(lt), Some(rt)) => {
                if lt.class() != rt.class() {
                    return Err(QueryError::type_mismatch(format!(
                        "cannot compare {} with {} in '{left} {op} {right}'",
                        lt.class(),
                        rt.class()
                    )));
                }
                let mut sql = l.sql.wrap("(", symbol);
                sql.push(&r.sql).push_sql(")");
                Ok(Typed::boolean(sql))
            }
        }
    }

    /// Compile both sides, resolving a string or enum literal on one side
    /// against an enum property on the other.
    fn compile_pair(&mut self, left: &Expr, right: &Expr) -> QueryResult<(Typed<'a>, Typed<'a>)> {
        if is_member_literal(left) && !is_member_literal(right) {
            let r = self.compile(right)?;
            let l = self.compile_against(left, &r)?;
            Ok((l, r))
        } else {
            let l = self.compile(left)?;
            let r = self.compile_against(right, &l)?;
            Ok((l, r))
        }
    }

    fn compile_against(&mut self, expr: &Expr, other: &Typed<'a>) -> QueryResult<Typed<'a>> {
        match (expr.as_literal(), other.enum_property()) {
            (Some(Literal::String(member) | Literal::Enum { member, .. }), Some(prop)) => {
                let value = enum_value(prop, member)?;
                Ok(Typed {
                    sql: SqlFragment::param(SqlParam::Int(value)),
                    ty: Some(prop.declared_type),
                    property: Some(prop),
                })
            }
            (Some(Literal::Enum { type_name, member }), None) => Err(QueryError::type_mismatch(
                format!("enum literal {type_name}'{member}' compared with a non-enum operand"),
            )),
            _ => self.compile(expr),
        }
    }

    fn compile_has(&mut self, left: &Expr, right: &Expr) -> QueryResult<Typed<'a>> {
        let subject = self.compile(left)?;
        if !subject.ty.is_some_and(EdmType::is_integral) {
            return Err(QueryError::InvalidOperand {
                operation: "has".to_owned(),
                message: format!("'{left}' is not an enum or integer property"),
            });
        }
        let flag = match (right.as_literal(), subject.enum_property()) {
            (Some(Literal::Int(n)), _) => *n,
            (Some(Literal::String(member) | Literal::Enum { member, .. }), Some(prop)) => {
                enum_value(prop, member)?
            }
            (Some(Literal::String(_) | Literal::Enum { .. }), None) => {
                return Err(QueryError::InvalidOperand {
                    operation: "has".to_owned(),
                    message: format!("'{left}' has no enum members to resolve '{right}'"),
                });
            }
            _ => {
                return Err(QueryError::InvalidOperand {
                    operation: "has".to_owned(),
                    message: format!("flag '{right}' must be an integer or enum member literal"),
                });
            }
        };
        let mut sql = subject.sql.wrap("((", " & ");
        sql.push_param(SqlParam::Int(flag))
            .push_sql(") = ")
            .push_param(SqlParam::Int(flag))
            .push_sql(")");
        Ok(Typed::boolean(sql))
    }

    fn compile_in(&mut self, value: &Expr, list: &[Expr]) -> QueryResult<Typed<'a>> {
        let subject = self.compile(value)?;
        let mut items = Vec::with_capacity(list.len());
        for item in list {
            let typed = self.compile_against(item, &subject)?;
            if let (Some(a), Some(b)) = (subject.class(), typed.class()) {
                if a != b {
                    return Err(QueryError::type_mismatch(format!(
                        "'{item}' is {b}, expected {a} for '{value} in (...)'"
                    )));
                }
            }
            items.push(typed.sql);
        }
        let mut sql = subject.sql.wrap("(", " IN (");
        sql.push(&SqlFragment::join(&items, ", ")).push_sql("))");
        Ok(Typed::boolean(sql))
    }

    // -- functions ----------------------------------------------------------

    fn compile_call(&mut self, call: &Call) -> QueryResult<Typed<'a>> {
        match call {
            Call::Nullary(func) => nullary(*func, self.ctx.dialect),
            Call::Unary { func, arg } => self.compile_unary_fn(*func, arg),
            Call::Binary { func, left, right } => self.compile_binary_fn(*func, left, right),
            Call::Substring {
                source,
                start,
                length,
            } => {
                let source = self.typed_arg("substring", source, &[TypeClass::String])?;
                let start = self.integral_arg("substring", start)?;
                let length = length
                    .as_deref()
                    .map(|l| self.integral_arg("substring", l))
                    .transpose()?;
                let sql = self
                    .ctx
                    .dialect
                    .substring(&source.sql, &start.sql, length.as_ref().map(|l| &l.sql));
                Ok(Typed::new(sql, EdmType::String))
            }
            Call::Cast { expr, target } => {
                let inner = self.compile(expr)?;
                let sql = inner.sql.wrap(
                    "CAST(",
                    &format!(" AS {})", self.ctx.dialect.type_name(*target)),
                );
                Ok(Typed::new(sql, *target))
            }
        }
    }

    fn typed_arg(&mut self, func: &str, expr: &Expr, allowed: &[TypeClass]) -> QueryResult<Typed<'a>> {
        let typed = self.compile(expr)?;
        match typed.class() {
            Some(class) if allowed.contains(&class) => Ok(typed),
            other => Err(QueryError::type_mismatch(format!(
                "argument '{expr}' of {func} is {}, expected {}",
                describe(other),
                allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or ")
            ))),
        }
    }

    fn integral_arg(&mut self, func: &str, expr: &Expr) -> QueryResult<Typed<'a>> {
        let typed = self.compile(expr)?;
        if typed.ty.is_some_and(EdmType::is_integral) {
            Ok(typed)
        } else {
            Err(QueryError::type_mismatch(format!(
                "argument '{expr}' of {func} must be an integer"
            )))
        }
    }

    fn compile_unary_fn(&mut self, func: UnaryFn, arg: &Expr) -> QueryResult<Typed<'a>> {
        use TypeClass as C;

        let name = func.to_string();
        let (allowed, result): (&[TypeClass], Option<EdmType>) = match func {
            UnaryFn::ToLower | UnaryFn::ToUpper | UnaryFn::Trim => (&[C::String], Some(EdmType::String)),
            UnaryFn::Length => (&[C::String], Some(EdmType::Int32)),
            UnaryFn::Year | UnaryFn::Month | UnaryFn::Day => {
                (&[C::Date, C::DateTime], Some(EdmType::Int32))
            }
            UnaryFn::Hour | UnaryFn::Minute | UnaryFn::Second => {
                (&[C::DateTime, C::Time], Some(EdmType::Int32))
            }
            UnaryFn::FractionalSeconds => (&[C::DateTime, C::Time], Some(EdmType::Decimal)),
            UnaryFn::Date => (&[C::DateTime], Some(EdmType::Date)),
            UnaryFn::Time => (&[C::DateTime], Some(EdmType::TimeOfDay)),
            // Rounding keeps the operand type.
            UnaryFn::Ceiling | UnaryFn::Floor | UnaryFn::Round => (&[C::Numeric], None),
        };
        let arg = self.typed_arg(&name, arg, allowed)?;
        let ty = result.or(arg.ty).unwrap_or(EdmType::Double);
        let sql = self.ctx.dialect.unary(func, &arg.sql)?;
        Ok(Typed::new(sql, ty))
    }

    fn compile_binary_fn(&mut self, func: BinaryFn, left: &Expr, right: &Expr) -> QueryResult<Typed<'a>> {
        if matches!(func, BinaryFn::GeoDistance | BinaryFn::GeoIntersects) {
            return Err(QueryError::unsupported(format!(
                "{func}: no geography types are modeled"
            )));
        }
        let name = func.to_string();
        let subject = self.typed_arg(&name, left, &[TypeClass::String])?;

        if matches!(
            func,
            BinaryFn::Contains | BinaryFn::StartsWith | BinaryFn::EndsWith
        ) {
            if let Some(Literal::String(pattern)) = right.as_literal() {
                if pattern.is_empty() {
                    return Ok(Typed::boolean(SqlFragment::sql("(1 = 1)")));
                }
                if self.ctx.dialect.case_sensitive_like() {
                    return Ok(Typed::boolean(like(&subject.sql, func, pattern)));
                }
            }
        }

        let other = self.typed_arg(&name, right, &[TypeClass::String])?;
        let sql = self.ctx.dialect.binary(func, &subject.sql, &other.sql)?;
        let ty = match func {
            BinaryFn::IndexOf => EdmType::Int32,
            BinaryFn::Concat => EdmType::String,
            _ => EdmType::Boolean,
        };
        Ok(Typed::new(sql, ty))
    }

    // -- paths and lambdas ----------------------------------------------------

    fn scope(&self, variable: &str) -> QueryResult<&LambdaScope<'a>> {
        self.lambdas
            .iter()
            .rev()
            .find(|s| s.variable == variable)
            .ok_or_else(|| QueryError::UnknownProperty {
                name: variable.to_owned(),
                entity: self.view.label.clone(),
            })
    }

    fn resolve_path(&self, path: &PropertyPath) -> QueryResult<Typed<'a>> {
        if let PathRoot::Variable(variable) = &path.root {
            let scope = self.scope(variable)?;
            if path.segments.is_empty() {
                return Err(QueryError::unsupported(format!(
                    "range variable '{variable}' used as a value"
                )));
            }
            return self.resolve_on_entity(scope.entity, &scope.qualifier, &path.segments);
        }

        let Some(first) = path.segments.first() else {
            return Err(QueryError::unsupported("$it used as a value"));
        };
        if self.hidden.iter().any(|a| a == first) {
            return Err(QueryError::UnreachableAlias {
                alias: first.clone(),
                option: self.option.to_owned(),
            });
        }

        let joined = path.segments.join("/");
        if let Some(column) = self.view.column(&joined) {
            return Ok(Typed {
                sql: column.sql.clone(),
                ty: Some(column.ty),
                property: column.property,
            });
        }
        if let Some(entity) = self.view.entity {
            return self.resolve_on_entity(entity, &self.view.qualifier, &path.segments);
        }
        Err(QueryError::UnknownProperty {
            name: joined,
            entity: self.view.label.clone(),
        })
    }

    fn resolve_on_entity(
        &self,
        entity: &'a EntityMetadata,
        qualifier: &str,
        segments: &[String],
    ) -> QueryResult<Typed<'a>> {
        let prop = lookup(entity, &segments[0])?;
        let Some(nav) = &prop.navigation else {
            if segments.len() > 1 {
                return Err(QueryError::unsupported(format!(
                    "path through structural property '{}'",
                    prop.name
                )));
            }
            return Ok(Typed {
                sql: SqlFragment::sql(qualified(qualifier, &prop.column())),
                ty: Some(prop.declared_type),
                property: Some(prop),
            });
        };

        let Some(rest) = segments.get(1..).filter(|r| !r.is_empty()) else {
            return Err(QueryError::InvalidOperand {
                operation: prop.name.clone(),
                message: "a navigation property is not a value; address one of its properties"
                    .to_owned(),
            });
        };
        if nav.multiplicity == Multiplicity::Many {
            return Err(QueryError::InvalidOperand {
                operation: prop.name.clone(),
                message: "collection-valued navigation must be used with any or all".to_owned(),
            });
        }
        let target = self.ctx.target(nav)?;
        let leaf = lookup(target, &rest[0])?;
        if rest.len() > 1 || leaf.is_navigation() {
            return Err(QueryError::unsupported(format!(
                "more than one navigation hop in '{}'",
                segments.join("/")
            )));
        }

        let alias = self.ctx.fresh_alias('r');
        trace!(navigation = %prop.name, alias = %alias, "scalar subquery for to-one hop");
        let sql = format!(
            "(SELECT {} FROM {} AS {} WHERE {} = {})",
            qualified(&alias, &leaf.column()),
            quote_ident(&target.table_name()),
            quote_ident(&alias),
            qualified(&alias, &nav.target_column),
            qualified(qualifier, &nav.source_column),
        );
        Ok(Typed {
            sql: SqlFragment::sql(sql),
            ty: Some(leaf.declared_type),
            property: Some(leaf),
        })
    }

    fn compile_lambda(&mut self, lambda: &Lambda) -> QueryResult<Typed<'a>> {
        let operation = lambda.operator.to_string();
        let (entity, qualifier) = match &lambda.collection.root {
            PathRoot::Variable(variable) => {
                let scope = self.scope(variable)?;
                (scope.entity, scope.qualifier.clone())
            }
            PathRoot::Implicit | PathRoot::It => {
                let entity = self
                    .view
                    .entity
                    .ok_or_else(|| QueryError::unsupported("any/all over $apply output"))?;
                (entity, self.view.qualifier.clone())
            }
        };
        let name = match lambda.collection.segments.as_slice() {
            [name] => name,
            [] => return Err(QueryError::unsupported("any/all over a range variable")),
            _ => {
                return Err(QueryError::unsupported(format!(
                    "any/all over multi-segment path '{}'",
                    lambda.collection
                )));
            }
        };
        let prop = lookup(entity, name)?;
        let Some(nav) = &prop.navigation else {
            return Err(QueryError::InvalidOperand {
                operation,
                message: format!("'{name}' is not a navigation property"),
            });
        };
        if nav.multiplicity == Multiplicity::One {
            return Err(QueryError::InvalidOperand {
                operation,
                message: format!("'{name}' is a single-valued navigation"),
            });
        }
        let target = self.ctx.target(nav)?;
        let alias = self.ctx.fresh_alias('r');

        let mut sql = SqlFragment::sql(format!(
            "SELECT 1 FROM {} AS {} WHERE {} = {}",
            quote_ident(&target.table_name()),
            quote_ident(&alias),
            qualified(&alias, &nav.target_column),
            qualified(&qualifier, &nav.source_column),
        ));

        match (&lambda.variable, &lambda.predicate) {
            (Some(variable), Some(predicate)) => {
                self.lambdas.push(LambdaScope {
                    variable: variable.clone(),
                    entity: target,
                    qualifier: alias,
                });
                let compiled = self.compile_boolean(predicate, &format!("{operation} predicate"));
                self.lambdas.pop();
                let predicate = compiled?;
                match lambda.operator {
                    LambdaOp::Any => sql.push_sql(" AND (").push(&predicate).push_sql(")"),
                    LambdaOp::All => sql
                        .push_sql(" AND NOT COALESCE((")
                        .push(&predicate)
                        .push_sql("), FALSE)"),
                };
            }
            _ if lambda.operator == LambdaOp::All => {
                return Ok(Typed::boolean(SqlFragment::sql("(1 = 1)")));
            }
            _ => {}
        }

        let prefix = match lambda.operator {
            LambdaOp::Any => "EXISTS (",
            LambdaOp::All => "NOT EXISTS (",
        };
        Ok(Typed::boolean(sql.wrap(prefix, ")")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lookup<'a>(entity: &'a EntityMetadata, name: &str) -> QueryResult<&'a PropertyMetadata> {
    entity
        .property(name)
        .ok_or_else(|| QueryError::UnknownProperty {
            name: name.to_owned(),
            entity: entity.name.clone(),
        })
}

fn is_member_literal(expr: &Expr) -> bool {
    matches!(
        expr.as_literal(),
        Some(Literal::String(_) | Literal::Enum { .. })
    )
}

/// Resolve `Member`, `Member1,Member2` (flags) or a numeric member value.
fn enum_value(prop: &PropertyMetadata, member: &str) -> QueryResult<i64> {
    let names: Vec<&str> = member.split(',').map(str::trim).collect();
    if names.len() > 1 && !prop.enum_flags {
        return Err(QueryError::type_mismatch(format!(
            "'{member}' combines members of non-flags enum property '{}'",
            prop.name
        )));
    }
    names.into_iter().try_fold(0i64, |acc, name| {
        let value = name
            .parse::<i64>()
            .ok()
            .or_else(|| prop.enum_value(name))
            .ok_or_else(|| {
                QueryError::type_mismatch(format!(
                    "'{name}' is not a member of enum property '{}'",
                    prop.name
                ))
            })?;
        Ok(acc | value)
    })
}

fn literal<'a>(lit: &Literal) -> QueryResult<Typed<'a>> {
    let (param, ty) = match lit {
        Literal::Null => {
            return Ok(Typed {
                sql: SqlFragment::sql("NULL"),
                ty: None,
                property: None,
            });
        }
        Literal::Boolean(b) => (SqlParam::Bool(*b), EdmType::Boolean),
        Literal::Int(n) => (SqlParam::Int(*n), EdmType::Int64),
        Literal::Decimal(n) => (SqlParam::Float(*n), EdmType::Double),
        Literal::String(s) => (SqlParam::Text(s.clone()), EdmType::String),
        Literal::Date(d) => (SqlParam::Date(*d), EdmType::Date),
        Literal::DateTimeOffset(dt) => (SqlParam::DateTime(*dt), EdmType::DateTimeOffset),
        Literal::TimeOfDay(t) => (SqlParam::Time(*t), EdmType::TimeOfDay),
        Literal::Guid(g) => (SqlParam::Guid(*g), EdmType::Guid),
        Literal::Enum { type_name, member } => {
            return Err(QueryError::type_mismatch(format!(
                "enum literal {type_name}'{member}' needs an enum property to compare with"
            )));
        }
    };
    Ok(Typed::new(SqlFragment::param(param), ty))
}

fn nullary<'a>(func: NullaryFn, dialect: Dialect) -> QueryResult<Typed<'a>> {
    let sql = match func {
        NullaryFn::Now => dialect.now(),
        NullaryFn::MaxDateTime => {
            SqlFragment::param(SqlParam::DateTime(instant(9999, 12, 31, (23, 59, 59, 999))?))
        }
        NullaryFn::MinDateTime => {
            SqlFragment::param(SqlParam::DateTime(instant(1, 1, 1, (0, 0, 0, 0))?))
        }
    };
    Ok(Typed::new(sql, EdmType::DateTimeOffset))
}

fn instant(year: i32, month: u32, day: u32, hms: (u32, u32, u32, u32)) -> QueryResult<DateTime<FixedOffset>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_milli_opt(hms.0, hms.1, hms.2, hms.3))
        .map(|dt| dt.and_utc().fixed_offset())
        .ok_or_else(|| QueryError::unsupported("date-time bound outside the chrono range"))
}

/// `LIKE` for a non-empty literal pattern.
fn like(subject: &SqlFragment, func: BinaryFn, pattern: &str) -> SqlFragment {
    let escaped = escape_like(pattern);
    let value = match func {
        BinaryFn::StartsWith => format!("{escaped}%"),
        BinaryFn::EndsWith => format!("%{escaped}"),
        _ => format!("%{escaped}%"),
    };
    let mut sql = subject.wrap("(", " LIKE ");
    sql.push_param(SqlParam::Text(value)).push_sql(" ESCAPE '\\')");
    sql
}

#[cfg(test)]
mod tests {
    use odata_query_model::{ErrorKind, NavigationDescriptor};

    use super::*;
    use crate::expression::parse_expression;

    fn schema() -> Schema {
        Schema::new(vec![
            EntityMetadata::new(
                "Products",
                vec![
                    PropertyMetadata::new("ID", EdmType::Int32).key(),
                    PropertyMetadata::new("Name", EdmType::String),
                    PropertyMetadata::new("Price", EdmType::Decimal),
                    PropertyMetadata::new("Category", EdmType::String),
                    PropertyMetadata::new("Status", EdmType::Int32).with_enum(
                        true,
                        &[("Active", 1), ("Featured", 2), ("Archived", 8)],
                    ),
                    PropertyMetadata::new("Released", EdmType::Date),
                    PropertyMetadata::navigation(
                        "Supplier",
                        NavigationDescriptor {
                            target: "Suppliers".to_owned(),
                            multiplicity: Multiplicity::One,
                            source_column: "supplier_id".to_owned(),
                            target_column: "id".to_owned(),
                        },
                    ),
                    PropertyMetadata::navigation(
                        "Reviews",
                        NavigationDescriptor {
                            target: "Reviews".to_owned(),
                            multiplicity: Multiplicity::Many,
                            source_column: "id".to_owned(),
                            target_column: "product_id".to_owned(),
                        },
                    ),
                ],
            ),
            EntityMetadata::new(
                "Suppliers",
                vec![
                    PropertyMetadata::new("ID", EdmType::Int32).key(),
                    PropertyMetadata::new("Country", EdmType::String),
                ],
            ),
            EntityMetadata::new(
                "Reviews",
                vec![
                    PropertyMetadata::new("ID", EdmType::Int32).key(),
                    PropertyMetadata::new("Rating", EdmType::Int32),
                ],
            ),
        ])
    }

    fn compile(input: &str) -> QueryResult<(String, Vec<SqlParam>)> {
        let schema = schema();
        let ctx = CompileContext::new(&schema, Dialect::Postgres);
        let view = RowView::base(schema.entity("Products").unwrap());
        let expr = parse_expression(input).unwrap();
        let sql = ExprCompiler::new(&ctx, &view, "$filter").compile_predicate(&expr)?;
        let stmt = sql.render(Dialect::Postgres);
        Ok((stmt.sql, stmt.params))
    }

    #[test]
    fn test_should_compile_comparison_with_float_param() {
        let (sql, params) = compile("Price eq 99.99").unwrap();
        assert_eq!(sql, "(\"products\".\"price\" = $1)");
        assert_eq!(params, vec![SqlParam::Float(99.99)]);
    }

    #[test]
    fn test_should_compile_null_tests_on_either_side() {
        assert_eq!(
            compile("Category eq null").unwrap().0,
            "(\"products\".\"category\" IS NULL)"
        );
        assert_eq!(
            compile("null ne Category").unwrap().0,
            "(\"products\".\"category\" IS NOT NULL)"
        );
        let err = compile("Price gt null").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Semantic);
        assert_eq!(compile("null eq null").unwrap().0, "(1 = 1)");
        assert_eq!(compile("null ne null").unwrap().0, "(1 = 0)");
    }

    #[test]
    fn test_should_route_has_away_from_ordering_symbols() {
        let (sql, _) = compile("Price le 5").unwrap();
        assert_eq!(sql, "(\"products\".\"price\" <= $1)");
        let err = compile("Name has 1").unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidOperand { ref operation, .. } if operation == "has"
        ));
    }

    #[test]
    fn test_should_keep_precedence_shape() {
        let (sql, params) = compile("Price gt 1 and Price lt 5 or Name eq 'x'").unwrap();
        assert_eq!(
            sql,
            "(((\"products\".\"price\" > $1) AND (\"products\".\"price\" < $2)) OR (\"products\".\"name\" = $3))"
        );
        assert_eq!(params.len(), 3);
        let (sql, _) = compile("not Price gt 1 and Name eq 'x'").unwrap();
        assert!(sql.starts_with("(NOT ((\"products\".\"price\" > $1)) AND"));
    }

    #[test]
    fn test_should_compile_has_with_member_name() {
        let (sql, params) = compile("Status has 'Featured'").unwrap();
        assert_eq!(sql, "((\"products\".\"status\" & $1) = $2)");
        assert_eq!(params, vec![SqlParam::Int(2), SqlParam::Int(2)]);
        let (_, params) = compile("has(Status, Ns.Status'Active,Archived')").unwrap();
        assert_eq!(params[0], SqlParam::Int(9));
        assert!(compile("Name has 1").is_err());
    }

    #[test]
    fn test_should_resolve_enum_string_against_property() {
        let (sql, params) = compile("'Archived' eq Status").unwrap();
        assert_eq!(sql, "($1 = \"products\".\"status\")");
        assert_eq!(params, vec![SqlParam::Int(8)]);
        assert!(compile("Status eq 'Missing'").is_err());
    }

    #[test]
    fn test_should_escape_like_literals() {
        let (sql, params) = compile("contains(Name,'50%')").unwrap();
        assert_eq!(sql, "(\"products\".\"name\" LIKE $1 ESCAPE '\\')");
        assert_eq!(params, vec![SqlParam::Text("%50\\%%".to_owned())]);
        assert_eq!(compile("contains(Name,'')").unwrap().0, "(1 = 1)");
        let (_, params) = compile("startswith(Name,'a_')").unwrap();
        assert_eq!(params, vec![SqlParam::Text("a\\_%".to_owned())]);
    }

    #[test]
    fn test_should_use_position_function_for_non_literal_pattern() {
        let (sql, _) = compile("contains(Name, Category)").unwrap();
        assert_eq!(
            sql,
            "(STRPOS(\"products\".\"name\", \"products\".\"category\") > 0)"
        );
    }

    #[test]
    fn test_should_compile_any_and_all() {
        let (sql, params) = compile("Reviews/any(r: r/Rating ge 4)").unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"reviews\" AS \"r1\" WHERE \"r1\".\"product_id\" = \"products\".\"id\" AND ((\"r1\".\"rating\" >= $1)))"
        );
        assert_eq!(params, vec![SqlParam::Int(4)]);

        let (sql, _) = compile("Reviews/all(r: r/Rating ge 4)").unwrap();
        assert!(sql.starts_with("NOT EXISTS (SELECT 1 FROM \"reviews\" AS \"r1\""));
        assert!(sql.contains("AND NOT COALESCE(((\"r1\".\"rating\" >= $1)), FALSE)"));

        let (sql, _) = compile("Reviews/any()").unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"reviews\" AS \"r1\" WHERE \"r1\".\"product_id\" = \"products\".\"id\")"
        );
    }

    #[test]
    fn test_should_reject_lambda_over_single_navigation() {
        let err = compile("Supplier/any(s: s/Country eq 'NL')").unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
    }

    #[test]
    fn test_should_compile_to_one_hop_as_scalar_subquery() {
        let (sql, _) = compile("Supplier/Country eq 'NL'").unwrap();
        assert_eq!(
            sql,
            "((SELECT \"r1\".\"country\" FROM \"suppliers\" AS \"r1\" WHERE \"r1\".\"id\" = \"products\".\"supplier_id\") = $1)"
        );
    }

    #[test]
    fn test_should_reject_unknown_property() {
        let err = compile("Foo eq 1").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownProperty {
                name: "Foo".to_owned(),
                entity: "Products".to_owned(),
            }
        );
    }

    #[test]
    fn test_should_reject_incompatible_classes() {
        assert!(matches!(
            compile("Name eq 5").unwrap_err(),
            QueryError::TypeMismatch { .. }
        ));
        assert!(matches!(
            compile("Price add 1").unwrap_err(),
            QueryError::TypeMismatch { .. }
        ));
        assert!(matches!(
            compile("Name and Price gt 1").unwrap_err(),
            QueryError::TypeMismatch { .. }
        ));
        assert!(compile("Released lt 2024-01-01").is_ok());
    }

    #[test]
    fn test_should_compile_functions_and_arithmetic() {
        let (sql, _) = compile("year(Released) eq 2024 and Price mul 2 gt 10").unwrap();
        assert!(sql.contains("CAST(EXTRACT(YEAR FROM \"products\".\"released\") AS INTEGER)"));
        assert!(sql.contains("(\"products\".\"price\" * $2)"));
        let (sql, _) = compile("substring(Name, 1, 2) eq 'ab'").unwrap();
        assert!(sql.contains("SUBSTR(\"products\".\"name\", ($1) + 1, $2)"));
    }

    #[test]
    fn test_should_compile_in_list() {
        let (sql, params) = compile("Category in ('A', 'B')").unwrap();
        assert_eq!(sql, "(\"products\".\"category\" IN ($1, $2))");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_should_report_unreachable_alias() {
        let schema = schema();
        let ctx = CompileContext::new(&schema, Dialect::Postgres);
        let view = RowView::base(schema.entity("Products").unwrap());
        let expr = parse_expression("Total gt 5").unwrap();
        let err = ExprCompiler::new(&ctx, &view, "$filter")
            .hiding(&["Total"])
            .compile_predicate(&expr)
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnreachableAlias {
                alias: "Total".to_owned(),
                option: "$filter".to_owned(),
            }
        );
    }

    #[test]
    fn test_should_require_boolean_filter() {
        assert!(matches!(
            compile("Price").unwrap_err(),
            QueryError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_should_reject_geo_functions() {
        let err = compile("geo.intersects(Name, Name)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
