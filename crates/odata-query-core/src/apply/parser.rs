//! Parser for `$apply` pipelines and `$compute` lists.

use odata_query_model::{QueryError, QueryResult};

use super::{AggregateExpression, AggregateMethod, ApplyTransformation, ComputeExpression};
use crate::expression::parser::{Parser, parse_with};
use crate::expression::{PathRoot, PropertyPath, Token, TokenKind};

const TRANSFORMATIONS: &str = "'filter', 'groupby', 'aggregate' or 'compute'";
const METHODS: &str = "'sum', 'average', 'min', 'max', 'count' or 'countdistinct'";

impl Parser<'_> {
    pub(crate) fn parse_transformations(&mut self) -> QueryResult<Vec<ApplyTransformation>> {
        let mut stages = vec![self.parse_transformation()?];
        while self.eat(&TokenKind::Slash) {
            stages.push(self.parse_transformation()?);
        }
        Ok(stages)
    }

    fn parse_transformation(&mut self) -> QueryResult<ApplyTransformation> {
        let tok = self.peek();
        let (name, position) = self.expect_identifier(TRANSFORMATIONS)?;
        let stage = match name.to_ascii_lowercase().as_str() {
            "filter" => {
                self.expect(&TokenKind::LParen)?;
                let expression = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                ApplyTransformation::Filter { expression }
            }
            "groupby" => self.parse_groupby()?,
            "aggregate" => {
                self.expect(&TokenKind::LParen)?;
                let expressions = self.parse_aggregate_list()?;
                self.expect(&TokenKind::RParen)?;
                ApplyTransformation::Aggregate { expressions }
            }
            "compute" => {
                self.expect(&TokenKind::LParen)?;
                let expressions = self.parse_compute_items()?;
                self.expect(&TokenKind::RParen)?;
                ApplyTransformation::Compute { expressions }
            }
            _ => {
                return Err(QueryError::UnexpectedToken {
                    expected: TRANSFORMATIONS.to_owned(),
                    found: tok.kind.to_string(),
                    position,
                });
            }
        };
        Ok(stage)
    }

    fn parse_groupby(&mut self) -> QueryResult<ApplyTransformation> {
        self.expect(&TokenKind::LParen)?;
        self.expect(&TokenKind::LParen)?;
        let mut properties = vec![self.parse_group_path()?];
        while self.eat(&TokenKind::Comma) {
            properties.push(self.parse_group_path()?);
        }
        self.expect(&TokenKind::RParen)?;

        let aggregate = if self.eat(&TokenKind::Comma) {
            self.expect_word("aggregate")?;
            self.expect(&TokenKind::LParen)?;
            let list = self.parse_aggregate_list()?;
            self.expect(&TokenKind::RParen)?;
            Some(list)
        } else {
            None
        };
        self.expect(&TokenKind::RParen)?;

        Ok(ApplyTransformation::GroupBy {
            properties,
            aggregate,
        })
    }

    fn parse_group_path(&mut self) -> QueryResult<PropertyPath> {
        let (first, position) = self.expect_identifier("grouping property")?;
        let mut segments = vec![first.to_owned()];
        while self.peek().kind == TokenKind::Slash {
            let TokenKind::Identifier(seg) = &self.peek_at(1).kind else {
                break;
            };
            self.advance();
            self.advance();
            segments.push(seg.clone());
        }
        Ok(PropertyPath {
            root: PathRoot::Implicit,
            segments,
            position,
        })
    }

    fn parse_aggregate_list(&mut self) -> QueryResult<Vec<AggregateExpression>> {
        let mut list = vec![self.parse_aggregate_item()?];
        while self.eat(&TokenKind::Comma) {
            list.push(self.parse_aggregate_item()?);
        }
        Ok(list)
    }

    fn parse_aggregate_item(&mut self) -> QueryResult<AggregateExpression> {
        let next_is_as =
            matches!(&self.peek_at(1).kind, TokenKind::Identifier(s) if s.eq_ignore_ascii_case("as"));
        if self.peek().kind == TokenKind::Count || (self.is_word("count") && next_is_as) {
            self.advance();
            self.expect_word("as")?;
            return Ok(AggregateExpression {
                operand: None,
                method: AggregateMethod::Count,
                alias: self.parse_alias()?,
            });
        }

        let operand = self.parse_expression()?;
        self.expect_word("with")?;
        let tok = self.peek();
        let (name, position) = self.expect_identifier(METHODS)?;
        let method = AggregateMethod::lookup(name).ok_or_else(|| QueryError::UnexpectedToken {
            expected: METHODS.to_owned(),
            found: tok.kind.to_string(),
            position,
        })?;
        self.expect_word("as")?;
        Ok(AggregateExpression {
            operand: Some(operand),
            method,
            alias: self.parse_alias()?,
        })
    }

    pub(crate) fn parse_compute_items(&mut self) -> QueryResult<Vec<ComputeExpression>> {
        let mut items = vec![self.parse_compute_item()?];
        while self.eat(&TokenKind::Comma) {
            items.push(self.parse_compute_item()?);
        }
        Ok(items)
    }

    fn parse_compute_item(&mut self) -> QueryResult<ComputeExpression> {
        let expr = self.parse_expression()?;
        self.expect_word("as")?;
        Ok(ComputeExpression {
            expr,
            alias: self.parse_alias()?,
        })
    }

    fn parse_alias(&mut self) -> QueryResult<String> {
        let tok = self.peek();
        let (alias, position) = self.expect_identifier("alias")?;
        if alias.contains('.') {
            return Err(QueryError::UnexpectedToken {
                expected: "alias without '.'".to_owned(),
                found: tok.kind.to_string(),
                position,
            });
        }
        Ok(alias.to_owned())
    }
}

/// Parse an `$apply` value into its pipeline stages.
///
/// # Errors
///
/// Returns a tokenize- or syntax-class [`QueryError`]; unknown transformation
/// and method names are syntax errors.
pub fn parse_apply(input: &str) -> QueryResult<Vec<ApplyTransformation>> {
    parse_apply_with(input, &mut Vec::new())
}

/// Like [`parse_apply`], reusing a caller-owned token buffer.
///
/// # Errors
///
/// See [`parse_apply`].
pub fn parse_apply_with(
    input: &str,
    tokens: &mut Vec<Token>,
) -> QueryResult<Vec<ApplyTransformation>> {
    parse_with(input, tokens, Parser::parse_transformations)
}

/// Parse a `$compute` value (`expr as alias, ...`).
///
/// # Errors
///
/// Returns a tokenize- or syntax-class [`QueryError`].
pub fn parse_compute(input: &str) -> QueryResult<Vec<ComputeExpression>> {
    parse_compute_with(input, &mut Vec::new())
}

/// Like [`parse_compute`], reusing a caller-owned token buffer.
///
/// # Errors
///
/// See [`parse_compute`].
pub fn parse_compute_with(
    input: &str,
    tokens: &mut Vec<Token>,
) -> QueryResult<Vec<ComputeExpression>> {
    parse_with(input, tokens, Parser::parse_compute_items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_groupby_with_aggregate() {
        let stages = parse_apply("groupby((Category), aggregate(Price with sum as Total))").unwrap();
        assert_eq!(stages.len(), 1);
        let ApplyTransformation::GroupBy {
            properties,
            aggregate: Some(aggs),
        } = &stages[0]
        else {
            panic!("expected groupby with aggregate, got {:?}", stages[0]);
        };
        assert_eq!(properties[0].to_string(), "Category");
        assert_eq!(aggs[0].method, AggregateMethod::Sum);
        assert_eq!(aggs[0].alias, "Total");
        assert_eq!(aggs[0].operand.as_ref().unwrap().to_string(), "Price");
    }

    #[test]
    fn test_should_keep_pipeline_order() {
        let stages = parse_apply(
            "filter(Price gt 5)/groupby((Category/Name, Color))/compute(Price mul 2 as Double)",
        )
        .unwrap();
        assert!(matches!(stages[0], ApplyTransformation::Filter { .. }));
        let ApplyTransformation::GroupBy {
            properties,
            aggregate: None,
        } = &stages[1]
        else {
            panic!("expected bare groupby");
        };
        assert_eq!(properties[0].segments, vec!["Category", "Name"]);
        assert!(matches!(stages[2], ApplyTransformation::Compute { .. }));
    }

    #[test]
    fn test_should_parse_bare_count_forms() {
        let stages = parse_apply("aggregate($count as N, count as M, ID with countdistinct as D)")
            .unwrap();
        let ApplyTransformation::Aggregate { expressions } = &stages[0] else {
            panic!("expected aggregate");
        };
        assert!(expressions[0].operand.is_none());
        assert_eq!(expressions[1].alias, "M");
        assert_eq!(expressions[1].method, AggregateMethod::Count);
        assert_eq!(expressions[2].method, AggregateMethod::CountDistinct);
    }

    #[test]
    fn test_should_accept_arithmetic_operand() {
        let stages = parse_apply("aggregate(Price mul Quantity with sum as Revenue)").unwrap();
        let ApplyTransformation::Aggregate { expressions } = &stages[0] else {
            panic!("expected aggregate");
        };
        assert_eq!(
            expressions[0].operand.as_ref().unwrap().to_string(),
            "(Price mul Quantity)"
        );
    }

    #[test]
    fn test_should_reject_unknown_transformation() {
        let err = parse_apply("pivot(Category)").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnexpectedToken {
                expected: TRANSFORMATIONS.to_owned(),
                found: "identifier 'pivot'".to_owned(),
                position: 0,
            }
        );
    }

    #[test]
    fn test_should_reject_unknown_method() {
        let err = parse_apply("aggregate(Price with median as M)").unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedToken { position: 21, .. }));
    }

    #[test]
    fn test_should_reject_trailing_slash() {
        assert!(matches!(
            parse_apply("filter(Price gt 5)/").unwrap_err(),
            QueryError::UnexpectedEnd { .. }
        ));
    }

    #[test]
    fn test_should_parse_compute_list() {
        let items = parse_compute("Price mul 2 as Double, tolower(Name) as Lower").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].alias, "Lower");
        assert!(parse_compute("Price mul 2").is_err());
    }
}
