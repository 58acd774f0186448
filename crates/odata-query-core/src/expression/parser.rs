//! Recursive-descent parser for OData expressions.
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparison (non-associative),
//! additive, multiplicative, unary minus, primary. The same [`Parser`] is
//! driven by the `$orderby`, `$compute`, `$select` and `$apply` parsers.

use odata_query_model::{EdmType, QueryError, QueryResult};
use tracing::trace;

use super::ast::{
    BinaryOp, Call, CompareOp, Expr, FunctionSig, Lambda, LambdaOp, Literal, PathRoot,
    PropertyPath, UnaryOp,
};
use super::lexer::{Keyword, Lexer, Token, TokenKind};

static EOF: Token = Token {
    kind: TokenKind::Eof,
    position: 0,
    len: 0,
};

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parser over a token slice that ends with `Eof`.
#[derive(Debug)]
pub(crate) struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Range variables of the enclosing lambdas, outermost first.
    scopes: Vec<String>,
}

impl<'t> Parser<'t> {
    pub(crate) fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            scopes: Vec::new(),
        }
    }

    pub(crate) fn peek(&self) -> &'t Token {
        self.peek_at(0)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &'t Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .unwrap_or(&EOF)
    }

    pub(crate) fn advance(&mut self) -> &'t Token {
        let tok = self.peek();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn expect(&mut self, expected: &TokenKind) -> QueryResult<&'t Token> {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(expected) {
            Ok(self.advance())
        } else {
            Err(self.error_here(&expected.to_string()))
        }
    }

    /// Consume the next token if it has the same kind as `kind`.
    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    pub(crate) fn expect_end(&self) -> QueryResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error_here("end of expression"))
        }
    }

    pub(crate) fn is_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    /// Returns `true` if the next token is the bare word `word` (any case).
    pub(crate) fn is_word(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(s) if s.eq_ignore_ascii_case(word))
    }

    pub(crate) fn expect_word(&mut self, word: &str) -> QueryResult<()> {
        if self.is_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(&format!("'{word}'")))
        }
    }

    pub(crate) fn expect_identifier(&mut self, what: &str) -> QueryResult<(&'t str, usize)> {
        let tok = self.peek();
        if let TokenKind::Identifier(name) = &tok.kind {
            self.advance();
            Ok((name.as_str(), tok.position))
        } else {
            Err(self.error_here(what))
        }
    }

    /// Build the error for an unexpected next token.
    pub(crate) fn error_here(&self, expected: &str) -> QueryError {
        let tok = self.peek();
        if tok.kind == TokenKind::Eof {
            QueryError::UnexpectedEnd {
                expected: expected.to_owned(),
                position: tok.position,
            }
        } else {
            QueryError::UnexpectedToken {
                expected: expected.to_owned(),
                found: tok.kind.to_string(),
                position: tok.position,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Boolean layers
// ---------------------------------------------------------------------------

impl Parser<'_> {
    /// Parse a full expression (`or` is lowest precedence).
    pub(crate) fn parse_expression(&mut self) -> QueryResult<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_and_expr()?;
        while self.is_keyword(Keyword::Or) {
            self.advance();
            let right = self.parse_and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_not_expr()?;
        while self.is_keyword(Keyword::And) {
            self.advance();
            let right = self.parse_not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> QueryResult<Expr> {
        if self.is_keyword(Keyword::Not) {
            self.advance();
            let operand = self.parse_not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn peek_compare_op(&self) -> Option<CompareOp> {
        let TokenKind::Keyword(kw) = self.peek().kind else {
            return None;
        };
        let op = match kw {
            Keyword::Eq => CompareOp::Eq,
            Keyword::Ne => CompareOp::Ne,
            Keyword::Gt => CompareOp::Gt,
            Keyword::Ge => CompareOp::Ge,
            Keyword::Lt => CompareOp::Lt,
            Keyword::Le => CompareOp::Le,
            Keyword::Has => CompareOp::Has,
            _ => return None,
        };
        Some(op)
    }

    fn parse_comparison(&mut self) -> QueryResult<Expr> {
        let left = self.parse_additive()?;
        let expr = if let Some(op) = self.peek_compare_op() {
            self.advance();
            let right = self.parse_additive()?;
            Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            }
        } else if self.is_keyword(Keyword::In) {
            self.advance();
            self.parse_in_list(left)?
        } else {
            return Ok(left);
        };

        if self.peek_compare_op().is_some() || self.is_keyword(Keyword::In) {
            return Err(self.error_here("'and', 'or' or end of expression"));
        }
        Ok(expr)
    }

    fn parse_in_list(&mut self, value: Expr) -> QueryResult<Expr> {
        self.expect(&TokenKind::LParen)?;
        let mut list = vec![self.parse_additive()?];
        while self.eat(&TokenKind::Comma) {
            list.push(self.parse_additive()?);
        }
        self.expect(&TokenKind::RParen)?;
        Ok(Expr::In {
            value: Box::new(value),
            list,
        })
    }
}

// ---------------------------------------------------------------------------
// Arithmetic layers
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn parse_additive(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Keyword(Keyword::Add) | TokenKind::Plus => BinaryOp::Add,
                TokenKind::Keyword(Keyword::Sub) | TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> QueryResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Keyword(Keyword::Mul) | TokenKind::Star => BinaryOp::Mul,
                TokenKind::Keyword(Keyword::Div) | TokenKind::Slash => BinaryOp::Div,
                TokenKind::Keyword(Keyword::DivBy) => BinaryOp::DivBy,
                TokenKind::Keyword(Keyword::Mod) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    /// Unary minus. A minus touching a numeric literal folds into the literal.
    fn parse_unary(&mut self) -> QueryResult<Expr> {
        if self.peek().kind != TokenKind::Minus {
            return self.parse_primary();
        }
        let minus = self.advance();
        let next = self.peek();
        if minus.touches(next) {
            match next.kind {
                TokenKind::Integer(n) => {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Int(-n)));
                }
                TokenKind::Decimal(n) => {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Decimal(-n)));
                }
                _ => {}
            }
        }
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(operand),
        })
    }
}

// ---------------------------------------------------------------------------
// Primary expressions
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn parse_primary(&mut self) -> QueryResult<Expr> {
        let tok = self.peek();
        let literal = match &tok.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_or_expr()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(Expr::Group(Box::new(inner)));
            }
            TokenKind::It => {
                self.advance();
                return self.parse_path_tail(PathRoot::It, Vec::new(), tok.position);
            }
            TokenKind::Identifier(name) => {
                if self.peek_at(1).kind == TokenKind::LParen {
                    return self.parse_call(name, tok.position);
                }
                self.advance();
                return if self.scopes.iter().any(|v| v == name) {
                    self.parse_path_tail(PathRoot::Variable(name.clone()), Vec::new(), tok.position)
                } else {
                    self.parse_path_tail(PathRoot::Implicit, vec![name.clone()], tok.position)
                };
            }
            TokenKind::Keyword(Keyword::Has) if self.peek_at(1).kind == TokenKind::LParen => {
                return self.parse_call("has", tok.position);
            }
            TokenKind::String(s) => Literal::String(s.clone()),
            TokenKind::Integer(n) => Literal::Int(*n),
            TokenKind::Decimal(n) => Literal::Decimal(*n),
            TokenKind::Boolean(b) => Literal::Boolean(*b),
            TokenKind::Null => Literal::Null,
            TokenKind::Date(d) => Literal::Date(*d),
            TokenKind::DateTimeOffset(dt) => Literal::DateTimeOffset(*dt),
            TokenKind::TimeOfDay(t) => Literal::TimeOfDay(*t),
            TokenKind::Guid(g) => Literal::Guid(*g),
            TokenKind::Enum { type_name, member } => Literal::Enum {
                type_name: type_name.clone(),
                member: member.clone(),
            },
            _ => return Err(self.error_here("expression")),
        };
        self.advance();
        Ok(Expr::Literal(literal))
    }

    /// Continue a path while `/` touches both neighbours and an identifier follows.
    fn parse_path_tail(
        &mut self,
        root: PathRoot,
        mut segments: Vec<String>,
        position: usize,
    ) -> QueryResult<Expr> {
        loop {
            let slash = self.peek();
            if slash.kind != TokenKind::Slash || self.pos == 0 {
                break;
            }
            let prev = &self.tokens[self.pos - 1];
            let next = self.peek_at(1);
            if !(prev.touches(slash) && slash.touches(next)) {
                break;
            }
            match &next.kind {
                TokenKind::Identifier(seg) => {
                    let lambda_op = if seg.eq_ignore_ascii_case("any") {
                        Some(LambdaOp::Any)
                    } else if seg.eq_ignore_ascii_case("all") {
                        Some(LambdaOp::All)
                    } else {
                        None
                    };
                    self.advance();
                    self.advance();
                    if let Some(op) = lambda_op.filter(|_| self.peek().kind == TokenKind::LParen)
                    {
                        let collection = PropertyPath {
                            root,
                            segments,
                            position,
                        };
                        return self.parse_lambda(collection, op);
                    }
                    segments.push(seg.clone());
                }
                TokenKind::Count => {
                    return Err(QueryError::unsupported("$count inside an expression"));
                }
                _ => break,
            }
        }
        Ok(Expr::Identifier(PropertyPath {
            root,
            segments,
            position,
        }))
    }

    fn parse_lambda(&mut self, collection: PropertyPath, operator: LambdaOp) -> QueryResult<Expr> {
        self.expect(&TokenKind::LParen)?;
        if operator == LambdaOp::Any && self.eat(&TokenKind::RParen) {
            return Ok(Expr::Lambda(Lambda {
                collection,
                operator,
                variable: None,
                predicate: None,
            }));
        }

        let var_tok = self.peek();
        let (var, _) = self.expect_identifier("range variable")?;
        if self.scopes.iter().any(|v| v == var) {
            return Err(QueryError::UnexpectedToken {
                expected: "range variable not already in scope".to_owned(),
                found: var_tok.kind.to_string(),
                position: var_tok.position,
            });
        }
        self.expect(&TokenKind::Colon)?;

        self.scopes.push(var.to_owned());
        let predicate = self.parse_or_expr();
        self.scopes.pop();
        let predicate = predicate?;
        self.expect(&TokenKind::RParen)?;

        Ok(Expr::Lambda(Lambda {
            collection,
            operator,
            variable: Some(var.to_owned()),
            predicate: Some(Box::new(predicate)),
        }))
    }

    fn parse_call(&mut self, name: &str, position: usize) -> QueryResult<Expr> {
        let Some(sig) = FunctionSig::lookup(name) else {
            return Err(QueryError::UnknownFunction {
                name: name.to_owned(),
                position,
            });
        };
        self.advance(); // function name
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.parse_or_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        trace!(function = name, args = args.len(), "parsed function call");
        build_call(sig, name, args, position)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn exact<const N: usize>(args: Vec<Expr>) -> Result<[Box<Expr>; N], usize> {
    let found = args.len();
    let args: [Expr; N] = args.try_into().map_err(|_| found)?;
    Ok(args.map(Box::new))
}

fn build_call(sig: FunctionSig, name: &str, args: Vec<Expr>, position: usize) -> QueryResult<Expr> {
    let wrong_arity = |found: usize| {
        let range = sig.arity();
        let expected = if range.start() == range.end() {
            range.start().to_string()
        } else {
            format!("{} or {}", range.start(), range.end())
        };
        QueryError::WrongArity {
            function: name.to_ascii_lowercase(),
            expected,
            found,
            position,
        }
    };

    let call = match sig {
        FunctionSig::Nullary(func) => {
            let [] = exact::<0>(args).map_err(wrong_arity)?;
            Call::Nullary(func)
        }
        FunctionSig::Unary(func) => {
            let [arg] = exact::<1>(args).map_err(wrong_arity)?;
            Call::Unary { func, arg }
        }
        FunctionSig::Binary(func) => {
            let [left, right] = exact::<2>(args).map_err(wrong_arity)?;
            Call::Binary { func, left, right }
        }
        FunctionSig::Has => {
            let [left, right] = exact::<2>(args).map_err(wrong_arity)?;
            return Ok(Expr::Compare {
                op: CompareOp::Has,
                left,
                right,
            });
        }
        FunctionSig::Cast => {
            let [expr, target] = exact::<2>(args).map_err(wrong_arity)?;
            Call::Cast {
                expr,
                target: cast_target(&target, position)?,
            }
        }
        FunctionSig::Substring => {
            if args.len() == 3 {
                let [source, start, length] = exact::<3>(args).map_err(wrong_arity)?;
                Call::Substring {
                    source,
                    start,
                    length: Some(length),
                }
            } else {
                let [source, start] = exact::<2>(args).map_err(wrong_arity)?;
                Call::Substring {
                    source,
                    start,
                    length: None,
                }
            }
        }
    };
    Ok(Expr::Call(call))
}

/// The second `cast` argument: a bare (`Edm.Int32`) or quoted type name.
fn cast_target(arg: &Expr, position: usize) -> QueryResult<EdmType> {
    let name = match arg.ungrouped() {
        Expr::Identifier(path) => path.as_simple().map(str::to_owned),
        Expr::Literal(Literal::String(s)) => Some(s.clone()),
        _ => None,
    };
    let Some(name) = name else {
        return Err(QueryError::UnexpectedToken {
            expected: "EDM type name".to_owned(),
            found: arg.to_string(),
            position,
        });
    };
    name.parse::<EdmType>()
        .map_err(|_| QueryError::unsupported(format!("cast to '{name}'")))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Tokenize `input` into `tokens`, run `f` over the result and require that
/// every token is consumed.
pub(crate) fn parse_with<'t, T>(
    input: &str,
    tokens: &'t mut Vec<Token>,
    f: impl FnOnce(&mut Parser<'t>) -> QueryResult<T>,
) -> QueryResult<T> {
    Lexer::new(input).tokenize_into(tokens)?;
    trace!(tokens = tokens.len(), "tokenized");
    let tokens: &'t [Token] = tokens;
    let mut parser = Parser::new(tokens);
    let value = f(&mut parser)?;
    parser.expect_end()?;
    Ok(value)
}

/// Parse a boolean or value expression such as a `$filter`.
///
/// # Errors
///
/// Returns a tokenize- or syntax-class [`QueryError`].
pub fn parse_expression(input: &str) -> QueryResult<Expr> {
    let mut tokens = Vec::new();
    parse_expression_with(input, &mut tokens)
}

/// Like [`parse_expression`], reusing a caller-owned token buffer.
///
/// # Errors
///
/// See [`parse_expression`].
pub fn parse_expression_with(input: &str, tokens: &mut Vec<Token>) -> QueryResult<Expr> {
    parse_with(input, tokens, Parser::parse_expression)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ast::{BinaryFn, UnaryFn};

    fn shape(input: &str) -> String {
        parse_expression(input).unwrap().to_string()
    }

    #[test]
    fn test_should_bind_and_tighter_than_or() {
        assert_eq!(
            shape("A eq 1 and B eq 2 or C eq 3"),
            "(((A eq 1) and (B eq 2)) or (C eq 3))"
        );
    }

    #[test]
    fn test_should_bind_not_to_following_comparison_only() {
        assert_eq!(
            shape("not A eq 1 and B eq 2"),
            "((not (A eq 1)) and (B eq 2))"
        );
    }

    #[test]
    fn test_should_keep_explicit_grouping() {
        let grouped = parse_expression("A eq 1 and (B eq 2 or C eq 3)").unwrap();
        let flat = parse_expression("A eq 1 and B eq 2 or C eq 3").unwrap();
        assert_ne!(grouped, flat);
        let Expr::Binary { op, right, .. } = &grouped else {
            panic!("expected binary, got {grouped:?}");
        };
        assert_eq!(*op, BinaryOp::And);
        assert!(matches!(right.as_ref(), Expr::Group(_)));
    }

    #[test]
    fn test_should_respect_arithmetic_precedence() {
        assert_eq!(shape("Price add Tax mul 2 gt 10"), "((Price add (Tax mul 2)) gt 10)");
        assert_eq!(shape("A sub B sub C eq 0"), "(((A sub B) sub C) eq 0)");
    }

    #[test]
    fn test_should_type_decimal_literal() {
        let expr = parse_expression("Price eq 99.99").unwrap();
        let Expr::Compare { right, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(right.as_literal(), Some(&Literal::Decimal(99.99)));
    }

    #[test]
    fn test_should_split_path_from_division_by_adjacency() {
        assert_eq!(shape("Category/Name eq 'x'"), "(Category/Name eq 'x')");
        assert_eq!(shape("Price / Qty gt 1"), "((Price div Qty) gt 1)");
        assert_eq!(shape("Price/2 gt 1"), "((Price div 2) gt 1)");
    }

    #[test]
    fn test_should_fold_adjacent_minus_into_literal() {
        assert_eq!(
            parse_expression("-5").unwrap(),
            Expr::Literal(Literal::Int(-5))
        );
        assert!(matches!(
            parse_expression("- Price").unwrap(),
            Expr::Unary {
                op: UnaryOp::Negate,
                ..
            }
        ));
    }

    #[test]
    fn test_should_parse_lambda_with_scoped_variable() {
        let expr = parse_expression("Orders/any(o: o/Amount gt 100)").unwrap();
        let Expr::Lambda(lambda) = expr else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.operator, LambdaOp::Any);
        assert_eq!(lambda.collection.to_string(), "Orders");
        assert_eq!(lambda.variable.as_deref(), Some("o"));
        let pred = lambda.predicate.unwrap();
        let Expr::Compare { left, .. } = pred.as_ref() else {
            panic!("expected comparison");
        };
        let path = left.as_path().unwrap();
        assert_eq!(path.root, PathRoot::Variable("o".to_owned()));
        assert_eq!(path.segments, vec!["Amount".to_owned()]);
    }

    #[test]
    fn test_should_parse_nested_lambda_referencing_outer_variable() {
        let expr =
            parse_expression("Orders/any(o: o/Items/all(i: i/Qty gt 0 and o/Amount gt 1))").unwrap();
        assert_eq!(
            expr.to_string(),
            "Orders/any(o: o/Items/all(i: ((i/Qty gt 0) and (o/Amount gt 1))))"
        );
    }

    #[test]
    fn test_should_reject_shadowed_range_variable() {
        let err = parse_expression("Orders/any(o: o/Items/any(o: o/Qty gt 0))").unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedToken { position: 26, .. }));
    }

    #[test]
    fn test_should_parse_empty_any_and_reject_empty_all() {
        let expr = parse_expression("Orders/any()").unwrap();
        assert!(matches!(expr, Expr::Lambda(Lambda { predicate: None, .. })));
        assert!(parse_expression("Orders/all()").is_err());
    }

    #[test]
    fn test_should_parse_it_root() {
        let expr = parse_expression("Orders/any(o: o/Amount gt $it/Limit)").unwrap();
        assert_eq!(expr.to_string(), "Orders/any(o: (o/Amount gt $it/Limit))");
    }

    #[test]
    fn test_should_parse_functions_by_arity() {
        let expr = parse_expression("contains(tolower(Name), 'abc')").unwrap();
        let Expr::Call(Call::Binary { func, left, .. }) = expr else {
            panic!("expected binary call");
        };
        assert_eq!(func, BinaryFn::Contains);
        assert!(matches!(
            left.as_ref(),
            Expr::Call(Call::Unary {
                func: UnaryFn::ToLower,
                ..
            })
        ));
        assert!(matches!(
            parse_expression("substring(Name, 1, 2)").unwrap(),
            Expr::Call(Call::Substring { length: Some(_), .. })
        ));
        assert!(matches!(
            parse_expression("now()").unwrap(),
            Expr::Call(Call::Nullary(_))
        ));
    }

    #[test]
    fn test_should_reject_unknown_function_by_name() {
        let err = parse_expression("Price gt frob(1)").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownFunction {
                name: "frob".to_owned(),
                position: 9,
            }
        );
    }

    #[test]
    fn test_should_report_wrong_arity() {
        let err = parse_expression("substring(Name)").unwrap_err();
        assert_eq!(
            err,
            QueryError::WrongArity {
                function: "substring".to_owned(),
                expected: "2 or 3".to_owned(),
                found: 1,
                position: 0,
            }
        );
        assert!(matches!(
            parse_expression("length(Name, 1)").unwrap_err(),
            QueryError::WrongArity { found: 2, .. }
        ));
    }

    #[test]
    fn test_should_treat_has_function_as_operator() {
        assert_eq!(
            parse_expression("has(Status, 2)").unwrap().to_string(),
            parse_expression("Status has 2").unwrap().to_string()
        );
        assert!(matches!(
            parse_expression("has(Status, 2)").unwrap(),
            Expr::Compare { op: CompareOp::Has, .. }
        ));
    }

    #[test]
    fn test_should_parse_cast_target() {
        let expr = parse_expression("cast(Price, Edm.Int32) eq 3").unwrap();
        assert_eq!(expr.to_string(), "(cast(Price, Edm.Int32) eq 3)");
        assert!(matches!(
            parse_expression("cast(Price, Edm.Geography)").unwrap_err(),
            QueryError::Unsupported { .. }
        ));
    }

    #[test]
    fn test_should_parse_in_operator() {
        assert_eq!(
            shape("Name in ('a', 'b') and Price gt 1"),
            "((Name in ('a', 'b')) and (Price gt 1))"
        );
    }

    #[test]
    fn test_should_reject_chained_comparison() {
        let err = parse_expression("A eq B eq C").unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedToken { position: 7, .. }));
    }

    #[test]
    fn test_should_reject_trailing_tokens() {
        let err = parse_expression("Price gt 5 Name").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnexpectedToken {
                expected: "end of expression".to_owned(),
                found: "identifier 'Name'".to_owned(),
                position: 11,
            }
        );
    }

    #[test]
    fn test_should_report_unexpected_end() {
        let err = parse_expression("Price gt").unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedEnd { position: 8, .. }));
    }

    #[test]
    fn test_should_surface_tokenize_error() {
        let err = parse_expression("Name eq 'abc").unwrap_err();
        assert_eq!(err, QueryError::UnterminatedString { position: 8 });
    }
}
