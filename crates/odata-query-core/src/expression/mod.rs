//! OData expression language.
//!
//! The pipeline is:
//!
//! 1. **Lexing**: split the input into positioned tokens ([`lexer`]).
//! 2. **Parsing**: build an [`Expr`] by recursive descent ([`parser`]).
//! 3. **Consumption**: the SQL compiler ([`crate::compile`]) or the in-memory
//!    evaluator ([`crate::memory`]) walks the tree.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{
    BinaryFn, BinaryOp, Call, CompareOp, Expr, FunctionSig, Lambda, LambdaOp, Literal,
    NullaryFn, PathRoot, PropertyPath, UnaryFn, UnaryOp, collect_paths,
};
pub use lexer::{Keyword, Lexer, Token, TokenKind, tokenize};
pub use parser::{parse_expression, parse_expression_with};
