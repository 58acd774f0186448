//! Error taxonomy for the query engine.
//!
//! Every failure is a value. Each variant belongs to exactly one
//! [`ErrorKind`], which the HTTP layer maps to a client-visible status.

use std::fmt;

/// The four error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input could not be split into tokens.
    Tokenize,
    /// The tokens do not form a valid expression or option.
    Syntax,
    /// The expression is well-formed but does not fit the metadata.
    Semantic,
    /// The construct has no compiled equivalent on the active backend.
    Unsupported,
}

impl ErrorKind {
    /// Short stable name, e.g. `"syntax"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tokenize => "tokenize",
            Self::Syntax => "syntax",
            Self::Semantic => "semantic",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while tokenizing, parsing, or compiling query options.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// A character that cannot start any token.
    #[error("illegal character '{ch}' at position {position}")]
    IllegalCharacter {
        /// The offending character.
        ch: char,
        /// Character offset.
        position: usize,
    },
    /// A string literal without its closing quote.
    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString {
        /// Offset of the opening quote.
        position: usize,
    },
    /// A numeric, date, time or GUID literal that does not denote a value.
    #[error("invalid {kind} literal '{text}' at position {position}")]
    InvalidLiteral {
        /// Literal class, e.g. `"date"`.
        kind: &'static str,
        /// Raw literal text.
        text: String,
        /// Offset of the literal.
        position: usize,
    },
    /// A token that does not fit the grammar at this point.
    #[error("unexpected token {found} at position {position}: expected {expected}")]
    UnexpectedToken {
        /// What the grammar allows here.
        expected: String,
        /// The token that was found.
        found: String,
        /// Offset of the found token.
        position: usize,
    },
    /// The input ended while more was required.
    #[error("unexpected end of input at position {position}: expected {expected}")]
    UnexpectedEnd {
        /// What the grammar still needs.
        expected: String,
        /// Offset of the end of input.
        position: usize,
    },
    /// A call to a function the engine does not know.
    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction {
        /// Function name as written.
        name: String,
        /// Offset of the function name.
        position: usize,
    },
    /// A known function called with the wrong number of arguments.
    #[error("function '{function}' at position {position} takes {expected} argument(s), found {found}")]
    WrongArity {
        /// Function name.
        function: String,
        /// Accepted argument count(s), e.g. `"2 or 3"`.
        expected: String,
        /// Supplied argument count.
        found: usize,
        /// Offset of the function name.
        position: usize,
    },
    /// A system query option whose value is malformed or not allowed.
    #[error("invalid value for {option}: {message}")]
    InvalidOption {
        /// Option name, e.g. `$top`.
        option: String,
        /// Explanation.
        message: String,
    },
    /// An identifier that is neither a property nor a visible alias.
    #[error("unknown property '{name}' on '{entity}'")]
    UnknownProperty {
        /// Identifier as written.
        name: String,
        /// Entity (or pipeline stage) the lookup ran against.
        entity: String,
    },
    /// An entity name missing from the schema.
    #[error("unknown entity '{name}'")]
    UnknownEntity {
        /// Entity name.
        name: String,
    },
    /// Operand types that cannot be combined.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Explanation.
        message: String,
    },
    /// An alias introduced twice in the same namespace.
    #[error("duplicate alias '{alias}'")]
    DuplicateAlias {
        /// The alias.
        alias: String,
    },
    /// An alias referenced from an option that cannot see it.
    #[error("alias '{alias}' cannot be referenced from {option}")]
    UnreachableAlias {
        /// The alias.
        alias: String,
        /// The option that referenced it.
        option: String,
    },
    /// An operand that is invalid for the operation applied to it.
    #[error("invalid operand for {operation}: {message}")]
    InvalidOperand {
        /// The operation.
        operation: String,
        /// Explanation.
        message: String,
    },
    /// A construct without a compiled equivalent.
    #[error("unsupported: {construct}")]
    Unsupported {
        /// Description of the construct.
        construct: String,
    },
}

impl QueryError {
    /// The error class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalCharacter { .. }
            | Self::UnterminatedString { .. }
            | Self::InvalidLiteral { .. } => ErrorKind::Tokenize,
            Self::UnexpectedToken { .. }
            | Self::UnexpectedEnd { .. }
            | Self::UnknownFunction { .. }
            | Self::WrongArity { .. }
            | Self::InvalidOption { .. } => ErrorKind::Syntax,
            Self::UnknownProperty { .. }
            | Self::UnknownEntity { .. }
            | Self::TypeMismatch { .. }
            | Self::DuplicateAlias { .. }
            | Self::UnreachableAlias { .. }
            | Self::InvalidOperand { .. } => ErrorKind::Semantic,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// The input position the error points at, when it has one.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::IllegalCharacter { position, .. }
            | Self::UnterminatedString { position }
            | Self::InvalidLiteral { position, .. }
            | Self::UnexpectedToken { position, .. }
            | Self::UnexpectedEnd { position, .. }
            | Self::UnknownFunction { position, .. }
            | Self::WrongArity { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Shorthand for [`QueryError::Unsupported`].
    #[must_use]
    pub fn unsupported(construct: impl Into<String>) -> Self {
        Self::Unsupported {
            construct: construct.into(),
        }
    }

    /// Shorthand for [`QueryError::TypeMismatch`].
    #[must_use]
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }
}

/// Convenience result type for engine operations.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_every_variant_to_one_kind() {
        let tokenize = QueryError::UnterminatedString { position: 8 };
        assert_eq!(tokenize.kind(), ErrorKind::Tokenize);
        assert_eq!(tokenize.position(), Some(8));

        let syntax = QueryError::WrongArity {
            function: "substring".to_owned(),
            expected: "2 or 3".to_owned(),
            found: 1,
            position: 0,
        };
        assert_eq!(syntax.kind(), ErrorKind::Syntax);

        let semantic = QueryError::UnknownProperty {
            name: "Foo".to_owned(),
            entity: "Products".to_owned(),
        };
        assert_eq!(semantic.kind(), ErrorKind::Semantic);
        assert_eq!(semantic.position(), None);

        assert_eq!(
            QueryError::unsupported("geo.distance").kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_should_render_messages() {
        let err = QueryError::UnexpectedToken {
            expected: "')'".to_owned(),
            found: "','".to_owned(),
            position: 12,
        };
        assert_eq!(
            err.to_string(),
            "unexpected token ',' at position 12: expected ')'"
        );
        assert_eq!(ErrorKind::Semantic.to_string(), "semantic");
    }
}
