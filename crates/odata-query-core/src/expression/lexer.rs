//! Tokenizer for OData expression strings.
//!
//! Keywords are matched case-insensitively. Date, date-time, time-of-day and
//! GUID literals are recognised by lookahead before anything else, so a value
//! like `2024-01-15` is never split into a subtraction.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use odata_query_model::{QueryError, QueryResult};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Token type
// ---------------------------------------------------------------------------

/// Reserved words of the expression grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `gt`
    Gt,
    /// `ge`
    Ge,
    /// `lt`
    Lt,
    /// `le`
    Le,
    /// `has`
    Has,
    /// `in`
    In,
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `div`
    Div,
    /// `divby`
    DivBy,
    /// `mod`
    Mod,
    /// `asc`
    Asc,
    /// `desc`
    Desc,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let kw = match word.to_ascii_lowercase().as_str() {
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "has" => Self::Has,
            "in" => Self::In,
            "add" => Self::Add,
            "sub" => Self::Sub,
            "mul" => Self::Mul,
            "div" => Self::Div,
            "divby" => Self::DivBy,
            "mod" => Self::Mod,
            "asc" => Self::Asc,
            "desc" => Self::Desc,
            _ => return None,
        };
        Some(kw)
    }

    /// Lowercase spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Has => "has",
            Self::In => "in",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::DivBy => "divby",
            Self::Mod => "mod",
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// The class and payload of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Property, function, variable or qualified type name (may contain dots).
    Identifier(String),
    /// A reserved word.
    Keyword(Keyword),
    /// Single-quoted string with `''` unescaped.
    String(String),
    /// Integer literal.
    Integer(i64),
    /// Literal with a fraction or exponent.
    Decimal(f64),
    /// `true` / `false`.
    Boolean(bool),
    /// `null`
    Null,
    /// `YYYY-MM-DD`
    Date(NaiveDate),
    /// `YYYY-MM-DDThh:mm[:ss[.fff]](Z|±hh:mm)`
    DateTimeOffset(DateTime<FixedOffset>),
    /// `hh:mm[:ss[.fff]]`
    TimeOfDay(NaiveTime),
    /// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
    Guid(Uuid),
    /// `Namespace.Type'Member'`
    Enum {
        /// Qualified type name.
        type_name: String,
        /// Member name (or a comma-separated flag list).
        member: String,
    },
    /// `$it`
    It,
    /// `$count`
    Count,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `/`
    Slash,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// `=`
    Equals,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// End of input.
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(s) => write!(f, "identifier '{s}'"),
            Self::Keyword(k) => write!(f, "'{}'", k.as_str()),
            Self::String(s) => write!(f, "string '{s}'"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Decimal(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Null => write!(f, "null"),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTimeOffset(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::TimeOfDay(t) => write!(f, "{t}"),
            Self::Guid(g) => write!(f, "{g}"),
            Self::Enum { type_name, member } => write!(f, "{type_name}'{member}'"),
            Self::It => write!(f, "$it"),
            Self::Count => write!(f, "$count"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::Comma => write!(f, "','"),
            Self::Slash => write!(f, "'/'"),
            Self::Colon => write!(f, "':'"),
            Self::Semicolon => write!(f, "';'"),
            Self::Equals => write!(f, "'='"),
            Self::Plus => write!(f, "'+'"),
            Self::Minus => write!(f, "'-'"),
            Self::Star => write!(f, "'*'"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with its location in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Class and payload.
    pub kind: TokenKind,
    /// Character offset of the first character.
    pub position: usize,
    /// Length in characters.
    pub len: usize,
}

impl Token {
    /// Character offset just past the token.
    #[must_use]
    pub fn end(&self) -> usize {
        self.position + self.len
    }

    /// Returns `true` if `other` starts exactly where this token ends.
    #[must_use]
    pub fn touches(&self, other: &Token) -> bool {
        self.end() == other.position
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Tokenizer over one input string.
#[derive(Debug)]
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    /// Create a lexer over `input`.
    #[must_use]
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input into a new vector ending with `Eof`.
    ///
    /// # Errors
    ///
    /// Returns a tokenize-class [`QueryError`] on the first illegal character,
    /// unterminated string or malformed literal.
    pub fn tokenize(&mut self) -> QueryResult<Vec<Token>> {
        let mut tokens = Vec::new();
        self.tokenize_into(&mut tokens)?;
        Ok(tokens)
    }

    /// Tokenize into a caller-owned buffer, which is cleared first.
    ///
    /// # Errors
    ///
    /// See [`Lexer::tokenize`]. On error the buffer holds a partial sequence
    /// and must not be parsed.
    pub fn tokenize_into(&mut self, tokens: &mut Vec<Token>) -> QueryResult<()> {
        tokens.clear();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                return Ok(());
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            position: start,
            len: self.pos - start,
        }
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        let start = self.pos;
        self.pos += 1;
        self.token(kind, start)
    }

    fn next_token(&mut self) -> QueryResult<Token> {
        self.skip_whitespace();
        let start = self.pos;

        let Some(ch) = self.peek() else {
            return Ok(self.token(TokenKind::Eof, start));
        };

        if let Some(tok) = self.try_temporal_or_guid()? {
            return Ok(tok);
        }

        match ch {
            '(' => Ok(self.single(TokenKind::LParen)),
            ')' => Ok(self.single(TokenKind::RParen)),
            ',' => Ok(self.single(TokenKind::Comma)),
            '/' => Ok(self.single(TokenKind::Slash)),
            ':' => Ok(self.single(TokenKind::Colon)),
            ';' => Ok(self.single(TokenKind::Semicolon)),
            '=' => Ok(self.single(TokenKind::Equals)),
            '+' => Ok(self.single(TokenKind::Plus)),
            '-' => Ok(self.single(TokenKind::Minus)),
            '*' => Ok(self.single(TokenKind::Star)),
            '\'' => self.read_string(),
            '$' => self.read_dollar_identifier(),
            c if c.is_ascii_digit() => self.read_number(),
            c if is_ident_start(c) => self.read_identifier_or_keyword(),
            _ => Err(QueryError::IllegalCharacter { ch, position: start }),
        }
    }

    fn read_string(&mut self) -> QueryResult<Token> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let value = self.read_quoted_body(start)?;
        Ok(self.token(TokenKind::String(value), start))
    }

    /// Read up to and including the closing quote; `''` is an escaped quote.
    fn read_quoted_body(&mut self, open: usize) -> QueryResult<String> {
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(QueryError::UnterminatedString { position: open }),
                Some('\'') if self.peek_at(1) == Some('\'') => {
                    value.push('\'');
                    self.pos += 2;
                }
                Some('\'') => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_dollar_identifier(&mut self) -> QueryResult<Token> {
        let start = self.pos;
        self.pos += 1;
        let name = self.read_ident_chars();
        let kind = match name.to_ascii_lowercase().as_str() {
            "it" => TokenKind::It,
            "count" => TokenKind::Count,
            _ => {
                return Err(QueryError::IllegalCharacter {
                    ch: '$',
                    position: start,
                });
            }
        };
        Ok(self.token(kind, start))
    }

    fn read_number(&mut self) -> QueryResult<Token> {
        let start = self.pos;
        let mut text = String::new();
        let mut is_decimal = false;

        self.push_digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_decimal = true;
            text.push('.');
            self.pos += 1;
            self.push_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_decimal = true;
                for _ in 0..=sign {
                    text.extend(self.peek());
                    self.pos += 1;
                }
                self.push_digits(&mut text);
            }
        }
        if self.peek().is_some_and(is_ident_continue) {
            // `12abc` is neither a number nor an identifier.
            while self.peek().is_some_and(is_ident_continue) {
                text.extend(self.peek());
                self.pos += 1;
            }
            return Err(invalid_literal("numeric", text, start));
        }

        let kind = if is_decimal {
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(TokenKind::Decimal)
        } else {
            text.parse::<i64>().ok().map(TokenKind::Integer)
        };
        match kind {
            Some(kind) => Ok(self.token(kind, start)),
            None => Err(invalid_literal("numeric", text, start)),
        }
    }

    fn push_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.pos += 1;
        }
    }

    fn read_ident_chars(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek().filter(|c| is_ident_continue(*c)) {
            s.push(c);
            self.pos += 1;
        }
        s
    }

    /// Identifiers may be dotted (`geo.distance`, `Edm.Int32`). A dotted name
    /// immediately followed by a quote is an enum literal.
    fn read_identifier_or_keyword(&mut self) -> QueryResult<Token> {
        let start = self.pos;
        let mut ident = self.read_ident_chars();
        while self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_start) {
            self.pos += 1;
            ident.push('.');
            ident.push_str(&self.read_ident_chars());
        }

        if self.peek() == Some('\'') {
            let open = self.pos;
            self.pos += 1;
            let member = self.read_quoted_body(open)?;
            return Ok(self.token(
                TokenKind::Enum {
                    type_name: ident,
                    member,
                },
                start,
            ));
        }

        let kind = if ident.eq_ignore_ascii_case("true") {
            TokenKind::Boolean(true)
        } else if ident.eq_ignore_ascii_case("false") {
            TokenKind::Boolean(false)
        } else if ident.eq_ignore_ascii_case("null") {
            TokenKind::Null
        } else if let Some(kw) = Keyword::from_word(&ident) {
            TokenKind::Keyword(kw)
        } else {
            TokenKind::Identifier(ident)
        };
        Ok(self.token(kind, start))
    }
}

// ---------------------------------------------------------------------------
// Date, time and GUID lookahead
// ---------------------------------------------------------------------------

impl Lexer {
    /// Count characters matching `pred` starting at `offset`.
    fn run_len(&self, offset: usize, pred: impl Fn(char) -> bool) -> usize {
        self.chars[(self.pos + offset).min(self.chars.len())..]
            .iter()
            .take_while(|c| pred(**c))
            .count()
    }

    fn char_is(&self, offset: usize, expected: char) -> bool {
        self.peek_at(offset) == Some(expected)
    }

    fn try_temporal_or_guid(&mut self) -> QueryResult<Option<Token>> {
        let start = self.pos;
        if let Some(len) = self.guid_len() {
            let text: String = self.chars[start..start + len].iter().collect();
            self.pos += len;
            let guid = Uuid::parse_str(&text).map_err(|_| invalid_literal("guid", text, start))?;
            return Ok(Some(self.token(TokenKind::Guid(guid), start)));
        }
        if let Some(len) = self.date_len() {
            let time_len = if self.peek_at(len).is_some_and(|c| c == 'T' || c == 't') {
                self.offset_time_len(len + 1).map(|n| n + 1)
            } else {
                None
            };
            if let Some(time_len) = time_len {
                let total = len + time_len;
                let text: String = self.chars[start..start + total].iter().collect();
                self.pos += total;
                let value = parse_datetime(&text).ok_or_else(|| {
                    invalid_literal("date-time", text.clone(), start)
                })?;
                return Ok(Some(self.token(TokenKind::DateTimeOffset(value), start)));
            }
            let text: String = self.chars[start..start + len].iter().collect();
            self.pos += len;
            let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map_err(|_| invalid_literal("date", text, start))?;
            return Ok(Some(self.token(TokenKind::Date(date), start)));
        }
        if let Some(len) = self.time_len(0) {
            let text: String = self.chars[start..start + len].iter().collect();
            self.pos += len;
            let time = parse_time(&text).ok_or_else(|| invalid_literal("time", text, start))?;
            return Ok(Some(self.token(TokenKind::TimeOfDay(time), start)));
        }
        Ok(None)
    }

    fn guid_len(&self) -> Option<usize> {
        let groups = [8, 4, 4, 4, 12];
        let mut offset = 0;
        for (i, size) in groups.iter().enumerate() {
            if self.run_len(offset, |c| c.is_ascii_hexdigit()) < *size {
                return None;
            }
            offset += size;
            if i < groups.len() - 1 {
                if !self.char_is(offset, '-') {
                    return None;
                }
                offset += 1;
            }
        }
        let boundary = !self.peek_at(offset).is_some_and(is_ident_continue);
        boundary.then_some(offset)
    }

    fn date_len(&self) -> Option<usize> {
        let ok = self.run_len(0, |c| c.is_ascii_digit()) == 4
            && self.char_is(4, '-')
            && self.run_len(5, |c| c.is_ascii_digit()) == 2
            && self.char_is(7, '-')
            && self.run_len(8, |c| c.is_ascii_digit()) == 2;
        ok.then_some(10)
    }

    /// `hh:mm[:ss[.fff]]` at `offset`.
    fn time_len(&self, offset: usize) -> Option<usize> {
        let ok = self.run_len(offset, |c| c.is_ascii_digit()) == 2
            && self.char_is(offset + 2, ':')
            && self.run_len(offset + 3, |c| c.is_ascii_digit()) == 2;
        if !ok {
            return None;
        }
        let mut len = 5;
        if self.char_is(offset + len, ':') && self.run_len(offset + len + 1, |c| c.is_ascii_digit()) == 2
        {
            len += 3;
            if self.char_is(offset + len, '.') {
                let frac = self.run_len(offset + len + 1, |c| c.is_ascii_digit());
                if frac > 0 {
                    len += 1 + frac;
                }
            }
        }
        Some(len)
    }

    /// Time followed by a mandatory `Z` or `±hh:mm` offset.
    fn offset_time_len(&self, offset: usize) -> Option<usize> {
        let time = self.time_len(offset)?;
        let zone_at = offset + time;
        match self.peek_at(zone_at) {
            Some('Z' | 'z') => Some(time + 1),
            Some('+' | '-') => {
                let ok = self.run_len(zone_at + 1, |c| c.is_ascii_digit()) == 2
                    && self.char_is(zone_at + 3, ':')
                    && self.run_len(zone_at + 4, |c| c.is_ascii_digit()) == 2;
                ok.then_some(time + 6)
            }
            _ => None,
        }
    }
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    // RFC 3339 requires seconds; OData allows omitting them.
    let (date, rest) = text.split_at(11);
    let zone_at = rest.find(['Z', 'z', '+', '-'])?;
    let (time, zone) = rest.split_at(zone_at);
    DateTime::parse_from_rfc3339(&format!("{date}{time}:00{zone}")).ok()
}

fn invalid_literal(kind: &'static str, text: String, position: usize) -> QueryError {
    QueryError::InvalidLiteral {
        kind,
        text,
        position,
    }
}

/// Returns `true` if `c` can start an identifier.
fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Returns `true` if `c` can continue an identifier.
fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize `input` into a fresh vector.
///
/// # Errors
///
/// See [`Lexer::tokenize`].
pub fn tokenize(input: &str) -> QueryResult<Vec<Token>> {
    Lexer::new(input).tokenize()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
