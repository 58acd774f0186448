//! System query option parsing.
//!
//! [`QueryOptions`] is the parsed, metadata-free form of one request's
//! `$`-options. Parsing is case-insensitive on option names, rejects
//! duplicates and oversized values, and ignores options without a `$` prefix
//! (custom query options belong to the caller).

use std::collections::HashSet;

use odata_query_model::{QueryError, QueryResult};
use tracing::{debug, trace, warn};

use crate::apply::{ApplyTransformation, ComputeExpression};
use crate::config::EngineConfig;
use crate::expression::parser::{Parser, parse_with};
use crate::expression::{Expr, Keyword, PathRoot, PropertyPath, Token, TokenKind};
use crate::pool::ParserPool;

/// One `$orderby` key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    /// Sort expression.
    pub expr: Expr,
    /// `desc` was given.
    pub descending: bool,
}

/// One `$select` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// A property or alias path.
    Path(PropertyPath),
}

/// One `$expand` item with its nested options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandItem {
    /// Navigation property name.
    pub navigation: String,
    /// Options written inside `Nav(...)`.
    pub options: QueryOptions,
}

/// Parsed system query options for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// `$filter`
    pub filter: Option<Expr>,
    /// `$orderby`, in priority order.
    pub order_by: Vec<OrderByItem>,
    /// `$top`
    pub top: Option<u64>,
    /// `$skip`
    pub skip: Option<u64>,
    /// `$skiptoken`, kept opaque.
    pub skip_token: Option<String>,
    /// `$count=true`
    pub count: bool,
    /// `$apply`, in pipeline order.
    pub apply: Vec<ApplyTransformation>,
    /// `$compute`
    pub compute: Vec<ComputeExpression>,
    /// `$select`; empty means all properties.
    pub select: Vec<SelectItem>,
    /// `$expand`
    pub expand: Vec<ExpandItem>,
}

/// Options that are part of OData but have no compiled form here.
const UNSUPPORTED: &[&str] = &["$search", "$levels", "$index", "$deltatoken", "$id"];

/// Options consumed by the response layer; accepted and ignored.
const PASS_THROUGH: &[&str] = &["$format", "$schemaversion"];

/// Options allowed inside `$expand=Nav(...)`.
const NESTED: &[&str] = &["$filter", "$orderby", "$top", "$skip", "$select", "$expand", "$count"];

impl QueryOptions {
    /// Parse `(name, value)` pairs, e.g. from `form_urlencoded::parse`.
    ///
    /// # Errors
    ///
    /// Returns the first tokenize-, syntax- or unsupported-class error found
    /// in any option.
    pub fn parse_pairs<I, K, V>(pairs: I, config: &EngineConfig) -> QueryResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut tokens = Vec::new();
        OptionParser {
            config,
            tokens: &mut tokens,
        }
        .parse(pairs, 0)
    }

    /// Like [`QueryOptions::parse_pairs`], borrowing a token buffer from `pool`.
    ///
    /// # Errors
    ///
    /// See [`QueryOptions::parse_pairs`].
    pub fn parse_pairs_pooled<I, K, V>(
        pairs: I,
        config: &EngineConfig,
        pool: &ParserPool,
    ) -> QueryResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut tokens = pool.acquire();
        OptionParser {
            config,
            tokens: &mut *tokens,
        }
        .parse(pairs, 0)
    }

    /// Parse a raw URL query string (`$filter=...&$top=5`), percent-decoding
    /// names and values.
    ///
    /// # Errors
    ///
    /// See [`QueryOptions::parse_pairs`].
    pub fn parse_query_string(query: &str, config: &EngineConfig) -> QueryResult<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::parse_pairs(form_urlencoded::parse(query.as_bytes()), config)
    }

    /// Every alias introduced by `$apply` stages and `$compute`.
    #[must_use]
    pub fn aliases(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for stage in &self.apply {
            match stage {
                ApplyTransformation::GroupBy {
                    aggregate: Some(aggs),
                    ..
                }
                | ApplyTransformation::Aggregate { expressions: aggs } => {
                    out.extend(aggs.iter().map(|a| a.alias.as_str()));
                }
                ApplyTransformation::Compute { expressions } => {
                    out.extend(expressions.iter().map(|c| c.alias.as_str()));
                }
                ApplyTransformation::GroupBy { aggregate: None, .. }
                | ApplyTransformation::Filter { .. } => {}
            }
        }
        out.extend(self.compute.iter().map(|c| c.alias.as_str()));
        out
    }
}

// ---------------------------------------------------------------------------
// Option dispatch
// ---------------------------------------------------------------------------

struct OptionParser<'a> {
    config: &'a EngineConfig,
    tokens: &'a mut Vec<Token>,
}

impl OptionParser<'_> {
    /// `depth` is 0 for the request itself and n inside the nth `$expand`.
    fn parse<I, K, V>(&mut self, pairs: I, depth: usize) -> QueryResult<QueryOptions>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = QueryOptions::default();
        let mut seen = HashSet::new();
        let mut count = 0usize;

        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            if !name.starts_with('$') {
                if depth > 0 {
                    return Err(QueryError::InvalidOption {
                        option: "$expand".to_owned(),
                        message: format!("'{name}' is not a system query option"),
                    });
                }
                trace!(option = name, "ignoring custom query option");
                continue;
            }

            let lower = name.to_ascii_lowercase();
            if !seen.insert(lower.clone()) {
                return Err(QueryError::InvalidOption {
                    option: name.to_owned(),
                    message: "option given more than once".to_owned(),
                });
            }
            let length = value.chars().count();
            if length > self.config.max_option_length {
                warn!(
                    option = name,
                    length,
                    limit = self.config.max_option_length,
                    "rejecting oversized query option"
                );
                return Err(QueryError::InvalidOption {
                    option: name.to_owned(),
                    message: format!(
                        "value is {length} characters long, the limit is {}",
                        self.config.max_option_length
                    ),
                });
            }
            if depth > 0 && !NESTED.contains(&lower.as_str()) {
                return Err(QueryError::InvalidOption {
                    option: name.to_owned(),
                    message: "not allowed inside $expand".to_owned(),
                });
            }

            self.apply_option(&mut options, &lower, name, value, depth)?;
            count += 1;
        }

        debug!(
            options = count,
            depth,
            filter = options.filter.is_some(),
            order_keys = options.order_by.len(),
            apply_stages = options.apply.len(),
            expand = options.expand.len(),
            "parsed query options"
        );
        Ok(options)
    }

    fn apply_option(
        &mut self,
        options: &mut QueryOptions,
        lower: &str,
        name: &str,
        value: &str,
        depth: usize,
    ) -> QueryResult<()> {
        match lower {
            "$filter" => {
                options.filter = Some(parse_with(value, self.tokens, Parser::parse_expression)?);
            }
            "$orderby" => {
                options.order_by = parse_with(value, self.tokens, Parser::parse_order_by_items)?;
            }
            "$top" => options.top = Some(parse_non_negative(name, value)?),
            "$skip" => options.skip = Some(parse_non_negative(name, value)?),
            "$count" => options.count = parse_bool(name, value)?,
            "$skiptoken" => options.skip_token = Some(value.to_owned()),
            "$select" => {
                options.select = parse_with(value, self.tokens, Parser::parse_select_items)?;
            }
            "$expand" => options.expand = self.parse_expand(value, depth + 1)?,
            "$compute" => {
                options.compute = parse_with(value, self.tokens, Parser::parse_compute_items)?;
            }
            "$apply" => {
                options.apply = parse_with(value, self.tokens, Parser::parse_transformations)?;
            }
            _ if UNSUPPORTED.contains(&lower) => {
                return Err(QueryError::unsupported(format!("system query option {name}")));
            }
            _ if PASS_THROUGH.contains(&lower) => {
                trace!(option = name, "leaving option to the response layer");
            }
            _ => {
                return Err(QueryError::InvalidOption {
                    option: name.to_owned(),
                    message: "unknown system query option".to_owned(),
                });
            }
        }
        Ok(())
    }

    fn parse_expand(&mut self, value: &str, depth: usize) -> QueryResult<Vec<ExpandItem>> {
        if depth > self.config.max_expand_depth {
            warn!(
                depth,
                limit = self.config.max_expand_depth,
                "rejecting deeply nested $expand"
            );
            return Err(QueryError::InvalidOption {
                option: "$expand".to_owned(),
                message: format!(
                    "nesting exceeds the maximum depth of {}",
                    self.config.max_expand_depth
                ),
            });
        }

        let mut items = Vec::new();
        for raw in split_top_level(value, ',')? {
            let raw = raw.trim();
            let (navigation, nested) = match raw.find('(') {
                Some(open) if raw.ends_with(')') => {
                    (raw[..open].trim(), Some(&raw[open + 1..raw.len() - 1]))
                }
                Some(_) => return Err(expand_error(format!("malformed item '{raw}'"))),
                None => (raw, None),
            };
            if navigation == "*" {
                return Err(QueryError::unsupported("$expand=*"));
            }
            if navigation.is_empty()
                || !navigation
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_')
            {
                return Err(expand_error(format!(
                    "'{navigation}' is not a navigation property name"
                )));
            }

            let options = match nested {
                Some(inner) if !inner.trim().is_empty() => {
                    let mut pairs = Vec::new();
                    for part in split_top_level(inner, ';')? {
                        let Some((name, value)) = part.split_once('=') else {
                            return Err(expand_error(format!(
                                "nested option '{}' has no value",
                                part.trim()
                            )));
                        };
                        pairs.push((name.trim(), value));
                    }
                    self.parse(pairs, depth)?
                }
                _ => QueryOptions::default(),
            };
            items.push(ExpandItem {
                navigation: navigation.to_owned(),
                options,
            });
        }
        Ok(items)
    }
}

fn expand_error(message: String) -> QueryError {
    QueryError::InvalidOption {
        option: "$expand".to_owned(),
        message,
    }
}

fn parse_non_negative(name: &str, value: &str) -> QueryResult<u64> {
    value.trim().parse().map_err(|_| QueryError::InvalidOption {
        option: name.to_owned(),
        message: format!("'{value}' is not a non-negative integer"),
    })
}

fn parse_bool(name: &str, value: &str) -> QueryResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(QueryError::InvalidOption {
            option: name.to_owned(),
            message: format!("'{value}' is not 'true' or 'false'"),
        }),
    }
}

/// Split `input` on `sep` outside parentheses and single-quoted strings.
///
/// # Errors
///
/// Unbalanced parentheses or an unterminated quote are `InvalidOption`
/// errors attributed to `$expand`.
pub fn split_top_level(input: &str, sep: char) -> QueryResult<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| expand_error("unbalanced ')'".to_owned()))?;
            }
            c if c == sep && !in_quote && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if in_quote {
        return Err(expand_error("unterminated string literal".to_owned()));
    }
    if depth != 0 {
        return Err(expand_error("unbalanced '('".to_owned()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

// ---------------------------------------------------------------------------
// $orderby and $select grammar
// ---------------------------------------------------------------------------

impl Parser<'_> {
    fn parse_order_by_items(&mut self) -> QueryResult<Vec<OrderByItem>> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            let descending = if self.is_keyword(Keyword::Desc) {
                self.advance();
                true
            } else {
                if self.is_keyword(Keyword::Asc) {
                    self.advance();
                }
                false
            };
            items.push(OrderByItem { expr, descending });
            if !self.eat(&TokenKind::Comma) {
                return Ok(items);
            }
        }
    }

    fn parse_select_items(&mut self) -> QueryResult<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            if self.eat(&TokenKind::Star) {
                items.push(SelectItem::Wildcard);
            } else {
                let (first, position) = self.expect_identifier("property name or '*'")?;
                let mut segments = vec![first.to_owned()];
                while self.eat(&TokenKind::Slash) {
                    let (seg, _) = self.expect_identifier("property name")?;
                    segments.push(seg.to_owned());
                }
                items.push(SelectItem::Path(PropertyPath {
                    root: PathRoot::Implicit,
                    segments,
                    position,
                }));
            }
            if !self.eat(&TokenKind::Comma) {
                return Ok(items);
            }
        }
    }
}
