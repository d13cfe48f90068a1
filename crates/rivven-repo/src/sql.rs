//! SQL text scanning
//!
//! Statements are tokenized with `sqlparser` using the tokenizer rules of the
//! target database, so string literals, quoted identifiers and comments stay
//! opaque. Every token carries its parenthesis depth so that clauses inside
//! subqueries, CTE bodies and window specifications are never mistaken for
//! top-level ones.
//!
//! Used for:
//! - binding `@Name` parameters to dialect placeholders
//! - finding and stripping a trailing top-level `ORDER BY`
//! - detecting top-level set operators (`UNION`, `INTERSECT`, `EXCEPT`)
//! - discovering the source table of each statement in a batch

use crate::connection::DatabaseType;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::types::{Params, Value};
use sqlparser::ast::{ObjectNamePart, Query, SetExpr, Statement, TableFactor};
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashMap;
use tracing::debug;

const SQL_RECURSION_LIMIT: usize = 256;

#[derive(Debug)]
struct Scanned {
    token: Token,
    depth: u32,
}

impl Scanned {
    /// Keyword of an unquoted word
    fn keyword(&self) -> Option<Keyword> {
        match &self.token {
            Token::Word(w) if w.quote_style.is_none() => Some(w.keyword),
            _ => None,
        }
    }

    fn is_keyword(&self, keyword: Keyword) -> bool {
        self.keyword() == Some(keyword)
    }

    fn is_trivia(&self) -> bool {
        matches!(self.token, Token::Whitespace(_))
    }
}

/// Parameter name after a single `@`; `@@name` system variables are not parameters
fn param_name(text: &str) -> Option<&str> {
    let name = text.strip_prefix('@')?;
    (!name.is_empty() && !name.starts_with('@')).then_some(name)
}

/// Tokenized SQL text
#[derive(Debug)]
pub struct SqlText {
    source: String,
    tokens: Vec<Scanned>,
    db: DatabaseType,
}

impl SqlText {
    /// Tokenize `sql` with the rules of `db`.
    ///
    /// Literals are kept in their escaped source form so that the token
    /// stream renders back to equivalent SQL.
    pub fn scan(sql: &str, db: DatabaseType) -> Result<Self> {
        let tokens = Tokenizer::new(db.tokenizer_dialect(), sql)
            .with_unescape(false)
            .tokenize()
            .map_err(|e| Error::validation("sql", format!("cannot tokenize statement: {e}")))?;

        let mut depth: u32 = 0;
        let tokens = tokens
            .into_iter()
            .map(|token| {
                let token_depth = match token {
                    Token::LParen => {
                        depth += 1;
                        depth - 1
                    }
                    Token::RParen => {
                        depth = depth.saturating_sub(1);
                        depth
                    }
                    _ => depth,
                };
                Scanned {
                    token,
                    depth: token_depth,
                }
            })
            .collect();

        Ok(Self {
            source: sql.to_string(),
            tokens,
            db,
        })
    }

    fn render(tokens: &[Scanned]) -> String {
        tokens.iter().map(|t| t.token.to_string()).collect()
    }

    fn next_significant(&self, idx: usize) -> Option<&Scanned> {
        self.tokens[idx + 1..].iter().find(|t| !t.is_trivia())
    }

    /// Token index of the last top-level `ORDER BY`
    fn last_order_by(&self) -> Option<usize> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.depth == 0 && t.is_keyword(Keyword::ORDER))
            .filter(|(idx, _)| self.next_significant(*idx).is_some_and(|t| t.is_keyword(Keyword::BY)))
            .map(|(idx, _)| idx)
            .last()
    }

    /// `@name` parameter starting at `idx`: its name and token count.
    ///
    /// Dialects that allow `@` in identifiers yield one word; the others
    /// yield an `@` sign followed by a word.
    fn param_at(&self, idx: usize) -> Option<(&str, usize)> {
        match &self.tokens[idx].token {
            Token::Word(w) if w.quote_style.is_none() => param_name(&w.value).map(|n| (n, 1)),
            Token::Placeholder(p) => param_name(p).map(|n| (n, 1)),
            Token::AtSign => match self.tokens.get(idx + 1).map(|t| &t.token) {
                Some(Token::Word(w)) if w.quote_style.is_none() => Some((w.value.as_str(), 2)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the statement has a top-level `ORDER BY`
    pub fn has_order_by(&self) -> bool {
        self.last_order_by().is_some()
    }

    /// The statement without its trailing top-level `ORDER BY` clause.
    ///
    /// `ORDER BY` inside subqueries, CTE bodies or `OVER (...)` is kept.
    pub fn without_order_by(&self) -> String {
        match self.last_order_by() {
            Some(idx) => Self::render(&self.tokens[..idx]).trim_end().to_string(),
            None => self.source.clone(),
        }
    }

    /// Whether the statement combines queries with a top-level set operator
    pub fn has_set_operator(&self) -> bool {
        self.tokens.iter().any(|t| {
            t.depth == 0
                && matches!(
                    t.keyword(),
                    Some(Keyword::UNION | Keyword::INTERSECT | Keyword::EXCEPT)
                )
        })
    }

    /// Rewrite `@Name` parameters into `dialect` placeholders.
    ///
    /// Names missing from `params` (local variables, `@@system` variables)
    /// are left untouched. Lookup is case-insensitive and tolerates keys
    /// written with a leading `@`. Dialects that can reference the same
    /// placeholder twice (`@P1`, `$1`) bind each value once; `?` dialects bind
    /// per occurrence.
    pub fn bind(&self, params: &Params, dialect: &dyn SqlDialect) -> (String, Vec<Value>) {
        let lookup: HashMap<String, &Value> = params
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        let mut out = String::with_capacity(self.source.len() + 16);
        let mut args: Vec<Value> = Vec::with_capacity(params.len());
        let mut assigned: HashMap<String, usize> = HashMap::new();
        let reuse = dialect.reuses_placeholders();

        let mut idx = 0;
        while idx < self.tokens.len() {
            let bound = self.param_at(idx).and_then(|(name, width)| {
                let key = name.to_ascii_lowercase();
                lookup.get(&key).map(|value| (key, *value, width))
            });
            let Some((key, value, width)) = bound else {
                out.push_str(&self.tokens[idx].token.to_string());
                idx += 1;
                continue;
            };

            let index = if reuse {
                match assigned.get(&key) {
                    Some(&index) => index,
                    None => {
                        args.push(value.clone());
                        assigned.insert(key, args.len());
                        args.len()
                    }
                }
            } else {
                args.push(value.clone());
                args.len()
            };
            out.push_str(&dialect.placeholder(index));
            idx += width;
        }

        (out, args)
    }

    /// Source table of each result-producing statement in the batch.
    ///
    /// Statements are split on top-level `;`. Only `SELECT` and `WITH`
    /// statements produce an entry: the unqualified name of the first table
    /// in the `FROM` list, or `None` for a derived table, a missing `FROM` or
    /// a statement the parser rejects.
    pub fn source_tables(&self) -> Vec<Option<String>> {
        let mut result = Vec::new();

        for statement in self
            .tokens
            .split(|t| t.depth == 0 && matches!(t.token, Token::SemiColon))
        {
            let Some(first) = statement.iter().find(|t| !t.is_trivia()) else {
                continue;
            };
            if !matches!(first.keyword(), Some(Keyword::SELECT | Keyword::WITH)) {
                continue;
            }

            let text = Self::render(statement);
            let parsed = Parser::new(self.db.tokenizer_dialect())
                .with_recursion_limit(SQL_RECURSION_LIMIT)
                .try_with_sql(&text)
                .and_then(|mut parser| parser.parse_statements());
            let table = match parsed {
                Ok(statements) => statements.iter().find_map(|s| match s {
                    Statement::Query(query) => query_source(query),
                    _ => None,
                }),
                Err(e) => {
                    debug!("No source table for statement: {}", e);
                    None
                }
            };
            result.push(table);
        }

        result
    }
}

fn query_source(query: &Query) -> Option<String> {
    match query.body.as_ref() {
        SetExpr::Select(select) => match &select.from.first()?.relation {
            TableFactor::Table { name, .. } => name.0.iter().rev().find_map(|part| match part {
                ObjectNamePart::Identifier(ident) => Some(ident.value.clone()),
                _ => None,
            }),
            _ => None,
        },
        SetExpr::Query(inner) => query_source(inner),
        _ => None,
    }
}

/// Rewrite `@Name` parameters of `sql` into `dialect` placeholders.
///
/// Returns the rewritten SQL and the positional argument list.
pub fn bind_named(sql: &str, params: &Params, dialect: &dyn SqlDialect) -> Result<(String, Vec<Value>)> {
    if params.is_empty() {
        return Ok((sql.to_string(), Vec::new()));
    }
    Ok(SqlText::scan(sql, dialect.database_type())?.bind(params, dialect))
}

/// Source table of each result-producing statement in `sql`.
///
/// Text the tokenizer rejects yields no names.
pub fn source_tables(sql: &str, dialect: &dyn SqlDialect) -> Vec<Option<String>> {
    match SqlText::scan(sql, dialect.database_type()) {
        Ok(text) => text.source_tables(),
        Err(e) => {
            debug!("Result sets left unnamed: {}", e);
            Vec::new()
        }
    }
}

/// Trim whitespace and a trailing statement terminator
pub fn trim_statement(sql: &str) -> &str {
    let mut s = sql.trim();
    while let Some(rest) = s.strip_suffix(';') {
        s = rest.trim_end();
    }
    s
}
