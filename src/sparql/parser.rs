//! Recursive-descent parser producing the query AST.
//!
//! OPTIONAL groups and FILTER constraints are parsed and recorded so the
//! caller can reject them explicitly; the executor evaluates neither.
use super::{Lexer, Token};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, ParseError>;

/// The error type for query parsing, carrying the offending token's text.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected}, found {found:?}")]
    Expected { expected: &'static str, found: String },
    #[error("unrecognized token {0:?}")]
    Unrecognized(String),
    #[error("duplicate prefix {0:?}")]
    DuplicatePrefix(String),
    #[error("projection list is empty")]
    EmptyProjection,
    #[error("unexpected end of query")]
    UnexpectedEof,
}

/// One position of a triple pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// `?name`, stored with its question mark.
    Variable(String),
    /// `<iri>`, stored with its brackets, as the dictionary stores terms.
    Iri(String),
    /// String (quotes stripped), number or bare identifier.
    Literal(String),
}

impl Term {
    pub const fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Term::Variable(s) | Term::Iri(s) | Term::Literal(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    /// The pattern came from an `optional { … }` group.
    pub optional: bool,
}

impl TriplePattern {
    /// The distinct variables of this pattern, in subject, predicate, object order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        let mut seen = Vec::with_capacity(3);
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter(|term| term.is_variable())
            .filter_map(move |term| {
                let name = term.text();
                if seen.contains(&name) {
                    None
                } else {
                    seen.push(name);
                    Some(name)
                }
            })
    }
}

/// Projection modifier following `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modifier {
    #[default]
    None,
    Distinct,
    Reduced,
    Count,
    Duplicates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    LessOrEq,
    Greater,
    GreaterOrEq,
    /// Anything else is recorded as a named function.
    Function,
}

/// A recorded `filter ( … )` constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub variable: String,
    pub comparator: Comparator,
    pub args: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub prefixes: HashMap<String, String>,
    pub modifier: Modifier,
    /// Projected variable names with their question marks; `select *` expands
    /// to the sorted set of variables appearing in the patterns.
    pub variables: Vec<String>,
    pub patterns: Vec<TriplePattern>,
    pub filters: Vec<Filter>,
    pub limit: usize,
}

/// Parse one query.
pub fn parse(input: &str) -> Result<Query> {
    Parser { lexer: Lexer::new(input) }.parse()
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl Parser<'_> {
    fn parse(mut self) -> Result<Query> {
        let prefixes = self.parse_prefixes()?;
        let (modifier, mut variables) = self.parse_projection()?;
        self.expect_keyword("where")?;
        let mut patterns = Vec::new();
        let mut filters = Vec::new();
        self.parse_group(&mut patterns, &mut filters, false)?;
        let limit = self.parse_limit()?;

        if variables.first().is_some_and(|v| v == "*") {
            let all: BTreeSet<&str> = patterns.iter().flat_map(TriplePattern::variables).collect();
            variables = all.into_iter().map(str::to_owned).collect();
        }
        Ok(Query { prefixes, modifier, variables, patterns, filters, limit })
    }

    fn parse_prefixes(&mut self) -> Result<HashMap<String, String>> {
        let mut prefixes = HashMap::new();
        loop {
            let token = self.lexer.next_token();
            if token != Token::Identifier || !self.lexer.is_keyword("prefix") {
                self.lexer.put_back(token);
                return Ok(prefixes);
            }
            if self.lexer.next_token() != Token::Identifier {
                return Err(self.expected("prefix name"));
            }
            let name = self.lexer.token_text().to_owned();
            if self.lexer.next_token() != Token::Colon {
                return Err(self.expected("':'"));
            }
            if self.lexer.next_token() != Token::Iri {
                return Err(self.expected("IRI"));
            }
            if prefixes.contains_key(&name) {
                return Err(ParseError::DuplicatePrefix(name));
            }
            prefixes.insert(name, self.lexer.token_text().to_owned());
        }
    }

    fn parse_projection(&mut self) -> Result<(Modifier, Vec<String>)> {
        self.expect_keyword("select")?;
        let token = self.lexer.next_token();
        let modifier = if token == Token::Identifier {
            if self.lexer.is_keyword("distinct") {
                Modifier::Distinct
            } else if self.lexer.is_keyword("reduced") {
                Modifier::Reduced
            } else if self.lexer.is_keyword("count") {
                Modifier::Count
            } else if self.lexer.is_keyword("duplicates") {
                Modifier::Duplicates
            } else {
                self.lexer.put_back(token);
                Modifier::None
            }
        } else {
            self.lexer.put_back(token);
            Modifier::None
        };

        let mut variables = Vec::new();
        loop {
            let token = self.lexer.next_token();
            if token != Token::Variable {
                self.lexer.put_back(token);
                break;
            }
            variables.push(self.lexer.token_text().to_owned());
        }
        if variables.is_empty() {
            return Err(ParseError::EmptyProjection);
        }
        Ok((modifier, variables))
    }

    fn parse_group(
        &mut self, patterns: &mut Vec<TriplePattern>, filters: &mut Vec<Filter>, optional: bool,
    ) -> Result<()> {
        if self.lexer.next_token() != Token::LCurly {
            return Err(self.expected("'{'"));
        }
        loop {
            let token = self.lexer.next_token();
            match token {
                Token::LCurly => {
                    self.lexer.put_back(token);
                    self.parse_group(patterns, filters, optional)?;
                }
                Token::Identifier if self.lexer.is_keyword("optional") => {
                    self.parse_group(patterns, filters, true)?;
                }
                Token::Identifier if self.lexer.is_keyword("filter") => {
                    filters.push(self.parse_filter()?);
                }
                Token::RCurly => return Ok(()),
                Token::Eof => return Err(ParseError::UnexpectedEof),
                _ => {
                    self.lexer.put_back(token);
                    patterns.push(self.parse_pattern(optional)?);
                }
            }
        }
    }

    fn parse_pattern(&mut self, optional: bool) -> Result<TriplePattern> {
        let subject = self.parse_term()?;
        let predicate = self.parse_term()?;
        let object = self.parse_term()?;
        let token = self.lexer.next_token();
        if token != Token::Dot {
            self.lexer.put_back(token);
        }
        Ok(TriplePattern { subject, predicate, object, optional })
    }

    fn parse_term(&mut self) -> Result<Term> {
        let token = self.lexer.next_token();
        let text = self.lexer.token_text();
        match token {
            Token::Variable => Ok(Term::Variable(text.to_owned())),
            Token::Iri => Ok(Term::Iri(text.to_owned())),
            Token::String => Ok(Term::Literal(strip_quotes(text))),
            Token::Number | Token::Identifier => Ok(Term::Literal(text.to_owned())),
            Token::Unrecognized => Err(ParseError::Unrecognized(text.to_owned())),
            Token::Eof => Err(ParseError::UnexpectedEof),
            _ => Err(self.expected("variable, IRI or literal")),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        if self.lexer.next_token() != Token::LRound {
            return Err(self.expected("'('"));
        }
        if self.lexer.next_token() != Token::Variable {
            return Err(self.expected("variable"));
        }
        let variable = self.lexer.token_text().to_owned();
        let mut args = Vec::new();
        let comparator = match self.lexer.next_token() {
            Token::Equal => Comparator::Equal,
            Token::NotEqual => Comparator::NotEqual,
            Token::Less => Comparator::Less,
            Token::LessOrEq => Comparator::LessOrEq,
            Token::Greater => Comparator::Greater,
            Token::GreaterOrEq => Comparator::GreaterOrEq,
            _ => {
                args.push(Term::Literal(self.lexer.token_text().to_owned()));
                Comparator::Function
            }
        };
        loop {
            match self.lexer.next_token() {
                Token::RRound => return Ok(Filter { variable, comparator, args }),
                Token::String => args.push(Term::Literal(strip_quotes(self.lexer.token_text()))),
                Token::Number => args.push(Term::Literal(self.lexer.token_text().to_owned())),
                Token::Iri => args.push(Term::Iri(self.lexer.token_text().to_owned())),
                Token::Eof => return Err(ParseError::UnexpectedEof),
                _ => return Err(self.expected("filter argument or ')'")),
            }
        }
    }

    fn parse_limit(&mut self) -> Result<usize> {
        let token = self.lexer.next_token();
        if token == Token::Identifier && self.lexer.is_keyword("limit") {
            if self.lexer.next_token() != Token::Number {
                return Err(self.expected("limit count"));
            }
            // the integer part only; a fractional limit is nonsense anyway
            let text = self.lexer.token_text();
            let digits = text.split('.').next().unwrap_or(text);
            return Ok(digits.parse().unwrap_or(usize::MAX));
        }
        self.lexer.put_back(token);
        Ok(usize::MAX)
    }

    fn expect_keyword(&mut self, keyword: &'static str) -> Result<()> {
        if self.lexer.next_token() != Token::Identifier || !self.lexer.is_keyword(keyword) {
            return Err(ParseError::Expected {
                expected: keyword,
                found: self.lexer.token_text().to_owned(),
            });
        }
        Ok(())
    }

    fn expected(&self, expected: &'static str) -> ParseError {
        ParseError::Expected { expected, found: self.lexer.token_text().to_owned() }
    }
}

fn strip_quotes(text: &str) -> String {
    text.strip_prefix('"').and_then(|t| t.strip_suffix('"')).unwrap_or(text).to_owned()
}
