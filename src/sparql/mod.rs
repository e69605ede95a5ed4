//! SPARQL subset: lexer and parser for `SELECT … WHERE { bgp } [LIMIT n]`.

mod lexer;
mod parser;

pub use lexer::{Lexer, Token};
pub use parser::{
    Comparator, Filter, Modifier, ParseError, Query, Term, TriplePattern, parse,
};
