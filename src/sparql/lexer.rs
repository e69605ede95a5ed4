//! Hand-written tokenizer for the SPARQL subset.

/// Token kinds. The lexer keeps the token's text; `token_text` returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Eof,
    /// `?name`, or the bare `*` which stands for all variables.
    Variable,
    /// `<…>`, any run of non-whitespace characters between the brackets.
    Iri,
    /// A keyword or prefix name.
    Identifier,
    /// `"…"`, quotes included in the token text.
    String,
    /// Decimal number, optionally with a fraction.
    Number,
    Colon,
    Semicolon,
    Comma,
    Underscore,
    At,
    Dot,
    LCurly,
    RCurly,
    LRound,
    RRound,
    Equal,
    NotEqual,
    Less,
    LessOrEq,
    Greater,
    GreaterOrEq,
    /// A character sequence no rule accepts.
    Unrecognized,
}

/// Single-pass lexer with one token of put-back, which is all the parser needs.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    token_start: usize,
    token_end: usize,
    put_back: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, pos: 0, token_start: 0, token_end: 0, put_back: None }
    }

    /// Text of the most recent token.
    pub fn token_text(&self) -> &'a str {
        &self.input[self.token_start..self.token_end]
    }

    /// Case-insensitive keyword comparison against the current token.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.token_text().eq_ignore_ascii_case(keyword)
    }

    /// The next call to `next_token` returns `token` again, with its text intact.
    pub fn put_back(&mut self, token: Token) {
        self.put_back = Some(token);
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.put_back.take() {
            return token;
        }
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() {
            self.token_start = self.pos;
            let c = bytes[self.pos];
            self.pos += 1;
            let token = match c {
                b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' => continue,
                b'{' => Token::LCurly,
                b'}' => Token::RCurly,
                b'(' => Token::LRound,
                b')' => Token::RRound,
                b'.' => Token::Dot,
                b':' => Token::Colon,
                b';' => Token::Semicolon,
                b',' => Token::Comma,
                b'_' => Token::Underscore,
                b'@' => Token::At,
                // the bare star is the "all variables" projection
                b'*' => Token::Variable,
                b'=' => Token::Equal,
                b'!' => {
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::NotEqual
                    } else {
                        Token::Unrecognized
                    }
                }
                b'>' => {
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::GreaterOrEq
                    } else {
                        Token::Greater
                    }
                }
                b'<' => self.less_or_iri(),
                b'"' => self.string_literal(),
                b'?' => {
                    self.advance_while(is_identifier_char);
                    Token::Variable
                }
                b'0'..=b'9' => {
                    self.advance_while(|c| c.is_ascii_digit());
                    if self.peek() == Some(b'.') {
                        self.pos += 1;
                        self.advance_while(|c| c.is_ascii_digit());
                    }
                    Token::Number
                }
                _ => {
                    self.advance_while(is_identifier_char);
                    if self.pos == self.token_start + 1 && !is_identifier_char(c) {
                        Token::Unrecognized
                    } else {
                        Token::Identifier
                    }
                }
            };
            self.token_end = self.pos;
            return token;
        }
        self.token_start = self.pos;
        self.token_end = self.pos;
        Token::Eof
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn advance_while(&mut self, accept: impl Fn(u8) -> bool) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && accept(bytes[self.pos]) {
            self.pos += 1;
        }
    }

    /// After `<`: `<=` compares, `< ` compares, anything else scans an IRI up
    /// to the closing bracket. IRIs may contain any non-whitespace character.
    fn less_or_iri(&mut self) -> Token {
        match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                return Token::LessOrEq;
            }
            Some(b' ') | None => return Token::Less,
            _ => {}
        }
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && !bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
            if bytes[self.pos - 1] == b'>' {
                return Token::Iri;
            }
        }
        Token::Unrecognized
    }

    fn string_literal(&mut self) -> Token {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() {
            self.pos += 1;
            if bytes[self.pos - 1] == b'"' {
                return Token::String;
            }
        }
        Token::Unrecognized
    }
}

// bytes outside ASCII are identifier characters, which keeps multi-byte
// sequences intact and token boundaries on character boundaries
fn is_identifier_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(input: &str) -> Vec<(Token, String)> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            if token == Token::Eof {
                return out;
            }
            out.push((token, lexer.token_text().to_owned()));
        }
    }

    #[test]
    fn select_query() {
        let got = tokens("SELECT ?x WHERE { ?x <p> \"v\" . } LIMIT 10");
        let expected = vec![
            (Token::Identifier, "SELECT".to_owned()),
            (Token::Variable, "?x".to_owned()),
            (Token::Identifier, "WHERE".to_owned()),
            (Token::LCurly, "{".to_owned()),
            (Token::Variable, "?x".to_owned()),
            (Token::Iri, "<p>".to_owned()),
            (Token::String, "\"v\"".to_owned()),
            (Token::Dot, ".".to_owned()),
            (Token::RCurly, "}".to_owned()),
            (Token::Identifier, "LIMIT".to_owned()),
            (Token::Number, "10".to_owned()),
        ];
        assert_eq!(got, expected);
    }

    #[test]
    fn comparison_operators_and_star() {
        let got = tokens("* = != < <= > >= 3.14");
        assert_eq!(
            got.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            vec![
                Token::Variable,
                Token::Equal,
                Token::NotEqual,
                Token::Less,
                Token::LessOrEq,
                Token::Greater,
                Token::GreaterOrEq,
                Token::Number,
            ]
        );
        assert_eq!(got.last().map(|(_, s)| s.as_str()), Some("3.14"));
    }

    #[test]
    fn iris_take_anything_but_whitespace() {
        let got = tokens("<http://example.org/a#b?c=1>");
        assert_eq!(got, vec![(Token::Iri, "<http://example.org/a#b?c=1>".to_owned())]);
        // an unterminated IRI is not a token
        assert_eq!(tokens("<oops").first().map(|(t, _)| *t), Some(Token::Unrecognized));
    }

    #[test]
    fn put_back_returns_same_token() {
        let mut lexer = Lexer::new("prefix foo");
        assert_eq!(lexer.next_token(), Token::Identifier);
        assert!(lexer.is_keyword("PREFIX"));
        lexer.put_back(Token::Identifier);
        assert_eq!(lexer.next_token(), Token::Identifier);
        assert_eq!(lexer.token_text(), "prefix");
        assert_eq!(lexer.next_token(), Token::Identifier);
        assert_eq!(lexer.token_text(), "foo");
        assert_eq!(lexer.next_token(), Token::Eof);
    }
}
