use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    #[error("Unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },
    #[error("Expected digit after '.' at position {position}")]
    MissingFractionDigits { position: usize },
    #[error("Expected digit in exponent at position {position}")]
    MissingExponentDigits { position: usize },
}

pub type LexResult<T> = Result<T, LexError>;

/// Scanner over UTF-8 source text. Positions are byte offsets; decoded
/// characters may be multi-byte. The first error ends the token stream.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    reached_eof: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            reached_eof: false,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(ch) = self.peek_char() else {
            return Ok(Token::eof(start));
        };

        match ch {
            '=' => Ok(self.read_operator(TokenKind::Assign, TokenKind::Eq, start)),
            '!' => Ok(self.read_operator(TokenKind::Bang, TokenKind::NotEq, start)),
            '"' => self.read_string(start),
            c if is_letter(c) => Ok(self.read_identifier(start)),
            c if c.is_ascii_digit() || c == '.' => self.read_number(start),
            c => match single_char_kind(c) {
                Some(kind) => {
                    self.consume_char();
                    Ok(self.token_from(kind, start))
                }
                None => Err(LexError::UnexpectedCharacter {
                    character: c,
                    position: start,
                }),
            },
        }
    }

    /// One-character lookahead for `==` and `!=`; the peek does not
    /// consume on mismatch.
    fn read_operator(&mut self, single: TokenKind, double: TokenKind, start: usize) -> Token<'a> {
        self.consume_char();
        if self.peek_char() == Some('=') {
            self.consume_char();
            self.token_from(double, start)
        } else {
            self.token_from(single, start)
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        // Digits never continue an identifier, so `add2` scans as `add`, `2`.
        self.consume_while(is_letter);
        let literal = &self.input[start..self.pos];
        self.token_with_literal(TokenKind::lookup_ident(literal), literal, start)
    }

    fn read_number(&mut self, start: usize) -> LexResult<Token<'a>> {
        self.consume_while(|c| c.is_ascii_digit());
        let mut kind = TokenKind::Int;

        if self.peek_char() == Some('.') {
            kind = TokenKind::Float;
            self.consume_char();
            if !matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                return Err(LexError::MissingFractionDigits { position: self.pos });
            }
            self.consume_while(|c| c.is_ascii_digit());
        }

        if matches!(self.peek_char(), Some('e') | Some('E')) {
            kind = TokenKind::Float;
            self.consume_char();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.consume_char();
            }
            if !matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                return Err(LexError::MissingExponentDigits { position: self.pos });
            }
            self.consume_while(|c| c.is_ascii_digit());
        }

        Ok(self.token_from(kind, start))
    }

    fn read_string(&mut self, start: usize) -> LexResult<Token<'a>> {
        self.consume_char(); // opening quote
        let content_start = self.pos;
        loop {
            match self.peek_char() {
                Some('"') => break,
                Some(_) => {
                    self.consume_char();
                }
                None => return Err(LexError::UnterminatedString { position: start }),
            }
        }
        let literal = &self.input[content_start..self.pos];
        self.consume_char(); // closing quote
        Ok(self.token_with_literal(TokenKind::String, literal, start))
    }

    fn token_from(&self, kind: TokenKind, start: usize) -> Token<'a> {
        self.token_with_literal(kind, &self.input[start..self.pos], start)
    }

    fn token_with_literal(&self, kind: TokenKind, literal: &'a str, start: usize) -> Token<'a> {
        Token::new(
            kind,
            literal,
            Span {
                start,
                end: self.pos,
            },
        )
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(char::is_whitespace);
    }

    fn consume_while<P>(&mut self, keep: P)
    where
        P: Fn(char) -> bool,
    {
        while let Some(c) = self.peek_char() {
            if !keep(c) {
                break;
            }
            self.consume_char();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

fn single_char_kind(c: char) -> Option<TokenKind> {
    let kind = match c {
        '+' => TokenKind::Plus,
        '-' => TokenKind::Minus,
        '*' => TokenKind::Star,
        '/' => TokenKind::Slash,
        '<' => TokenKind::Lt,
        '>' => TokenKind::Gt,
        ',' => TokenKind::Comma,
        ';' => TokenKind::Semicolon,
        ':' => TokenKind::Colon,
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '[' => TokenKind::LBracket,
        ']' => TokenKind::RBracket,
        _ => return None,
    };
    Some(kind)
}

fn is_letter(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reached_eof {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.kind == TokenKind::Eof => self.reached_eof = true,
            Err(_) => self.reached_eof = true,
            Ok(_) => {}
        }
        Some(result)
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    Lexer::new(input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds_and_literals(input: &str) -> Vec<(TokenKind, String)> {
        tokenize(input)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| (token.kind, token.literal.to_string()))
            .collect()
    }

    #[test]
    fn scans_representative_program() {
        let input = indoc! {r#"
            let five = 5;
            let ten = 10;
            let add = fn(x, y) {
                x + y;
            };
            let result = add(five, ten);
            !-/*5;
            5 < 10 > 5;
            if (5 < 10) {
                return true;
            } else {
                return false;
            }
            10 == 10;
            10 != 9;
            "foobar"
            "foo bar"
            [1, 2];
            {"foo": "bar"}
        "#};

        use TokenKind::*;
        let expected: Vec<(TokenKind, &str)> = vec![
            (Let, "let"),
            (Ident, "five"),
            (Assign, "="),
            (Int, "5"),
            (Semicolon, ";"),
            (Let, "let"),
            (Ident, "ten"),
            (Assign, "="),
            (Int, "10"),
            (Semicolon, ";"),
            (Let, "let"),
            (Ident, "add"),
            (Assign, "="),
            (Function, "fn"),
            (LParen, "("),
            (Ident, "x"),
            (Comma, ","),
            (Ident, "y"),
            (RParen, ")"),
            (LBrace, "{"),
            (Ident, "x"),
            (Plus, "+"),
            (Ident, "y"),
            (Semicolon, ";"),
            (RBrace, "}"),
            (Semicolon, ";"),
            (Let, "let"),
            (Ident, "result"),
            (Assign, "="),
            (Ident, "add"),
            (LParen, "("),
            (Ident, "five"),
            (Comma, ","),
            (Ident, "ten"),
            (RParen, ")"),
            (Semicolon, ";"),
            (Bang, "!"),
            (Minus, "-"),
            (Slash, "/"),
            (Star, "*"),
            (Int, "5"),
            (Semicolon, ";"),
            (Int, "5"),
            (Lt, "<"),
            (Int, "10"),
            (Gt, ">"),
            (Int, "5"),
            (Semicolon, ";"),
            (If, "if"),
            (LParen, "("),
            (Int, "5"),
            (Lt, "<"),
            (Int, "10"),
            (RParen, ")"),
            (LBrace, "{"),
            (Return, "return"),
            (True, "true"),
            (Semicolon, ";"),
            (RBrace, "}"),
            (Else, "else"),
            (LBrace, "{"),
            (Return, "return"),
            (False, "false"),
            (Semicolon, ";"),
            (RBrace, "}"),
            (Int, "10"),
            (Eq, "=="),
            (Int, "10"),
            (Semicolon, ";"),
            (Int, "10"),
            (NotEq, "!="),
            (Int, "9"),
            (Semicolon, ";"),
            (String, "foobar"),
            (String, "foo bar"),
            (LBracket, "["),
            (Int, "1"),
            (Comma, ","),
            (Int, "2"),
            (RBracket, "]"),
            (Semicolon, ";"),
            (LBrace, "{"),
            (String, "foo"),
            (Colon, ":"),
            (String, "bar"),
            (RBrace, "}"),
            (Eof, ""),
        ];

        let actual = kinds_and_literals(input);
        let expected: Vec<(TokenKind, std::string::String)> = expected
            .into_iter()
            .map(|(kind, literal)| (kind, literal.to_string()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn scans_float_literals() {
        let actual = kinds_and_literals("1.5 0.5 .5 5e3 5E3 2.5e-4 1e+2 7");
        let expected = vec![
            (TokenKind::Float, "1.5".to_string()),
            (TokenKind::Float, "0.5".to_string()),
            (TokenKind::Float, ".5".to_string()),
            (TokenKind::Float, "5e3".to_string()),
            (TokenKind::Float, "5E3".to_string()),
            (TokenKind::Float, "2.5e-4".to_string()),
            (TokenKind::Float, "1e+2".to_string()),
            (TokenKind::Int, "7".to_string()),
            (TokenKind::Eof, String::new()),
        ];
        assert_eq!(actual, expected);
    }

    #[test]
    fn digits_terminate_identifiers() {
        let actual = kinds_and_literals("add2");
        assert_eq!(
            actual,
            vec![
                (TokenKind::Ident, "add".to_string()),
                (TokenKind::Int, "2".to_string()),
                (TokenKind::Eof, String::new()),
            ]
        );
    }

    #[test]
    fn scans_unicode_identifiers() {
        let actual = kinds_and_literals("let número = 1;");
        assert_eq!(actual[1], (TokenKind::Ident, "número".to_string()));
    }

    #[test]
    fn strings_may_span_lines() {
        let actual = kinds_and_literals("\"foo\nbar\"");
        assert_eq!(actual[0], (TokenKind::String, "foo\nbar".to_string()));
    }

    #[test]
    fn errors_on_unexpected_character() {
        let err = tokenize("let x = 1 @ 2;").expect_err("expected lexing failure");
        assert_eq!(
            err,
            LexError::UnexpectedCharacter {
                character: '@',
                position: 10
            }
        );
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("let x = \"abc").expect_err("expected lexing failure");
        assert_eq!(err, LexError::UnterminatedString { position: 8 });
    }

    #[test]
    fn errors_on_dot_without_fraction_digits() {
        let err = tokenize("1.;").expect_err("expected lexing failure");
        assert_eq!(err, LexError::MissingFractionDigits { position: 2 });
    }

    #[test]
    fn errors_on_exponent_without_digits() {
        let err = tokenize("1e;").expect_err("expected lexing failure");
        assert_eq!(err, LexError::MissingExponentDigits { position: 2 });
    }

    #[test]
    fn stream_stops_after_first_error() {
        let mut lexer = Lexer::new("@ +");
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }
}
