use thiserror::Error;

use crate::ast::{Block, Expression, InfixOperator, PrefixOperator, Program, Statement};
use crate::lexer::{LexError, Lexer};
use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("Expected next token to be {expected}, got {got} at position {position}")]
    UnexpectedToken {
        expected: TokenKind,
        got: TokenKind,
        position: usize,
    },
    #[error("No rule to parse {got} in expression position at position {position}")]
    UnexpectedExpressionStart { got: TokenKind, position: usize },
    #[error("Could not parse {literal:?} as integer")]
    InvalidIntegerLiteral { literal: String },
    #[error("Could not parse {literal:?} as float")]
    InvalidFloatLiteral { literal: String },
}

type ParseResult<T> = Result<T, ParseError>;

/// Binding power of infix positions, low to high. Comparisons between
/// variants drive the precedence-climbing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Slash | TokenKind::Star => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Pratt parser over the lexer's token stream.
///
/// Errors are accumulated rather than fatal: a failed statement is
/// recorded and parsing resumes at the next `;`. A lexer error ends the
/// stream, so at most one of those is ever recorded.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token<'a>,
    peek: Token<'a>,
    errors: Vec<ParseError>,
    halted: bool,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        let mut parser = Self {
            lexer,
            cur: Token::eof(0),
            peek: Token::eof(0),
            errors: Vec::new(),
            halted: false,
        };
        parser.advance();
        parser.advance();
        parser
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while self.cur.kind != TokenKind::Eof {
            match self.parse_statement() {
                Ok(statement) => program.statements.push(statement),
                // A halted lexer already recorded its error; anything
                // the dying statement reports after that is noise.
                Err(error) if !self.halted => {
                    self.errors.push(error);
                    self.synchronize();
                }
                Err(_) => {}
            }
            self.advance();
        }
        program
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    // Statement parsers leave `cur` on the last token of the statement;
    // the program loop advances past it.

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.cur.kind {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> ParseResult<Statement> {
        self.expect_peek(TokenKind::Ident)?;
        let name = self.cur.literal.to_string();
        self.expect_peek(TokenKind::Assign)?;
        self.advance();
        let mut value = self.parse_expression(Precedence::Lowest)?;
        if let Expression::Function {
            name: function_name,
            ..
        } = &mut value
        {
            *function_name = Some(name.clone());
        }
        self.consume_optional_semicolon();
        Ok(Statement::Let { name, value })
    }

    fn parse_return_statement(&mut self) -> ParseResult<Statement> {
        self.advance();
        let value = self.parse_expression(Precedence::Lowest)?;
        self.consume_optional_semicolon();
        Ok(Statement::Return { value })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<Statement> {
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.consume_optional_semicolon();
        Ok(Statement::Expression { expression })
    }

    fn parse_expression(&mut self, min_precedence: Precedence) -> ParseResult<Expression> {
        let mut left = self.parse_prefix()?;

        while self.peek.kind != TokenKind::Semicolon
            && min_precedence < precedence_of(self.peek.kind)
        {
            left = match self.peek.kind {
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Eq
                | TokenKind::NotEq => {
                    self.advance();
                    self.parse_infix_expression(left)?
                }
                TokenKind::LParen => {
                    self.advance();
                    self.parse_call_expression(left)?
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.parse_index_expression(left)?
                }
                _ => break,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expression> {
        match self.cur.kind {
            TokenKind::Ident => Ok(Expression::Identifier(self.cur.literal.to_string())),
            TokenKind::Int => {
                let literal = self.cur.literal;
                literal
                    .parse::<i64>()
                    .map(Expression::Integer)
                    .map_err(|_| ParseError::InvalidIntegerLiteral {
                        literal: literal.to_string(),
                    })
            }
            TokenKind::Float => {
                let literal = self.cur.literal;
                literal
                    .parse::<f64>()
                    .map(Expression::Float)
                    .map_err(|_| ParseError::InvalidFloatLiteral {
                        literal: literal.to_string(),
                    })
            }
            TokenKind::String => Ok(Expression::String(self.cur.literal.to_string())),
            TokenKind::True => Ok(Expression::Boolean(true)),
            TokenKind::False => Ok(Expression::Boolean(false)),
            TokenKind::Bang => self.parse_prefix_expression(PrefixOperator::Bang),
            TokenKind::Minus => self.parse_prefix_expression(PrefixOperator::Minus),
            TokenKind::LParen => self.parse_grouped_expression(),
            TokenKind::If => self.parse_if_expression(),
            TokenKind::Function => self.parse_function_literal(),
            TokenKind::LBracket => {
                let elements = self.parse_expression_list(TokenKind::RBracket)?;
                Ok(Expression::Array(elements))
            }
            TokenKind::LBrace => self.parse_hash_literal(),
            got => Err(ParseError::UnexpectedExpressionStart {
                got,
                position: self.cur.span.start,
            }),
        }
    }

    fn parse_prefix_expression(&mut self, operator: PrefixOperator) -> ParseResult<Expression> {
        self.advance();
        let right = self.parse_expression(Precedence::Prefix)?;
        Ok(Expression::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> ParseResult<Expression> {
        let operator = match self.cur.kind {
            TokenKind::Plus => InfixOperator::Plus,
            TokenKind::Minus => InfixOperator::Minus,
            TokenKind::Star => InfixOperator::Star,
            TokenKind::Slash => InfixOperator::Slash,
            TokenKind::Lt => InfixOperator::Lt,
            TokenKind::Gt => InfixOperator::Gt,
            TokenKind::Eq => InfixOperator::Eq,
            TokenKind::NotEq => InfixOperator::NotEq,
            got => {
                return Err(ParseError::UnexpectedExpressionStart {
                    got,
                    position: self.cur.span.start,
                });
            }
        };
        let precedence = precedence_of(self.cur.kind);
        self.advance();
        let right = self.parse_expression(precedence)?;
        Ok(Expression::Infix {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        })
    }

    fn parse_grouped_expression(&mut self) -> ParseResult<Expression> {
        self.advance();
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RParen)?;
        Ok(expression)
    }

    fn parse_if_expression(&mut self) -> ParseResult<Expression> {
        self.expect_peek(TokenKind::LParen)?;
        self.advance();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RParen)?;
        self.expect_peek(TokenKind::LBrace)?;
        let consequence = self.parse_block()?;

        let alternative = if self.peek.kind == TokenKind::Else {
            self.advance();
            self.expect_peek(TokenKind::LBrace)?;
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_function_literal(&mut self) -> ParseResult<Expression> {
        self.expect_peek(TokenKind::LParen)?;
        let parameters = self.parse_function_parameters()?;
        self.expect_peek(TokenKind::LBrace)?;
        let body = self.parse_block()?;
        Ok(Expression::Function {
            name: None,
            parameters,
            body,
        })
    }

    fn parse_function_parameters(&mut self) -> ParseResult<Vec<String>> {
        let mut parameters = Vec::new();
        if self.peek.kind == TokenKind::RParen {
            self.advance();
            return Ok(parameters);
        }

        self.expect_peek(TokenKind::Ident)?;
        parameters.push(self.cur.literal.to_string());
        while self.peek.kind == TokenKind::Comma {
            self.advance();
            self.expect_peek(TokenKind::Ident)?;
            parameters.push(self.cur.literal.to_string());
        }
        self.expect_peek(TokenKind::RParen)?;
        Ok(parameters)
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        let mut block = Block::default();
        self.advance();
        while self.cur.kind != TokenKind::RBrace && self.cur.kind != TokenKind::Eof {
            block.statements.push(self.parse_statement()?);
            self.advance();
        }
        if self.cur.kind != TokenKind::RBrace {
            return Err(ParseError::UnexpectedToken {
                expected: TokenKind::RBrace,
                got: self.cur.kind,
                position: self.cur.span.start,
            });
        }
        Ok(block)
    }

    fn parse_call_expression(&mut self, function: Expression) -> ParseResult<Expression> {
        let arguments = self.parse_expression_list(TokenKind::RParen)?;
        Ok(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_index_expression(&mut self, left: Expression) -> ParseResult<Expression> {
        self.advance();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RBracket)?;
        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> ParseResult<Vec<Expression>> {
        let mut list = Vec::new();
        if self.peek.kind == end {
            self.advance();
            return Ok(list);
        }

        self.advance();
        list.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek.kind == TokenKind::Comma {
            self.advance();
            self.advance();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }
        self.expect_peek(end)?;
        Ok(list)
    }

    fn parse_hash_literal(&mut self) -> ParseResult<Expression> {
        let mut pairs = Vec::new();
        while self.peek.kind != TokenKind::RBrace {
            self.advance();
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect_peek(TokenKind::Colon)?;
            self.advance();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if self.peek.kind != TokenKind::RBrace {
                self.expect_peek(TokenKind::Comma)?;
            }
        }
        self.expect_peek(TokenKind::RBrace)?;
        Ok(Expression::Hash(pairs))
    }

    fn consume_optional_semicolon(&mut self) {
        if self.peek.kind == TokenKind::Semicolon {
            self.advance();
        }
    }

    fn expect_peek(&mut self, expected: TokenKind) -> ParseResult<()> {
        if self.peek.kind == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                expected,
                got: self.peek.kind,
                position: self.peek.span.start,
            })
        }
    }

    /// Skips to the next statement terminator so one bad statement does
    /// not cascade into errors for the rest of the program.
    fn synchronize(&mut self) {
        while self.cur.kind != TokenKind::Semicolon && self.cur.kind != TokenKind::Eof {
            self.advance();
        }
    }

    fn advance(&mut self) {
        let next = if self.halted {
            Token::eof(self.peek.span.end)
        } else {
            match self.lexer.next_token() {
                Ok(token) => token,
                Err(error) => {
                    self.halted = true;
                    self.errors.push(error.into());
                    Token::eof(self.peek.span.end)
                }
            }
        };
        self.cur = self.peek;
        self.peek = next;
    }
}

/// Parses a source string into a program plus all recorded errors.
pub fn parse(source: &str) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(Lexer::new(source));
    let program = parser.parse_program();
    (program, parser.into_errors())
}
