//! Recursive descent parser for CUSTOM trigger predicates.
//!
//! Grammar:
//!
//! ```text
//! predicate  := or
//! or         := and ( OR and )*
//! and        := not ( AND not )*
//! not        := NOT not | primary
//! primary    := '(' predicate ')' | call
//! call       := contains '(' string ')'
//!             | startsWith '(' string ')'
//!             | endsWith '(' string ')'
//!             | dateDiff '(' string ')' compare integer
//! ```

use super::ast::{CompareOp, DateReference, Predicate};
use super::lexer::{Lexer, LexerError, Token};
use crate::values::parse_date_str;

/// Deepest allowed nesting of `NOT` and parentheses.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Longest predicate accepted, in tokens. Bounds the depth of long AND/OR
/// chains, which nest in the tree without nesting in the source.
pub const MAX_TOKENS: usize = 2048;

/// Error during parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    /// Token index (or character offset for lexer errors).
    pub position: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

impl From<LexerError> for ParseError {
    fn from(err: LexerError) -> Self {
        ParseError {
            message: err.message,
            position: err.position,
        }
    }
}

/// Parser for CUSTOM predicates.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    /// Parse a predicate string.
    pub fn parse(input: &str) -> Result<Predicate, ParseError> {
        let tokens = Lexer::new(input).tokenize()?;
        if tokens.len() > MAX_TOKENS {
            return Err(ParseError {
                message: format!("Predicate exceeds {MAX_TOKENS} tokens"),
                position: MAX_TOKENS,
            });
        }
        let mut parser = Parser {
            tokens,
            position: 0,
            depth: 0,
        };
        let predicate = parser.parse_or()?;

        if !parser.is_at_end() {
            return Err(ParseError {
                message: format!(
                    "Unexpected token after predicate: {}",
                    parser.current_token()
                ),
                position: parser.position,
            });
        }

        Ok(predicate)
    }

    fn parse_or(&mut self) -> Result<Predicate, ParseError> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate, ParseError> {
        let mut left = self.parse_not()?;
        while self.match_token(&Token::And) {
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate, ParseError> {
        if self.match_token(&Token::Not) {
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, ParseError> {
        if self.match_token(&Token::LeftParen) {
            self.descend()?;
            let inner = self.parse_or()?;
            self.expect_token(&Token::RightParen)?;
            self.depth -= 1;
            return Ok(Predicate::Group(Box::new(inner)));
        }

        let name = self.expect_identifier()?;
        self.expect_token(&Token::LeftParen)?;
        let argument = self.expect_string()?;
        self.expect_token(&Token::RightParen)?;

        match name.to_ascii_lowercase().as_str() {
            "contains" => Ok(Predicate::Contains(argument)),
            "startswith" => Ok(Predicate::StartsWith(argument)),
            "endswith" => Ok(Predicate::EndsWith(argument)),
            "datediff" => {
                let reference = self.date_reference(&argument)?;
                let operator = self.parse_compare_op()?;
                let days = self.expect_integer()?;
                Ok(Predicate::DateDiff {
                    reference,
                    operator,
                    days,
                })
            }
            _ => Err(ParseError {
                message: format!("Unknown function '{name}'"),
                position: self.position,
            }),
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError {
                message: format!("Predicate nests deeper than {MAX_NESTING_DEPTH} levels"),
                position: self.position,
            });
        }
        Ok(())
    }

    fn date_reference(&self, argument: &str) -> Result<DateReference, ParseError> {
        if argument.eq_ignore_ascii_case("today") {
            return Ok(DateReference::Today);
        }
        parse_date_str(argument)
            .map(DateReference::Date)
            .ok_or_else(|| ParseError {
                message: format!("Invalid dateDiff reference '{argument}'"),
                position: self.position,
            })
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, ParseError> {
        let token = self.advance();
        match token {
            Token::Equal => Ok(CompareOp::Equal),
            Token::NotEqual => Ok(CompareOp::NotEqual),
            Token::LessThan => Ok(CompareOp::LessThan),
            Token::LessThanOrEqual => Ok(CompareOp::LessThanOrEqual),
            Token::GreaterThan => Ok(CompareOp::GreaterThan),
            Token::GreaterThanOrEqual => Ok(CompareOp::GreaterThanOrEqual),
            _ => Err(ParseError {
                message: format!("Expected comparison operator, found {token}"),
                position: self.position,
            }),
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Token::Identifier(s) => Ok(s),
            token => Err(ParseError {
                message: format!("Expected function name, found {token}"),
                position: self.position,
            }),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Token::StringLiteral(s) => Ok(s),
            token => Err(ParseError {
                message: format!("Expected string argument, found {token}"),
                position: self.position,
            }),
        }
    }

    fn expect_integer(&mut self) -> Result<i64, ParseError> {
        match self.advance() {
            Token::IntegerLiteral(i) => Ok(i),
            token => Err(ParseError {
                message: format!("Expected integer, found {token}"),
                position: self.position,
            }),
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.check(expected) {
            self.advance();
            Ok(())
        } else {
            Err(ParseError {
                message: format!("Expected {expected}, found {}", self.current_token()),
                position: self.position,
            })
        }
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current_token()) == std::mem::discriminant(token)
    }

    fn advance(&mut self) -> Token {
        let token = self.current_token();
        if !self.is_at_end() {
            self.position += 1;
        }
        token
    }

    fn current_token(&self) -> Token {
        self.tokens
            .get(self.position)
            .cloned()
            .unwrap_or(Token::Eof)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_token(), Token::Eof)
    }
}
