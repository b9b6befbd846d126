//! Lexer for CUSTOM trigger predicates.
//!
//! Converts a predicate string into a stream of tokens.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Function name (`contains`, `dateDiff`, ...).
    Identifier(String),
    /// A quoted string literal.
    StringLiteral(String),
    /// An integer literal, optionally negative.
    IntegerLiteral(i64),

    And,
    Or,
    Not,

    /// `=` or `==`.
    Equal,
    /// `!=` or `<>`.
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,

    LeftParen,
    RightParen,

    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{s}'"),
            Token::StringLiteral(s) => write!(f, "string '{s}'"),
            Token::IntegerLiteral(i) => write!(f, "integer {i}"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::Equal => write!(f, "="),
            Token::NotEqual => write!(f, "!="),
            Token::LessThan => write!(f, "<"),
            Token::GreaterThan => write!(f, ">"),
            Token::LessThanOrEqual => write!(f, "<="),
            Token::GreaterThanOrEqual => write!(f, ">="),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// Error during lexical analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    pub message: String,
    /// Character offset where the error occurred.
    pub position: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for LexerError {}

/// Lexer for predicate strings.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    /// Get the next token from the input.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace();

        let Some(&ch) = self.input.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            '(' => {
                self.advance();
                Ok(Token::LeftParen)
            }
            ')' => {
                self.advance();
                Ok(Token::RightParen)
            }
            '=' => {
                self.advance();
                self.consume_if('=');
                Ok(Token::Equal)
            }
            '!' => {
                self.advance();
                if self.consume_if('=') {
                    Ok(Token::NotEqual)
                } else {
                    Err(self.error("Expected '=' after '!'"))
                }
            }
            '<' => {
                self.advance();
                if self.consume_if('=') {
                    Ok(Token::LessThanOrEqual)
                } else if self.consume_if('>') {
                    Ok(Token::NotEqual)
                } else {
                    Ok(Token::LessThan)
                }
            }
            '>' => {
                self.advance();
                if self.consume_if('=') {
                    Ok(Token::GreaterThanOrEqual)
                } else {
                    Ok(Token::GreaterThan)
                }
            }
            '\'' | '"' => self.read_string(ch),
            c if c.is_ascii_digit() || c == '-' => self.read_integer(),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(self.read_identifier()),
            _ => Err(self.error(&format!("Unexpected character '{ch}'"))),
        }
    }

    fn error(&self, message: &str) -> LexerError {
        LexerError {
            message: message.to_string(),
            position: self.position,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let next = self.input.next();
        if next.is_some() {
            self.position += 1;
        }
        next
    }

    fn consume_if(&mut self, expected: char) -> bool {
        if self.input.peek() == Some(&expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.input.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let start_pos = self.position;
        self.advance();
        let mut value = String::new();

        loop {
            match self.advance() {
                Some(ch) if ch == quote => {
                    // doubled quote is an escaped quote
                    if self.consume_if(quote) {
                        value.push(quote);
                    } else {
                        break;
                    }
                }
                Some('\\') => match self.advance() {
                    Some(c) if c == quote || c == '\\' => value.push(c),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => {
                        return Err(LexerError {
                            message: "Unterminated string literal".to_string(),
                            position: start_pos,
                        })
                    }
                },
                Some(ch) => value.push(ch),
                None => {
                    return Err(LexerError {
                        message: "Unterminated string literal".to_string(),
                        position: start_pos,
                    })
                }
            }
        }

        Ok(Token::StringLiteral(value))
    }

    fn read_integer(&mut self) -> Result<Token, LexerError> {
        let start_pos = self.position;
        let mut value = String::new();

        if self.consume_if('-') {
            value.push('-');
        }
        while let Some(&ch) = self.input.peek() {
            if !ch.is_ascii_digit() {
                break;
            }
            value.push(ch);
            self.advance();
        }

        value
            .parse::<i64>()
            .map(Token::IntegerLiteral)
            .map_err(|_| LexerError {
                message: format!("Invalid integer '{value}'"),
                position: start_pos,
            })
    }

    fn read_identifier(&mut self) -> Token {
        let mut value = String::new();
        while let Some(&ch) = self.input.peek() {
            if !(ch.is_ascii_alphanumeric() || ch == '_') {
                break;
            }
            value.push(ch);
            self.advance();
        }

        match value.to_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            _ => Token::Identifier(value),
        }
    }
}
