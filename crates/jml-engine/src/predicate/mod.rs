//! CUSTOM trigger predicates.
//!
//! A deliberately small, fixed vocabulary evaluated against the changed
//! attribute's value. It is not a scripting language.
//!
//! # Syntax
//!
//! ## Functions
//! - `contains('x')` - stringified value contains `x`
//! - `startsWith('x')` - stringified value starts with `x`
//! - `endsWith('x')` - stringified value ends with `x`
//! - `dateDiff('today' | 'YYYY-MM-DD') <op> <integer>` - whole days from the
//!   reference date to the value's date, compared with `=`, `!=`, `<`, `<=`,
//!   `>` or `>=`
//!
//! ## Logical Operators
//! - `AND`, `OR`, `NOT` and parentheses. `AND` binds tighter than `OR`.
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use jml_engine::predicate::{eval_predicate, EvalContext};
//! use serde_json::json;
//!
//! let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let value = json!("2026-03-10");
//! let ctx = EvalContext::new(&value, today);
//!
//! assert!(eval_predicate("dateDiff('today') <= 14 AND startsWith('2026')", &ctx).unwrap());
//! ```

pub mod ast;
pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use ast::{CompareOp, DateReference, Predicate};
pub use evaluator::{EvalContext, EvalError, Evaluator};
pub use lexer::{Lexer, LexerError, Token};
pub use parser::{ParseError, Parser};

/// Check that a predicate string parses.
///
/// # Errors
///
/// Returns a `ParseError` if the predicate is syntactically invalid.
pub fn validate_predicate(input: &str) -> Result<Predicate, ParseError> {
    Parser::parse(input)
}

/// Parse and evaluate a predicate in one step.
///
/// # Errors
///
/// Returns an error if parsing or evaluation fails.
pub fn eval_predicate(input: &str, ctx: &EvalContext<'_>) -> Result<bool, PredicateError> {
    let predicate = Parser::parse(input)?;
    Ok(Evaluator::evaluate(&predicate, ctx)?)
}

/// Combined error type for predicate parsing and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateError {
    Parse(ParseError),
    Eval(EvalError),
}

impl std::fmt::Display for PredicateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredicateError::Parse(e) => write!(f, "Parse error: {e}"),
            PredicateError::Eval(e) => write!(f, "Evaluation error: {e}"),
        }
    }
}

impl std::error::Error for PredicateError {}

impl From<ParseError> for PredicateError {
    fn from(err: ParseError) -> Self {
        PredicateError::Parse(err)
    }
}

impl From<EvalError> for PredicateError {
    fn from(err: EvalError) -> Self {
        PredicateError::Eval(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_validate_predicate() {
        assert!(validate_predicate("contains('a') AND NOT endsWith('b')").is_ok());
        assert!(validate_predicate("contains(").is_err());
    }

    #[test]
    fn test_eval_reports_parse_errors() {
        let value = json!("x");
        let ctx = EvalContext::new(&value, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert!(matches!(
            eval_predicate("bogus ??", &ctx),
            Err(PredicateError::Parse(_))
        ));
    }

    #[test]
    fn test_eval_reports_eval_errors() {
        let value = json!("not-a-date");
        let ctx = EvalContext::new(&value, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert!(matches!(
            eval_predicate("dateDiff('today') > 0", &ctx),
            Err(PredicateError::Eval(_))
        ));
    }
}
