//! Standard predicate language
//!
//! A small expression language over JSON case data, used for split
//! predicates, multi-instance queries and completion conditions:
//!
//! - paths: `order.total`, `lines[0].sku`, `instances.approved` (a field
//!   applied to an array projects over its elements)
//! - literals: numbers, `'text'` / `"text"`, `true`, `false`, `null`
//! - operators: `==`, `!=`, `<`, `<=`, `>`, `>=`, `&&`, `||`, `!`, unary `-`
//! - functions: `count(x)` (truthy elements), `len(x)`
//!
//! Missing paths evaluate to `null`.

mod eval;
mod parser;

pub use parser::{parse, CompareOp, Expr, Segment};

use netcore::{ExpressionError, PredicateEvaluator};
use serde_json::Value;
use std::sync::Arc;

pub const LANGUAGE: &str = "netexpr";

/// [`PredicateEvaluator`] backed by the expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PredicateEvaluator for ExprEvaluator {
    fn language(&self) -> &str {
        LANGUAGE
    }

    fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError> {
        let expr = parse(expression)?;
        let value = eval::eval(&expr, data)?;
        tracing::trace!("{} => {}", expression, value);
        Ok(value)
    }

    fn validate(&self, expression: &str) -> Result<(), ExpressionError> {
        parse(expression).map(|_| ())
    }
}

/// Shared evaluator handle for wiring into an engine.
pub fn default_evaluator() -> Arc<dyn PredicateEvaluator> {
    Arc::new(ExprEvaluator::new())
}

/// Evaluate a standalone expression.
pub fn evaluate(expression: &str, data: &Value) -> Result<Value, ExpressionError> {
    ExprEvaluator.evaluate(expression, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluator_checks_syntax_and_evaluates() {
        let evaluator = ExprEvaluator::new();
        assert_eq!(evaluator.language(), "netexpr");
        assert!(evaluator.validate("amount > 100 && region == 'eu'").is_ok());
        assert!(evaluator.validate("amount >").is_err());

        let data = json!({"amount": 250, "region": "eu"});
        assert!(evaluator
            .evaluate_bool("amount > 100 && region == 'eu'", &data)
            .unwrap());
        assert!(!evaluator.evaluate_bool("region != 'eu'", &data).unwrap());
    }
}
