use crate::{data::truthy, ExpressionError};
use serde_json::Value;

/// Expression capability injected into the runtime. Split predicates,
/// multi-instance counts and completion conditions all go through it, so the
/// runner never depends on a particular query language.
pub trait PredicateEvaluator: Send + Sync {
    /// Language identifier (e.g. "netexpr").
    fn language(&self) -> &str;

    /// Evaluate an expression against a JSON document.
    fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError>;

    /// Evaluate an expression that must produce a boolean. Non-boolean
    /// results fall back to JSON truthiness.
    fn evaluate_bool(&self, expression: &str, data: &Value) -> Result<bool, ExpressionError> {
        let value = self.evaluate(expression, data)?;
        Ok(match value {
            Value::Bool(b) => b,
            other => truthy(&other),
        })
    }

    /// Optional: reject malformed expressions when a net is loaded.
    fn validate(&self, _expression: &str) -> Result<(), ExpressionError> {
        Ok(())
    }
}

/// Evaluator backed by a closure, handy for embedding hosts and tests.
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&str, &Value) -> Result<Value, ExpressionError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> PredicateEvaluator for FnEvaluator<F>
where
    F: Fn(&str, &Value) -> Result<Value, ExpressionError> + Send + Sync,
{
    fn language(&self) -> &str {
        "fn"
    }

    fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError> {
        (self.f)(expression, data)
    }
}
