use crate::parser::{CompareOp, Expr, Segment};
use netcore::{truthy, ExpressionError};
use serde_json::Value;
use std::cmp::Ordering;

pub fn eval(expr: &Expr, data: &Value) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve(data, segments)),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, data)?))),
        Expr::Neg(inner) => match eval(inner, data)? {
            Value::Number(n) => {
                let negated = n
                    .as_i64()
                    .map(|i| Value::from(-i))
                    .or_else(|| n.as_f64().map(|f| Value::from(-f)));
                negated.ok_or_else(|| ExpressionError::Type(format!("cannot negate {}", n)))
            }
            other => Err(ExpressionError::Type(format!("cannot negate {}", other))),
        },
        Expr::And(left, right) => {
            if !truthy(&eval(left, data)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, data)?)))
        }
        Expr::Or(left, right) => {
            if truthy(&eval(left, data)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, data)?)))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, data)?;
            let right = eval(right, data)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
        Expr::Call(name, args) => call(name, args, data),
    }
}

/// Walk a path. A field applied to an array projects over its elements;
/// anything missing resolves to null.
fn resolve(data: &Value, segments: &[Segment]) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return data.clone();
    };
    match (first, data) {
        (Segment::Field(name), Value::Object(fields)) => match fields.get(name) {
            Some(child) => resolve(child, rest),
            None => Value::Null,
        },
        (Segment::Field(_), Value::Array(elements)) => Value::Array(
            elements
                .iter()
                .map(|element| resolve(element, segments))
                .collect(),
        ),
        (Segment::Index(index), Value::Array(elements)) => match elements.get(*index) {
            Some(child) => resolve(child, rest),
            None => Value::Null,
        },
        _ => Value::Null,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => return Ok(equal(left, right)),
        CompareOp::Ne => return Ok(!equal(left, right)),
        _ => {}
    }

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        // absent values never order against anything
        (Value::Null, _) | (_, Value::Null) => return Ok(false),
        _ => None,
    };
    let ordering = ordering.ok_or_else(|| {
        ExpressionError::Type(format!("cannot order {} against {}", left, right))
    })?;

    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
    })
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn call(name: &str, args: &[Expr], data: &Value) -> Result<Value, ExpressionError> {
    let single = |args: &[Expr]| -> Result<Value, ExpressionError> {
        match args {
            [arg] => eval(arg, data),
            _ => Err(ExpressionError::Type(format!(
                "{}() takes exactly one argument, got {}",
                name,
                args.len()
            ))),
        }
    };

    match name {
        // number of truthy elements
        "count" => Ok(match single(args)? {
            Value::Array(elements) => Value::from(elements.iter().filter(|e| truthy(e)).count()),
            other => Value::from(u8::from(truthy(&other))),
        }),
        "len" => match single(args)? {
            Value::Array(elements) => Ok(Value::from(elements.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Object(fields) => Ok(Value::from(fields.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(ExpressionError::Type(format!("len() of {}", other))),
        },
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    fn run(source: &str, data: Value) -> Value {
        eval(&parse(source).unwrap(), &data).unwrap()
    }

    #[test]
    fn array_fields_project_over_elements() {
        let data = json!({"instances": [{"approved": true}, {"approved": false}, {"approved": true}]});
        assert_eq!(run("instances.approved", data.clone()), json!([true, false, true]));
        assert_eq!(run("count(instances.approved)", data.clone()), json!(2));
        assert_eq!(run("count(instances.approved) >= 3", data), json!(false));
    }

    #[test]
    fn missing_values_are_null_and_falsy() {
        assert_eq!(run("a.b.c", json!({"a": {}})), Value::Null);
        assert_eq!(run("!missing", json!({})), json!(true));
        assert_eq!(run("missing > 3", json!({})), json!(false));
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(run("amount == 100", json!({"amount": 100.0})), json!(true));
        assert_eq!(run("amount > -1.5", json!({"amount": 0})), json!(true));
        assert_eq!(run("len(name) == 5", json!({"name": "alice"})), json!(true));
    }

    #[test]
    fn ordering_mismatched_types_is_an_error() {
        let err = eval(&parse("a < 'x'").unwrap(), &json!({"a": 1})).unwrap_err();
        assert!(matches!(err, ExpressionError::Type(_)));
        let err = eval(&parse("nope(a)").unwrap(), &json!({})).unwrap_err();
        assert_eq!(err, ExpressionError::UnknownFunction("nope".into()));
    }
}
