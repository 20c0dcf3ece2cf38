//! nom grammar of the expression language.
//!
//! Precedence, loosest first: `||`, `&&`, comparison (non-associative),
//! unary `!` / `-`, primary.

use netcore::ExpressionError;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, anychar, char, digit1, multispace0, satisfy},
    combinator::{all_consuming, cut, map, map_res, opt, recognize, value},
    error::VerboseError,
    multi::{fold_many0, many0, many0_count, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
    Finish, IResult,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

type ParseResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Parse an expression into its syntax tree.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    all_consuming(terminated(or_expr, multispace0))(source)
        .finish()
        .map(|(_, expr)| expr)
        .map_err(|e| syntax_error(source, e))
}

/// Position is the byte offset of the deepest failure.
fn syntax_error(source: &str, error: VerboseError<&str>) -> ExpressionError {
    let rest = error.errors.first().map(|(rest, _)| *rest).unwrap_or("");
    let message = match rest.chars().next() {
        Some(c) => format!("unexpected '{}'", c),
        None => "unexpected end of expression".to_string(),
    };
    ExpressionError::Syntax {
        position: source.len() - rest.len(),
        message,
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> ParseResult<'a, O>
where
    F: FnMut(&'a str) -> ParseResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn or_expr(input: &str) -> ParseResult<'_, Expr> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(ws(tag("||")), cut(and_expr)),
        move || first.clone(),
        |left, right| Expr::Or(Box::new(left), Box::new(right)),
    )(input)
}

fn and_expr(input: &str) -> ParseResult<'_, Expr> {
    let (input, first) = comparison(input)?;
    fold_many0(
        preceded(ws(tag("&&")), cut(comparison)),
        move || first.clone(),
        |left, right| Expr::And(Box::new(left), Box::new(right)),
    )(input)
}

fn comparison(input: &str) -> ParseResult<'_, Expr> {
    let (input, left) = unary(input)?;
    let (input, rest) = opt(pair(ws(compare_op), cut(unary)))(input)?;
    let expr = match rest {
        Some((op, right)) => Expr::Compare(op, Box::new(left), Box::new(right)),
        None => left,
    };
    Ok((input, expr))
}

fn compare_op(input: &str) -> ParseResult<'_, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))(input)
}

fn unary(input: &str) -> ParseResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            map(preceded(char('!'), cut(unary)), |e| Expr::Not(Box::new(e))),
            map(preceded(char('-'), cut(unary)), |e| Expr::Neg(Box::new(e))),
            primary,
        )),
    )(input)
}

fn primary(input: &str) -> ParseResult<'_, Expr> {
    alt((
        map(number, Expr::Literal),
        map(string_literal, |s| Expr::Literal(Value::String(s))),
        delimited(
            char('('),
            or_expr,
            cut(preceded(multispace0, char(')'))),
        ),
        word,
    ))(input)
}

fn number(input: &str) -> ParseResult<'_, Value> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |text: &str| text.parse::<f64>().map(number_value),
    )(input)
}

fn string_literal(input: &str) -> ParseResult<'_, String> {
    alt((quoted('\''), quoted('"')))(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> ParseResult<'a, String> {
    move |input| {
        delimited(
            char(quote),
            map(
                many0(alt((
                    preceded(char('\\'), anychar),
                    satisfy(|c| c != quote && c != '\\'),
                ))),
                |chars: Vec<char>| chars.into_iter().collect(),
            ),
            cut(char(quote)),
        )(input)
    }
}

fn identifier(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

/// Keyword, function call or path.
fn word(input: &str) -> ParseResult<'_, Expr> {
    let (rest, name) = identifier(input)?;
    match name {
        "true" => Ok((rest, Expr::Literal(Value::Bool(true)))),
        "false" => Ok((rest, Expr::Literal(Value::Bool(false)))),
        "null" => Ok((rest, Expr::Literal(Value::Null))),
        _ => alt((
            map(
                preceded(
                    pair(multispace0, char('(')),
                    terminated(
                        separated_list0(preceded(multispace0, char(',')), or_expr),
                        cut(preceded(multispace0, char(')'))),
                    ),
                ),
                |args| Expr::Call(name.to_string(), args),
            ),
            map(many0(segment), |tail| {
                let mut segments = vec![Segment::Field(name.to_string())];
                segments.extend(tail);
                Expr::Path(segments)
            }),
        ))(rest),
    }
}

fn segment(input: &str) -> ParseResult<'_, Segment> {
    alt((
        preceded(
            char('.'),
            cut(map(identifier, |field: &str| Segment::Field(field.to_string()))),
        ),
        delimited(
            pair(char('['), multispace0),
            cut(alt((
                map_res(digit1, |digits: &str| digits.parse::<usize>().map(Segment::Index)),
                map(string_literal, Segment::Field),
            ))),
            cut(preceded(multispace0, char(']'))),
        ),
    ))(input)
}

/// Integral literals stay integers so they compare equal to JSON integers.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_comparison_tighter_than_connectives() {
        let expr = parse("a > 1 && b == 'x' || !c").unwrap();
        match expr {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::And(_, _)));
                assert!(matches!(*right, Expr::Not(_)));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn paths_and_calls() {
        assert_eq!(
            parse("order.lines[0].qty").unwrap(),
            Expr::Path(vec![
                Segment::Field("order".into()),
                Segment::Field("lines".into()),
                Segment::Index(0),
                Segment::Field("qty".into()),
            ])
        );
        assert!(matches!(parse("count(instances.approved)").unwrap(), Expr::Call(name, args) if name == "count" && args.len() == 1));
        assert_eq!(parse("len()").unwrap(), Expr::Call("len".into(), vec![]));
        assert_eq!(
            parse("a['b c']").unwrap(),
            Expr::Path(vec![Segment::Field("a".into()), Segment::Field("b c".into())])
        );
    }

    #[test]
    fn literals() {
        assert_eq!(parse(" 2.5 ").unwrap(), Expr::Literal(serde_json::json!(2.5)));
        assert_eq!(parse("3").unwrap(), Expr::Literal(serde_json::json!(3)));
        assert_eq!(
            parse(r#""it's \"x\"""#).unwrap(),
            Expr::Literal(Value::String("it's \"x\"".into()))
        );
        assert_eq!(parse("null").unwrap(), Expr::Literal(Value::Null));
        assert!(matches!(parse("-n").unwrap(), Expr::Neg(_)));
    }

    #[test]
    fn syntax_errors_carry_position() {
        match parse("a == ").unwrap_err() {
            ExpressionError::Syntax { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected error {:?}", other),
        }
        match parse("a = 1").unwrap_err() {
            ExpressionError::Syntax { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(parse("'open").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("a == b == c").is_err());
        assert!(parse("f(a,)").is_err());
    }
}
