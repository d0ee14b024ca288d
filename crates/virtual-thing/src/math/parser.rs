use std::fmt;

use ariadne::{Config, Label, Report, ReportKind, Source};
use chumsky::{pratt::*, prelude::*};

pub type ParseError<'src> = Rich<'src, char>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Xor,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "mod",
            Self::Power => "^",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
    Symbol(String),
    Member(Box<Expr>, String),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn binary(op: BinaryOp, l: Expr, r: Expr) -> Self {
        Self::Binary(op, Box::new(l), Box::new(r))
    }
}

const RESERVED: &[&str] = &["and", "or", "xor", "not", "mod"];

fn op<'src>(symbol: &'static str) -> impl Parser<'src, &'src str, (), extra::Err<ParseError<'src>>> + Clone {
    just(symbol).ignored().padded()
}

fn keyword<'src>(word: &'static str) -> impl Parser<'src, &'src str, (), extra::Err<ParseError<'src>>> + Clone {
    text::ascii::keyword(word).ignored().padded()
}

pub fn parser<'src>() -> impl Parser<'src, &'src str, Expr, extra::Err<ParseError<'src>>> {
    recursive(|expr| {
        // `.5` has no integer part.
        let mantissa = text::int(10)
            .then(just('.').then(text::digits(10)).or_not())
            .ignored()
            .or(just('.').then(text::digits(10)).ignored());
        let number = mantissa
            .then(one_of("eE").then(one_of("+-").or_not()).then(text::digits(10)).or_not())
            .to_slice()
            .from_str()
            .unwrapped()
            .map(Expr::Number);

        let single_quoted = just('\'')
            .ignore_then(none_of('\'').repeated().to_slice())
            .then_ignore(just('\''));
        let double_quoted = just('"')
            .ignore_then(none_of('"').repeated().to_slice())
            .then_ignore(just('"'));
        let text = single_quoted
            .or(double_quoted)
            .map(|text: &str| Expr::Text(text.to_owned()));

        let arguments = expr
            .clone()
            .separated_by(just(',').padded())
            .collect::<Vec<_>>()
            .delimited_by(just('(').padded(), just(')').padded());

        let symbol_or_call = text::ascii::ident()
            .then(arguments.or_not())
            .try_map(|(name, arguments): (&str, Option<Vec<Expr>>), span| {
                if let Some(arguments) = arguments {
                    return Ok(Expr::Call(name.to_owned(), arguments));
                }
                if RESERVED.contains(&name) {
                    return Err(ParseError::custom(span, format!("Unexpected operator '{name}'")));
                }
                Ok(match name {
                    "true" => Expr::Boolean(true),
                    "false" => Expr::Boolean(false),
                    "null" => Expr::Null,
                    "pi" | "PI" => Expr::Number(std::f64::consts::PI),
                    "e" | "E" => Expr::Number(std::f64::consts::E),
                    "Infinity" => Expr::Number(f64::INFINITY),
                    "NaN" => Expr::Number(f64::NAN),
                    _ => Expr::Symbol(name.to_owned()),
                })
            });

        let nested = expr.clone().delimited_by(just('(').padded(), just(')').padded());

        let atom = choice((number, text, symbol_or_call, nested))
            .padded()
            .foldl(
                just('.').ignore_then(text::ascii::ident()).padded().repeated(),
                |object, field: &str| Expr::Member(Box::new(object), field.to_owned()),
            );

        let operators = atom.pratt((
            infix(right(9), op("^"), |l, _, r, _| Expr::binary(BinaryOp::Power, l, r)),
            prefix(8, op("-"), |_, rhs, _| Expr::Unary(UnaryOp::Negate, Box::new(rhs))),
            prefix(8, op("+"), |_, rhs, _| rhs),
            infix(left(7), op("*"), |l, _, r, _| Expr::binary(BinaryOp::Multiply, l, r)),
            infix(left(7), op("/"), |l, _, r, _| Expr::binary(BinaryOp::Divide, l, r)),
            infix(left(7), op("%"), |l, _, r, _| Expr::binary(BinaryOp::Modulo, l, r)),
            infix(left(7), keyword("mod"), |l, _, r, _| Expr::binary(BinaryOp::Modulo, l, r)),
            infix(left(6), op("+"), |l, _, r, _| Expr::binary(BinaryOp::Add, l, r)),
            infix(left(6), op("-"), |l, _, r, _| Expr::binary(BinaryOp::Subtract, l, r)),
            infix(left(5), op("=="), |l, _, r, _| Expr::binary(BinaryOp::Equal, l, r)),
            infix(left(5), op("!="), |l, _, r, _| Expr::binary(BinaryOp::NotEqual, l, r)),
            infix(left(5), op("<="), |l, _, r, _| Expr::binary(BinaryOp::LessOrEqual, l, r)),
            infix(left(5), op(">="), |l, _, r, _| Expr::binary(BinaryOp::GreaterOrEqual, l, r)),
            infix(left(5), op("<"), |l, _, r, _| Expr::binary(BinaryOp::Less, l, r)),
            infix(left(5), op(">"), |l, _, r, _| Expr::binary(BinaryOp::Greater, l, r)),
            prefix(4, keyword("not"), |_, rhs, _| Expr::Unary(UnaryOp::Not, Box::new(rhs))),
            infix(left(3), keyword("and"), |l, _, r, _| Expr::binary(BinaryOp::And, l, r)),
            infix(left(2), keyword("xor"), |l, _, r, _| Expr::binary(BinaryOp::Xor, l, r)),
            infix(left(1), keyword("or"), |l, _, r, _| Expr::binary(BinaryOp::Or, l, r)),
        ));

        // Ternary binds loosest and nests to the right.
        operators
            .then(
                just('?')
                    .padded()
                    .ignore_then(expr.clone())
                    .then_ignore(just(':').padded())
                    .then(expr.clone())
                    .or_not(),
            )
            .map(|(condition, branches)| match branches {
                Some((then, otherwise)) => {
                    Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise))
                }
                None => condition,
            })
    })
    .padded()
    .then_ignore(end())
}

/// Parse an expression; the error is a plain-text ariadne report.
pub fn parse(source: &str) -> Result<Expr, String> {
    let (expr, errors) = parser().parse(source).into_output_errors();
    match expr {
        Some(expr) if errors.is_empty() => Ok(expr),
        _ => Err(report(source, &errors)),
    }
}

fn report(source: &str, errors: &[ParseError<'_>]) -> String {
    const NAME: &str = "expression";
    let mut bytes = Vec::new();
    for error in errors {
        let written = Report::build(ReportKind::Error, (NAME, error.span().into_range()))
            .with_config(Config::default().with_color(false))
            .with_message(error.to_string())
            .with_label(Label::new((NAME, error.span().into_range())).with_message(error.reason().to_string()))
            .finish()
            .write((NAME, Source::from(source)), &mut bytes);
        if written.is_err() {
            return errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
        }
    }
    String::from_utf8_lossy(&bytes).trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Expr {
        Expr::Number(n)
    }

    #[test]
    fn precedence() {
        assert_eq!(
            parse("1 + 2 * 3").unwrap(),
            Expr::binary(BinaryOp::Add, num(1.0), Expr::binary(BinaryOp::Multiply, num(2.0), num(3.0)))
        );
        assert_eq!(
            parse("2 ^ 3 ^ 2").unwrap(),
            Expr::binary(BinaryOp::Power, num(2.0), Expr::binary(BinaryOp::Power, num(3.0), num(2.0)))
        );
        assert_eq!(
            parse("-2 ^ 2").unwrap(),
            Expr::Unary(UnaryOp::Negate, Box::new(Expr::binary(BinaryOp::Power, num(2.0), num(2.0))))
        );
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(
            parse("a < 3 and not b").unwrap(),
            Expr::binary(
                BinaryOp::And,
                Expr::binary(BinaryOp::Less, Expr::Symbol("a".into()), num(3.0)),
                Expr::Unary(UnaryOp::Not, Box::new(Expr::Symbol("b".into())))
            )
        );
        assert!(matches!(parse("x <= 1").unwrap(), Expr::Binary(BinaryOp::LessOrEqual, ..)));
        assert!(matches!(parse("x >= 1 ? 'a' : 'b'").unwrap(), Expr::Conditional(..)));
    }

    #[test]
    fn atoms() {
        assert_eq!(parse("1.5e3").unwrap(), num(1500.0));
        assert_eq!(parse("\"go\"").unwrap(), Expr::Text("go".into()));
        assert_eq!(parse("'go'").unwrap(), Expr::Text("go".into()));
        assert_eq!(parse("true").unwrap(), Expr::Boolean(true));
        assert_eq!(
            parse("max(1, x.y)").unwrap(),
            Expr::Call(
                "max".into(),
                vec![num(1.0), Expr::Member(Box::new(Expr::Symbol("x".into())), "y".into())]
            )
        );
    }

    #[test]
    fn leading_dot_numbers() {
        assert_eq!(parse(".5").unwrap(), num(0.5));
        assert_eq!(
            parse("2 * .25e1").unwrap(),
            Expr::binary(BinaryOp::Multiply, num(2.0), num(2.5))
        );
        assert!(parse(".").is_err());
    }

    #[test]
    fn reports_errors() {
        let error = parse("1 +").unwrap_err();
        assert!(error.contains("expression"), "{error}");
        assert!(parse("and").is_err());
        assert!(parse("1 2").is_err());
    }
}
