use super::lexer::Token;
use super::ExpressionError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A step name, or `trigger`.
    Variable(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// The closed set of callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Round,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Math.min" => Some(Builtin::Min),
            "Math.max" => Some(Builtin::Max),
            "Math.abs" => Some(Builtin::Abs),
            "Math.floor" => Some(Builtin::Floor),
            "Math.ceil" => Some(Builtin::Ceil),
            "Math.round" => Some(Builtin::Round),
            _ => None,
        }
    }
}

/// Deepest nesting of parentheses, indexes and call arguments accepted.
pub const MAX_DEPTH: usize = 64;

pub fn parse(tokens: &[Token]) -> Result<Expr, ExpressionError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    /// Entry point for every nested sub-expression.
    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let expr = self.additive();
        self.depth -= 1;
        expr
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let mut negations = 0usize;
        loop {
            match self.peek() {
                Some(Token::Minus) => negations += 1,
                Some(Token::Plus) => {}
                _ => break,
            }
            self.pos += 1;
        }
        let mut expr = self.postfix()?;
        for _ in 0..negations {
            expr = Expr::Negate(Box::new(expr));
        }
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = match self.advance() {
                        Some(Token::Ident(name)) => name.clone(),
                        Some(Token::Number(n)) => format!("{}", *n as u64),
                        Some(token) => {
                            return Err(ExpressionError::UnexpectedToken(format!("{:?}", token)))
                        }
                        None => return Err(ExpressionError::UnexpectedEnd),
                    };
                    expr = Expr::Field(Box::new(expr), field);
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let name = callee_name(&expr)
                        .ok_or_else(|| ExpressionError::UnknownFunction(format!("{:?}", expr)))?;
                    let builtin = Builtin::from_name(&name)
                        .ok_or(ExpressionError::UnknownFunction(name))?;
                    let args = self.arguments()?;
                    expr = Expr::Call(builtin, args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                flowcore::value::number_value(*n).unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s.clone()))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Variable(name.clone()),
            }),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// Dotted name of a call target, e.g. `Math.min`.
fn callee_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Variable(name) => Some(name.clone()),
        Expr::Field(target, field) => callee_name(target).map(|base| format!("{}.{}", base, field)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::lexer::tokenize;
    use serde_json::json;

    fn parse_str(source: &str) -> Result<Expr, ExpressionError> {
        parse(&tokenize(source)?)
    }

    #[test]
    fn test_parse_nested_path() {
        let expr = parse_str("step_1.body.items[0]").unwrap();
        assert_eq!(
            expr,
            Expr::Index(
                Box::new(Expr::Field(
                    Box::new(Expr::Field(Box::new(Expr::Variable("step_1".into())), "body".into())),
                    "items".into()
                )),
                Box::new(Expr::Literal(json!(0)))
            )
        );
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let expr = parse_str("1 + 2 * 3").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary(BinaryOp::Add, _, ref rhs) if matches!(**rhs, Expr::Binary(BinaryOp::Mul, _, _))
        ));
    }

    #[test]
    fn test_only_whitelisted_functions_parse() {
        assert!(matches!(
            parse_str("Math.min(1, trigger.a)").unwrap(),
            Expr::Call(Builtin::Min, ref args) if args.len() == 2
        ));
        assert!(matches!(
            parse_str("process.exit(1)"),
            Err(ExpressionError::UnknownFunction(name)) if name == "process.exit"
        ));
    }

    #[test]
    fn test_nesting_past_the_limit_is_rejected() {
        let nested = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        assert_eq!(parse_str(&nested(MAX_DEPTH - 1)).unwrap(), Expr::Literal(json!(1)));
        assert_eq!(parse_str(&nested(500)), Err(ExpressionError::TooDeep(MAX_DEPTH)));
        assert_eq!(
            parse_str(&format!("{}0{}", "Math.abs(".repeat(100), ")".repeat(100))),
            Err(ExpressionError::TooDeep(MAX_DEPTH))
        );
    }

    #[test]
    fn test_repeated_signs_fold_into_negations() {
        assert_eq!(
            parse_str("--+1").unwrap(),
            Expr::Negate(Box::new(Expr::Negate(Box::new(Expr::Literal(json!(1))))))
        );
    }

    #[test]
    fn test_trailing_tokens_are_rejected() {
        assert!(parse_str("a b").is_err());
        assert!(parse_str("a +").is_err());
    }
}
