//! The template expression language.
//!
//! Source text between `{{` and `}}` is tokenized, parsed into a small AST
//! and interpreted against a [`Scope`]. The language is closed: paths with
//! dotted and indexed access, string and number literals, `+ - * /`,
//! unary minus, parentheses and the `Math.*` builtins listed in
//! [`Builtin`]. Nothing else is callable.

mod interpreter;
mod lexer;
mod parser;

pub use interpreter::{Evaluated, Scope};
pub use parser::{BinaryOp, Builtin, Expr};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("expression is longer than {0} tokens")]
    TooLong(usize),
}

/// Longest token stream a single expression may compile from.
pub const MAX_TOKENS: usize = 512;

/// A parsed expression, ready to evaluate against any scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    ast: Expr,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let tokens = lexer::tokenize(source)?;
        if tokens.len() > MAX_TOKENS {
            return Err(ExpressionError::TooLong(MAX_TOKENS));
        }
        let ast = parser::parse(&tokens)?;
        Ok(Self { ast })
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> Evaluated {
        interpreter::evaluate(&self.ast, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::borrow::Cow;
    use std::collections::HashMap;

    struct MapScope(HashMap<String, Value>);

    impl Scope for MapScope {
        fn lookup(&self, name: &str) -> Option<Cow<'_, Value>> {
            self.0.get(name).map(Cow::Borrowed)
        }
    }

    fn scope() -> MapScope {
        let mut vars = HashMap::new();
        vars.insert("trigger".to_string(), json!({"items": [5, "a"], "price": 10, "name": "ec2", "nested": {"k": [1, {"deep": true}]}}));
        vars.insert("step_1".to_string(), json!({"success": true, "total": "2.5"}));
        MapScope(vars)
    }

    fn eval(source: &str) -> Option<Value> {
        Expression::compile(source).unwrap().evaluate(&scope()).into_value()
    }

    #[test]
    fn test_path_lookups() {
        assert_eq!(eval("trigger.items[0]"), Some(json!(5)));
        assert_eq!(eval("trigger.items.1"), Some(json!("a")));
        assert_eq!(eval("trigger['name']"), Some(json!("ec2")));
        assert_eq!(eval("trigger.nested.k[1].deep"), Some(json!(true)));
        assert_eq!(eval("step_1.success"), Some(json!(true)));
        assert_eq!(eval("trigger.items.length"), Some(json!(2)));
    }

    #[test]
    fn test_missing_paths_are_undefined() {
        assert_eq!(eval("trigger.items[4]"), None);
        assert_eq!(eval("configs.bar"), None);
        assert_eq!(eval("trigger.price.currency"), None);
        assert_eq!(eval("trigger.items[-1]"), None);
    }

    #[test]
    fn test_arithmetic_uses_floating_point() {
        assert_eq!(eval("trigger.price + 2 - 3"), Some(json!(9)));
        assert_eq!(eval("trigger.price / 4"), Some(json!(2.5)));
        assert_eq!(eval("step_1.total * 2"), Some(json!(5)));
        assert_eq!(eval("0.1 + 0.2"), Some(json!(0.1 + 0.2)));
        assert_eq!(eval("-trigger.price"), Some(json!(-10)));
        assert_eq!(eval("1 / 0"), None);
    }

    #[test]
    fn test_plus_concatenates_strings() {
        assert_eq!(eval("trigger.name + '-' + trigger.price"), Some(json!("ec2-10")));
        assert_eq!(eval("'items: ' + trigger.items"), Some(json!(r#"items: [5,"a"]"#)));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(eval("Math.min(trigger.price, 3, 7)"), Some(json!(3)));
        assert_eq!(eval("Math.max(trigger.price, step_1.total)"), Some(json!(10)));
        assert_eq!(eval("Math.round(2.5)"), Some(json!(3)));
        assert_eq!(eval("Math.round(-2.5)"), Some(json!(-2)));
        assert_eq!(eval("Math.min()"), None);
        assert_eq!(eval("Math.max(trigger.name, 1)"), None);
    }

    #[test]
    fn test_long_chains_do_not_compile() {
        let chain = vec!["1"; MAX_TOKENS].join(" + ");
        assert_eq!(Expression::compile(&chain), Err(ExpressionError::TooLong(MAX_TOKENS)));
        assert_eq!(eval(&vec!["1"; 100].join(" + ")), Some(json!(100)));
    }

    #[test]
    fn test_unknown_functions_do_not_compile() {
        assert!(Expression::compile("eval('1')").is_err());
        assert!(Expression::compile("trigger.constructor('x')").is_err());
    }
}
