use super::parser::{BinaryOp, Builtin, Expr};
use flowcore::value::number_value;
use flowcore::ValueExt;
use serde_json::Value;
use std::borrow::Cow;

/// Where variables are looked up.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Cow<'_, Value>>;
}

/// Outcome of evaluating an expression. `Undefined` covers every lookup
/// or operation with no meaningful result.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Undefined,
    Value(Value),
}

impl Evaluated {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Evaluated::Undefined => None,
            Evaluated::Value(v) => Some(v),
        }
    }

    fn number(n: f64) -> Self {
        number_value(n).map(Evaluated::Value).unwrap_or(Evaluated::Undefined)
    }
}

pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Evaluated {
    match expr {
        Expr::Literal(value) => Evaluated::Value(value.clone()),
        Expr::Variable(name) => scope
            .lookup(name)
            .map(|v| Evaluated::Value(v.into_owned()))
            .unwrap_or(Evaluated::Undefined),
        Expr::Field(target, field) => match evaluate(target, scope) {
            Evaluated::Value(value) => member(&value, field),
            Evaluated::Undefined => Evaluated::Undefined,
        },
        Expr::Index(target, index) => {
            let (Evaluated::Value(value), Evaluated::Value(index)) =
                (evaluate(target, scope), evaluate(index, scope))
            else {
                return Evaluated::Undefined;
            };
            match index {
                Value::Number(n) => match n.as_u64() {
                    Some(i) => member(&value, &i.to_string()),
                    None => Evaluated::Undefined,
                },
                Value::String(key) => member(&value, &key),
                _ => Evaluated::Undefined,
            }
        }
        Expr::Negate(inner) => match evaluate(inner, scope) {
            Evaluated::Value(v) => v.to_number().map(|n| Evaluated::number(-n)).unwrap_or(Evaluated::Undefined),
            Evaluated::Undefined => Evaluated::Undefined,
        },
        Expr::Binary(op, lhs, rhs) => {
            let (Evaluated::Value(lhs), Evaluated::Value(rhs)) = (evaluate(lhs, scope), evaluate(rhs, scope))
            else {
                return Evaluated::Undefined;
            };
            binary(*op, &lhs, &rhs)
        }
        Expr::Call(builtin, args) => {
            let mut numbers = Vec::with_capacity(args.len());
            for arg in args {
                match evaluate(arg, scope).into_value().and_then(|v| v.to_number()) {
                    Some(n) => numbers.push(n),
                    None => return Evaluated::Undefined,
                }
            }
            call(*builtin, &numbers)
        }
    }
}

/// Property access: object keys, array indexes and `length`.
fn member(value: &Value, key: &str) -> Evaluated {
    let found = match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) if key == "length" => Some(Value::from(items.len())),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        Value::String(s) if key == "length" => Some(Value::from(s.chars().count())),
        _ => None,
    };
    found.map(Evaluated::Value).unwrap_or(Evaluated::Undefined)
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Evaluated {
    if op == BinaryOp::Add && (lhs.is_string() || rhs.is_string()) {
        return Evaluated::Value(Value::String(format!("{}{}", lhs.to_text(), rhs.to_text())));
    }

    let (Some(a), Some(b)) = (lhs.to_number(), rhs.to_number()) else {
        return Evaluated::Undefined;
    };
    Evaluated::number(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    })
}

fn call(builtin: Builtin, args: &[f64]) -> Evaluated {
    match (builtin, args) {
        (Builtin::Min, [first, rest @ ..]) => Evaluated::number(rest.iter().fold(*first, |acc, n| acc.min(*n))),
        (Builtin::Max, [first, rest @ ..]) => Evaluated::number(rest.iter().fold(*first, |acc, n| acc.max(*n))),
        (Builtin::Abs, [n]) => Evaluated::number(n.abs()),
        (Builtin::Floor, [n]) => Evaluated::number(n.floor()),
        (Builtin::Ceil, [n]) => Evaluated::number(n.ceil()),
        // Half rounds toward positive infinity.
        (Builtin::Round, [n]) => Evaluated::number((n + 0.5).floor()),
        _ => Evaluated::Undefined,
    }
}
