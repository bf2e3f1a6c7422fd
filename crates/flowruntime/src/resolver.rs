//! Template resolution for step inputs.
//!
//! Walks an arbitrary JSON value and replaces every `{{ expression }}`
//! with its value against the execution context. Resolution is best
//! effort: an unknown reference, a malformed expression or an empty
//! `{{}}` becomes an empty string and never aborts the step.

use crate::constants::EngineConstants;
use crate::expression::{Evaluated, Expression, Scope};
use flowcore::value::is_external_ref;
use flowcore::{ExecutionContext, ValueExt};
use serde_json::{Map, Value};
use std::borrow::Cow;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Expr(&'a str),
}

/// Split a template into literal text and expression sources. An opening
/// marker without a closing one is kept as literal text.
fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        out.push(Segment::Expr(&after_open[..end]));
        rest = &after_open[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

struct ContextScope<'a>(&'a ExecutionContext);

impl Scope for ContextScope<'_> {
    fn lookup(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.0.step_value(name)
    }
}

/// Resolves templated step input against an execution context.
#[derive(Debug, Clone, Default)]
pub struct PropsResolver {
    constants: EngineConstants,
}

impl PropsResolver {
    pub fn new(constants: EngineConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &EngineConstants {
        &self.constants
    }

    /// Same shape as `unresolved_input` with every expression replaced,
    /// object keys included.
    pub fn resolve(&self, unresolved_input: &Value, execution_state: &ExecutionContext) -> Value {
        let scope = ContextScope(execution_state);
        resolve_value(unresolved_input, &scope)
    }

    pub fn resolve_str(&self, template: &str, execution_state: &ExecutionContext) -> Value {
        let scope = ContextScope(execution_state);
        resolve_string(template, &scope)
    }
}

fn resolve_value(value: &Value, scope: &dyn Scope) -> Value {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_value(item, scope)).collect()),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, item) in map {
                // Keys are templates too; a later key resolving to the same
                // text replaces the earlier entry.
                let key = match resolve_string(key, scope) {
                    Value::String(s) => s,
                    other => other.to_text(),
                };
                resolved.insert(key, resolve_value(item, scope));
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}

fn resolve_string(template: &str, scope: &dyn Scope) -> Value {
    if is_external_ref(template) {
        return Value::String(template.to_string());
    }

    let parts = segments(template);
    if !parts.iter().any(|p| matches!(p, Segment::Expr(_))) {
        return Value::String(template.to_string());
    }

    // A lone expression keeps its native type.
    if let [Segment::Expr(source)] = parts.as_slice() {
        return evaluate(source, scope).into_value().unwrap_or_else(|| Value::String(String::new()));
    }

    let mut text = String::with_capacity(template.len());
    for part in parts {
        match part {
            Segment::Text(t) => text.push_str(t),
            Segment::Expr(source) => {
                if let Some(value) = evaluate(source, scope).into_value() {
                    text.push_str(&value.to_text());
                }
            }
        }
    }
    Value::String(text)
}

fn evaluate(source: &str, scope: &dyn Scope) -> Evaluated {
    let source = source.trim();
    if source.is_empty() {
        return Evaluated::Undefined;
    }
    match Expression::compile(source) {
        Ok(expression) => expression.evaluate(scope),
        Err(e) => {
            tracing::debug!(expression = %source, error = %e, "Unresolvable template expression");
            Evaluated::Undefined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::{ActionType, StepOutput};
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::empty()
            .upsert_step("trigger", StepOutput::trigger(json!({"items": [5, "a"], "price": 10, "name": "budget"})))
            .upsert_step(
                "step_1",
                StepOutput::new("step_1", ActionType::Block, Value::Null).succeeded(json!({"success": true})),
            )
            .upsert_step(
                "step_2",
                StepOutput::new("step_2", ActionType::Block, Value::Null)
                    .succeeded(json!("memory://{\"fileName\":\"report.csv\",\"data\":\"{{not a template}}\"}")),
            )
    }

    fn resolve(input: Value) -> Value {
        PropsResolver::default().resolve(&input, &context())
    }

    #[test]
    fn test_segments_split_text_and_expressions() {
        assert_eq!(
            segments("a {{x}} b {{ y }}"),
            vec![
                Segment::Text("a "),
                Segment::Expr("x"),
                Segment::Text(" b "),
                Segment::Expr(" y "),
            ]
        );
        assert_eq!(segments("open {{ only"), vec![Segment::Text("open {{ only")]);
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(resolve(json!("just text")), json!("just text"));
        assert_eq!(resolve(json!(42)), json!(42));
        assert_eq!(resolve(json!(null)), json!(null));
    }

    #[test]
    fn test_lone_expression_keeps_native_type() {
        assert_eq!(resolve(json!("{{trigger.items}}")), json!([5, "a"]));
        assert_eq!(resolve(json!("{{trigger.price}}")), json!(10));
        assert_eq!(resolve(json!("{{step_1.success}}")), json!(true));
        assert_eq!(resolve(json!("{{ trigger.price + 2 }}")), json!(12));
    }

    #[test]
    fn test_interleaved_expressions_render_as_text() {
        assert_eq!(resolve(json!("{{trigger.items[0]}} {{trigger.items[1]}}")), json!("5 a"));
        assert_eq!(resolve(json!("items are {{trigger.items}}")), json!(r#"items are [5,"a"]"#));
        assert_eq!(resolve(json!("{{trigger.name}}{{trigger.price}}")), json!("budget10"));
    }

    #[test]
    fn test_undefined_references_become_empty() {
        assert_eq!(resolve(json!("test {{configs.bar}} {{trigger.items[4]}}")), json!("test  "));
        assert_eq!(resolve(json!("{{unknown_step}}")), json!(""));
        assert_eq!(resolve(json!("{{}}")), json!(""));
        assert_eq!(resolve(json!("{{ }}")), json!(""));
    }

    #[test]
    fn test_malformed_expressions_do_not_fail() {
        assert_eq!(resolve(json!("x {{ trigger. }} y")), json!("x  y"));
        assert_eq!(resolve(json!("{{ 'open }}")), json!(""));
    }

    #[test]
    fn test_deeply_nested_expressions_resolve_empty() {
        let nested = format!("{{{{{}1{}}}}}", "(".repeat(500), ")".repeat(500));
        assert_eq!(resolve(json!(nested)), json!(""));
        assert_eq!(resolve(json!(format!("n={}", nested))), json!("n="));

        let signs = format!("{{{{{}1}}}}", "-".repeat(400));
        assert_eq!(resolve(json!(signs)), json!(1));
    }

    #[test]
    fn test_math_builtins_in_templates() {
        assert_eq!(resolve(json!("{{Math.min(trigger.price, 3)}}")), json!(3));
        assert_eq!(resolve(json!("max={{Math.max(trigger.price, 30)}}")), json!("max=30"));
    }

    #[test]
    fn test_resolves_nested_structures_and_keys() {
        let resolved = resolve(json!({
            "{{trigger.name}}": "{{trigger.price}}",
            "list": ["{{trigger.items[1]}}", {"inner": "{{step_1.success}}"}]
        }));
        assert_eq!(resolved, json!({"budget": 10, "list": ["a", {"inner": true}]}));
    }

    #[test]
    fn test_colliding_keys_overwrite_in_insertion_order() {
        let resolved = resolve(json!({"budget": 1, "{{trigger.name}}": 2}));
        assert_eq!(resolved, json!({"budget": 2}));
    }

    #[test]
    fn test_external_references_pass_through_verbatim() {
        let literal = "memory://{\"data\":\"{{trigger.price}}\"}";
        assert_eq!(resolve(json!(literal)), json!(literal));
        assert_eq!(resolve(json!("file://bucket/key")), json!("file://bucket/key"));

        let referenced = resolve(json!("{{step_2}}"));
        assert_eq!(
            referenced,
            json!("memory://{\"fileName\":\"report.csv\",\"data\":\"{{not a template}}\"}")
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let input = json!({"a": "{{trigger.items}}", "b": "x {{trigger.price}}"});
        assert_eq!(resolve(input.clone()), resolve(input));
    }
}
