//! Branch condition evaluation.

use crate::resolver::PropsResolver;
use flowcore::{BranchCondition, BranchOperator, ExecutionContext, ValueExt};
use serde_json::Value;

/// Resolve both operands of every condition against the context.
pub fn resolve_conditions(
    resolver: &PropsResolver,
    groups: &[Vec<BranchCondition>],
    ctx: &ExecutionContext,
) -> Vec<Vec<BranchCondition>> {
    groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|condition| BranchCondition {
                    operator: condition.operator,
                    first_value: resolver.resolve(&condition.first_value, ctx),
                    second_value: condition
                        .second_value
                        .as_ref()
                        .map(|v| resolver.resolve(v, ctx)),
                    case_sensitive: condition.case_sensitive,
                })
                .collect()
        })
        .collect()
}

/// OR over groups, AND within a group. No groups means false.
pub fn evaluate_conditions(groups: &[Vec<BranchCondition>]) -> bool {
    groups
        .iter()
        .any(|group| group.iter().all(evaluate_condition))
}

/// Evaluate one condition whose operands are already resolved.
pub fn evaluate_condition(condition: &BranchCondition) -> bool {
    let first = &condition.first_value;
    let second = condition.second_value.as_ref().unwrap_or(&Value::Null);

    match condition.operator {
        BranchOperator::TextContains => compare_text(condition, |a, b| a.contains(b)),
        BranchOperator::TextDoesNotContain => !compare_text(condition, |a, b| a.contains(b)),
        BranchOperator::TextExactlyMatches => compare_text(condition, |a, b| a == b),
        BranchOperator::TextDoesNotExactlyMatch => !compare_text(condition, |a, b| a == b),
        BranchOperator::TextStartsWith => compare_text(condition, |a, b| a.starts_with(b)),
        BranchOperator::TextDoesNotStartWith => !compare_text(condition, |a, b| a.starts_with(b)),
        BranchOperator::TextEndsWith => compare_text(condition, |a, b| a.ends_with(b)),
        BranchOperator::TextDoesNotEndWith => !compare_text(condition, |a, b| a.ends_with(b)),
        BranchOperator::Exists => !first.is_empty_value(),
        BranchOperator::DoesNotExist => first.is_empty_value(),
        BranchOperator::BooleanIsTrue => first.is_truthy(),
        BranchOperator::BooleanIsFalse => !first.is_truthy(),
        BranchOperator::NumberIsEqualTo => compare_numbers(first, second, |a, b| a == b),
        BranchOperator::NumberIsGreaterThan => compare_numbers(first, second, |a, b| a > b),
        BranchOperator::NumberIsLessThan => compare_numbers(first, second, |a, b| a < b),
    }
}

/// Text comparison, case-insensitive unless `case_sensitive` is set.
fn compare_text(condition: &BranchCondition, predicate: impl Fn(&str, &str) -> bool) -> bool {
    let mut first = condition.first_value.to_text();
    let mut second = condition
        .second_value
        .as_ref()
        .map(|v| v.to_text())
        .unwrap_or_default();

    if !condition.case_sensitive.unwrap_or(false) {
        first = first.to_lowercase();
        second = second.to_lowercase();
    }
    predicate(&first, &second)
}

fn compare_numbers(first: &Value, second: &Value, predicate: impl Fn(f64, f64) -> bool) -> bool {
    match (first.to_number(), second.to_number()) {
        (Some(a), Some(b)) => predicate(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::{ActionType, StepOutput};
    use serde_json::json;

    fn cond(op: BranchOperator, first: Value, second: Value) -> BranchCondition {
        BranchCondition::new(op, first).compared_to(second)
    }

    #[test]
    fn test_text_contains_respects_case_sensitivity() {
        let insensitive = cond(BranchOperator::TextContains, json!("test"), json!("TeSt")).case_sensitive(false);
        assert!(evaluate_condition(&insensitive));

        let sensitive = cond(BranchOperator::TextContains, json!("test"), json!("example")).case_sensitive(true);
        assert!(!evaluate_condition(&sensitive));

        let sensitive_case = cond(BranchOperator::TextContains, json!("test"), json!("TeSt")).case_sensitive(true);
        assert!(!evaluate_condition(&sensitive_case));
    }

    #[test]
    fn test_text_defaults_to_case_insensitive() {
        assert!(evaluate_condition(&cond(BranchOperator::TextExactlyMatches, json!("AWS"), json!("aws"))));
        assert!(evaluate_condition(&cond(BranchOperator::TextStartsWith, json!("Budget Alert"), json!("budget"))));
        assert!(evaluate_condition(&cond(BranchOperator::TextEndsWith, json!("cost.CSV"), json!(".csv"))));
        assert!(!evaluate_condition(&cond(BranchOperator::TextDoesNotEndWith, json!("cost.CSV"), json!(".csv"))));
        assert!(evaluate_condition(&cond(BranchOperator::TextDoesNotContain, json!("gcp"), json!("aws"))));
        assert!(evaluate_condition(&cond(BranchOperator::TextDoesNotExactlyMatch, json!("gcp"), json!("gc"))));
        assert!(!evaluate_condition(&cond(BranchOperator::TextDoesNotStartWith, json!("gcp"), json!("G"))));
    }

    #[test]
    fn test_text_operators_render_non_strings() {
        assert!(evaluate_condition(&cond(BranchOperator::TextContains, json!(12345), json!("234"))));
        assert!(evaluate_condition(&cond(BranchOperator::TextContains, json!(["a", "b"]), json!("\"b\""))));
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(evaluate_condition(&cond(BranchOperator::NumberIsGreaterThan, json!("2"), json!("1"))));
        assert!(evaluate_condition(&cond(BranchOperator::NumberIsLessThan, json!("1"), json!("2"))));
        assert!(evaluate_condition(&cond(BranchOperator::NumberIsGreaterThan, json!("10"), json!("9"))));
        assert!(evaluate_condition(&cond(BranchOperator::NumberIsEqualTo, json!("1.0"), json!(1))));
        assert!(!evaluate_condition(&cond(BranchOperator::NumberIsEqualTo, json!("abc"), json!("abc"))));
        assert!(!evaluate_condition(&BranchCondition::new(BranchOperator::NumberIsLessThan, json!(1))));
    }

    #[test]
    fn test_existence() {
        assert!(evaluate_condition(&BranchCondition::new(BranchOperator::Exists, json!("x"))));
        assert!(evaluate_condition(&BranchCondition::new(BranchOperator::Exists, json!(0))));
        assert!(!evaluate_condition(&BranchCondition::new(BranchOperator::Exists, json!(""))));
        assert!(evaluate_condition(&BranchCondition::new(BranchOperator::DoesNotExist, json!(null))));
    }

    #[test]
    fn test_booleans() {
        assert!(evaluate_condition(&BranchCondition::new(BranchOperator::BooleanIsTrue, json!(true))));
        assert!(evaluate_condition(&BranchCondition::new(BranchOperator::BooleanIsFalse, json!("false"))));
        assert!(!evaluate_condition(&BranchCondition::new(BranchOperator::BooleanIsTrue, json!(""))));
    }

    #[test]
    fn test_groups_are_or_of_and() {
        let yes = BranchCondition::new(BranchOperator::BooleanIsTrue, json!(true));
        let no = BranchCondition::new(BranchOperator::BooleanIsTrue, json!(false));

        assert!(evaluate_conditions(&[vec![yes.clone(), yes.clone()]]));
        assert!(!evaluate_conditions(&[vec![yes.clone(), no.clone()]]));
        assert!(evaluate_conditions(&[vec![no.clone()], vec![yes.clone()]]));
        assert!(!evaluate_conditions(&[]));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let condition = cond(BranchOperator::TextContains, json!("Cost Report"), json!("report"));
        let first = evaluate_condition(&condition);
        for _ in 0..10 {
            assert_eq!(evaluate_condition(&condition), first);
        }
    }

    #[test]
    fn test_conditions_resolve_against_context() {
        let ctx = ExecutionContext::empty()
            .upsert_step("trigger", StepOutput::trigger(json!({"spend": 120, "limit": "100"})))
            .upsert_step(
                "lookup",
                StepOutput::new("lookup", ActionType::Block, Value::Null).succeeded(json!({"owner": "FinOps"})),
            );
        let groups = vec![vec![
            cond(BranchOperator::NumberIsGreaterThan, json!("{{trigger.spend}}"), json!("{{trigger.limit}}")),
            cond(BranchOperator::TextExactlyMatches, json!("{{lookup.owner}}"), json!("finops")),
        ]];

        let resolved = resolve_conditions(&PropsResolver::default(), &groups, &ctx);
        assert_eq!(resolved[0][0].first_value, json!(120));
        assert!(evaluate_conditions(&resolved));
    }
}
