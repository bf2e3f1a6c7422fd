use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

pub type FlowId = Uuid;
pub type FlowVersionId = Uuid;

/// Step name under which the trigger's output is stored and referenced.
pub const TRIGGER_STEP_NAME: &str = "trigger";

/// Immutable snapshot of one flow version: a trigger followed by a linked
/// chain of actions, where branch, loop and split actions own nested chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: FlowVersionId,
    pub flow_id: FlowId,
    pub display_name: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub settings: FlowSettings,
}

impl FlowVersion {
    pub fn new(display_name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            display_name: display_name.into(),
            trigger,
            settings: FlowSettings::default(),
        }
    }

    pub fn with_timeout_ms(mut self, max_execution_time_ms: u64) -> Self {
        self.settings.max_execution_time_ms = Some(max_execution_time_ms);
        self
    }

    /// First action after the trigger.
    pub fn first_action(&self) -> Option<&Action> {
        self.trigger.next_action.as_deref()
    }

    /// Every action in the flow, depth-first in definition order.
    pub fn actions(&self) -> Vec<&Action> {
        let mut out = Vec::new();
        if let Some(first) = self.first_action() {
            collect_actions(first, &mut out);
        }
        out
    }

    /// Reject graphs the executor cannot walk unambiguously.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.trigger.name != TRIGGER_STEP_NAME {
            return Err(WorkflowError::Invalid(format!(
                "trigger must be named '{}', got '{}'",
                TRIGGER_STEP_NAME, self.trigger.name
            )));
        }

        let mut seen = HashSet::new();

        for action in self.actions() {
            if action.name.trim().is_empty() {
                return Err(WorkflowError::Invalid("action with an empty name".to_string()));
            }
            if action.name == TRIGGER_STEP_NAME {
                return Err(WorkflowError::Invalid(format!(
                    "'{}' is reserved for the trigger",
                    TRIGGER_STEP_NAME
                )));
            }
            if !seen.insert(action.name.as_str()) {
                return Err(WorkflowError::DuplicateStepName(action.name.clone()));
            }

            match &action.kind {
                ActionKind::Branch { conditions, .. } => {
                    validate_condition_groups(&action.name, conditions)?;
                }
                ActionKind::Split { branches } => {
                    let mut names = HashSet::new();
                    for branch in branches {
                        if !names.insert(branch.name.as_str()) {
                            return Err(WorkflowError::Invalid(format!(
                                "split '{}' has duplicate branch '{}'",
                                action.name, branch.name
                            )));
                        }
                        validate_condition_groups(&action.name, &branch.conditions)?;
                    }
                }
                ActionKind::Block { .. } | ActionKind::Loop { .. } => {}
            }
        }

        Ok(())
    }
}

fn validate_condition_groups(
    step: &str,
    groups: &[Vec<BranchCondition>],
) -> Result<(), WorkflowError> {
    if groups.iter().any(|group| group.is_empty()) {
        return Err(WorkflowError::Invalid(format!(
            "step '{}' has an empty condition group",
            step
        )));
    }
    Ok(())
}

fn collect_actions<'a>(head: &'a Action, out: &mut Vec<&'a Action>) {
    for action in head.chain() {
        out.push(action);
        for child in action.child_chains() {
            collect_actions(child, out);
        }
    }
}

/// Flow-wide execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Wall-clock budget for one run attempt; exceeding it between steps
    /// ends the run with verdict TIMEOUT.
    #[serde(default)]
    pub max_execution_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default = "default_trigger_name")]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub kind: TriggerKind,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub next_action: Option<Box<Action>>,
}

fn default_trigger_name() -> String {
    TRIGGER_STEP_NAME.to_string()
}

impl Trigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            name: default_trigger_name(),
            display_name: None,
            kind,
            settings: Value::Null,
            next_action: None,
        }
    }

    pub fn then(mut self, action: Action) -> Self {
        append(&mut self.next_action, action);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Empty,
    Manual,
    Webhook,
    Schedule { cron_expression: String },
    Block { block: String },
}

/// One node of the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Skipped actions are walked past without producing output.
    #[serde(default)]
    pub skip: bool,
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub next_action: Option<Box<Action>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Invoke a registered block with templated input.
    Block {
        block: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        error_handling: ErrorHandlingOptions,
    },
    /// Conditions are an OR of AND-groups.
    Branch {
        conditions: Vec<Vec<BranchCondition>>,
        #[serde(default)]
        on_success_action: Option<Box<Action>>,
        #[serde(default)]
        on_failure_action: Option<Box<Action>>,
    },
    Loop {
        items: Value,
        #[serde(default)]
        first_loop_action: Option<Box<Action>>,
    },
    Split { branches: Vec<SplitBranch> },
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionKind::Block { .. } => ActionType::Block,
            ActionKind::Branch { .. } => ActionType::Branch,
            ActionKind::Loop { .. } => ActionType::Loop,
            ActionKind::Split { .. } => ActionType::Split,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Trigger,
    Block,
    Branch,
    Loop,
    Split,
}

/// A named sub-path of a split. Runs when `conditions` is empty or
/// evaluates true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitBranch {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Vec<BranchCondition>>,
    #[serde(default)]
    pub first_action: Option<Box<Action>>,
}

impl SplitBranch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            first_action: None,
        }
    }

    pub fn when(mut self, conditions: Vec<Vec<BranchCondition>>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn then(mut self, action: Action) -> Self {
        append(&mut self.first_action, action);
        self
    }
}

impl Action {
    fn with_kind(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            skip: false,
            kind,
            next_action: None,
        }
    }

    pub fn block(name: impl Into<String>, block: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            ActionKind::Block {
                block: block.into(),
                input: Value::Object(Default::default()),
                error_handling: ErrorHandlingOptions::default(),
            },
        )
    }

    pub fn branch(name: impl Into<String>, conditions: Vec<Vec<BranchCondition>>) -> Self {
        Self::with_kind(
            name,
            ActionKind::Branch {
                conditions,
                on_success_action: None,
                on_failure_action: None,
            },
        )
    }

    pub fn loop_over(name: impl Into<String>, items: impl Into<Value>) -> Self {
        Self::with_kind(
            name,
            ActionKind::Loop {
                items: items.into(),
                first_loop_action: None,
            },
        )
    }

    pub fn split(name: impl Into<String>, branches: Vec<SplitBranch>) -> Self {
        Self::with_kind(name, ActionKind::Split { branches })
    }

    pub fn with_input(mut self, value: Value) -> Self {
        if let ActionKind::Block { input, .. } = &mut self.kind {
            *input = value;
        }
        self
    }

    pub fn with_error_handling(mut self, continue_on_failure: bool, retry_on_failure: bool) -> Self {
        if let ActionKind::Block { error_handling, .. } = &mut self.kind {
            *error_handling = ErrorHandlingOptions {
                continue_on_failure,
                retry_on_failure,
            };
        }
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn on_success(mut self, action: Action) -> Self {
        if let ActionKind::Branch { on_success_action, .. } = &mut self.kind {
            append(on_success_action, action);
        }
        self
    }

    pub fn on_failure(mut self, action: Action) -> Self {
        if let ActionKind::Branch { on_failure_action, .. } = &mut self.kind {
            append(on_failure_action, action);
        }
        self
    }

    /// Append to the body of a loop.
    pub fn with_body(mut self, action: Action) -> Self {
        if let ActionKind::Loop { first_loop_action, .. } = &mut self.kind {
            append(first_loop_action, action);
        }
        self
    }

    /// Append `action` at the tail of this chain.
    pub fn then(mut self, action: Action) -> Self {
        append(&mut self.next_action, action);
        self
    }

    /// This action followed by its `next_action` successors.
    pub fn chain(&self) -> ActionChain<'_> {
        ActionChain { next: Some(self) }
    }

    /// Heads of the nested chains this action owns.
    pub fn child_chains(&self) -> Vec<&Action> {
        match &self.kind {
            ActionKind::Block { .. } => Vec::new(),
            ActionKind::Branch {
                on_success_action,
                on_failure_action,
                ..
            } => on_success_action
                .iter()
                .chain(on_failure_action.iter())
                .map(|a| a.as_ref())
                .collect(),
            ActionKind::Loop {
                first_loop_action, ..
            } => first_loop_action.iter().map(|a| a.as_ref()).collect(),
            ActionKind::Split { branches } => branches
                .iter()
                .filter_map(|b| b.first_action.as_deref())
                .collect(),
        }
    }
}

fn append(slot: &mut Option<Box<Action>>, action: Action) {
    match slot {
        Some(existing) => append(&mut existing.next_action, action),
        None => *slot = Some(Box::new(action)),
    }
}

pub struct ActionChain<'a> {
    next: Option<&'a Action>,
}

impl<'a> Iterator for ActionChain<'a> {
    type Item = &'a Action;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next_action.as_deref();
        Some(current)
    }
}

/// Per-step failure settings read by the failure policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandlingOptions {
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub retry_on_failure: bool,
}

/// Retry policy for failed block steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchOperator {
    TextContains,
    TextDoesNotContain,
    TextExactlyMatches,
    TextDoesNotExactlyMatch,
    TextStartsWith,
    TextDoesNotStartWith,
    TextEndsWith,
    TextDoesNotEndWith,
    Exists,
    DoesNotExist,
    BooleanIsTrue,
    BooleanIsFalse,
    NumberIsEqualTo,
    NumberIsGreaterThan,
    NumberIsLessThan,
}

impl BranchOperator {
    /// Operators whose result depends on `case_sensitive`.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            BranchOperator::TextContains
                | BranchOperator::TextDoesNotContain
                | BranchOperator::TextExactlyMatches
                | BranchOperator::TextDoesNotExactlyMatch
                | BranchOperator::TextStartsWith
                | BranchOperator::TextDoesNotStartWith
                | BranchOperator::TextEndsWith
                | BranchOperator::TextDoesNotEndWith
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCondition {
    pub operator: BranchOperator,
    pub first_value: Value,
    #[serde(default)]
    pub second_value: Option<Value>,
    #[serde(default)]
    pub case_sensitive: Option<bool>,
}

impl BranchCondition {
    pub fn new(operator: BranchOperator, first_value: impl Into<Value>) -> Self {
        Self {
            operator,
            first_value: first_value.into(),
            second_value: None,
            case_sensitive: None,
        }
    }

    pub fn compared_to(mut self, second_value: impl Into<Value>) -> Self {
        self.second_value = Some(second_value.into());
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_flow() -> FlowVersion {
        let branch = Action::branch(
            "check",
            vec![vec![BranchCondition::new(BranchOperator::Exists, "{{trigger.id}}")]],
        )
        .on_success(Action::block("notify", "debug.log"))
        .on_failure(Action::block("fallback", "debug.log"));

        FlowVersion::new(
            "sample",
            Trigger::new(TriggerKind::Webhook)
                .then(Action::block("step_1", "debug.log"))
                .then(branch)
                .then(Action::loop_over("each", "{{trigger.items}}").with_body(Action::block("inner", "debug.log"))),
        )
    }

    #[test]
    fn test_actions_are_listed_depth_first() {
        let flow = sample_flow();
        let names: Vec<_> = flow.actions().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["step_1", "check", "notify", "fallback", "each", "inner"]);
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_duplicate_step_names_are_rejected() {
        let flow = FlowVersion::new(
            "dup",
            Trigger::new(TriggerKind::Manual)
                .then(Action::block("a", "debug.log"))
                .then(Action::loop_over("l", json!([1])).with_body(Action::block("a", "debug.log"))),
        );
        assert!(matches!(flow.validate(), Err(WorkflowError::DuplicateStepName(n)) if n == "a"));
    }

    #[test]
    fn test_reserved_trigger_name_is_rejected() {
        let flow = FlowVersion::new(
            "reserved",
            Trigger::new(TriggerKind::Manual).then(Action::block("trigger", "debug.log")),
        );
        assert!(matches!(flow.validate(), Err(WorkflowError::Invalid(_))));
    }

    #[test]
    fn test_renamed_trigger_is_rejected() {
        let flow: FlowVersion = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "flow_id": Uuid::new_v4(),
            "display_name": "renamed",
            "trigger": { "name": "webhook_trigger", "kind": { "type": "webhook" } }
        }))
        .unwrap();
        assert!(matches!(flow.validate(), Err(WorkflowError::Invalid(m)) if m.contains("webhook_trigger")));

        let defaulted: FlowVersion = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "flow_id": Uuid::new_v4(),
            "display_name": "defaulted",
            "trigger": { "kind": { "type": "webhook" } }
        }))
        .unwrap();
        assert_eq!(defaulted.trigger.name, TRIGGER_STEP_NAME);
        assert!(defaulted.validate().is_ok());
    }

    #[test]
    fn test_action_deserializes_from_flat_json() {
        let action: Action = serde_json::from_value(json!({
            "name": "step_1",
            "type": "block",
            "block": "debug.log",
            "input": {"message": "{{trigger.name}}"},
            "next_action": {
                "name": "step_2",
                "type": "branch",
                "conditions": [[{"operator": "TEXT_CONTAINS", "first_value": "a", "second_value": "A"}]]
            }
        }))
        .unwrap();

        assert_eq!(action.kind.action_type(), ActionType::Block);
        let next = action.next_action.as_deref().unwrap();
        match &next.kind {
            ActionKind::Branch { conditions, .. } => {
                assert_eq!(conditions[0][0].operator, BranchOperator::TextContains);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_retry_delay_grows_with_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }
}
