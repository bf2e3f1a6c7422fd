use crate::{ActionType, TRIGGER_STEP_NAME};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Ordered step name -> output mapping, in execution order.
pub type StepMap = IndexMap<String, StepOutput>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Trigger,
    Action,
}

/// Steps executed inside a container step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "steps", rename_all = "snake_case")]
pub enum ChildSteps {
    /// One map per loop iteration.
    Iterations(Vec<StepMap>),
    /// One map per split branch, keyed by branch name.
    Branches(IndexMap<String, StepMap>),
}

/// Result of one executed trigger or action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub name: String,
    pub action_type: ActionType,
    pub status: StepStatus,
    /// Resolved arguments actually handed to the step.
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub children: Option<ChildSteps>,
}

impl StepOutput {
    pub fn new(name: impl Into<String>, action_type: ActionType, input: Value) -> Self {
        Self {
            name: name.into(),
            action_type,
            status: StepStatus::Running,
            input,
            output: Value::Null,
            error_message: None,
            duration_ms: 0,
            children: None,
        }
    }

    /// Output of the trigger step, seeded from the trigger payload.
    pub fn trigger(payload: Value) -> Self {
        Self::new(TRIGGER_STEP_NAME, ActionType::Trigger, Value::Null).succeeded(payload)
    }

    pub fn succeeded(mut self, output: Value) -> Self {
        self.status = StepStatus::Succeeded;
        self.output = output;
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.error_message = Some(message.into());
        self
    }

    pub fn paused(mut self, output: Value) -> Self {
        self.status = StepStatus::Paused;
        self.output = output;
        self
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_children(mut self, children: ChildSteps) -> Self {
        self.children = Some(children);
        self
    }

    pub fn kind(&self) -> StepKind {
        if self.action_type == ActionType::Trigger {
            StepKind::Trigger
        } else {
            StepKind::Action
        }
    }

    /// Value a template expression sees when it references this step.
    ///
    /// Loops expose `iterations` (one `{step: value}` object per
    /// iteration) next to their own output; splits expose one key per
    /// branch.
    pub fn value(&self) -> Cow<'_, Value> {
        match &self.children {
            None => Cow::Borrowed(&self.output),
            Some(ChildSteps::Iterations(iterations)) => {
                let mut object = match &self.output {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                let folded = iterations.iter().map(values_of).collect();
                object.insert("iterations".to_string(), Value::Array(folded));
                Cow::Owned(Value::Object(object))
            }
            Some(ChildSteps::Branches(branches)) => {
                let mut object = match &self.output {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                for (branch, steps) in branches {
                    object.insert(branch.clone(), values_of(steps));
                }
                Cow::Owned(Value::Object(object))
            }
        }
    }
}

fn values_of(steps: &StepMap) -> Value {
    Value::Object(
        steps
            .iter()
            .map(|(name, step)| (name.clone(), step.value().into_owned()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loop_value_folds_iterations() {
        let mut first = StepMap::new();
        first.insert(
            "inner".to_string(),
            StepOutput::new("inner", ActionType::Block, Value::Null).succeeded(json!(1)),
        );
        let mut second = StepMap::new();
        second.insert(
            "inner".to_string(),
            StepOutput::new("inner", ActionType::Block, Value::Null).succeeded(json!(2)),
        );

        let step = StepOutput::new("each", ActionType::Loop, Value::Null)
            .succeeded(json!({"item": "b", "index": 2}))
            .with_children(ChildSteps::Iterations(vec![first, second]));

        assert_eq!(
            step.value().into_owned(),
            json!({"item": "b", "index": 2, "iterations": [{"inner": 1}, {"inner": 2}]})
        );
    }

    #[test]
    fn test_plain_value_is_borrowed() {
        let step = StepOutput::trigger(json!({"a": 1}));
        assert!(matches!(step.value(), Cow::Borrowed(_)));
        assert_eq!(step.kind(), StepKind::Trigger);
        assert_eq!(step.status, StepStatus::Succeeded);
    }
}
