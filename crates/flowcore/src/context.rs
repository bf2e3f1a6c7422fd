//! Immutable snapshot of a run's progress.
//!
//! Every mutation returns a new [`ExecutionContext`]. The step map sits
//! behind an `Arc` and is only cloned when a shared snapshot is written to,
//! so a resumed run can keep reusing the context it was rehydrated from.

use crate::{ChildSteps, StepMap, StepOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    #[default]
    Running,
    Paused,
    Succeeded,
    Failed,
    Stopped,
    Timeout,
    InternalError,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Running | Verdict::Paused)
    }

    /// Whether moving from `self` to `next` is allowed: anything goes out
    /// of RUNNING/PAUSED, nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: Verdict) -> bool {
        !self.is_terminal() || *self == next
    }
}

/// Which iteration or branch of a container the executor is inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSlot {
    Iteration(usize),
    Branch(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub container: String,
    pub slot: PathSlot,
}

/// Why and where a run suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseMetadata {
    pub step_name: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub step_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    steps: Arc<StepMap>,
    verdict: Verdict,
    current_path: Vec<PathSegment>,
    pause: Option<PauseMetadata>,
    error: Option<RunError>,
    duration_ms: u64,
}

impl ExecutionContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rehydrate from persisted step outputs when resuming.
    pub fn from_steps(steps: StepMap) -> Self {
        Self {
            steps: Arc::new(steps),
            ..Self::default()
        }
    }

    pub fn steps(&self) -> &StepMap {
        &self.steps
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn current_path(&self) -> &[PathSegment] {
        &self.current_path
    }

    pub fn pause(&self) -> Option<&PauseMetadata> {
        self.pause.as_ref()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// New context with `output` stored under `name` in the map the
    /// current path points at.
    pub fn upsert_step(&self, name: impl Into<String>, output: StepOutput) -> Self {
        let mut next = self.clone();
        let steps = Arc::make_mut(&mut next.steps);
        match scope_mut(steps, &self.current_path) {
            Some(scope) => {
                scope.insert(name.into(), output);
            }
            None => {
                let name = name.into();
                tracing::warn!(step = %name, "Current path no longer exists, storing step at top level");
                steps.insert(name, output);
            }
        }
        next
    }

    /// New context with the verdict changed, unless the current verdict is
    /// already terminal.
    pub fn with_verdict(&self, verdict: Verdict) -> Self {
        if !self.verdict.can_transition_to(verdict) {
            tracing::debug!(from = ?self.verdict, to = ?verdict, "Ignoring verdict change after terminal state");
            return self.clone();
        }
        let mut next = self.clone();
        next.verdict = verdict;
        if verdict != Verdict::Paused {
            next.pause = None;
        }
        next
    }

    /// Suspend the run at the step described by `pause`.
    pub fn with_pause(&self, pause: PauseMetadata) -> Self {
        let mut next = self.with_verdict(Verdict::Paused);
        if next.verdict == Verdict::Paused {
            next.pause = Some(pause);
        }
        next
    }

    pub fn with_error(&self, error: RunError) -> Self {
        let mut next = self.clone();
        next.error = Some(error);
        next
    }

    pub fn with_duration(&self, duration_ms: u64) -> Self {
        let mut next = self.clone();
        next.duration_ms = duration_ms;
        next
    }

    /// Descend into an iteration or branch of the container step `container`,
    /// which must already be stored in the current scope.
    pub fn enter(&self, container: impl Into<String>, slot: PathSlot) -> Self {
        let mut next = self.clone();
        next.current_path.push(PathSegment {
            container: container.into(),
            slot,
        });
        // Materialize the slot so upserts under it have a home.
        let steps = Arc::make_mut(&mut next.steps);
        if scope_mut(steps, &next.current_path).is_none() {
            tracing::warn!(path = ?next.current_path, "Entered a path whose container is missing");
        }
        next
    }

    /// Leave the innermost iteration or branch.
    pub fn leave(&self) -> Self {
        let mut next = self.clone();
        next.current_path.pop();
        next
    }

    /// Steps stored directly in the map the current path points at.
    pub fn scope_steps(&self) -> Option<&StepMap> {
        scope(&self.steps, &self.current_path)
    }

    /// A step stored directly in the current scope.
    pub fn scope_step(&self, name: &str) -> Option<&StepOutput> {
        self.scope_steps().and_then(|steps| steps.get(name))
    }

    /// Replace the steps of one split branch. `split` must live in the
    /// current scope.
    pub fn with_branch_steps(&self, split: &str, branch: &str, branch_steps: StepMap) -> Self {
        let mut next = self.clone();
        let steps = Arc::make_mut(&mut next.steps);
        let mut path = self.current_path.clone();
        path.push(PathSegment {
            container: split.to_string(),
            slot: PathSlot::Branch(branch.to_string()),
        });
        match scope_mut(steps, &path) {
            Some(scope) => *scope = branch_steps,
            None => tracing::warn!(split, branch, "Split step missing while folding branch"),
        }
        next
    }

    /// Find a step by name at any depth.
    ///
    /// Top-level steps win. Otherwise the search descends into container
    /// steps: a container on the current path is entered at the current
    /// iteration or branch only, any other loop at its last iteration and
    /// any other split at the branch owning the step.
    pub fn step_output(&self, name: &str) -> Option<&StepOutput> {
        find_step(&self.steps, name, &self.current_path)
    }

    /// Value a template expression sees for the step `name`.
    pub fn step_value(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.step_output(name).map(|step| step.value())
    }
}

fn scope<'a>(steps: &'a StepMap, path: &[PathSegment]) -> Option<&'a StepMap> {
    let Some((segment, rest)) = path.split_first() else {
        return Some(steps);
    };
    let container = steps.get(&segment.container)?;
    let inner = match (&container.children, &segment.slot) {
        (Some(ChildSteps::Iterations(iterations)), PathSlot::Iteration(i)) => iterations.get(*i)?,
        (Some(ChildSteps::Branches(branches)), PathSlot::Branch(b)) => branches.get(b)?,
        _ => return None,
    };
    scope(inner, rest)
}

/// Like [`scope`], creating the iteration or branch maps the path names
/// when they do not exist yet.
fn scope_mut<'a>(steps: &'a mut StepMap, path: &[PathSegment]) -> Option<&'a mut StepMap> {
    let Some((segment, rest)) = path.split_first() else {
        return Some(steps);
    };
    let container = steps.get_mut(&segment.container)?;
    let inner = match &segment.slot {
        PathSlot::Iteration(i) => {
            if !matches!(container.children, Some(ChildSteps::Iterations(_))) {
                container.children = Some(ChildSteps::Iterations(Vec::new()));
            }
            let Some(ChildSteps::Iterations(iterations)) = container.children.as_mut() else {
                return None;
            };
            if iterations.len() <= *i {
                iterations.resize_with(i + 1, StepMap::new);
            }
            &mut iterations[*i]
        }
        PathSlot::Branch(branch) => {
            if !matches!(container.children, Some(ChildSteps::Branches(_))) {
                container.children = Some(ChildSteps::Branches(Default::default()));
            }
            let Some(ChildSteps::Branches(branches)) = container.children.as_mut() else {
                return None;
            };
            branches.entry(branch.clone()).or_default()
        }
    };
    scope_mut(inner, rest)
}

fn find_step<'a>(steps: &'a StepMap, name: &str, path: &[PathSegment]) -> Option<&'a StepOutput> {
    if let Some(step) = steps.get(name) {
        return Some(step);
    }

    for (step_name, step) in steps {
        let Some(children) = &step.children else {
            continue;
        };
        let on_path = path
            .split_first()
            .filter(|(segment, _)| segment.container == *step_name);

        let found = match (children, on_path) {
            (ChildSteps::Iterations(iterations), Some((segment, rest))) => match &segment.slot {
                PathSlot::Iteration(i) => iterations.get(*i).and_then(|m| find_step(m, name, rest)),
                PathSlot::Branch(_) => None,
            },
            (ChildSteps::Iterations(iterations), None) => {
                iterations.last().and_then(|m| find_step(m, name, &[]))
            }
            (ChildSteps::Branches(branches), Some((segment, rest))) => {
                let current = match &segment.slot {
                    PathSlot::Branch(b) => branches.get(b).and_then(|m| find_step(m, name, rest)),
                    PathSlot::Iteration(_) => None,
                };
                current.or_else(|| branches.values().find_map(|m| find_step(m, name, &[])))
            }
            (ChildSteps::Branches(branches), None) => {
                branches.values().find_map(|m| find_step(m, name, &[]))
            }
        };

        if found.is_some() {
            return found;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionType, StepStatus};
    use serde_json::json;

    fn block(name: &str, output: Value) -> StepOutput {
        StepOutput::new(name, ActionType::Block, Value::Null).succeeded(output)
    }

    #[test]
    fn test_empty_context_is_running() {
        let ctx = ExecutionContext::empty();
        assert_eq!(ctx.verdict(), Verdict::Running);
        assert!(ctx.steps().is_empty());
    }

    #[test]
    fn test_upsert_is_copy_on_write() {
        let base = ExecutionContext::empty().upsert_step("trigger", StepOutput::trigger(json!({"a": 1})));
        let next = base.upsert_step("step_1", block("step_1", json!(true)));

        assert_eq!(base.steps().len(), 1);
        assert_eq!(next.steps().len(), 2);
        assert_eq!(next.steps().get_index(0).map(|(k, _)| k.as_str()), Some("trigger"));
    }

    #[test]
    fn test_upsert_replaces_existing_entry() {
        let ctx = ExecutionContext::empty()
            .upsert_step("step_1", block("step_1", json!(1)).with_status(StepStatus::Paused))
            .upsert_step("step_1", block("step_1", json!(2)));
        assert_eq!(ctx.steps().len(), 1);
        assert_eq!(ctx.step_output("step_1").unwrap().output, json!(2));
    }

    #[test]
    fn test_terminal_verdict_is_final() {
        let ctx = ExecutionContext::empty()
            .with_verdict(Verdict::Paused)
            .with_verdict(Verdict::Running)
            .with_verdict(Verdict::Failed)
            .with_verdict(Verdict::Running);
        assert_eq!(ctx.verdict(), Verdict::Failed);
    }

    #[test]
    fn test_loop_steps_resolve_from_current_iteration() {
        let ctx = ExecutionContext::empty()
            .upsert_step("each", StepOutput::new("each", ActionType::Loop, Value::Null))
            .enter("each", PathSlot::Iteration(0))
            .upsert_step("inner", block("inner", json!("first")))
            .leave()
            .enter("each", PathSlot::Iteration(1));

        // Nothing ran yet in the second iteration.
        assert!(ctx.step_output("inner").is_none());

        let ctx = ctx.upsert_step("inner", block("inner", json!("second")));
        assert_eq!(ctx.step_output("inner").unwrap().output, json!("second"));

        // Outside the loop the last iteration wins.
        let outside = ctx.leave();
        assert_eq!(outside.step_output("inner").unwrap().output, json!("second"));
        assert_eq!(
            outside.step_value("each").unwrap().into_owned(),
            json!({"iterations": [{"inner": "first"}, {"inner": "second"}]})
        );
    }

    #[test]
    fn test_split_branch_steps_are_folded() {
        let base = ExecutionContext::empty()
            .upsert_step("fanout", StepOutput::new("fanout", ActionType::Split, Value::Null));

        let mut left = StepMap::new();
        left.insert("l".to_string(), block("l", json!(1)));
        let ctx = base.with_branch_steps("fanout", "left", left);

        assert_eq!(ctx.step_output("l").unwrap().output, json!(1));
        assert_eq!(ctx.step_value("fanout").unwrap().into_owned(), json!({"left": {"l": 1}}));
        assert!(base.step_output("l").is_none());
    }

    #[test]
    fn test_pause_is_cleared_when_resumed() {
        let pause = PauseMetadata {
            step_name: "approve".to_string(),
            request_id: None,
            resume_at: None,
            data: Value::Null,
        };
        let paused = ExecutionContext::empty().with_pause(pause);
        assert_eq!(paused.verdict(), Verdict::Paused);
        assert!(paused.pause().is_some());

        let running = paused.with_verdict(Verdict::Running);
        assert!(running.pause().is_none());
    }
}
