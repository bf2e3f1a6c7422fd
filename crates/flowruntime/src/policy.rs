use flowcore::{Action, ActionKind, BlockError, ErrorHandlingOptions, RetryPolicy};
use std::time::Duration;

/// What to do after a block step failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDecision {
    /// Run the step again after `delay`.
    Retry { delay: Duration },
    /// Record the failure and move on to the next step.
    Continue,
    /// Record the failure and end the run with verdict FAILED.
    FailRun,
}

/// Decides how a step failure affects the run.
pub trait FailurePolicy: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn on_failure(&self, action: &Action, attempt: u32, error: &BlockError) -> FailureDecision;
}

/// Follows the step's own `error_handling` settings: retry while the
/// retry budget lasts, then continue or fail the run.
#[derive(Debug, Clone, Default)]
pub struct StepSettingsPolicy {
    retry: RetryPolicy,
}

impl StepSettingsPolicy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

impl FailurePolicy for StepSettingsPolicy {
    fn on_failure(&self, action: &Action, attempt: u32, error: &BlockError) -> FailureDecision {
        let options = match &action.kind {
            ActionKind::Block { error_handling, .. } => *error_handling,
            _ => ErrorHandlingOptions::default(),
        };

        let retryable = !matches!(error, BlockError::Cancelled);
        if options.retry_on_failure && retryable && attempt < self.retry.max_attempts {
            return FailureDecision::Retry {
                delay: self.retry.delay_for(attempt),
            };
        }

        if options.continue_on_failure {
            FailureDecision::Continue
        } else {
            FailureDecision::FailRun
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StepSettingsPolicy {
        StepSettingsPolicy::new(RetryPolicy {
            max_attempts: 3,
            delay_ms: 10,
            backoff_multiplier: 2.0,
        })
    }

    fn failure() -> BlockError {
        BlockError::ExecutionFailed("boom".to_string())
    }

    #[test]
    fn test_default_settings_fail_the_run() {
        let action = flowcore::Action::block("a", "debug.log");
        assert_eq!(policy().on_failure(&action, 1, &failure()), FailureDecision::FailRun);
    }

    #[test]
    fn test_retries_until_budget_is_spent() {
        let action = flowcore::Action::block("a", "debug.log").with_error_handling(true, true);
        assert_eq!(
            policy().on_failure(&action, 1, &failure()),
            FailureDecision::Retry { delay: Duration::from_millis(10) }
        );
        assert_eq!(
            policy().on_failure(&action, 2, &failure()),
            FailureDecision::Retry { delay: Duration::from_millis(20) }
        );
        assert_eq!(policy().on_failure(&action, 3, &failure()), FailureDecision::Continue);
    }

    #[test]
    fn test_cancellation_is_never_retried() {
        let action = flowcore::Action::block("a", "debug.log").with_error_handling(false, true);
        assert_eq!(policy().on_failure(&action, 1, &BlockError::Cancelled), FailureDecision::FailRun);
    }
}
