//! Reconciles the engine's transport signal with the run verdict.
//!
//! The rules are checked in order and the first match wins. Anything no
//! rule claims is an internal error.

use crate::engine::EngineResponseStatus;
use crate::job::{JobStatus, RunStatus};
use flowcore::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The run reached its own outcome and the engine already recorded it.
    Success,
    /// The worker must persist this status with a termination reason.
    Terminated(RunStatus),
}

impl Classification {
    /// Only an internal error fails the queue job; a timed out or stopped
    /// run still completes it.
    pub fn job_status(&self) -> JobStatus {
        match self {
            Classification::Terminated(RunStatus::InternalError) => JobStatus::Failed,
            _ => JobStatus::Completed,
        }
    }
}

struct Rule {
    name: &'static str,
    matches: fn(EngineResponseStatus, Verdict) -> bool,
    outcome: Classification,
}

const RULES: &[Rule] = &[
    Rule {
        name: "success",
        matches: |status, verdict| {
            status == EngineResponseStatus::Ok
                && !matches!(verdict, Verdict::Timeout | Verdict::Stopped | Verdict::InternalError)
        },
        outcome: Classification::Success,
    },
    Rule {
        name: "timeout",
        matches: |status, verdict| status == EngineResponseStatus::Timeout || verdict == Verdict::Timeout,
        outcome: Classification::Terminated(RunStatus::Timeout),
    },
    Rule {
        name: "stopped",
        matches: |_, verdict| verdict == Verdict::Stopped,
        outcome: Classification::Terminated(RunStatus::Stopped),
    },
];

pub fn classify(status: EngineResponseStatus, verdict: Verdict) -> Classification {
    match RULES.iter().find(|rule| (rule.matches)(status, verdict)) {
        Some(rule) => {
            tracing::debug!(rule = rule.name, ?status, ?verdict, "Classified engine response");
            rule.outcome
        }
        None => Classification::Terminated(RunStatus::InternalError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUSES: [EngineResponseStatus; 3] = [
        EngineResponseStatus::Ok,
        EngineResponseStatus::Timeout,
        EngineResponseStatus::Error,
    ];

    const VERDICTS: [Verdict; 7] = [
        Verdict::Running,
        Verdict::Paused,
        Verdict::Succeeded,
        Verdict::Failed,
        Verdict::Stopped,
        Verdict::Timeout,
        Verdict::InternalError,
    ];

    fn expected(status: EngineResponseStatus, verdict: Verdict) -> Classification {
        use Classification::*;
        use EngineResponseStatus as S;

        match (status, verdict) {
            (S::Ok, Verdict::Running | Verdict::Paused | Verdict::Succeeded | Verdict::Failed) => Success,
            (S::Timeout, _) | (_, Verdict::Timeout) => Terminated(RunStatus::Timeout),
            (_, Verdict::Stopped) => Terminated(RunStatus::Stopped),
            _ => Terminated(RunStatus::InternalError),
        }
    }

    #[test]
    fn test_every_combination() {
        for status in STATUSES {
            for verdict in VERDICTS {
                assert_eq!(
                    classify(status, verdict),
                    expected(status, verdict),
                    "status {:?}, verdict {:?}",
                    status,
                    verdict
                );
            }
        }
    }

    #[test]
    fn test_documented_cases() {
        assert_eq!(classify(EngineResponseStatus::Ok, Verdict::Succeeded), Classification::Success);
        assert_eq!(
            classify(EngineResponseStatus::Timeout, Verdict::Succeeded),
            Classification::Terminated(RunStatus::Timeout)
        );
        assert_eq!(
            classify(EngineResponseStatus::Ok, Verdict::Timeout),
            Classification::Terminated(RunStatus::Timeout)
        );
        assert_eq!(
            classify(EngineResponseStatus::Timeout, Verdict::Stopped),
            Classification::Terminated(RunStatus::Timeout)
        );
        assert_eq!(
            classify(EngineResponseStatus::Error, Verdict::Stopped),
            Classification::Terminated(RunStatus::Stopped)
        );
        assert_eq!(
            classify(EngineResponseStatus::Error, Verdict::Succeeded),
            Classification::Terminated(RunStatus::InternalError)
        );
        assert_eq!(
            classify(EngineResponseStatus::Ok, Verdict::InternalError),
            Classification::Terminated(RunStatus::InternalError)
        );
    }

    #[test]
    fn test_only_internal_error_fails_the_job() {
        assert_eq!(Classification::Success.job_status(), JobStatus::Completed);
        assert_eq!(Classification::Terminated(RunStatus::Timeout).job_status(), JobStatus::Completed);
        assert_eq!(Classification::Terminated(RunStatus::Stopped).job_status(), JobStatus::Completed);
        assert_eq!(
            Classification::Terminated(RunStatus::InternalError).job_status(),
            JobStatus::Failed
        );
    }
}
