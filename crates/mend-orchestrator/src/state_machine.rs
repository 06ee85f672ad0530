//! Pure state machine for plan execution control flow
//!
//! This module has NO I/O. The orchestrator feeds it events and carries out
//! the returned actions.
//!
//! - Pure function: transition(state, event) -> (state, actions)
//! - A step is dispatched at most twice: the original attempt and one retry
//! - Invalid transitions go to Failed state (never panic)

use mend_core::FinalStatus;

/// Highest attempt number a step can reach
pub const MAX_ATTEMPTS: u32 = 2;

/// Plan execution state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// No plan accepted yet
    Idle,
    /// Plan accepted, waiting to start dispatching
    Planning { strategy: String, total: usize },
    /// A step attempt is in flight
    Executing {
        step: usize,
        attempt: u32,
        total: usize,
        failed: usize,
    },
    /// The first attempt of a step failed and recovery is running
    Healing {
        step: usize,
        total: usize,
        failed: usize,
    },
    Completed { status: FinalStatus },
    Failed { error: String },
}

/// Events reported by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartPlan { strategy: String, steps: usize },
    PlanReady,
    StepSucceeded,
    StepFailed,
    RecoveryFinished { recovered: bool },
    /// External cancellation, observed between steps
    Cancel,
    Error { message: String },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DispatchStep { step: usize, attempt: u32 },
    Recover { step: usize },
    Finish { status: FinalStatus },
    LogActivity { message: String },
}

/// Move to the next step, or finish when none remain
fn advance(step: usize, total: usize, failed: usize) -> (State, Vec<Action>) {
    let next = step + 1;
    if next >= total {
        finish(if failed == 0 {
            FinalStatus::Unlocked
        } else {
            FinalStatus::PartiallyLocked
        })
    } else {
        (
            State::Executing {
                step: next,
                attempt: 1,
                total,
                failed,
            },
            vec![Action::DispatchStep {
                step: next,
                attempt: 1,
            }],
        )
    }
}

fn finish(status: FinalStatus) -> (State, Vec<Action>) {
    (
        State::Completed { status },
        vec![
            Action::LogActivity {
                message: format!("Plan finished: {}", status),
            },
            Action::Finish { status },
        ],
    )
}

/// Pure state transition function
///
/// Any invalid transition results in a Failed state with a descriptive
/// error. This function never panics.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Idle, Event::StartPlan { strategy, steps }) => {
            let actions = vec![Action::LogActivity {
                message: format!("Starting {} plan with {} steps", strategy, steps),
            }];
            (
                State::Planning {
                    strategy,
                    total: steps,
                },
                actions,
            )
        }

        (State::Planning { total, .. }, Event::PlanReady) => {
            if total == 0 {
                finish(FinalStatus::Unlocked)
            } else {
                (
                    State::Executing {
                        step: 0,
                        attempt: 1,
                        total,
                        failed: 0,
                    },
                    vec![Action::DispatchStep {
                        step: 0,
                        attempt: 1,
                    }],
                )
            }
        }

        (State::Executing { step, total, failed, .. }, Event::StepSucceeded) => {
            advance(step, total, failed)
        }

        (
            State::Executing {
                step,
                attempt,
                total,
                failed,
            },
            Event::StepFailed,
        ) => {
            if attempt < MAX_ATTEMPTS {
                (
                    State::Healing {
                        step,
                        total,
                        failed,
                    },
                    vec![Action::Recover { step }],
                )
            } else {
                let (state, mut actions) = advance(step, total, failed + 1);
                actions.insert(
                    0,
                    Action::LogActivity {
                        message: format!("Step {} failed after retry", step),
                    },
                );
                (state, actions)
            }
        }

        (
            State::Healing {
                step,
                total,
                failed,
            },
            Event::RecoveryFinished { recovered },
        ) => {
            if recovered {
                (
                    State::Executing {
                        step,
                        attempt: MAX_ATTEMPTS,
                        total,
                        failed,
                    },
                    vec![Action::DispatchStep {
                        step,
                        attempt: MAX_ATTEMPTS,
                    }],
                )
            } else {
                advance(step, total, failed + 1)
            }
        }

        // Cancellation is only honored between steps
        (State::Executing { attempt: 1, .. }, Event::Cancel) => finish(FinalStatus::Cancelled),

        (State::Idle, Event::Error { message })
        | (State::Planning { .. }, Event::Error { message })
        | (State::Executing { .. }, Event::Error { message })
        | (State::Healing { .. }, Event::Error { message }) => {
            let actions = vec![Action::LogActivity {
                message: format!("Error: {}", message),
            }];
            (State::Failed { error: message }, actions)
        }

        (State::Completed { status }, event) => (
            State::Failed {
                error: format!(
                    "Invalid transition from Completed state ({}) on event: {:?}",
                    status, event
                ),
            },
            vec![],
        ),

        (state, event) => (
            State::Failed {
                error: format!(
                    "Invalid state transition: {:?} cannot handle event {:?}",
                    state, event
                ),
            },
            vec![],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(steps: usize) -> State {
        let (state, _) = transition(
            State::Idle,
            Event::StartPlan {
                strategy: "direct_bypass".to_string(),
                steps,
            },
        );
        let (state, _) = transition(state, Event::PlanReady);
        state
    }

    #[test]
    fn test_happy_path() {
        let (state, actions) = transition(
            State::Idle,
            Event::StartPlan {
                strategy: "direct_bypass".to_string(),
                steps: 2,
            },
        );
        assert!(matches!(state, State::Planning { total: 2, .. }));
        assert!(matches!(actions[0], Action::LogActivity { .. }));

        let (state, actions) = transition(state, Event::PlanReady);
        assert_eq!(actions, vec![Action::DispatchStep { step: 0, attempt: 1 }]);

        let (state, actions) = transition(state, Event::StepSucceeded);
        assert_eq!(actions, vec![Action::DispatchStep { step: 1, attempt: 1 }]);

        let (state, actions) = transition(state, Event::StepSucceeded);
        assert_eq!(
            state,
            State::Completed {
                status: FinalStatus::Unlocked
            }
        );
        assert!(actions.contains(&Action::Finish {
            status: FinalStatus::Unlocked
        }));
    }

    #[test]
    fn test_recovered_step_is_retried_once() {
        let state = started(1);

        let (state, actions) = transition(state, Event::StepFailed);
        assert!(matches!(state, State::Healing { step: 0, .. }));
        assert_eq!(actions, vec![Action::Recover { step: 0 }]);

        let (state, actions) = transition(state, Event::RecoveryFinished { recovered: true });
        assert_eq!(actions, vec![Action::DispatchStep { step: 0, attempt: 2 }]);

        // A failed retry never heals again
        let (state, actions) = transition(state, Event::StepFailed);
        assert!(!actions.iter().any(|a| matches!(a, Action::Recover { .. })));
        assert_eq!(
            state,
            State::Completed {
                status: FinalStatus::PartiallyLocked
            }
        );
    }

    #[test]
    fn test_successful_retry_clears_failure() {
        let state = started(2);
        let (state, _) = transition(state, Event::StepFailed);
        let (state, _) = transition(state, Event::RecoveryFinished { recovered: true });
        let (state, _) = transition(state, Event::StepSucceeded);
        let (state, _) = transition(state, Event::StepSucceeded);

        assert_eq!(
            state,
            State::Completed {
                status: FinalStatus::Unlocked
            }
        );
    }

    #[test]
    fn test_unrecovered_step_continues_to_next() {
        let state = started(3);
        let (state, _) = transition(state, Event::StepSucceeded);
        let (state, _) = transition(state, Event::StepFailed);
        let (state, actions) = transition(state, Event::RecoveryFinished { recovered: false });

        assert!(matches!(state, State::Executing { step: 2, failed: 1, .. }));
        assert_eq!(actions, vec![Action::DispatchStep { step: 2, attempt: 1 }]);

        let (state, _) = transition(state, Event::StepSucceeded);
        assert_eq!(
            state,
            State::Completed {
                status: FinalStatus::PartiallyLocked
            }
        );
    }

    #[test]
    fn test_empty_plan_completes() {
        let state = started(0);
        assert_eq!(
            state,
            State::Completed {
                status: FinalStatus::Unlocked
            }
        );
    }

    #[test]
    fn test_cancel_between_steps() {
        let state = started(3);
        let (state, _) = transition(state, Event::StepSucceeded);

        let (state, actions) = transition(state, Event::Cancel);
        assert_eq!(
            state,
            State::Completed {
                status: FinalStatus::Cancelled
            }
        );
        assert!(actions.contains(&Action::Finish {
            status: FinalStatus::Cancelled
        }));
    }

    #[test]
    fn test_cancel_is_rejected_mid_retry() {
        let state = started(1);
        let (state, _) = transition(state, Event::StepFailed);
        let (state, _) = transition(state, Event::RecoveryFinished { recovered: true });

        let (state, _) = transition(state, Event::Cancel);
        assert!(matches!(state, State::Failed { .. }));
    }

    #[test]
    fn test_invalid_transitions_never_panic() {
        let (state, actions) = transition(State::Idle, Event::StepSucceeded);
        assert!(matches!(state, State::Failed { .. }));
        assert!(actions.is_empty());

        let (state, _) = transition(
            State::Completed {
                status: FinalStatus::Unlocked,
            },
            Event::PlanReady,
        );
        assert!(matches!(state, State::Failed { .. }));

        let (state, _) = transition(
            State::Failed {
                error: "boom".to_string(),
            },
            Event::StepFailed,
        );
        assert!(matches!(state, State::Failed { .. }));
    }

    #[test]
    fn test_error_from_healing() {
        let state = started(1);
        let (state, _) = transition(state, Event::StepFailed);

        let (state, _) = transition(
            state,
            Event::Error {
                message: "transport vanished".to_string(),
            },
        );
        assert_eq!(
            state,
            State::Failed {
                error: "transport vanished".to_string()
            }
        );
    }
}
