/// Scheduler run state machine - Stateright model
/// Formally checks the daily run: evaluate -> arm -> sleep -> act -> idle
///
/// Run with: cargo test --release run_model -- --nocapture

use stateright::*;

/// Run states matching the scheduler implementation
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum RunState {
    Evaluating,
    IdleTodayDone,
    IdleNotWorking,
    Sleeping,
    LoggingIn { attempts: u8 },
    Punching,
    IdleLoop { succeeded: bool },
}

/// Events that can occur during a run
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum RunAction {
    FindAlreadyDone,
    FindNotWorkingDay,
    ArmWindow,
    TargetReached,
    CachedTokenHit,
    LoginOk,
    LoginAuthRejected,
    LoginTransportFail,
    PunchOk,
    PunchAlreadyDone,
    PunchLogicalFail,
    PunchTransportFail,
}

/// Complete run state including the shared token store
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RunModel {
    pub state: RunState,
    pub has_token: bool,
    pub auth_rejected: bool,
    pub success_recorded: bool,
}

/// Configuration for the model checker
#[derive(Clone)]
pub struct RunChecker {
    pub max_login_attempts: u8,
}

impl Default for RunChecker {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
        }
    }
}

impl Model for RunChecker {
    type State = RunModel;
    type Action = RunAction;

    fn init_states(&self) -> Vec<Self::State> {
        // A run may start with or without a restored persisted token
        [false, true]
            .into_iter()
            .map(|has_token| RunModel {
                state: RunState::Evaluating,
                has_token,
                auth_rejected: false,
                success_recorded: false,
            })
            .collect()
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        match &state.state {
            RunState::Evaluating => {
                actions.push(RunAction::FindAlreadyDone);
                actions.push(RunAction::FindNotWorkingDay);
                actions.push(RunAction::ArmWindow);
            }
            RunState::Sleeping => {
                actions.push(RunAction::TargetReached);
            }
            RunState::LoggingIn { .. } => {
                if state.has_token {
                    actions.push(RunAction::CachedTokenHit);
                } else {
                    actions.push(RunAction::LoginOk);
                    actions.push(RunAction::LoginAuthRejected);
                    actions.push(RunAction::LoginTransportFail);
                }
            }
            RunState::Punching => {
                actions.push(RunAction::PunchOk);
                actions.push(RunAction::PunchAlreadyDone);
                actions.push(RunAction::PunchLogicalFail);
                actions.push(RunAction::PunchTransportFail);
            }
            // Idle states are terminal within one process run
            RunState::IdleTodayDone | RunState::IdleNotWorking | RunState::IdleLoop { .. } => {}
        }
    }

    fn next_state(&self, last: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = last.clone();
        match (&last.state, action) {
            (RunState::Evaluating, RunAction::FindAlreadyDone) => {
                next.state = RunState::IdleTodayDone;
            }
            (RunState::Evaluating, RunAction::FindNotWorkingDay) => {
                next.state = RunState::IdleNotWorking;
            }
            (RunState::Evaluating, RunAction::ArmWindow) => {
                next.state = RunState::Sleeping;
            }
            (RunState::Sleeping, RunAction::TargetReached) => {
                next.state = RunState::LoggingIn { attempts: 0 };
            }
            (RunState::LoggingIn { .. }, RunAction::CachedTokenHit) => {
                next.state = RunState::Punching;
            }
            (RunState::LoggingIn { .. }, RunAction::LoginOk) => {
                next.has_token = true;
                next.state = RunState::Punching;
            }
            (RunState::LoggingIn { .. }, RunAction::LoginAuthRejected) => {
                next.has_token = false;
                next.auth_rejected = true;
                next.state = RunState::IdleLoop { succeeded: false };
            }
            (RunState::LoggingIn { attempts }, RunAction::LoginTransportFail) => {
                let attempts = attempts + 1;
                next.state = if attempts >= self.max_login_attempts {
                    RunState::IdleLoop { succeeded: false }
                } else {
                    RunState::LoggingIn { attempts }
                };
            }
            (RunState::Punching, RunAction::PunchOk)
            | (RunState::Punching, RunAction::PunchAlreadyDone) => {
                next.success_recorded = true;
                next.state = RunState::IdleLoop { succeeded: true };
            }
            (RunState::Punching, RunAction::PunchLogicalFail)
            | (RunState::Punching, RunAction::PunchTransportFail) => {
                next.state = RunState::IdleLoop { succeeded: false };
            }
            _ => return None,
        }
        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("punch only with token", |_, state: &RunModel| {
                state.state != RunState::Punching || state.has_token
            }),
            Property::always("success only after a successful punch", |_, state: &RunModel| {
                !state.success_recorded
                    || matches!(state.state, RunState::IdleLoop { succeeded: true })
            }),
            Property::always("token survives unless auth was rejected", |_, state: &RunModel| {
                // The only transition that drops a held token is the
                // distinguished auth rejection
                !state.auth_rejected
                    || (!state.has_token
                        && matches!(state.state, RunState::IdleLoop { succeeded: false }))
            }),
            Property::always("auth rejection never punches", |_, state: &RunModel| {
                !(state.auth_rejected && state.success_recorded)
            }),
            Property::eventually("run parks in an idle state", |_, state: &RunModel| {
                matches!(
                    state.state,
                    RunState::IdleTodayDone
                        | RunState::IdleNotWorking
                        | RunState::IdleLoop { .. }
                )
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn run_model_check_safety() {
        let checker = RunChecker::default().checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();
    }

    #[test]
    fn run_model_check_all_states_reachable() {
        let checker = RunChecker::default().checker().spawn_bfs().join();

        assert!(
            checker.unique_state_count() > 10,
            "Expected more than 10 states, got {}",
            checker.unique_state_count()
        );
    }

    #[test]
    fn run_model_successful_day_path() {
        // Evaluating -> Sleeping -> LoggingIn -> Punching -> IdleLoop
        let model = RunChecker::default();

        let mut state = model.init_states()[0].clone();
        assert_eq!(state.state, RunState::Evaluating);
        assert!(!state.has_token);

        state = model.next_state(&state, RunAction::ArmWindow).unwrap();
        assert_eq!(state.state, RunState::Sleeping);

        state = model.next_state(&state, RunAction::TargetReached).unwrap();
        assert_eq!(state.state, RunState::LoggingIn { attempts: 0 });

        state = model.next_state(&state, RunAction::LoginOk).unwrap();
        assert_eq!(state.state, RunState::Punching);
        assert!(state.has_token);

        state = model.next_state(&state, RunAction::PunchOk).unwrap();
        assert_eq!(state.state, RunState::IdleLoop { succeeded: true });
        assert!(state.success_recorded);
    }

    #[test]
    fn run_model_auth_rejection_path() {
        let model = RunChecker::default();

        // Start with a restored token: the cached-token path punches
        // without logging in
        let cached = model.init_states()[1].clone();
        assert!(cached.has_token);

        // And the no-token path can be rejected
        let mut state = model.init_states()[0].clone();
        state = model.next_state(&state, RunAction::ArmWindow).unwrap();
        state = model.next_state(&state, RunAction::TargetReached).unwrap();
        state = model.next_state(&state, RunAction::LoginAuthRejected).unwrap();

        assert_eq!(state.state, RunState::IdleLoop { succeeded: false });
        assert!(!state.has_token);
        assert!(state.auth_rejected);
        assert!(!state.success_recorded);
    }

    #[test]
    fn run_model_transport_failures_are_bounded() {
        let model = RunChecker::default();

        let mut state = model.init_states()[0].clone();
        state = model.next_state(&state, RunAction::ArmWindow).unwrap();
        state = model.next_state(&state, RunAction::TargetReached).unwrap();

        for expected_attempts in 1..model.max_login_attempts {
            state = model
                .next_state(&state, RunAction::LoginTransportFail)
                .unwrap();
            assert_eq!(
                state.state,
                RunState::LoggingIn {
                    attempts: expected_attempts
                }
            );
        }

        // The final failed attempt ends the run
        state = model
            .next_state(&state, RunAction::LoginTransportFail)
            .unwrap();
        assert_eq!(state.state, RunState::IdleLoop { succeeded: false });
    }
}
