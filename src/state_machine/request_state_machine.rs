use super::{events::RequestEvent, states::RequestState};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event:?}")]
    InvalidTransition { from: RequestState, event: RequestEvent },
}

pub type StateMachineResult<T> = std::result::Result<T, StateMachineError>;

/// In-memory request state machine.
///
/// Holds no I/O: the agent applies events under the per-request lock and
/// this type only validates that the lifecycle moves forward legally.
#[derive(Debug, Clone)]
pub struct RequestStateMachine {
    state: RequestState,
}

impl RequestStateMachine {
    pub fn new() -> Self {
        Self {
            state: RequestState::default(),
        }
    }

    pub fn current_state(&self) -> RequestState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Attempt to transition on the given event
    pub fn transition(&mut self, event: &RequestEvent) -> StateMachineResult<RequestState> {
        let target = Self::determine_target_state(self.state, event)?;
        self.state = target;
        Ok(target)
    }

    /// Determine the target state for a (state, event) pair
    pub fn determine_target_state(
        current: RequestState,
        event: &RequestEvent,
    ) -> StateMachineResult<RequestState> {
        let target = match (current, event) {
            (RequestState::Received, RequestEvent::InputCompleted) => RequestState::Annotating,

            // Branch completions accumulate without changing the state;
            // fan-in is a separate event once every branch reported
            (RequestState::Annotating, RequestEvent::BranchCompleted { .. }) => {
                RequestState::Annotating
            }
            (RequestState::Annotating, RequestEvent::BranchesFannedIn) => RequestState::Selecting,

            (RequestState::Selecting, RequestEvent::SelectorCompleted) => RequestState::Responding,
            (RequestState::Selecting, RequestEvent::SelectorSkipped) => RequestState::Responding,

            (RequestState::Responding, RequestEvent::ResponderCompleted) => RequestState::Resolved,

            // The deadline can fire from any non-terminal state
            (state, RequestEvent::DeadlineExpired) if !state.is_terminal() => {
                RequestState::TimedOut
            }

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.clone(),
                })
            }
        };

        Ok(target)
    }
}

impl Default for RequestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
