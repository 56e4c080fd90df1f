//! # Request State Machine
//!
//! Per-request lifecycle management from intake to final response.
//! The agent applies events under the per-request lock; the machine only
//! validates transitions and keeps terminal states final.

pub mod events;
pub mod request_state_machine;
pub mod states;

pub use events::RequestEvent;
pub use request_state_machine::{RequestStateMachine, StateMachineError, StateMachineResult};
pub use states::RequestState;
