//! # Orchestration Core
//!
//! The agent, its correlation store, and the per-stage dispatch queues.
//!
//! ```text
//! channel adapter ── register_msg ──▶ Agent ── dispatch ──▶ stage queues
//!        ▲                             │                        │
//!        └── correlation entry ◀── process ◀── workers/gateways ┘
//! ```

pub mod agent;
pub mod correlation;
pub mod dispatch;

pub use agent::Agent;
pub use correlation::{CompletionHandle, CorrelationError, CorrelationStore};
pub use dispatch::{Dispatcher, PendingInvocation};
