//! # Agent Error Types
//!
//! Structured error handling for the orchestration core using thiserror
//! instead of `Box<dyn Error>` patterns.
//!
//! Protocol violations (unknown request, unknown stage, terminal request,
//! duplicate resolution) are integration errors: they abort the offending
//! call path and are surfaced to the caller, never silently swallowed.
//! Connector failures and deadline timeouts are recoverable and never appear
//! here; they travel through the pipeline as typed stage results.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the orchestration core
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Pipeline validation failed: {message}")]
    PipelineValidation { message: String },

    #[error("Unknown request: {request_id}")]
    UnknownRequest { request_id: Uuid },

    #[error("Request {request_id} is already registered")]
    DuplicateRequest { request_id: Uuid },

    #[error("Unknown stage '{stage}' for request {request_id}")]
    UnknownStage { request_id: Uuid, stage: String },

    #[error("Request {request_id} is already terminal, stage '{stage}' result rejected")]
    TerminalRequest { request_id: Uuid, stage: String },

    #[error("Correlation entry for {request_id} resolved more than once")]
    DuplicateResolution { request_id: Uuid },

    #[error("Pending queue for stage '{stage}' is closed")]
    QueueClosed { stage: String },

    #[error("No stage named '{stage}' in the pipeline")]
    NoSuchStage { stage: String },

    #[error("Worker for stage '{stage}' already taken")]
    WorkerAlreadyTaken { stage: String },

    #[error("State transition error: {message}")]
    StateTransition { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Gateway error: {transport}: {message}")]
    Gateway { transport: String, message: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
