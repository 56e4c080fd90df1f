#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Parley Core
//!
//! Async orchestration core for multi-skill dialog pipelines.
//!
//! ## Overview
//!
//! Parley routes an inbound user utterance through a configurable pipeline
//! of independently operating stages (input normalization, parallel
//! annotators and skills, a response selector, a responder) and returns or
//! asynchronously delivers the resulting reply. The crate owns only the
//! in-flight request lifecycle and coordination: stage logic, channel
//! adapters, and durable dialog storage are external collaborators.
//!
//! ## Architecture
//!
//! - A channel adapter calls [`orchestration::Agent::register_msg`], which
//!   creates a tracked request and dispatches it into the input stage.
//! - [`execution::Worker`] loops (or remote [`gateway::Gateway`] bridges)
//!   execute stage connectors and report completions through
//!   [`orchestration::Agent::process`].
//! - The agent fans out to parallel branches, fans in at the selector,
//!   dispatches the responder exactly once, and resolves the request's
//!   correlation entry, releasing any adapter blocked on the reply.
//!
//! ## Module Organization
//!
//! - [`request`] - In-flight request data model
//! - [`pipeline`] - Service descriptors and validated pipeline composition
//! - [`state_machine`] - Per-request lifecycle states and transitions
//! - [`orchestration`] - The agent, correlation store, and dispatch queues
//! - [`execution`] - Bounded-concurrency worker loops
//! - [`gateway`] - Out-of-process stage transports
//! - [`persistence`] - Dialog-persistence collaborator contract
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use parley_core::config::AgentConfig;
//! use parley_core::orchestration::Agent;
//! use parley_core::persistence::InMemoryDialogStore;
//! use parley_core::pipeline::{ForwardConnector, Pipeline, ServiceDescriptor, ServiceRole};
//! use parley_core::request::InboundMessage;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let pipeline = Pipeline::builder()
//!     .input_service(ServiceDescriptor::new(
//!         "input",
//!         Arc::new(ForwardConnector),
//!         1,
//!         [ServiceRole::Input],
//!     ))
//!     .responder_service(ServiceDescriptor::new(
//!         "responder",
//!         Arc::new(ForwardConnector),
//!         1,
//!         [ServiceRole::Responder],
//!     ))
//!     .build()
//!     .unwrap();
//!
//! let agent = Agent::new(
//!     pipeline,
//!     Arc::new(InMemoryDialogStore::new()),
//!     AgentConfig::default(),
//! );
//! let _workers = agent.spawn_workers();
//!
//! let reply = agent
//!     .register_msg(InboundMessage::new("hello", "user-1"))
//!     .await
//!     .unwrap();
//! assert!(reply.reply().is_some());
//! # });
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod logging;
pub mod orchestration;
pub mod persistence;
pub mod pipeline;
pub mod request;
pub mod state_machine;

pub use config::{AgentConfig, FaninPolicy};
pub use error::{AgentError, Result};
pub use orchestration::Agent;
pub use pipeline::{Pipeline, ServiceDescriptor, ServiceRole};
pub use request::{DialogRequest, InboundMessage, Registration, ResolvedReply, StageResult};
