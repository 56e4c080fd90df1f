//! # Pipeline Composition
//!
//! Service descriptors and their composition into a validated, immutable
//! pipeline graph: one input stage, zero or more parallel annotator/skill
//! branches, an optional selector, and one responder.

pub mod pipeline;
pub mod service;

pub use pipeline::{Pipeline, PipelineBuilder};
pub use service::{
    Connector, ConnectorError, FnConnector, ForwardConnector, ResultHook, ServiceDescriptor,
    ServiceRole,
};
