use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::persistence::DialogStore;
use crate::request::{DialogRequest, StageResult};

/// Role tags a pipeline stage can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    /// Entry stage: normalizes the inbound utterance
    Input,
    /// Parallel branch enriching the request with annotations
    Annotator,
    /// Parallel branch producing a candidate reply
    Skill,
    /// Fan-in stage choosing among branch results
    Selector,
    /// Exit stage producing the final reply
    Responder,
}

impl ServiceRole {
    /// Annotators and skills are both parallel branches between the input
    /// stage and the selector
    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Annotator | Self::Skill)
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Annotator => write!(f, "annotator"),
            Self::Skill => write!(f, "skill"),
            Self::Selector => write!(f, "selector"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// Error returned by a stage connector invocation
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Connector invocation failed: {message}")]
    Invocation { message: String },

    #[error("Connector payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Invocation function of one pipeline stage.
///
/// Implementations run arbitrary annotator/skill/selector logic, in or out
/// of process. Errors are recoverable from the orchestrator's point of view:
/// the worker converts them into a failed-branch result and fan-in proceeds.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn send(&self, payload: Value) -> Result<Value, ConnectorError>;
}

/// Connector that forwards its payload unchanged.
///
/// Used for responder stages whose reply is the selector's output, and for
/// input stages that need no normalization.
#[derive(Debug, Default, Clone)]
pub struct ForwardConnector;

#[async_trait]
impl Connector for ForwardConnector {
    async fn send(&self, payload: Value) -> Result<Value, ConnectorError> {
        Ok(payload)
    }
}

/// Adapter turning an async closure into a [`Connector`]
pub struct FnConnector {
    func: Arc<
        dyn Fn(Value) -> BoxFuture<'static, Result<Value, ConnectorError>> + Send + Sync + 'static,
    >,
}

impl FnConnector {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, ConnectorError>> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Connector for FnConnector {
    async fn send(&self, payload: Value) -> Result<Value, ConnectorError> {
        (self.func)(payload).await
    }
}

/// Post-result callback invoked after the agent records a stage result.
///
/// Receives explicit context (request snapshot, recorded result, persistence
/// collaborator) instead of being a bound method on a shared manager.
/// Failures are logged and never block the pipeline.
#[async_trait]
pub trait ResultHook: Send + Sync {
    async fn on_result(
        &self,
        request: &DialogRequest,
        result: &StageResult,
        store: &dyn DialogStore,
    );
}

/// Static definition of one pipeline stage
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    roles: HashSet<ServiceRole>,
    concurrency_limit: usize,
    connector: Arc<dyn Connector>,
    result_hook: Option<Arc<dyn ResultHook>>,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        concurrency_limit: usize,
        roles: impl IntoIterator<Item = ServiceRole>,
    ) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().collect(),
            concurrency_limit,
            connector,
            result_hook: None,
        }
    }

    pub fn with_result_hook(mut self, hook: Arc<dyn ResultHook>) -> Self {
        self.result_hook = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn result_hook(&self) -> Option<Arc<dyn ResultHook>> {
        self.result_hook.clone()
    }

    pub fn has_role(&self, role: ServiceRole) -> bool {
        self.roles.contains(&role)
    }

    /// Check whether this stage runs as a parallel branch
    pub fn is_branch(&self) -> bool {
        self.roles.iter().any(ServiceRole::is_branch)
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_connector_echoes_payload() {
        let connector = ForwardConnector;
        let payload = serde_json::json!({"text": "hi"});
        let result = connector.send(payload.clone()).await.unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_fn_connector() {
        let connector = FnConnector::new(|payload| {
            Box::pin(async move { Ok(serde_json::json!({ "echo": payload })) })
        });
        let result = connector.send(serde_json::json!("hello")).await.unwrap();
        assert_eq!(result["echo"], "hello");
    }

    #[test]
    fn test_branch_roles() {
        assert!(ServiceRole::Skill.is_branch());
        assert!(ServiceRole::Annotator.is_branch());
        assert!(!ServiceRole::Input.is_branch());
        assert!(!ServiceRole::Selector.is_branch());
        assert!(!ServiceRole::Responder.is_branch());
    }
}
