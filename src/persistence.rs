//! # Dialog Persistence Collaborator
//!
//! The core does not own durable storage. It invokes this contract
//! fire-and-forget: once per inbound utterance and once per completed
//! request. Persistence errors are logged and never block correlation
//! resolution.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::request::DialogRequest;

/// External dialog-persistence contract
#[async_trait]
pub trait DialogStore: Send + Sync {
    /// Record the inbound utterance, called once at request intake
    async fn append_utterance(&self, request: &DialogRequest) -> Result<()>;

    /// Persist the completed request, called once when it turns terminal
    async fn save(&self, request: &DialogRequest) -> Result<()>;
}

/// In-memory store for tests and embedded use
#[derive(Default)]
pub struct InMemoryDialogStore {
    utterances: RwLock<Vec<DialogRequest>>,
    saved: RwLock<Vec<DialogRequest>>,
}

impl InMemoryDialogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn utterance_count(&self) -> usize {
        self.utterances.read().await.len()
    }

    pub async fn saved_count(&self) -> usize {
        self.saved.read().await.len()
    }

    pub async fn saved_requests(&self) -> Vec<DialogRequest> {
        self.saved.read().await.clone()
    }
}

#[async_trait]
impl DialogStore for InMemoryDialogStore {
    async fn append_utterance(&self, request: &DialogRequest) -> Result<()> {
        self.utterances.write().await.push(request.clone());
        Ok(())
    }

    async fn save(&self, request: &DialogRequest) -> Result<()> {
        self.saved.write().await.push(request.clone());
        Ok(())
    }
}

/// Store that always fails, for exercising the fire-and-forget policy
#[cfg(test)]
pub struct FailingDialogStore;

#[cfg(test)]
#[async_trait]
impl DialogStore for FailingDialogStore {
    async fn append_utterance(&self, _request: &DialogRequest) -> Result<()> {
        use crate::error::AgentError;
        Err(AgentError::Persistence {
            message: "store unavailable".to_string(),
        })
    }

    async fn save(&self, _request: &DialogRequest) -> Result<()> {
        use crate::error::AgentError;
        Err(AgentError::Persistence {
            message: "store unavailable".to_string(),
        })
    }
}
