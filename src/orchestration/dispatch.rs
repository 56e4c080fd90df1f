//! # Pending-Invocation Dispatch
//!
//! One bounded queue per pipeline stage. The agent enqueues pending
//! invocations; exactly one worker (or gateway bridge) consumes each stage's
//! queue. Backpressure comes from the bounded channel.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::pipeline::Pipeline;

/// A (request, stage, payload) triple enqueued for a worker.
///
/// Created by the agent at dispatch time, consumed exactly once by the bound
/// worker, discarded after the corresponding `process` call.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    pub request_id: Uuid,
    pub service: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingInvocation {
    pub fn new(request_id: Uuid, service: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id,
            service: service.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// Per-stage pending-invocation queues for one pipeline
pub struct Dispatcher {
    senders: HashMap<String, mpsc::Sender<PendingInvocation>>,
    receivers: Mutex<HashMap<String, mpsc::Receiver<PendingInvocation>>>,
}

impl Dispatcher {
    pub fn new(pipeline: &Pipeline, capacity: usize) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for service in pipeline.services() {
            let (tx, rx) = mpsc::channel(capacity);
            senders.insert(service.name().to_string(), tx);
            receivers.insert(service.name().to_string(), rx);
        }
        Self {
            senders,
            receivers: Mutex::new(receivers),
        }
    }

    /// Enqueue an invocation for its stage's consumer
    pub async fn dispatch(&self, invocation: PendingInvocation) -> Result<()> {
        let stage = invocation.service.clone();
        let sender = self
            .senders
            .get(&stage)
            .ok_or_else(|| AgentError::UnknownStage {
                request_id: invocation.request_id,
                stage: stage.clone(),
            })?;
        sender
            .send(invocation)
            .await
            .map_err(|_| AgentError::QueueClosed { stage })
    }

    /// Hand the stage's receiver to its single consumer.
    ///
    /// Returns `None` once taken; a stage queue has exactly one consumer.
    pub fn take_queue(&self, stage: &str) -> Option<mpsc::Receiver<PendingInvocation>> {
        self.receivers.lock().remove(stage)
    }
}
