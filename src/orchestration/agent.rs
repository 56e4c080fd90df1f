//! # Agent (Orchestrator)
//!
//! The core of the pipeline: creates a tracked request per utterance,
//! dispatches it stage by stage, correlates asynchronous completions back to
//! the originating request, enforces deadlines, and advances the per-request
//! state machine from intake to final response.
//!
//! Two entry points, shared by every channel front-end:
//! - [`Agent::register_msg`] creates and starts a request
//! - [`Agent::process`] advances a request given one stage's result
//!
//! All mutation of one request is serialized behind its own async mutex;
//! requests never contend with each other.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, FaninPolicy};
use crate::error::{AgentError, Result};
use crate::execution::{ProcessSink, Worker};
use crate::orchestration::correlation::{CorrelationError, CorrelationStore};
use crate::orchestration::dispatch::{Dispatcher, PendingInvocation};
use crate::persistence::DialogStore;
use crate::pipeline::{Pipeline, ServiceDescriptor, ServiceRole};
use crate::request::{
    DialogRequest, InboundMessage, Registration, ResolvedReply, StageResult,
};
use crate::state_machine::{RequestEvent, RequestStateMachine};

/// Mutable per-request bookkeeping, guarded by its own mutex
struct RequestContext {
    request: DialogRequest,
    machine: RequestStateMachine,
    /// Stage results merged in arrival order
    results: Vec<(String, StageResult)>,
    /// Stages already enqueued, guarding at-most-once dispatch under races
    dispatched: HashSet<String>,
}

impl RequestContext {
    fn new(request: DialogRequest) -> Self {
        Self {
            request,
            machine: RequestStateMachine::new(),
            results: Vec::new(),
            dispatched: HashSet::new(),
        }
    }

    fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, result)| result)
    }

    /// Record a result; returns false for a duplicate (at-least-once
    /// transports may redeliver)
    fn record(&mut self, stage: &str, result: StageResult) -> bool {
        if self.result(stage).is_some() {
            return false;
        }
        self.results.push((stage.to_string(), result));
        true
    }

    fn transition(&mut self, event: RequestEvent) -> Result<()> {
        self.machine
            .transition(&event)
            .map(|_| ())
            .map_err(|e| AgentError::StateTransition {
                message: e.to_string(),
            })
    }
}

/// The orchestration core. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Agent {
    pipeline: Arc<Pipeline>,
    config: AgentConfig,
    requests: Arc<DashMap<Uuid, Arc<Mutex<RequestContext>>>>,
    correlation: CorrelationStore,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn DialogStore>,
}

impl Agent {
    pub fn new(pipeline: Pipeline, store: Arc<dyn DialogStore>, config: AgentConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(&pipeline, config.queue_capacity));
        Self {
            pipeline: Arc::new(pipeline),
            config,
            requests: Arc::new(DashMap::new()),
            correlation: CorrelationStore::new(),
            dispatcher,
            store,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn correlation_store(&self) -> &CorrelationStore {
        &self.correlation
    }

    /// Number of in-flight (non-terminal) requests
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    /// Spawn one worker loop per pipeline stage, reporting back into this
    /// agent. Stages whose queue was already taken (e.g. bridged to a remote
    /// gateway) are skipped.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let sink: Arc<dyn ProcessSink> = Arc::new(self.clone());
        let mut handles = Vec::new();
        for service in self.pipeline.services() {
            if let Some(queue) = self.dispatcher.take_queue(service.name()) {
                let worker = Worker::new(service.clone(), queue);
                handles.push(tokio::spawn(worker.run(sink.clone())));
            }
        }
        handles
    }

    /// Take ownership of one stage's worker, e.g. to run it against a remote
    /// gateway transport instead of in-process
    pub fn take_worker(&self, stage: &str) -> Result<Worker> {
        let service = self
            .pipeline
            .get(stage)
            .ok_or_else(|| AgentError::NoSuchStage {
                stage: stage.to_string(),
            })?;
        let queue = self
            .dispatcher
            .take_queue(stage)
            .ok_or_else(|| AgentError::WorkerAlreadyTaken {
                stage: stage.to_string(),
            })?;
        Ok(Worker::new(service, queue))
    }

    /// Create and start a request for an inbound utterance.
    ///
    /// Returns immediately after dispatch for fire-and-forget messages; for
    /// `require_response` messages, suspends until the responder stage
    /// resolves the correlation entry or the deadline releases it with a
    /// timeout result.
    pub async fn register_msg(&self, message: InboundMessage) -> Result<Registration> {
        let request = DialogRequest::from_message(&message);
        let request_id = request.request_id;

        info!(
            %request_id,
            user_id = %request.user_id,
            channel_type = %request.channel_type,
            require_response = request.require_response,
            "Request registered"
        );

        // Inbound utterance persistence is fire-and-forget: a storage
        // failure must never block the pipeline
        self.spawn_append_utterance(request.clone());

        // A deadline already in the past resolves immediately with a
        // timeout result instead of dispatching any stage; the caller can
        // tell the request was dropped at intake
        if request.deadline_expired(Utc::now()) {
            warn!(%request_id, "Deadline already elapsed at intake");
            return Ok(Registration::Resolved(ResolvedReply {
                request_id,
                result: StageResult::TimedOut,
            }));
        }

        if self.requests.contains_key(&request_id) {
            return Err(AgentError::DuplicateRequest { request_id });
        }

        let handle = if request.require_response {
            Some(
                self.correlation
                    .create(request_id)
                    .map_err(|_| AgentError::DuplicateRequest { request_id })?,
            )
        } else {
            None
        };

        let ctx = Arc::new(Mutex::new(RequestContext::new(request.clone())));
        self.requests.insert(request_id, ctx.clone());

        let input = self.pipeline.input().clone();
        let input_payload = serde_json::to_value(&request).unwrap_or(Value::Null);
        {
            let mut ctx = ctx.lock().await;
            if let Err(e) = self.dispatch_stage(&mut ctx, &input, input_payload).await {
                self.requests.remove(&request_id);
                self.correlation.discard(request_id);
                return Err(e);
            }
        }

        if let Some(deadline) = request.deadline {
            self.spawn_deadline_watcher(request_id, deadline);
        }

        let Some(handle) = handle else {
            return Ok(Registration::Dispatched { request_id });
        };

        let wait_limit = match request.deadline {
            Some(deadline) => {
                (deadline - Utc::now()).to_std().unwrap_or_default() + self.config.deadline_grace
            }
            None => self.config.response_timeout,
        };

        match handle.wait(Some(wait_limit)).await {
            Ok(reply) => Ok(Registration::Resolved(reply)),
            Err(CorrelationError::Timeout { .. }) => {
                warn!(%request_id, "Reply wait timed out, releasing with timeout result");
                self.abort_unresolved(request_id).await;
                Ok(Registration::Resolved(ResolvedReply {
                    request_id,
                    result: StageResult::TimedOut,
                }))
            }
            Err(e) => Err(AgentError::Gateway {
                transport: "correlation".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Advance a request given one stage's result.
    ///
    /// Called by workers and gateways on stage completion. Unknown requests,
    /// unknown stages, and already-terminal requests are protocol errors
    /// surfaced to the caller; they never affect other in-flight requests.
    pub async fn process(&self, request_id: Uuid, stage: &str, result: StageResult) -> Result<()> {
        let service = self
            .pipeline
            .get(stage)
            .ok_or_else(|| AgentError::UnknownStage {
                request_id,
                stage: stage.to_string(),
            })?;
        let ctx = self
            .requests
            .get(&request_id)
            .map(|entry| entry.value().clone())
            .ok_or(AgentError::UnknownRequest { request_id })?;

        let mut ctx = ctx.lock().await;
        if ctx.machine.is_terminal() {
            return Err(AgentError::TerminalRequest {
                request_id,
                stage: stage.to_string(),
            });
        }
        if !ctx.record(stage, result.clone()) {
            debug!(%request_id, stage, "Duplicate stage result ignored");
            return Ok(());
        }
        debug!(
            %request_id,
            stage,
            state = %ctx.machine.current_state(),
            success = result.is_success(),
            "Stage result recorded"
        );

        if let Some(hook) = service.result_hook() {
            hook.on_result(&ctx.request, &result, self.store.as_ref()).await;
        }

        self.advance(&mut ctx, &service).await
    }

    /// Fan-out/fan-in dispatch after one stage completed
    async fn advance(
        &self,
        ctx: &mut RequestContext,
        service: &Arc<ServiceDescriptor>,
    ) -> Result<()> {
        if service.has_role(ServiceRole::Input) {
            ctx.transition(RequestEvent::InputCompleted)?;
            if self.pipeline.branches().is_empty() {
                ctx.transition(RequestEvent::BranchesFannedIn)?;
                return self.dispatch_after_branches(ctx).await;
            }
            let payload = self.branch_payload(ctx);
            for branch in self.pipeline.next_stages(service.name()) {
                self.dispatch_stage(ctx, &branch, payload.clone()).await?;
            }
            return Ok(());
        }

        if service.has_role(ServiceRole::Selector) {
            ctx.transition(RequestEvent::SelectorCompleted)?;
            let payload = self.responder_payload(ctx, service.name());
            for responder in self.pipeline.next_stages(service.name()) {
                self.dispatch_stage(ctx, &responder, payload.clone()).await?;
            }
            return Ok(());
        }

        if service.is_branch() {
            ctx.transition(RequestEvent::BranchCompleted {
                stage: service.name().to_string(),
            })?;
            let all_in = self
                .pipeline
                .branch_names()
                .all(|name| ctx.result(name).is_some());
            if all_in {
                ctx.transition(RequestEvent::BranchesFannedIn)?;
                return self.dispatch_after_branches(ctx).await;
            }
            return Ok(());
        }

        // Responder completed: resolve the correlation entry exactly once
        // and retire the request
        ctx.transition(RequestEvent::ResponderCompleted)?;
        let result = ctx
            .result(service.name())
            .cloned()
            .unwrap_or(StageResult::TimedOut);
        self.finalize(ctx, result)
    }

    /// Dispatch the stage fan-in feeds: the selector, or the responder when
    /// the pipeline has none
    async fn dispatch_after_branches(&self, ctx: &mut RequestContext) -> Result<()> {
        let target = self.pipeline.after_branches();
        let payload = self.fanin_payload(ctx);
        if !target.has_role(ServiceRole::Selector) {
            ctx.transition(RequestEvent::SelectorSkipped)?;
        }
        self.dispatch_stage(ctx, &target, payload).await
    }

    async fn dispatch_stage(
        &self,
        ctx: &mut RequestContext,
        service: &Arc<ServiceDescriptor>,
        payload: Value,
    ) -> Result<()> {
        if !ctx.dispatched.insert(service.name().to_string()) {
            debug!(
                request_id = %ctx.request.request_id,
                stage = service.name(),
                "Stage already dispatched, skipping"
            );
            return Ok(());
        }
        debug!(
            request_id = %ctx.request.request_id,
            stage = service.name(),
            "Dispatching stage"
        );
        self.dispatcher
            .dispatch(PendingInvocation::new(
                ctx.request.request_id,
                service.name(),
                payload,
            ))
            .await
    }

    fn finalize(&self, ctx: &mut RequestContext, result: StageResult) -> Result<()> {
        let request_id = ctx.request.request_id;
        if ctx.request.require_response {
            match self
                .correlation
                .resolve(request_id, ResolvedReply { request_id, result })
            {
                Ok(()) => {}
                Err(CorrelationError::AlreadyResolved { .. }) => {
                    return Err(AgentError::DuplicateResolution { request_id });
                }
                Err(e) => {
                    warn!(%request_id, error = %e, "Reply dropped: no waiter for correlation entry");
                }
            }
        }
        info!(
            %request_id,
            state = %ctx.machine.current_state(),
            stages = ctx.results.len(),
            "Request terminal"
        );
        self.spawn_save(ctx.request.clone());
        self.requests.remove(&request_id);
        Ok(())
    }

    /// Deadline expiry for a still-pending request.
    ///
    /// Under the default fan-in policy, branches that never reported are
    /// marked timed out and the selector proceeds over what arrived; a
    /// request stuck in any later stage resolves with a timeout result.
    pub async fn expire(&self, request_id: Uuid) -> Result<()> {
        let Some(ctx) = self.requests.get(&request_id).map(|e| e.value().clone()) else {
            return Ok(());
        };
        let mut ctx = ctx.lock().await;
        if ctx.machine.is_terminal() {
            return Ok(());
        }

        let proceed = self.config.fanin_policy == FaninPolicy::ProceedWithAvailable
            && ctx.machine.current_state() == crate::state_machine::RequestState::Annotating;

        if !proceed {
            warn!(%request_id, state = %ctx.machine.current_state(), "Deadline expired, resolving with timeout");
            ctx.transition(RequestEvent::DeadlineExpired)?;
            return self.finalize(&mut ctx, StageResult::TimedOut);
        }

        let mut marked = 0;
        for branch in self.pipeline.branches().to_vec() {
            if ctx.record(branch.name(), StageResult::TimedOut) {
                ctx.transition(RequestEvent::BranchCompleted {
                    stage: branch.name().to_string(),
                })?;
                marked += 1;
            }
        }
        warn!(
            %request_id,
            timed_out_branches = marked,
            "Deadline expired, fanning in with available branch results"
        );
        ctx.transition(RequestEvent::BranchesFannedIn)?;
        self.dispatch_after_branches(&mut ctx).await
    }

    /// The waiter's own timeout fired and released the correlation entry;
    /// retire whatever is left of the request
    async fn abort_unresolved(&self, request_id: Uuid) {
        if let Some(ctx) = self.requests.get(&request_id).map(|e| e.value().clone()) {
            let mut ctx = ctx.lock().await;
            if !ctx.machine.is_terminal() {
                let _ = ctx.transition(RequestEvent::DeadlineExpired);
                self.spawn_save(ctx.request.clone());
            }
        }
        self.requests.remove(&request_id);
    }

    fn spawn_deadline_watcher(&self, request_id: Uuid, deadline: chrono::DateTime<Utc>) {
        let agent = self.clone();
        tokio::spawn(async move {
            let until = (deadline - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(until).await;
            if let Err(e) = agent.expire(request_id).await {
                warn!(%request_id, error = %e, "Deadline expiry failed");
            }
        });
    }

    fn spawn_append_utterance(&self, request: DialogRequest) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append_utterance(&request).await {
                warn!(request_id = %request.request_id, error = %e, "Utterance persistence failed");
            }
        });
    }

    fn spawn_save(&self, request: DialogRequest) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&request).await {
                warn!(request_id = %request.request_id, error = %e, "Request persistence failed");
            }
        });
    }

    fn branch_payload(&self, ctx: &RequestContext) -> Value {
        json!({
            "request_id": ctx.request.request_id,
            "utterance": ctx.request.utterance,
            "user_id": ctx.request.user_id,
            "input": self.stage_payload(ctx, self.pipeline.input().name()),
        })
    }

    fn fanin_payload(&self, ctx: &RequestContext) -> Value {
        let branches: serde_json::Map<String, Value> = self
            .pipeline
            .branches()
            .iter()
            .map(|branch| {
                let result = ctx
                    .result(branch.name())
                    .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                    .unwrap_or(Value::Null);
                (branch.name().to_string(), result)
            })
            .collect();
        json!({
            "request_id": ctx.request.request_id,
            "utterance": ctx.request.utterance,
            "input": self.stage_payload(ctx, self.pipeline.input().name()),
            "branches": branches,
        })
    }

    fn responder_payload(&self, ctx: &RequestContext, selector: &str) -> Value {
        match ctx.result(selector) {
            Some(StageResult::Success { payload }) => payload.clone(),
            Some(other) => serde_json::to_value(other).unwrap_or(Value::Null),
            None => Value::Null,
        }
    }

    /// Successful payload of a recorded stage, if any
    fn stage_payload(&self, ctx: &RequestContext, stage: &str) -> Value {
        ctx.result(stage)
            .and_then(StageResult::payload)
            .cloned()
            .unwrap_or(Value::Null)
    }
}

#[async_trait::async_trait]
impl ProcessSink for Agent {
    async fn process(&self, request_id: Uuid, stage: &str, result: StageResult) -> Result<()> {
        Agent::process(self, request_id, stage, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryDialogStore;
    use crate::pipeline::ForwardConnector;

    fn linear_agent() -> Agent {
        let pipeline = Pipeline::builder()
            .input_service(ServiceDescriptor::new(
                "input",
                Arc::new(ForwardConnector),
                1,
                [ServiceRole::Input],
            ))
            .responder_service(ServiceDescriptor::new(
                "responder",
                Arc::new(ForwardConnector),
                1,
                [ServiceRole::Responder],
            ))
            .build()
            .unwrap();
        Agent::new(
            pipeline,
            Arc::new(InMemoryDialogStore::new()),
            AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_process_unknown_request_is_protocol_error() {
        let agent = linear_agent();
        let result = agent
            .process(
                Uuid::new_v4(),
                "input",
                StageResult::success(serde_json::json!({})),
            )
            .await;
        assert!(matches!(result, Err(AgentError::UnknownRequest { .. })));
    }

    #[tokio::test]
    async fn test_process_unknown_stage_is_protocol_error() {
        let agent = linear_agent();
        let result = agent
            .process(
                Uuid::new_v4(),
                "no_such_stage",
                StageResult::success(serde_json::json!({})),
            )
            .await;
        assert!(matches!(result, Err(AgentError::UnknownStage { .. })));
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_immediately() {
        let agent = linear_agent();
        let _workers = agent.spawn_workers();

        let mut message = InboundMessage::new("hello", "user-1");
        message.require_response = false;
        let registration = agent.register_msg(message).await.unwrap();
        assert!(matches!(registration, Registration::Dispatched { .. }));
    }

    #[tokio::test]
    async fn test_persistence_failure_never_blocks_resolution() {
        use crate::persistence::FailingDialogStore;

        let pipeline = Pipeline::builder()
            .input_service(ServiceDescriptor::new(
                "input",
                Arc::new(ForwardConnector),
                1,
                [ServiceRole::Input],
            ))
            .responder_service(ServiceDescriptor::new(
                "responder",
                Arc::new(ForwardConnector),
                1,
                [ServiceRole::Responder],
            ))
            .build()
            .unwrap();
        let agent = Agent::new(pipeline, Arc::new(FailingDialogStore), AgentConfig::default());
        let _workers = agent.spawn_workers();

        let registration = agent
            .register_msg(InboundMessage::new("hello", "user-1"))
            .await
            .unwrap();
        assert!(registration.reply().unwrap().result.is_success());
    }

    #[tokio::test]
    async fn test_expired_deadline_resolves_without_dispatch() {
        let agent = linear_agent();
        // No workers spawned: dispatch would hang a require_response wait

        let mut message = InboundMessage::new("hello", "user-1");
        message.deadline = Some(Utc::now() - chrono::Duration::seconds(5));
        let registration = agent.register_msg(message).await.unwrap();
        let reply = registration.reply().unwrap();
        assert!(reply.result.is_timeout());
        assert_eq!(agent.in_flight(), 0);
        assert!(agent.correlation_store().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_fire_and_forget_reports_timeout() {
        let agent = linear_agent();

        let mut message = InboundMessage::new("hello", "user-1");
        message.require_response = false;
        message.deadline = Some(Utc::now() - chrono::Duration::seconds(5));
        let registration = agent.register_msg(message).await.unwrap();

        // Dropped at intake: the caller sees a timeout resolution, not a
        // dispatched request that never existed
        assert!(registration.reply().unwrap().result.is_timeout());
        assert_eq!(agent.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_take_worker_validates_stage_name() {
        let agent = linear_agent();

        assert!(matches!(
            agent.take_worker("no_such_stage"),
            Err(AgentError::NoSuchStage { .. })
        ));
        assert!(agent.take_worker("input").is_ok());
        assert!(matches!(
            agent.take_worker("input"),
            Err(AgentError::WorkerAlreadyTaken { .. })
        ));
    }
}
