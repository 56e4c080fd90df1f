//! # Gateway Abstraction
//!
//! Transport-agnostic bridge letting a pipeline stage execute in a separate
//! process or machine. A gateway binds two callback slots at construction:
//! inbound-from-channel (wired to `Agent::register_msg`) and
//! inbound-from-remote-service (wired to `Agent::process`). The transport
//! behind it is opaque to the core; it must preserve at-least-once delivery
//! of stage results (the agent tolerates redelivery) and expose an explicit
//! `disconnect` for orderly shutdown.
//!
//! Transport selection goes through an explicit registry of factories built
//! at startup and passed by reference; there is no global transport map.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::execution::ProcessSink;
use crate::orchestration::Agent;
use crate::request::{InboundMessage, Registration, StageResult};

/// Where gateways deliver new inbound messages (the `register_msg` slot)
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn register_msg(&self, message: InboundMessage) -> Result<Registration>;
}

#[async_trait]
impl ChannelSink for Agent {
    async fn register_msg(&self, message: InboundMessage) -> Result<Registration> {
        Agent::register_msg(self, message).await
    }
}

/// The two callback slots a gateway binds at construction
#[derive(Clone)]
pub struct GatewayCallbacks {
    pub on_channel: Arc<dyn ChannelSink>,
    pub on_service: Arc<dyn ProcessSink>,
}

impl GatewayCallbacks {
    /// Bind both slots to an agent's entry points
    pub fn for_agent(agent: &Agent) -> Self {
        Self {
            on_channel: Arc::new(agent.clone()),
            on_service: Arc::new(agent.clone()),
        }
    }
}

/// Transport bridge for out-of-process stage execution
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Transport tag this gateway was constructed under
    fn transport(&self) -> &str;

    /// Orderly teardown, called during process shutdown
    async fn disconnect(&self) -> Result<()>;
}

/// Factory constructing a gateway with its callback slots bound
pub type GatewayFactory = Arc<dyn Fn(GatewayCallbacks) -> Arc<dyn Gateway> + Send + Sync>;

/// Explicit transport-tag → factory registry, built at startup
#[derive(Default)]
pub struct GatewayRegistry {
    factories: HashMap<String, GatewayFactory>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: impl Into<String>, factory: GatewayFactory) {
        self.factories.insert(transport.into(), factory);
    }

    /// Construct a gateway for a transport tag, binding the callbacks
    pub fn construct(
        &self,
        transport: &str,
        callbacks: GatewayCallbacks,
    ) -> Result<Arc<dyn Gateway>> {
        let factory = self
            .factories
            .get(transport)
            .ok_or_else(|| AgentError::Gateway {
                transport: transport.to_string(),
                message: "no factory registered for transport".to_string(),
            })?;
        info!(transport, "Constructing gateway");
        Ok(factory(callbacks))
    }

    pub fn transports(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// In-process gateway for tests and single-process deployments.
///
/// Both delivery directions call straight into the bound callbacks; the
/// "transport" is a function call, which trivially satisfies at-least-once.
pub struct LoopbackGateway {
    callbacks: GatewayCallbacks,
    connected: AtomicBool,
}

impl LoopbackGateway {
    pub fn new(callbacks: GatewayCallbacks) -> Self {
        Self {
            callbacks,
            connected: AtomicBool::new(true),
        }
    }

    /// Register with a transport registry under the `loopback` tag
    pub fn register_factory(registry: &mut GatewayRegistry) {
        registry.register(
            "loopback",
            Arc::new(|callbacks| Arc::new(LoopbackGateway::new(callbacks)) as Arc<dyn Gateway>),
        );
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AgentError::Gateway {
                transport: "loopback".to_string(),
                message: "gateway is disconnected".to_string(),
            })
        }
    }

    /// A remote channel delivered a new inbound message
    pub async fn deliver_message(&self, message: InboundMessage) -> Result<Registration> {
        self.ensure_connected()?;
        self.callbacks.on_channel.register_msg(message).await
    }

    /// A remote service process reported a stage result
    pub async fn deliver_result(
        &self,
        request_id: Uuid,
        stage: &str,
        result: StageResult,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.callbacks.on_service.process(request_id, stage, result).await
    }
}

#[async_trait]
impl Gateway for LoopbackGateway {
    fn transport(&self) -> &str {
        "loopback"
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!(transport = "loopback", "Gateway disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResolvedReply;

    struct RecordingChannel;

    #[async_trait]
    impl ChannelSink for RecordingChannel {
        async fn register_msg(&self, message: InboundMessage) -> Result<Registration> {
            let request_id = message.correlation_id.unwrap_or_else(Uuid::new_v4);
            Ok(Registration::Resolved(ResolvedReply {
                request_id,
                result: StageResult::success(serde_json::json!({"echo": message.utterance})),
            }))
        }
    }

    struct RecordingService;

    #[async_trait]
    impl ProcessSink for RecordingService {
        async fn process(
            &self,
            _request_id: Uuid,
            _stage: &str,
            _result: StageResult,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn callbacks() -> GatewayCallbacks {
        GatewayCallbacks {
            on_channel: Arc::new(RecordingChannel),
            on_service: Arc::new(RecordingService),
        }
    }

    #[tokio::test]
    async fn test_loopback_delivers_both_directions() {
        let gateway = LoopbackGateway::new(callbacks());

        let registration = gateway
            .deliver_message(InboundMessage::new("hi", "user-1"))
            .await
            .unwrap();
        assert!(registration.reply().is_some());

        gateway
            .deliver_result(
                Uuid::new_v4(),
                "skill",
                StageResult::success(serde_json::json!({})),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_rejects_further_traffic() {
        let gateway = LoopbackGateway::new(callbacks());
        gateway.disconnect().await.unwrap();

        let result = gateway.deliver_message(InboundMessage::new("hi", "u")).await;
        assert!(matches!(result, Err(AgentError::Gateway { .. })));
    }

    #[tokio::test]
    async fn test_registry_constructs_by_tag() {
        let mut registry = GatewayRegistry::new();
        LoopbackGateway::register_factory(&mut registry);

        assert!(registry.construct("loopback", callbacks()).is_ok());
        assert!(registry.construct("amqp", callbacks()).is_err());
        assert_eq!(registry.transports().count(), 1);
    }
}
