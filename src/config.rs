use crate::error::{AgentError, Result};
use std::time::Duration;

/// Fan-in policy applied when a request's deadline elapses while
/// annotator/skill branches are still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaninPolicy {
    /// Mark missing branches as timed out and dispatch the selector with
    /// whatever results arrived.
    ProceedWithAvailable,
    /// Resolve the whole request with a timeout instead of selecting among
    /// partial results.
    FailRequest,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on a `require_response` wait when the request carries no
    /// deadline of its own.
    pub response_timeout: Duration,
    /// Extra time granted past a request's deadline for the selector and
    /// responder to finish over partial results.
    pub deadline_grace: Duration,
    /// Capacity of each stage's pending-invocation queue.
    pub queue_capacity: usize,
    pub fanin_policy: FaninPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            deadline_grace: Duration::from_millis(500),
            queue_capacity: 128,
            fanin_policy: FaninPolicy::ProceedWithAvailable,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(timeout_ms) = std::env::var("PARLEY_RESPONSE_TIMEOUT_MS") {
            let ms: u64 = timeout_ms.parse().map_err(|e| AgentError::Configuration {
                message: format!("Invalid PARLEY_RESPONSE_TIMEOUT_MS: {e}"),
            })?;
            config.response_timeout = Duration::from_millis(ms);
        }

        if let Ok(grace_ms) = std::env::var("PARLEY_DEADLINE_GRACE_MS") {
            let ms: u64 = grace_ms.parse().map_err(|e| AgentError::Configuration {
                message: format!("Invalid PARLEY_DEADLINE_GRACE_MS: {e}"),
            })?;
            config.deadline_grace = Duration::from_millis(ms);
        }

        if let Ok(capacity) = std::env::var("PARLEY_QUEUE_CAPACITY") {
            config.queue_capacity = capacity.parse().map_err(|e| AgentError::Configuration {
                message: format!("Invalid PARLEY_QUEUE_CAPACITY: {e}"),
            })?;
        }

        if let Ok(policy) = std::env::var("PARLEY_FANIN_POLICY") {
            config.fanin_policy = match policy.as_str() {
                "proceed_with_available" => FaninPolicy::ProceedWithAvailable,
                "fail_request" => FaninPolicy::FailRequest,
                other => {
                    return Err(AgentError::Configuration {
                        message: format!("Invalid PARLEY_FANIN_POLICY: {other}"),
                    })
                }
            };
        }

        Ok(config)
    }
}
