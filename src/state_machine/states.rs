use serde::{Deserialize, Serialize};
use std::fmt;

/// Request lifecycle states from intake to final response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Request created, input stage dispatched
    Received,
    /// Input complete, annotator/skill branches in flight
    Annotating,
    /// All branches fanned in, selector in flight
    Selecting,
    /// Selector produced output, responder in flight
    Responding,
    /// Responder completed and the correlation entry was resolved
    Resolved,
    /// Deadline elapsed before the responder could resolve the request
    TimedOut,
}

impl RequestState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::TimedOut)
    }

    /// Check if this is an active state (stages are in flight)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::Received
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Annotating => write!(f, "annotating"),
            Self::Selecting => write!(f, "selecting"),
            Self::Responding => write!(f, "responding"),
            Self::Resolved => write!(f, "resolved"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl std::str::FromStr for RequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "annotating" => Ok(Self::Annotating),
            "selecting" => Ok(Self::Selecting),
            "responding" => Ok(Self::Responding),
            "resolved" => Ok(Self::Resolved),
            "timed_out" => Ok(Self::TimedOut),
            _ => Err(format!("Invalid request state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(RequestState::Resolved.is_terminal());
        assert!(RequestState::TimedOut.is_terminal());
        assert!(!RequestState::Received.is_terminal());
        assert!(!RequestState::Annotating.is_terminal());
        assert!(!RequestState::Selecting.is_terminal());
        assert!(!RequestState::Responding.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(RequestState::Annotating.to_string(), "annotating");
        assert_eq!(
            "timed_out".parse::<RequestState>().unwrap(),
            RequestState::TimedOut
        );
        assert!("unknown".parse::<RequestState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&RequestState::Selecting).unwrap();
        assert_eq!(json, "\"selecting\"");
        let parsed: RequestState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RequestState::Selecting);
    }
}
