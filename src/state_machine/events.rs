use serde::{Deserialize, Serialize};

/// Events that drive request state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    /// Input stage produced its result
    InputCompleted,
    /// One annotator/skill branch produced a result (or was marked timed out);
    /// does not change the state until every branch has fanned in
    BranchCompleted { stage: String },
    /// Every annotator/skill branch has a result or timed out
    BranchesFannedIn,
    /// Selector stage produced its output
    SelectorCompleted,
    /// Pipeline has no selector stage; fan-in feeds the responder directly
    SelectorSkipped,
    /// Responder stage completed
    ResponderCompleted,
    /// Request deadline elapsed before resolution
    DeadlineExpired,
}
