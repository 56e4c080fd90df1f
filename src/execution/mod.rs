//! # Stage Execution
//!
//! Worker loops that consume pending invocations for one stage each, capped
//! at the stage's declared concurrency limit.

pub mod worker;

pub use worker::{ProcessSink, Worker};
