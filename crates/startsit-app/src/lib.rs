// Library root: the asynchronous analysis pipeline, exposed so the binary and
// integration tests share one implementation.

pub mod cache;
pub mod dispatcher;
pub mod pipeline;
pub mod retry;
pub mod task;
pub mod tracker;

pub use pipeline::{Pipeline, PipelineError};
