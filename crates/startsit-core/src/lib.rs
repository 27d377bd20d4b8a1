// Shared foundation for the startsit workspace: the analysis data model,
// error taxonomy, configuration, and durable storage.

pub mod config;
pub mod db;
pub mod error;
pub mod model;

pub use error::{UpstreamError, ValidationError};
