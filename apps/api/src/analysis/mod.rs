//! Analysis pipeline: the orchestrator, its error taxonomy and error log, and
//! the HTTP handlers that drive it.

pub mod error_log;
pub mod errors;
pub mod handlers;
pub mod orchestrator;

pub use errors::AnalysisError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
