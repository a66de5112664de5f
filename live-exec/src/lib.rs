//! # Live Execution
//!
//! Runs user-submitted source code for interactive clients. Each connection
//! gets a [`Session`] that materializes the submitted files into a scratch
//! workspace, compiles them when the language needs it, streams the
//! program's stdout/stderr as it is produced, forwards input lines to it,
//! and tears down the process and the workspace on every way a run can end.
//!
//! No isolation is applied to the program: no namespaces, resource limits
//! or syscall filtering, and no time budget. Run this inside whatever
//! boundary the deployment provides.

mod config;
mod dispatcher;
mod error;
pub mod languages;
mod process;
pub mod resolver;
mod service;
mod session;
mod types;
mod workspace;

#[cfg(test)]
mod tests;

pub use config::RunnerConfig;
pub use dispatcher::{CompileStep, Dispatcher, ExecutionPlan, RunStep};
pub use error::Error;
pub use languages::{available_languages, LanguageSpec};
pub use process::{
    event_channel, ProcessEvent, ProcessHandle, ProcessSupervisor, SupervisorEvent,
    EVENT_CHANNEL_CAPACITY,
};
pub use resolver::{EntryPointResolver, Introspector, Javap, ProbeOutcome};
pub use service::ExecutionService;
pub use session::{Session, SessionState};
pub use types::{
    ClientMessage, ExitCode, ExitStatus, Language, RunRequest, ServerEvent, SourceFile,
    TERMINATED_MARKER,
};
pub use workspace::Workspace;

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
