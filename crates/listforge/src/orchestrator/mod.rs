//! Job lifecycle: submission, running, recovery and concurrent execution.

pub mod pool;
pub mod recovery;
pub mod runner;

pub use pool::{JobPool, JobRecovery};
pub use recovery::RecoveryController;
pub use runner::{JobOrchestrator, JobStatusReport, ResubmitScope, SubmitOptions};
