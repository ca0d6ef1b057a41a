pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod progress;
pub mod retry;

pub use config::PipelineConfig;
pub use error::StageFailure;
pub use executor::ItemPipeline;
pub use guard::{IdempotencyGuard, IdempotencyKey};
pub use progress::{BroadcastProgress, JobEvent, NoopProgress, ProgressReporter};
pub use retry::RetryPolicy;
