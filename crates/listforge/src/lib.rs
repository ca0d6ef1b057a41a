pub mod batch;
pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod ratelimit;
pub mod report;

pub use batch::{ItemOutcome, ItemRecord, ItemStage, Job, JobCounts, JobStatus};
pub use checkpoint::{
    CheckpointStore, CountDrift, JobFilter, Lease, SqliteCheckpointStore, StoreError,
};
pub use collaborators::{
    CollaboratorError, Collaborators, ImageProvider, ImageSet, ListingPublisher,
    ListingReference, Metadata, MetadataProvider, Price, PriceCalculator, PublishOutcome,
    PublishRequest,
};
pub use config::{load_config, load_config_from_str, Config};
pub use db::Database;
pub use error::{ConfigError, ListforgeError, OrchestratorError, RecoveryError, Result};
pub use orchestrator::{
    JobOrchestrator, JobPool, JobRecovery, JobStatusReport, RecoveryController, ResubmitScope,
    SubmitOptions,
};
pub use pipeline::{
    BroadcastProgress, IdempotencyGuard, IdempotencyKey, ItemPipeline, JobEvent, NoopProgress,
    ProgressReporter, RetryPolicy,
};
pub use ratelimit::{Permit, RateLimiters, Service};
pub use report::JobSummary;
