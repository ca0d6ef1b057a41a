//! Contracts of the external services the pipeline calls.
//!
//! Concrete HTTP clients live outside this crate; the orchestrator only
//! sees these traits.

pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::pipeline::IdempotencyKey;

pub use types::{
    CollaboratorError, ImageSet, ListingReference, Metadata, Price, PublishOutcome,
    PublishRequest,
};

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(&self, identifier: &str) -> Result<Metadata, CollaboratorError>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn lookup(
        &self,
        identifier: &str,
        metadata: &Metadata,
    ) -> Result<ImageSet, CollaboratorError>;
}

#[async_trait]
pub trait PriceCalculator: Send + Sync {
    async fn compute(&self, metadata: &Metadata) -> Result<Price, CollaboratorError>;
}

#[async_trait]
pub trait ListingPublisher: Send + Sync {
    /// Creates a listing. Must answer `Conflict` when a listing for the same
    /// idempotency key already exists.
    async fn publish(
        &self,
        request: &PublishRequest<'_>,
    ) -> Result<PublishOutcome, CollaboratorError>;

    /// Looks up a listing previously created with `key`.
    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ListingReference>, CollaboratorError>;
}

/// The four collaborators one pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<dyn MetadataProvider>,
    pub images: Arc<dyn ImageProvider>,
    pub pricing: Arc<dyn PriceCalculator>,
    pub listing: Arc<dyn ListingPublisher>,
}
