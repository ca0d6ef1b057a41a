use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::batch::{ItemRecord, ItemStage, Job};
use crate::checkpoint::{CheckpointStore, Lease, StoreError};
use crate::collaborators::{CollaboratorError, ListingPublisher, ListingReference};

const KEY_PREFIX: &str = "lf-";
const KEY_HEX_LEN: usize = 40;

/// Deterministic token passed to the marketplace with every publish.
///
/// Derived from `(lineage_id, identifier, pipeline_epoch)` only, so every
/// retry, resume and resubmission of the same item sends the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(lineage_id: &str, identifier: &str, pipeline_epoch: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(lineage_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(identifier.as_bytes());
        hasher.update([0x1f]);
        hasher.update(pipeline_epoch.to_be_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("{}{}", KEY_PREFIX, &digest[..KEY_HEX_LEN]))
    }

    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decides whether a stage's effect already happened for an item.
///
/// Local answers come from the checkpoint store; for the publish stage the
/// marketplace is asked as well, keyed by [`IdempotencyKey`].
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn CheckpointStore>,
    publisher: Arc<dyn ListingPublisher>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn CheckpointStore>, publisher: Arc<dyn ListingPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn key_for(&self, job: &Job, identifier: &str) -> IdempotencyKey {
        IdempotencyKey::derive(&job.lineage_id, identifier, job.pipeline_epoch)
    }

    pub fn has_effect(
        &self,
        job_id: &str,
        identifier: &str,
        stage: ItemStage,
    ) -> Result<bool, StoreError> {
        Ok(self
            .store
            .load_item(job_id, identifier)?
            .is_some_and(|item| item.has_effect(stage)))
    }

    /// Durably records the item's current stage results.
    pub fn record_effect(&self, lease: &Lease, item: &ItemRecord) -> Result<(), StoreError> {
        self.store.save_item(lease, item)
    }

    /// Asks the marketplace whether a listing with `key` already exists.
    pub async fn existing_listing(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ListingReference>, CollaboratorError> {
        self.publisher.find_by_key(key).await
    }
}
