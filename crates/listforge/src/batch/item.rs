use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{ImageSet, ListingReference, Metadata, Price};
use crate::pipeline::IdempotencyKey;

/// Progress of one identifier through the pipeline.
///
/// Stages only move forward; `Failed` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Queued,
    MetadataFetched,
    ImagesFetched,
    Priced,
    Listed,
    Failed,
}

impl ItemStage {
    pub const ALL: [ItemStage; 6] = [
        ItemStage::Queued,
        ItemStage::MetadataFetched,
        ItemStage::ImagesFetched,
        ItemStage::Priced,
        ItemStage::Listed,
        ItemStage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Queued => "queued",
            ItemStage::MetadataFetched => "metadata_fetched",
            ItemStage::ImagesFetched => "images_fetched",
            ItemStage::Priced => "priced",
            ItemStage::Listed => "listed",
            ItemStage::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStage::ALL
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown item stage '{}'", s))
    }
}

/// Terminal per-item result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    Failed,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Succeeded => "succeeded",
            ItemOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(ItemOutcome::Succeeded),
            "failed" => Ok(ItemOutcome::Failed),
            other => Err(format!("unknown item outcome '{}'", other)),
        }
    }
}

/// Durable per-item progress, keyed by `(job_id, identifier)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub job_id: String,
    pub identifier: String,
    /// Position of the identifier in the job's input.
    pub position: usize,
    pub stage: ItemStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ItemOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    /// Witness that the publish side effect happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_reference: Option<ListingReference>,
    /// Last error seen, kept even when a later retry succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Collaborator attempts spent on this item across all runs.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Diagnostic only.
    pub updated_at: DateTime<Utc>,
}

impl ItemRecord {
    pub fn new(job_id: &str, identifier: &str, position: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            identifier: identifier.to_string(),
            position,
            stage: ItemStage::Queued,
            outcome: None,
            metadata: None,
            images: None,
            price: None,
            idempotency_key: None,
            listing_reference: None,
            error_detail: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the durable result of `stage` is already recorded.
    pub fn has_effect(&self, stage: ItemStage) -> bool {
        match stage {
            ItemStage::Queued => true,
            ItemStage::MetadataFetched => self.metadata.is_some(),
            ItemStage::ImagesFetched => self.images.is_some(),
            ItemStage::Priced => self.price.is_some(),
            ItemStage::Listed => self.listing_reference.is_some(),
            ItemStage::Failed => self.stage == ItemStage::Failed,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Moves the record forward to `stage`. Never moves it backwards.
    pub fn advance(&mut self, stage: ItemStage) {
        if stage > self.stage && self.stage != ItemStage::Failed {
            self.stage = stage;
        }
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self) {
        self.outcome = Some(ItemOutcome::Succeeded);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.stage = ItemStage::Failed;
        self.outcome = Some(ItemOutcome::Failed);
        self.error_detail = Some(error.into());
        self.updated_at = Utc::now();
    }
}
