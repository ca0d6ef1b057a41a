use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::IdempotencyKey;

/// Product metadata returned by the metadata provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Provider-specific fields passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Metadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: None,
            year: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Images found for a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl ImageSet {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.urls.is_empty()
    }
}

/// A computed price in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub amount_cents: i64,
    pub currency: String,
}

impl Price {
    pub fn usd(amount_cents: i64) -> Self {
        Self {
            amount_cents,
            currency: "USD".to_string(),
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount_cents / 100,
            (self.amount_cents % 100).abs(),
            self.currency
        )
    }
}

/// Durable marketplace identifier of a created listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingReference(pub String);

impl ListingReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the publisher needs to create one listing.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub identifier: &'a str,
    pub metadata: &'a Metadata,
    pub images: &'a ImageSet,
    pub price: &'a Price,
    pub idempotency_key: &'a IdempotencyKey,
}

/// Successful publish responses. A conflict carries the listing that
/// already exists for the same idempotency key and counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Created(ListingReference),
    Conflict(ListingReference),
}

impl PublishOutcome {
    pub fn into_reference(self) -> ListingReference {
        match self {
            PublishOutcome::Created(r) | PublishOutcome::Conflict(r) => r,
        }
    }
}

/// Failure of a collaborator call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Timeout, remote rate limit or 5xx-class failure. Worth retrying.
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        /// Remote hint for how long to wait before the next attempt.
        retry_after: Option<Duration>,
    },

    #[error("not found")]
    NotFound,

    #[error("rejected: {0}")]
    Invalid(String),
}

impl CollaboratorError {
    pub fn transient(reason: impl Into<String>) -> Self {
        CollaboratorError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        CollaboratorError::Transient {
            reason: "rate limited by remote service".to_string(),
            retry_after: Some(retry_after),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CollaboratorError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CollaboratorError::transient("502 bad gateway").is_transient());
        assert!(CollaboratorError::rate_limited(Duration::from_secs(3)).is_transient());
        assert!(!CollaboratorError::NotFound.is_transient());
        assert!(!CollaboratorError::Invalid("bad upc".into()).is_transient());
        assert_eq!(
            CollaboratorError::rate_limited(Duration::from_secs(3)).retry_after(),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_conflict_is_adopted_as_reference() {
        let outcome = PublishOutcome::Conflict(ListingReference::new("offer-9"));
        assert_eq!(outcome.into_reference().as_str(), "offer-9");
    }

    #[test]
    fn test_price_display() {
        assert_eq!(Price::usd(999).to_string(), "9.99 USD");
        assert_eq!(Price::usd(1200).to_string(), "12.00 USD");
    }

    #[test]
    fn test_metadata_json_shape() {
        let mut meta = Metadata::titled("Abbey Road");
        meta.artist = Some("The Beatles".to_string());
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["title"], "Abbey Road");
        assert_eq!(json["artist"], "The Beatles");
        assert!(json.get("attributes").is_none());

        let back: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
