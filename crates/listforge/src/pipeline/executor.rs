use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::batch::{ItemRecord, ItemStage, Job};
use crate::checkpoint::{CheckpointStore, Lease, StoreError};
use crate::collaborators::{
    CollaboratorError, Collaborators, ImageSet, Metadata, Price, PublishOutcome, PublishRequest,
};
use crate::ratelimit::{RateLimiters, Service};

use super::config::PipelineConfig;
use super::error::StageFailure;
use super::guard::IdempotencyGuard;

/// Drives one identifier through metadata, images, pricing and publish.
///
/// Each stage result is saved before the next stage starts, so a resumed
/// item picks up at its first unresolved stage and reuses earlier results.
pub struct ItemPipeline {
    store: Arc<dyn CheckpointStore>,
    collaborators: Collaborators,
    limiters: Arc<RateLimiters>,
    guard: IdempotencyGuard,
    config: PipelineConfig,
}

impl ItemPipeline {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        collaborators: Collaborators,
        limiters: Arc<RateLimiters>,
        config: PipelineConfig,
    ) -> Self {
        let guard = IdempotencyGuard::new(store.clone(), collaborators.listing.clone());
        Self {
            store,
            collaborators,
            limiters,
            guard,
            config,
        }
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Processes the item at `position` of `job` and returns its resolved
    /// record. The caller commits the record.
    ///
    /// Collaborator failures resolve the item as failed; only checkpoint
    /// errors are returned as `Err`.
    pub async fn process(
        &self,
        lease: &Lease,
        job: &Job,
        position: usize,
        identifier: &str,
    ) -> Result<ItemRecord, StoreError> {
        let span = info_span!("item", job_id = %job.job_id, identifier, index = position);
        self.process_inner(lease, job, position, identifier)
            .instrument(span)
            .await
    }

    async fn process_inner(
        &self,
        lease: &Lease,
        job: &Job,
        position: usize,
        identifier: &str,
    ) -> Result<ItemRecord, StoreError> {
        let mut item = match self.store.load_item(&job.job_id, identifier)? {
            Some(existing) => existing,
            None => ItemRecord::new(&job.job_id, identifier, position),
        };

        if item.is_resolved() {
            debug!(stage = %item.stage, "Item already resolved, skipping");
            return Ok(item);
        }

        let metadata = match self.fetch_metadata(lease, &mut item).await? {
            Ok(metadata) => metadata,
            Err(failure) => return Ok(Self::resolve_failed(item, failure)),
        };

        let images = match self.fetch_images(lease, &mut item, &metadata).await? {
            Ok(images) => images,
            Err(failure) => return Ok(Self::resolve_failed(item, failure)),
        };

        let price = match self.compute_price(lease, &mut item, &metadata).await? {
            Ok(price) => price,
            Err(failure) => return Ok(Self::resolve_failed(item, failure)),
        };

        if !job.publish_enabled {
            debug!(%price, "Dry run, stopping at priced");
            item.succeed();
            return Ok(item);
        }

        match self
            .publish(lease, job, &mut item, &metadata, &images, &price)
            .await?
        {
            Ok(()) => Ok(item),
            Err(failure) => Ok(Self::resolve_failed(item, failure)),
        }
    }

    async fn fetch_metadata(
        &self,
        lease: &Lease,
        item: &mut ItemRecord,
    ) -> Result<Result<Metadata, StageFailure>, StoreError> {
        if let Some(ref metadata) = item.metadata {
            return Ok(Ok(metadata.clone()));
        }

        let identifier = item.identifier.clone();
        let result = self
            .call(Service::Metadata, item, || {
                self.collaborators.metadata.lookup(&identifier)
            })
            .await;

        match result {
            Ok(metadata) => {
                item.metadata = Some(metadata.clone());
                item.advance(ItemStage::MetadataFetched);
                self.guard.record_effect(lease, item)?;
                Ok(Ok(metadata))
            }
            Err(failure) => Ok(Err(failure)),
        }
    }

    async fn fetch_images(
        &self,
        lease: &Lease,
        item: &mut ItemRecord,
        metadata: &Metadata,
    ) -> Result<Result<ImageSet, StageFailure>, StoreError> {
        if let Some(ref images) = item.images {
            return Ok(Ok(images.clone()));
        }

        let identifier = item.identifier.clone();
        let result = self
            .call(Service::Images, item, || {
                self.collaborators.images.lookup(&identifier, metadata)
            })
            .await;

        let images = match result {
            Ok(images) => images,
            Err(failure) if failure.is_not_found() && self.config.allow_missing_images => {
                info!("No images found, continuing without images");
                ImageSet::default()
            }
            Err(failure) => return Ok(Err(failure)),
        };

        item.images = Some(images.clone());
        item.advance(ItemStage::ImagesFetched);
        self.guard.record_effect(lease, item)?;
        Ok(Ok(images))
    }

    async fn compute_price(
        &self,
        lease: &Lease,
        item: &mut ItemRecord,
        metadata: &Metadata,
    ) -> Result<Result<Price, StageFailure>, StoreError> {
        if let Some(ref price) = item.price {
            return Ok(Ok(price.clone()));
        }

        let result = self
            .call(Service::Pricing, item, || {
                self.collaborators.pricing.compute(metadata)
            })
            .await;

        match result {
            Ok(price) => {
                item.price = Some(price.clone());
                item.advance(ItemStage::Priced);
                self.guard.record_effect(lease, item)?;
                Ok(Ok(price))
            }
            Err(failure) => Ok(Err(failure)),
        }
    }

    /// Publishes at most once per idempotency key. The key is saved before the
    /// marketplace is contacted, and an existing listing for it is adopted
    /// instead of publishing again.
    async fn publish(
        &self,
        lease: &Lease,
        job: &Job,
        item: &mut ItemRecord,
        metadata: &Metadata,
        images: &ImageSet,
        price: &Price,
    ) -> Result<Result<(), StageFailure>, StoreError> {
        if item.has_effect(ItemStage::Listed) {
            item.advance(ItemStage::Listed);
            item.succeed();
            self.guard.record_effect(lease, item)?;
            return Ok(Ok(()));
        }

        let key = match item.idempotency_key.clone() {
            Some(key) => key,
            None => {
                let key = self.guard.key_for(job, &item.identifier);
                item.idempotency_key = Some(key.clone());
                self.guard.record_effect(lease, item)?;
                key
            }
        };

        let existing = self
            .call(Service::Listing, item, || self.guard.existing_listing(&key))
            .await;

        let reference = match existing {
            Ok(Some(reference)) => {
                info!(%reference, %key, "Listing already exists, adopting it");
                reference
            }
            Ok(None) => {
                let identifier = item.identifier.clone();
                let request = PublishRequest {
                    identifier: &identifier,
                    metadata,
                    images,
                    price,
                    idempotency_key: &key,
                };
                let outcome = self
                    .call(Service::Listing, item, || {
                        self.collaborators.listing.publish(&request)
                    })
                    .await;
                match outcome {
                    Ok(PublishOutcome::Created(reference)) => {
                        info!(%reference, "Listing created");
                        reference
                    }
                    Ok(PublishOutcome::Conflict(reference)) => {
                        info!(%reference, %key, "Marketplace reported conflict, adopting listing");
                        reference
                    }
                    Err(failure) => return Ok(Err(failure)),
                }
            }
            Err(failure) => {
                warn!(%failure, "Could not verify existing listing, not publishing");
                return Ok(Err(failure));
            }
        };

        item.listing_reference = Some(reference);
        item.advance(ItemStage::Listed);
        item.succeed();
        self.guard.record_effect(lease, item)?;
        Ok(Ok(()))
    }

    fn resolve_failed(mut item: ItemRecord, failure: StageFailure) -> ItemRecord {
        warn!(service = %failure.service(), %failure, "Item failed");
        item.fail(failure.to_string());
        item
    }

    /// One rate-limited, timed-out, retried collaborator call.
    ///
    /// Attempts and the last error are tracked on `item`. The timeout covers
    /// the collaborator call only, never the wait for a rate-limit permit.
    async fn call<T, F, Fut>(
        &self,
        service: Service,
        item: &mut ItemRecord,
        mut op: F,
    ) -> Result<T, StageFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let policy = self.config.retry_for(service);
        let timeout = self.config.call_timeout;
        let mut attempt: u32 = 0;

        loop {
            // local throttling suspends without costing an attempt
            self.limiters.acquire(service.as_str()).await;

            attempt += 1;
            item.attempts = item.attempts.saturating_add(1);

            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::transient(format!(
                    "call timed out after {:?}",
                    timeout
                ))),
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            item.error_detail = Some(format!("{}: {}", service, error));

            if !error.is_transient() {
                return Err(StageFailure::Rejected {
                    service,
                    source: error,
                });
            }
            if !policy.should_retry(attempt, &error) {
                return Err(StageFailure::Exhausted {
                    service,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = policy.delay_for(attempt, &error);
            warn!(%service, attempt, ?delay, %error, "Transient failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
