//! Scripted collaborators and a store wrapper for fault injection.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use listforge::batch::{ItemOutcome, ItemRecord, ItemStage, Job, JobStatus};
use listforge::checkpoint::{CheckpointStore, CountDrift, JobFilter, Lease, StoreError};
use listforge::collaborators::{
    CollaboratorError, ImageProvider, ImageSet, ListingPublisher, ListingReference, Metadata,
    MetadataProvider, Price, PriceCalculator, PublishOutcome, PublishRequest,
};
use listforge::db::DatabaseError;
use listforge::pipeline::{IdempotencyKey, JobEvent, ProgressReporter};

// ─── Metadata ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeMetadata {
    not_found: Mutex<HashSet<String>>,
    /// identifier -> number of transient failures still to return
    transient: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl FakeMetadata {
    pub fn not_found(&self, identifier: &str) {
        self.not_found.lock().unwrap().insert(identifier.to_string());
    }

    pub fn fail_transiently(&self, identifier: &str, times: u32) {
        self.transient
            .lock()
            .unwrap()
            .insert(identifier.to_string(), times);
    }

    pub fn calls_for(&self, identifier: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == identifier)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataProvider for FakeMetadata {
    async fn lookup(&self, identifier: &str) -> Result<Metadata, CollaboratorError> {
        self.calls.lock().unwrap().push(identifier.to_string());

        if let Some(remaining) = self.transient.lock().unwrap().get_mut(identifier) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CollaboratorError::transient("503 service unavailable"));
            }
        }
        if self.not_found.lock().unwrap().contains(identifier) {
            return Err(CollaboratorError::NotFound);
        }

        let mut metadata = Metadata::titled(format!("Record {}", identifier));
        metadata.artist = Some("Various Artists".to_string());
        Ok(metadata)
    }
}

// ─── Images ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeImages {
    missing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeImages {
    pub fn missing(&self, identifier: &str) {
        self.missing.lock().unwrap().insert(identifier.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for FakeImages {
    async fn lookup(
        &self,
        identifier: &str,
        _metadata: &Metadata,
    ) -> Result<ImageSet, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.lock().unwrap().contains(identifier) {
            return Err(CollaboratorError::NotFound);
        }
        let url = format!("https://images.example.com/{}.jpg", identifier);
        Ok(ImageSet {
            primary: Some(url.clone()),
            urls: vec![url],
        })
    }
}

// ─── Pricing ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePricing {
    calls: AtomicUsize,
    /// Title whose pricing panics once, killing the run mid-item.
    panic_for: Mutex<Option<String>>,
}

impl FakePricing {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn panic_once_for(&self, title: &str) {
        *self.panic_for.lock().unwrap() = Some(title.to_string());
    }
}

#[async_trait]
impl PriceCalculator for FakePricing {
    async fn compute(&self, metadata: &Metadata) -> Result<Price, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let boom = {
            let mut panic_for = self.panic_for.lock().unwrap();
            if panic_for.as_deref() == Some(metadata.title.as_str()) {
                panic_for.take()
            } else {
                None
            }
        };
        if let Some(title) = boom {
            panic!("simulated crash while pricing {}", title);
        }
        Ok(Price::usd(999 + metadata.title.len() as i64))
    }
}

// ─── Marketplace ────────────────────────────────────────────────────────────

/// In-memory marketplace that enforces idempotency keys like the real one.
#[derive(Default)]
pub struct FakeMarketplace {
    listings: Mutex<HashMap<String, ListingReference>>,
    published_identifiers: Mutex<Vec<String>>,
    publish_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    /// Create the listing, then stall this long before answering. Applies once.
    stall_after_create: Mutex<Option<Duration>>,
    lookups_unavailable: Mutex<bool>,
}

impl FakeMarketplace {
    pub fn stall_first_publish(&self, stall: Duration) {
        *self.stall_after_create.lock().unwrap() = Some(stall);
    }

    pub fn make_lookups_unavailable(&self) {
        *self.lookups_unavailable.lock().unwrap() = true;
    }

    /// Inserts a listing as if an earlier run had created it.
    pub fn seed(&self, key: &IdempotencyKey, reference: &str) {
        self.listings
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), ListingReference::new(reference));
    }

    pub fn listing_count(&self) -> usize {
        self.listings.lock().unwrap().len()
    }

    pub fn listing_for(&self, key: &IdempotencyKey) -> Option<ListingReference> {
        self.listings.lock().unwrap().get(key.as_str()).cloned()
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Identifiers for which a new listing was actually created.
    pub fn created_for(&self, identifier: &str) -> usize {
        self.published_identifiers
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.as_str() == identifier)
            .count()
    }
}

#[async_trait]
impl ListingPublisher for FakeMarketplace {
    async fn publish(
        &self,
        request: &PublishRequest<'_>,
    ) -> Result<PublishOutcome, CollaboratorError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);

        let created = {
            let mut listings = self.listings.lock().unwrap();
            if let Some(existing) = listings.get(request.idempotency_key.as_str()) {
                return Ok(PublishOutcome::Conflict(existing.clone()));
            }
            let reference = ListingReference::new(format!(
                "offer-{}-{}",
                request.identifier,
                listings.len() + 1
            ));
            listings.insert(
                request.idempotency_key.as_str().to_string(),
                reference.clone(),
            );
            self.published_identifiers
                .lock()
                .unwrap()
                .push(request.identifier.to_string());
            reference
        };

        let stall = self.stall_after_create.lock().unwrap().take();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(PublishOutcome::Created(created))
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ListingReference>, CollaboratorError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if *self.lookups_unavailable.lock().unwrap() {
            return Err(CollaboratorError::transient("marketplace search unavailable"));
        }
        Ok(self.listings.lock().unwrap().get(key.as_str()).cloned())
    }
}

// ─── Progress reporters ─────────────────────────────────────────────────────

/// Panics when the item at `index` is about to start, simulating a process
/// kill between two items.
pub struct CrashBeforeItem {
    pub index: usize,
}

impl ProgressReporter for CrashBeforeItem {
    fn report(&self, event: JobEvent) {
        if let JobEvent::ItemStarted { index, .. } = event {
            if index == self.index {
                panic!("simulated crash before item {}", index);
            }
        }
    }
}

/// Panics when an item with the given identifier starts.
pub struct CrashOnIdentifier(pub String);

impl ProgressReporter for CrashOnIdentifier {
    fn report(&self, event: JobEvent) {
        if let JobEvent::ItemStarted { identifier, .. } = event {
            if identifier == self.0 {
                panic!("simulated crash on {}", identifier);
            }
        }
    }
}

/// Requests cancellation of the job once the item at `after_index` finished.
pub struct CancelAfterItem {
    pub store: Arc<dyn CheckpointStore>,
    pub after_index: usize,
}

impl ProgressReporter for CancelAfterItem {
    fn report(&self, event: JobEvent) {
        if let JobEvent::ItemFinished { job_id, index, .. } = event {
            if index == self.after_index {
                self.store.request_cancel(&job_id).unwrap();
            }
        }
    }
}

/// Records every event.
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<JobEvent>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ─── Store fault injection ──────────────────────────────────────────────────

/// Delegates to a real store but fails `commit_item` after a number of
/// successful commits, as if the database became unreachable.
pub struct FlakyStore {
    inner: Arc<dyn CheckpointStore>,
    commits_before_failure: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn CheckpointStore>, commits_before_failure: usize) -> Self {
        Self {
            inner,
            commits_before_failure: AtomicUsize::new(commits_before_failure),
        }
    }
}

impl CheckpointStore for FlakyStore {
    fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.create_job(job)
    }

    fn load_job(&self, job_id: &str) -> Result<Job, StoreError> {
        self.inner.load_job(job_id)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs(filter)
    }

    fn acquire_lease(
        &self,
        job_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<(Lease, Job), StoreError> {
        self.inner.acquire_lease(job_id, owner_id, ttl)
    }

    fn mark_running(&self, lease: &Lease) -> Result<Job, StoreError> {
        self.inner.mark_running(lease)
    }

    fn load_item(&self, job_id: &str, identifier: &str) -> Result<Option<ItemRecord>, StoreError> {
        self.inner.load_item(job_id, identifier)
    }

    fn save_item(&self, lease: &Lease, item: &ItemRecord) -> Result<(), StoreError> {
        self.inner.save_item(lease, item)
    }

    fn commit_item(&self, lease: &Lease, item: &ItemRecord) -> Result<Job, StoreError> {
        let remaining = self.commits_before_failure.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(StoreError::Database(DatabaseError::LockPoisoned));
        }
        self.commits_before_failure
            .store(remaining - 1, Ordering::SeqCst);
        self.inner.commit_item(lease, item)
    }

    fn finish_job(
        &self,
        lease: &Lease,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        self.inner.finish_job(lease, status, error)
    }

    fn request_cancel(&self, job_id: &str) -> Result<Job, StoreError> {
        self.inner.request_cancel(job_id)
    }

    fn list_items(&self, job_id: &str) -> Result<Vec<ItemRecord>, StoreError> {
        self.inner.list_items(job_id)
    }

    fn items_with_outcome(
        &self,
        job_id: &str,
        outcome: ItemOutcome,
    ) -> Result<Vec<ItemRecord>, StoreError> {
        self.inner.items_with_outcome(job_id, outcome)
    }

    fn stage_counts(&self, job_id: &str) -> Result<BTreeMap<ItemStage, u64>, StoreError> {
        self.inner.stage_counts(job_id)
    }

    fn reconcile_counts(&self, lease: &Lease) -> Result<CountDrift, StoreError> {
        self.inner.reconcile_counts(lease)
    }
}
