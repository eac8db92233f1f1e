//! Subscription persistence.
//!
//! The monitor consumes the persistent record store only through the
//! [`SubscriptionStore`] trait. [`MemoryStore`] is the in-process
//! double used by tests; [`JsonStore`] persists the same semantics to
//! a JSON file for single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::Subscription;

/// Result of a conditional retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    /// The record was active and is now retired.
    Retired,
    /// The record was already inactive or gone; another path resolved
    /// it first and nothing was written.
    AlreadyResolved,
}

/// Transactional access to subscription records.
///
/// Implementations serialize their own writes. The monitor is the
/// sole caller of `update_status` and `retire`; status readers may
/// query the same store concurrently and see updates as soon as they
/// are applied.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every subscription still waiting for availability.
    async fn find_active(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Record the availability observed this cycle and bump
    /// `last_checked`. With `recipient_email = None` the update
    /// applies to every active record watching the section.
    async fn update_status(
        &self,
        crn: &str,
        term: &str,
        recipient_email: Option<&str>,
        is_open: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Retire a delivered subscription: `active = false`, `notified =
    /// true`, delivery bookkeeping set. Conditional on `active = true`
    /// so a record deactivated elsewhere is never resurrected.
    async fn retire(
        &self,
        crn: &str,
        term: &str,
        recipient_email: &str,
        notified_at: DateTime<Utc>,
        via_sms: bool,
    ) -> Result<RetireOutcome, StoreError>;

    /// Create or update a subscription. A duplicate of an active
    /// (`crn`, `term`, `recipient_email`) tuple updates the existing
    /// record's ancillary fields instead of inserting a second one.
    async fn upsert(&self, subscription: Subscription) -> Result<(), StoreError>;
}

fn apply_status(
    records: &mut [Subscription],
    crn: &str,
    term: &str,
    recipient_email: Option<&str>,
    is_open: bool,
    checked_at: DateTime<Utc>,
) {
    for record in records.iter_mut() {
        if record.active
            && record.crn == crn
            && record.term == term
            && recipient_email.map_or(true, |e| record.recipient_email == e)
        {
            record.status = is_open;
            record.last_checked = Some(checked_at);
        }
    }
}

fn apply_retire(
    records: &mut [Subscription],
    crn: &str,
    term: &str,
    recipient_email: &str,
    notified_at: DateTime<Utc>,
    via_sms: bool,
) -> RetireOutcome {
    for record in records.iter_mut() {
        if record.active
            && record.crn == crn
            && record.term == term
            && record.recipient_email == recipient_email
        {
            record.active = false;
            record.notified = true;
            record.notified_at = Some(notified_at);
            record.notified_via_sms = via_sms;
            return RetireOutcome::Retired;
        }
    }
    RetireOutcome::AlreadyResolved
}

fn apply_upsert(records: &mut Vec<Subscription>, subscription: Subscription) {
    if let Some(existing) = records
        .iter_mut()
        .find(|r| r.active && r.key() == subscription.key())
    {
        existing.phone = subscription.phone;
        return;
    }
    records.push(subscription);
}

/// In-memory store: the test double, also handy for dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Subscription>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, active or not.
    pub async fn all(&self) -> Vec<Subscription> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_active(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        crn: &str,
        term: &str,
        recipient_email: Option<&str>,
        is_open: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        apply_status(&mut records, crn, term, recipient_email, is_open, checked_at);
        Ok(())
    }

    async fn retire(
        &self,
        crn: &str,
        term: &str,
        recipient_email: &str,
        notified_at: DateTime<Utc>,
        via_sms: bool,
    ) -> Result<RetireOutcome, StoreError> {
        let mut records = self.records.lock().await;
        Ok(apply_retire(
            &mut records,
            crn,
            term,
            recipient_email,
            notified_at,
            via_sms,
        ))
    }

    async fn upsert(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        apply_upsert(&mut records, subscription);
        Ok(())
    }
}

/// File-backed store with [`MemoryStore`] semantics.
///
/// Every mutation rewrites the backing file under the lock, which is
/// plenty for the single-instance monitor this engine is designed
/// around.
pub struct JsonStore {
    path: PathBuf,
    records: Mutex<Vec<Subscription>>,
}

impl JsonStore {
    /// Open the store, loading existing records when the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &[Subscription]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for JsonStore {
    async fn find_active(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        crn: &str,
        term: &str,
        recipient_email: Option<&str>,
        is_open: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        apply_status(&mut records, crn, term, recipient_email, is_open, checked_at);
        self.persist(&records)
    }

    async fn retire(
        &self,
        crn: &str,
        term: &str,
        recipient_email: &str,
        notified_at: DateTime<Utc>,
        via_sms: bool,
    ) -> Result<RetireOutcome, StoreError> {
        let mut records = self.records.lock().await;
        let outcome = apply_retire(
            &mut records,
            crn,
            term,
            recipient_email,
            notified_at,
            via_sms,
        );
        if outcome == RetireOutcome::Retired {
            self.persist(&records)?;
        }
        Ok(outcome)
    }

    async fn upsert(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        apply_upsert(&mut records, subscription);
        self.persist(&records)
    }
}
