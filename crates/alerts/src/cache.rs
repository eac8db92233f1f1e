//! Read-through cache over the availability provider.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::model::AvailabilitySnapshot;
use crate::provider::AvailabilityProvider;

/// A snapshot plus how it was obtained.
#[derive(Debug)]
pub struct SnapshotHandle {
    pub snapshot: Arc<AvailabilitySnapshot>,
    /// Set when the refresh failed and a previous snapshot was reused.
    /// The caller decides how loudly to log it.
    pub stale_error: Option<ProviderError>,
}

/// Memoizes provider fetches for a configurable interval, bounding
/// upstream load to one full fetch per interval.
///
/// The internal lock is held for the whole refresh, so a concurrent
/// caller waits for the in-flight fetch and reuses its result instead
/// of issuing a second upstream request.
pub struct AvailabilityCache {
    provider: Arc<dyn AvailabilityProvider>,
    refresh_interval: Duration,
    current: Mutex<Option<Arc<AvailabilitySnapshot>>>,
}

impl AvailabilityCache {
    #[must_use]
    pub fn new(provider: Arc<dyn AvailabilityProvider>, refresh_interval: Duration) -> Self {
        Self {
            provider,
            refresh_interval,
            current: Mutex::new(None),
        }
    }

    /// Return the current snapshot, refreshing it first when it is
    /// missing or older than the refresh interval.
    ///
    /// A failed refresh keeps and returns the previous snapshot with
    /// the error attached; with no previous snapshot the error
    /// propagates. Availability is never synthesized from an error.
    pub async fn get_snapshot(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SnapshotHandle, ProviderError> {
        let mut current = self.current.lock().await;

        if let Some(snapshot) = current.as_ref() {
            let age = now.signed_duration_since(snapshot.fetched_at);
            // A negative age means fetched_at is ahead of `now`; keep it.
            let fresh = age
                .to_std()
                .map_or(true, |age| age < self.refresh_interval);
            if fresh {
                debug!(
                    age_secs = age.num_seconds(),
                    "Reusing cached availability snapshot"
                );
                return Ok(SnapshotHandle {
                    snapshot: Arc::clone(snapshot),
                    stale_error: None,
                });
            }
        }

        match self.fetch(now).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *current = Some(Arc::clone(&snapshot));
                Ok(SnapshotHandle {
                    snapshot,
                    stale_error: None,
                })
            }
            Err(e) => match current.as_ref() {
                Some(stale) => Ok(SnapshotHandle {
                    snapshot: Arc::clone(stale),
                    stale_error: Some(e),
                }),
                None => Err(e),
            },
        }
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<AvailabilitySnapshot, ProviderError> {
        let terms = self.provider.list_terms().await?;
        let mut term_map = HashMap::new();
        let mut term_names = HashMap::new();

        for term in terms {
            let sections = self.provider.get_sections(&term.code).await?;
            let open: HashMap<String, bool> =
                sections.into_iter().map(|s| (s.crn, s.is_open)).collect();
            info!(
                term = %term.code,
                sections = open.len(),
                "Fetched section availability"
            );
            term_map.insert(term.code.clone(), open);
            term_names.insert(term.code, term.description);
        }

        Ok(AvailabilitySnapshot {
            terms: term_map,
            term_names,
            fetched_at: now,
        })
    }
}
