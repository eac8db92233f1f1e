//! The monitor loop: one polling cycle and its cadence.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::AvailabilityCache;
use crate::dispatch::{self, Dispatcher, SmsTarget};
use crate::model::BatchEntry;
use crate::render;
use crate::store::{RetireOutcome, SubscriptionStore};

/// Default interval between cycle starts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence settings for the loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Fixed interval between cycle starts (not between cycle end and
    /// the next start).
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Active subscriptions read from the store.
    pub active: usize,
    /// Subscriptions found in the snapshot and status-updated.
    pub evaluated: usize,
    /// Subscriptions observed open this cycle.
    pub newly_open: usize,
    /// Recipients whose dispatch succeeded.
    pub recipients_notified: usize,
    /// Recipients whose dispatch failed; retried next cycle.
    pub recipients_failed: usize,
    /// Subscriptions retired after successful delivery.
    pub retired: usize,
    /// Whether transition detection ran on a stale snapshot.
    pub used_stale_snapshot: bool,
}

/// One recipient's pending notification group, built and consumed
/// within a single cycle.
struct RecipientGroup {
    entries: Vec<BatchEntry>,
    /// Gateway address from the first member phone that resolves.
    sms_address: Option<String>,
}

/// Orchestrates polling cycles over the store, cache and dispatcher.
pub struct Monitor {
    store: Arc<dyn SubscriptionStore>,
    cache: AvailabilityCache,
    dispatcher: Dispatcher,
    config: MonitorConfig,
}

impl Monitor {
    #[must_use]
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        cache: AvailabilityCache,
        dispatcher: Dispatcher,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            config,
        }
    }

    /// Run cycles at the configured cadence until cancelled.
    ///
    /// Cancellation is observed during the inter-cycle wait and at the
    /// top of each cycle; a cycle in flight, including its sends, is
    /// allowed to finish so a committed delivery is never half-done.
    /// A cycle failure is logged and the loop survives to try again.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "Monitor loop started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(Utc::now()).await {
                Ok(report) => info!(
                    active = report.active,
                    newly_open = report.newly_open,
                    notified = report.recipients_notified,
                    failed = report.recipients_failed,
                    retired = report.retired,
                    stale = report.used_stale_snapshot,
                    "Cycle complete"
                ),
                Err(e) => error!(error = %e, "Cycle aborted"),
            }
        }

        info!("Monitor loop stopped");
    }

    /// Execute one polling cycle at the given instant.
    ///
    /// Detection is driven by the snapshot alone, not by status
    /// history, so re-running with an unchanged snapshot is idempotent
    /// once the affected subscriptions are retired.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let active = self
            .store
            .find_active()
            .await
            .context("failed to read active subscriptions")?;
        report.active = active.len();
        if active.is_empty() {
            debug!("No active subscriptions to monitor");
            return Ok(report);
        }

        let handle = self
            .cache
            .get_snapshot(now)
            .await
            .context("no availability snapshot")?;
        if let Some(e) = &handle.stale_error {
            warn!(error = %e, "Availability refresh failed; reusing previous snapshot");
            report.used_stale_snapshot = true;
        }
        let snapshot = &handle.snapshot;

        // Evaluate every active subscription and group the newly-open
        // ones by recipient.
        let mut batch: BTreeMap<String, RecipientGroup> = BTreeMap::new();
        for sub in &active {
            let Some(is_open) = snapshot.is_open(&sub.term, &sub.crn) else {
                debug!(crn = %sub.crn, term = %sub.term, "Section not in snapshot; still watching");
                continue;
            };

            if let Err(e) = self
                .store
                .update_status(&sub.crn, &sub.term, Some(&sub.recipient_email), is_open, now)
                .await
            {
                warn!(crn = %sub.crn, term = %sub.term, error = %e, "Failed to record observed status");
            }
            report.evaluated += 1;

            if !is_open {
                continue;
            }
            report.newly_open += 1;

            if sub.recipient_email.is_empty() {
                debug!(crn = %sub.crn, term = %sub.term, "Open section has no recipient email");
                continue;
            }
            let group = batch
                .entry(sub.recipient_email.clone())
                .or_insert_with(|| RecipientGroup {
                    entries: Vec::new(),
                    sms_address: None,
                });
            group.entries.push(BatchEntry {
                crn: sub.crn.clone(),
                term: sub.term.clone(),
            });
            if group.sms_address.is_none() {
                if let Some(phone) = &sub.phone {
                    group.sms_address = dispatch::sms_address(phone);
                }
            }
        }

        // Dispatch per recipient: one email/SMS pair covering all of
        // that recipient's newly-open sections, retirement only after
        // the send succeeds. Failures are isolated per recipient.
        for (recipient, group) in &batch {
            let email_body = render::render_email(&group.entries, &snapshot.term_names);
            let sms = group.sms_address.clone().map(|address| SmsTarget {
                address,
                body: render::render_sms(&group.entries),
            });

            match self
                .dispatcher
                .dispatch(recipient, &email_body, sms.as_ref())
                .await
            {
                Ok(result) => {
                    report.recipients_notified += 1;
                    info!(
                        recipient = %recipient,
                        crns = group.entries.len(),
                        sms = result.delivered_sms,
                        "Notification delivered"
                    );
                    for entry in &group.entries {
                        match self
                            .store
                            .retire(&entry.crn, &entry.term, recipient, now, result.delivered_sms)
                            .await
                        {
                            Ok(RetireOutcome::Retired) => report.retired += 1,
                            Ok(RetireOutcome::AlreadyResolved) => debug!(
                                crn = %entry.crn,
                                term = %entry.term,
                                "Subscription already resolved elsewhere"
                            ),
                            Err(e) => warn!(
                                crn = %entry.crn,
                                term = %entry.term,
                                error = %e,
                                "Failed to retire subscription"
                            ),
                        }
                    }
                }
                Err(e) => {
                    report.recipients_failed += 1;
                    warn!(
                        recipient = %recipient,
                        error = %e,
                        "Dispatch failed; subscriptions stay active for retry next cycle"
                    );
                }
            }
        }

        Ok(report)
    }
}
