//! End-to-end cycle tests: scripted availability, in-memory store,
//! recording transport.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use alerts::{
    AvailabilityCache, AvailabilityProvider, DispatchError, Dispatcher, MailSession,
    MailTransport, MemoryStore, Monitor, MonitorConfig, ProviderError, Section, Subscription,
    SubscriptionStore, Term,
};

const FALL: &str = "202511";

/// Availability provider scripted per test.
struct ScriptedProvider {
    sections: Mutex<HashMap<String, Vec<Section>>>,
    fail: AtomicBool,
}

impl ScriptedProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sections: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn set_section(&self, term: &str, crn: &str, is_open: bool) {
        let mut sections = self.sections.lock().unwrap();
        let list = sections.entry(term.to_string()).or_default();
        if let Some(existing) = list.iter_mut().find(|s| s.crn == crn) {
            existing.is_open = is_open;
        } else {
            list.push(Section {
                crn: crn.to_string(),
                is_open,
            });
        }
    }

    fn fail_next_fetches(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn recover(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AvailabilityProvider for ScriptedProvider {
    async fn list_terms(&self) -> Result<Vec<Term>, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                url: "http://test/api/all-terms".to_string(),
                code: 503,
            });
        }
        Ok(self
            .sections
            .lock()
            .unwrap()
            .keys()
            .map(|code| Term {
                code: code.clone(),
                description: format!("Fall {code}"),
            })
            .collect())
    }

    async fn get_sections(&self, term_code: &str) -> Result<Vec<Section>, ProviderError> {
        Ok(self
            .sections
            .lock()
            .unwrap()
            .get(term_code)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct SentMessage {
    to: String,
    subject: String,
    body: String,
}

/// Transport double: records sends, optionally failing for chosen
/// recipients or parking each send until released.
#[derive(Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail_recipients: Arc<Mutex<HashSet<String>>>,
    gated: Arc<AtomicBool>,
    gate: Arc<tokio::sync::Notify>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail_for(&self, recipient: &str) {
        self.fail_recipients
            .lock()
            .unwrap()
            .insert(recipient.to_string());
    }

    /// Park every send on the gate until [`release_send`] is called.
    fn hold_sends(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let one parked (or upcoming) send through.
    fn release_send(&self) {
        self.gate.notify_one();
    }

    fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

struct RecordingSession {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail_recipients: Arc<Mutex<HashSet<String>>>,
    gated: Arc<AtomicBool>,
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn open(&self) -> Result<Box<dyn MailSession>, DispatchError> {
        Ok(Box::new(RecordingSession {
            sent: Arc::clone(&self.sent),
            fail_recipients: Arc::clone(&self.fail_recipients),
            gated: Arc::clone(&self.gated),
            gate: Arc::clone(&self.gate),
        }))
    }
}

#[async_trait]
impl MailSession for RecordingSession {
    async fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.fail_recipients.lock().unwrap().contains(to) {
            return Err(DispatchError::Other(format!(
                "scripted transport failure for {to}"
            )));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Give spawned tasks room to reach their next await point.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    provider: Arc<ScriptedProvider>,
    transport: Arc<RecordingTransport>,
    monitor: Monitor,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let provider = ScriptedProvider::new();
    let transport = RecordingTransport::new();

    let cache = AvailabilityCache::new(provider.clone(), Duration::from_secs(60));
    let dispatcher = Dispatcher::new(transport.clone());
    let monitor = Monitor::new(store.clone(), cache, dispatcher, MonitorConfig::default());

    Harness {
        store,
        provider,
        transport,
        monitor,
    }
}

async fn record(store: &MemoryStore, email: &str, crn: &str) -> Subscription {
    store
        .all()
        .await
        .into_iter()
        .find(|s| s.recipient_email == email && s.crn == crn)
        .expect("record exists")
}

#[tokio::test]
async fn test_grouping_one_dispatch_per_recipient() {
    let h = harness();
    h.store
        .upsert(
            Subscription::new("10", FALL, "x@y.com").with_phone("(555) 123-4567", "verizon", true),
        )
        .await
        .unwrap();
    h.store
        .upsert(Subscription::new("20", FALL, "x@y.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);
    h.provider.set_section(FALL, "20", true);

    let report = h.monitor.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.newly_open, 2);
    assert_eq!(report.recipients_notified, 1);
    assert_eq!(report.retired, 2);

    // Exactly one email and one SMS-gateway message.
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);

    let email = &sent[0];
    assert_eq!(email.to, "x@y.com");
    assert_eq!(email.subject, "Class Availability Alert");
    assert!(email.body.contains("CRN 10 (Term: Fall 202511) is now AVAILABLE!"));
    assert!(email.body.contains("CRN 20 (Term: Fall 202511) is now AVAILABLE!"));

    let sms = &sent[1];
    assert_eq!(sms.to, "5551234567@vtext.com");
    assert_eq!(sms.body, "CRN 10 is available\nCRN 20 is available");

    let a = record(&h.store, "x@y.com", "10").await;
    assert!(!a.active);
    assert!(a.notified);
    assert!(a.notified_via_sms);
}

#[tokio::test]
async fn test_single_crn_sms_format() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com").with_phone("5551234567", "tmobile", true))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);

    h.monitor.run_cycle(Utc::now()).await.unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].to, "5551234567@tmomail.net");
    assert_eq!(sent[1].subject, "Seat Alert");
    assert_eq!(sent[1].body, "CRN 10 is available");
}

#[tokio::test]
async fn test_retired_subscription_is_never_resent() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);

    let now = Utc::now();
    let first = h.monitor.run_cycle(now).await.unwrap();
    assert_eq!(first.retired, 1);
    assert_eq!(h.transport.sent().len(), 1);

    // Snapshot unchanged, subscription retired: nothing more to send.
    let second = h
        .monitor
        .run_cycle(now + ChronoDuration::seconds(30))
        .await
        .unwrap();
    assert_eq!(second.active, 0);
    assert_eq!(second.newly_open, 0);
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test]
async fn test_failure_isolation_between_recipients() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com"))
        .await
        .unwrap();
    h.store
        .upsert(Subscription::new("20", FALL, "y@z.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);
    h.provider.set_section(FALL, "20", true);
    h.transport.fail_for("x@y.com");

    let report = h.monitor.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.recipients_notified, 1);
    assert_eq!(report.recipients_failed, 1);
    assert_eq!(report.retired, 1);

    let failed = record(&h.store, "x@y.com", "10").await;
    assert!(failed.active);
    assert!(!failed.notified);
    // Status was still recorded for the failed recipient.
    assert!(failed.status);
    assert!(failed.last_checked.is_some());

    let delivered = record(&h.store, "y@z.com", "20").await;
    assert!(!delivered.active);
    assert!(delivered.notified);
}

#[tokio::test]
async fn test_unknown_carrier_degrades_to_email() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com").with_phone("5551234567", "xfinity", true))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);

    let report = h.monitor.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.retired, 1);

    // Email only; no SMS-gateway message.
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "x@y.com");

    let sub = record(&h.store, "x@y.com", "10").await;
    assert!(!sub.active);
    assert!(sub.notified);
    assert!(!sub.notified_via_sms);
}

#[tokio::test]
async fn test_closed_section_updates_status_and_keeps_watching() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", false);

    let now = Utc::now();
    let report = h.monitor.run_cycle(now).await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.newly_open, 0);
    assert!(h.transport.sent().is_empty());

    let sub = record(&h.store, "x@y.com", "10").await;
    assert!(sub.active);
    assert!(!sub.status);
    assert_eq!(sub.last_checked, Some(now));
}

#[tokio::test]
async fn test_section_missing_from_snapshot_stays_watching() {
    let h = harness();
    h.store
        .upsert(Subscription::new("99999", FALL, "x@y.com"))
        .await
        .unwrap();
    // Term exists but the CRN does not.
    h.provider.set_section(FALL, "10", false);

    let report = h.monitor.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.evaluated, 0);
    assert!(h.transport.sent().is_empty());

    let sub = record(&h.store, "x@y.com", "99999").await;
    assert!(sub.active);
    assert!(sub.last_checked.is_none());
}

#[tokio::test]
async fn test_refresh_failure_reuses_stale_snapshot_for_detection() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", false);

    let now = Utc::now();
    h.monitor.run_cycle(now).await.unwrap();

    // Upstream goes down past the refresh interval; the previous
    // snapshot still drives detection and nothing is marked open.
    h.provider.fail_next_fetches();
    let report = h
        .monitor
        .run_cycle(now + ChronoDuration::seconds(120))
        .await
        .unwrap();

    assert!(report.used_stale_snapshot);
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.newly_open, 0);
    assert!(h.transport.sent().is_empty());

    let sub = record(&h.store, "x@y.com", "10").await;
    assert!(sub.active);
    assert!(!sub.status);
}

#[tokio::test]
async fn test_group_sms_uses_first_resolvable_phone() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com").with_phone("5550000000", "xfinity", true))
        .await
        .unwrap();
    h.store
        .upsert(Subscription::new("20", FALL, "x@y.com").with_phone("5551234567", "verizon", true))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);
    h.provider.set_section(FALL, "20", true);

    let report = h.monitor.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.recipients_notified, 1);

    // The first member's carrier has no gateway; the SMS rides on the
    // next member's phone instead of being dropped.
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].to, "5551234567@vtext.com");
    assert_eq!(sent[1].body, "CRN 10 is available\nCRN 20 is available");

    let sub = record(&h.store, "x@y.com", "10").await;
    assert!(sub.notified_via_sms);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_cycle_lets_inflight_send_finish() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);
    h.transport.hold_sends();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        let monitor = h.monitor;
        async move { monitor.run(cancel).await }
    });

    // The first tick fires immediately; the cycle reaches the
    // transport and parks on the gate.
    settle().await;
    assert!(h.transport.sent().is_empty());

    // Cancelling now must not abandon the delivery in flight.
    cancel.cancel();
    h.transport.release_send();
    task.await.unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "x@y.com");

    let sub = record(&h.store, "x@y.com", "10").await;
    assert!(!sub.active);
    assert!(sub.notified);
}

#[tokio::test(start_paused = true)]
async fn test_loop_survives_failed_cycle_and_retries() {
    let h = harness();
    h.store
        .upsert(Subscription::new("10", FALL, "x@y.com"))
        .await
        .unwrap();
    h.provider.set_section(FALL, "10", true);
    h.provider.fail_next_fetches();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        let monitor = h.monitor;
        async move { monitor.run(cancel).await }
    });

    // First cycle has no snapshot and no previous one to fall back to.
    settle().await;
    assert!(h.transport.sent().is_empty());

    // Upstream recovers; the next tick delivers.
    h.provider.recover();
    tokio::time::advance(Duration::from_secs(60)).await;
    settle().await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "x@y.com");

    cancel.cancel();
    task.await.unwrap();

    let sub = record(&h.store, "x@y.com", "10").await;
    assert!(!sub.active);
    assert!(sub.notified);
}
