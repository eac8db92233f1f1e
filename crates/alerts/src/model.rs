//! Core records for seat-availability alerting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Phone contact attached to a subscription.
///
/// The carrier is kept as the raw user-entered string and only parsed
/// at dispatch time, so a record with an unrecognized carrier survives
/// storage round-trips and degrades to email-only delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phone {
    /// Phone number as entered; normalized to 10 digits at dispatch time.
    pub number: String,
    /// Carrier name as entered (e.g. "verizon", "t-mobile").
    pub carrier: String,
    /// Whether the number passed verification. Unverified numbers are
    /// never texted.
    pub verified: bool,
}

/// One subscriber's watch on one section in one term.
///
/// Created by the intake path with `active = true`; mutated only by
/// the monitor afterwards (`status`/`last_checked` every cycle, the
/// `notified*` fields exactly once on successful delivery). Never
/// deleted by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Course reference number (digits only). Not unique by itself.
    pub crn: String,
    /// Term code the section belongs to.
    pub term: String,
    /// Recipient email, trimmed and lower-cased. May be empty, in
    /// which case the subscription is tracked but never notified.
    pub recipient_email: String,
    /// Optional SMS contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<Phone>,
    /// True while the subscription is still waiting for availability.
    pub active: bool,
    /// Last observed availability, cached for external status queries.
    /// Not authoritative for transition detection.
    #[serde(default)]
    pub status: bool,
    /// Set once, on successful delivery.
    #[serde(default)]
    pub notified: bool,
    /// When the notification was delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,
    /// Whether the delivery included an SMS-gateway message.
    #[serde(default)]
    pub notified_via_sms: bool,
    /// Last cycle in which this subscription was evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create a new watching subscription, shaped the way the intake
    /// path creates them.
    #[must_use]
    pub fn new(crn: impl Into<String>, term: impl Into<String>, email: &str) -> Self {
        Self {
            crn: crn.into(),
            term: term.into(),
            recipient_email: email.trim().to_lowercase(),
            phone: None,
            active: true,
            status: false,
            notified: false,
            notified_at: None,
            notified_via_sms: false,
            last_checked: None,
        }
    }

    /// Attach a phone contact.
    #[must_use]
    pub fn with_phone(mut self, number: &str, carrier: &str, verified: bool) -> Self {
        self.phone = Some(Phone {
            number: number.to_string(),
            carrier: carrier.to_string(),
            verified,
        });
        self
    }

    /// Identity tuple for the active-uniqueness invariant.
    #[must_use]
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.crn, &self.term, &self.recipient_email)
    }
}

/// Availability of every known section as of one upstream fetch.
///
/// Immutable once built; a refresh produces a new snapshot rather
/// than mutating this one, so in-flight cycles keep a consistent view.
#[derive(Debug, Clone)]
pub struct AvailabilitySnapshot {
    /// term code → (crn → is open)
    pub terms: HashMap<String, HashMap<String, bool>>,
    /// term code → human-readable term description
    pub term_names: HashMap<String, String>,
    /// When the upstream fetch completed.
    pub fetched_at: DateTime<Utc>,
}

impl AvailabilitySnapshot {
    /// Look up a section. `None` when the term or CRN is unknown to
    /// the snapshot, which the monitor treats as "still watching".
    #[must_use]
    pub fn is_open(&self, term: &str, crn: &str) -> Option<bool> {
        self.terms.get(term)?.get(crn).copied()
    }
}

/// One newly-open section heading into a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub crn: String,
    pub term: String,
}
