//! Notification body rendering.
//!
//! Pure string construction, no I/O or external state, so formats can
//! be unit-tested against literal fixtures.

use std::collections::HashMap;

use crate::model::BatchEntry;

/// Subject line for the email notification.
pub const EMAIL_SUBJECT: &str = "Class Availability Alert";

/// Subject line for the SMS-gateway message.
pub const SMS_SUBJECT: &str = "Seat Alert";

const GREETING: &str = "Hello,\n\nOne or more of your course alerts are now available:\n\n";

const FOOTER: &str = "\nPlease log in to register as soon as possible as spaces may fill \
                      quickly.\n\nThank you for using SeatWatch!";

/// Build the email body for one recipient's newly-open sections.
///
/// Term codes resolve through `term_names`; an unknown code falls back
/// to `Term <code>`.
#[must_use]
pub fn render_email(entries: &[BatchEntry], term_names: &HashMap<String, String>) -> String {
    let mut body = String::from(GREETING);
    for entry in entries {
        let term_name = term_names
            .get(&entry.term)
            .cloned()
            .unwrap_or_else(|| format!("Term {}", entry.term));
        body.push_str(&format!(
            "CRN {} (Term: {}) is now AVAILABLE!\n",
            entry.crn, term_name
        ));
    }
    body.push_str(FOOTER);
    body
}

/// Build the SMS-gateway body. Carriers bill and truncate these, so it
/// is exactly one short line per CRN.
#[must_use]
pub fn render_sms(entries: &[BatchEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("CRN {} is available", e.crn))
        .collect::<Vec<_>>()
        .join("\n")
}
