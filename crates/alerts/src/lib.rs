//! Seat availability alerting engine.
//!
//! This crate implements the monitoring and notification core of
//! SeatWatch: it periodically samples course-section availability from
//! an upstream catalog, detects sections that have gone from full to
//! open, groups pending notifications per recipient, delivers them by
//! email and carrier SMS gateway, and retires satisfied subscriptions.
//!
//! # Architecture
//!
//! - [`AvailabilityProvider`] wraps the upstream catalog source
//! - [`AvailabilityCache`] memoizes provider fetches between cycles
//! - [`SubscriptionStore`] is the seam to the persistent record store
//! - [`render`] builds email and SMS bodies (pure, no I/O)
//! - [`Dispatcher`] sends both channels over one SMTP session
//! - [`Monitor`] orchestrates the polling cycle and the loop cadence
//!
//! The monitor is designed as a single active instance; see
//! [`Monitor::run`] for the cancellation contract.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod monitor;
pub mod provider;
pub mod render;
pub mod store;

pub use cache::{AvailabilityCache, SnapshotHandle};
pub use config::SmtpConfig;
pub use dispatch::{
    Carrier, DispatchResult, Dispatcher, MailSession, MailTransport, SmsTarget, SmtpTransport,
};
pub use error::{DispatchError, ProviderError, StoreError};
pub use model::{AvailabilitySnapshot, BatchEntry, Phone, Subscription};
pub use monitor::{CycleReport, Monitor, MonitorConfig};
pub use provider::{AvailabilityProvider, HowdyProvider, Section, Term};
pub use store::{JsonStore, MemoryStore, RetireOutcome, SubscriptionStore};
