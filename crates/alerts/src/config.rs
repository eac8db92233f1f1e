//! Configuration for the outbound SMTP transport.

use anyhow::{Context, Result};
use std::time::Duration;

/// Default SMTP host (Gmail).
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";

/// Default SMTP port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default bound on SMTP connection and send time.
pub const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and endpoint for the outbound SMTP transport.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// SMTP username (sending account).
    pub username: String,
    /// SMTP password (app password for Gmail).
    pub password: String,
    /// Sender address, usually the same as the username.
    pub from_email: String,
    /// Bound on connection and send time; a hung transport fails the
    /// dispatch instead of stalling the cycle.
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Create configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `SMTP_USERNAME`: sending account
    /// - `SMTP_PASSWORD`: account app password
    ///
    /// # Optional Environment Variables
    /// - `SMTP_HOST`: server hostname (default: smtp.gmail.com)
    /// - `SMTP_PORT`: server port (default: 587)
    /// - `SMTP_FROM`: sender address (default: same as username)
    pub fn from_env() -> Result<Self> {
        let username = std::env::var("SMTP_USERNAME")
            .context("SMTP_USERNAME environment variable not set")?;

        let password = std::env::var("SMTP_PASSWORD")
            .context("SMTP_PASSWORD environment variable not set")?;
        // App passwords pasted from the provider UI often carry stray
        // whitespace.
        let password = password.trim().to_string();

        let host = std::env::var("SMTP_HOST").unwrap_or_else(|_| DEFAULT_SMTP_HOST.to_string());

        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SMTP_PORT);

        let from_email = std::env::var("SMTP_FROM").unwrap_or_else(|_| username.clone());

        Ok(Self {
            host,
            port,
            username,
            password,
            from_email,
            timeout: DEFAULT_SMTP_TIMEOUT,
        })
    }
}
