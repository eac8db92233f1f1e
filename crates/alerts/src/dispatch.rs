//! Outbound delivery: SMS-gateway addressing and the SMTP transport.
//!
//! A dispatch call opens one authenticated session and sends both the
//! email and, when a gateway address resolves, the SMS-gateway message
//! over it. Reusing the session avoids a second authentication
//! round-trip between the two sends.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SmtpConfig;
use crate::error::DispatchError;
use crate::model::Phone;
use crate::render;

/// Mobile carriers with a known email-to-SMS gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Verizon,
    Att,
    Tmobile,
    Sprint,
    Cricket,
    Boost,
    UsCellular,
    Metro,
}

impl Carrier {
    /// Parse a user-entered carrier name. Case-insensitive and
    /// punctuation-tolerant, so "at&t", "T-Mobile" and "us-cellular"
    /// all resolve. Unknown carriers return `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "verizon" => Some(Self::Verizon),
            "att" => Some(Self::Att),
            "tmobile" => Some(Self::Tmobile),
            "sprint" => Some(Self::Sprint),
            "cricket" => Some(Self::Cricket),
            "boost" => Some(Self::Boost),
            "uscellular" => Some(Self::UsCellular),
            "metro" => Some(Self::Metro),
            _ => None,
        }
    }

    /// SMS gateway domain for this carrier, including the `@`.
    #[must_use]
    pub const fn gateway_domain(self) -> &'static str {
        match self {
            Self::Verizon => "@vtext.com",
            Self::Att => "@txt.att.net",
            Self::Tmobile => "@tmomail.net",
            Self::Sprint => "@messaging.sprintpcs.com",
            Self::Cricket => "@mms.cricketwireless.net",
            Self::Boost => "@sms.myboostmobile.com",
            Self::UsCellular => "@email.uscc.net",
            Self::Metro => "@mymetropcs.com",
        }
    }
}

/// Normalize a phone number to exactly 10 digits.
///
/// Strips every non-digit character. Fewer than 10 digits is treated
/// as no usable phone; more than 10 keeps the last 10, dropping a
/// leading country code.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return None;
    }
    Some(digits[digits.len() - 10..].to_string())
}

/// Resolve a subscription phone into an SMS-gateway address.
///
/// Returns `None` when the phone is unverified, malformed, or on an
/// unrecognized carrier; the caller degrades to email-only dispatch.
#[must_use]
pub fn sms_address(phone: &Phone) -> Option<String> {
    if !phone.verified {
        return None;
    }
    let Some(number) = normalize_phone(&phone.number) else {
        warn!(number = %phone.number, "Phone has fewer than 10 digits; skipping SMS");
        return None;
    };
    let Some(carrier) = Carrier::parse(&phone.carrier) else {
        warn!(carrier = %phone.carrier, "Unknown carrier; skipping SMS");
        return None;
    };
    Some(format!("{number}{}", carrier.gateway_domain()))
}

/// One authenticated outbound session, reusable for sequential sends
/// without re-authenticating.
#[async_trait]
pub trait MailSession: Send {
    /// Send one plain-text message to one address.
    async fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError>;
}

/// Factory for outbound sessions. One session is opened per dispatch
/// call and dropped on every exit path when the call returns.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MailSession>, DispatchError>;
}

/// SMTP transport (STARTTLS) backed by lettre.
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

struct SmtpSession {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn open(&self) -> Result<Box<dyn MailSession>, DispatchError> {
        let from: Mailbox = self.config.from_email.parse()?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );

        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
                .port(self.config.port)
                .credentials(creds)
                .timeout(Some(self.config.timeout))
                .build();

        Ok(Box::new(SmtpSession { mailer, from }))
    }
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        let to: Mailbox = to.parse()?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;
        self.mailer.send(message).await?;
        Ok(())
    }
}

/// Resolved SMS leg of a dispatch: gateway address plus terse body.
#[derive(Debug, Clone)]
pub struct SmsTarget {
    pub address: String,
    pub body: String,
}

/// Outcome of one successful dispatch call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchResult {
    pub delivered_email: bool,
    pub delivered_sms: bool,
}

/// Sends one recipient's grouped notification over email and, when an
/// SMS target resolved, the carrier gateway.
pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    /// Deliver one grouped notification.
    ///
    /// Any transport-level failure fails the whole call; the caller
    /// must not retire subscriptions in this recipient's group. Other
    /// recipients are unaffected.
    pub async fn dispatch(
        &self,
        recipient: &str,
        email_body: &str,
        sms: Option<&SmsTarget>,
    ) -> Result<DispatchResult, DispatchError> {
        let mut session = self.transport.open().await?;

        session
            .send(recipient, render::EMAIL_SUBJECT, email_body)
            .await?;

        let mut result = DispatchResult {
            delivered_email: true,
            delivered_sms: false,
        };

        if let Some(sms) = sms {
            // Second send rides the already-authenticated session.
            session
                .send(&sms.address, render::SMS_SUBJECT, &sms.body)
                .await?;
            result.delivered_sms = true;
        }

        debug!(
            recipient = %recipient,
            sms = result.delivered_sms,
            "Notification dispatched"
        );
        Ok(result)
    }

    /// Send a short test message to verify transport configuration.
    pub async fn send_test(&self, to: &str) -> Result<(), DispatchError> {
        let mut session = self.transport.open().await?;
        session
            .send(
                to,
                "SeatWatch SMTP Test",
                "SMTP configuration is working.\n\nThis is a test message from seat-monitor.",
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(
            normalize_phone("(555) 123-4567"),
            Some("5551234567".to_string())
        );
    }

    #[test]
    fn test_normalize_drops_leading_country_code() {
        assert_eq!(
            normalize_phone("1-555-123-4567"),
            Some("5551234567".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_short_numbers() {
        assert_eq!(normalize_phone("123-4567"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_carrier_parse_is_lenient() {
        assert_eq!(Carrier::parse("Verizon"), Some(Carrier::Verizon));
        assert_eq!(Carrier::parse("at&t"), Some(Carrier::Att));
        assert_eq!(Carrier::parse("T-Mobile"), Some(Carrier::Tmobile));
        assert_eq!(Carrier::parse("us-cellular"), Some(Carrier::UsCellular));
        assert_eq!(Carrier::parse("xfinity"), None);
    }

    #[test]
    fn test_gateway_table() {
        assert_eq!(Carrier::Verizon.gateway_domain(), "@vtext.com");
        assert_eq!(Carrier::Att.gateway_domain(), "@txt.att.net");
        assert_eq!(Carrier::Tmobile.gateway_domain(), "@tmomail.net");
        assert_eq!(
            Carrier::Sprint.gateway_domain(),
            "@messaging.sprintpcs.com"
        );
        assert_eq!(
            Carrier::Cricket.gateway_domain(),
            "@mms.cricketwireless.net"
        );
        assert_eq!(
            Carrier::Boost.gateway_domain(),
            "@sms.myboostmobile.com"
        );
        assert_eq!(Carrier::UsCellular.gateway_domain(), "@email.uscc.net");
        assert_eq!(Carrier::Metro.gateway_domain(), "@mymetropcs.com");
    }

    #[test]
    fn test_sms_address_resolution() {
        let phone = Phone {
            number: "(555) 123-4567".to_string(),
            carrier: "verizon".to_string(),
            verified: true,
        };
        assert_eq!(
            sms_address(&phone),
            Some("5551234567@vtext.com".to_string())
        );
    }

    #[test]
    fn test_sms_address_requires_verification() {
        let phone = Phone {
            number: "5551234567".to_string(),
            carrier: "verizon".to_string(),
            verified: false,
        };
        assert_eq!(sms_address(&phone), None);
    }

    #[test]
    fn test_sms_address_unknown_carrier() {
        let phone = Phone {
            number: "5551234567".to_string(),
            carrier: "xfinity".to_string(),
            verified: true,
        };
        assert_eq!(sms_address(&phone), None);
    }
}
