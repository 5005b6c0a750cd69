//! Outbound email.
//!
//! `SendGridMailer` posts to the SendGrid v3 API. Without an API key the
//! `ConsoleMailer` only logs that a message went out; its body, which carries
//! single-use links, is logged at debug level. `MemoryMailer` keeps copies
//! for tests.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{MailSettings, Settings};
use crate::upstream::{self, UpstreamError};

const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const SERVICE: &str = "email service";

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), UpstreamError>;
}

pub type SharedMailer = Arc<dyn Mailer>;

pub fn from_settings(settings: &Settings) -> reqwest::Result<SharedMailer> {
    Ok(match &settings.mail {
        MailSettings::Console => Arc::new(ConsoleMailer),
        MailSettings::SendGrid { api_key } => Arc::new(SendGridMailer {
            client: upstream::client(settings.upstream_timeout)?,
            timeout: settings.upstream_timeout,
            api_key: api_key.clone(),
            from: settings.from_email.clone(),
        }),
    })
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

pub struct SendGridMailer {
    client: reqwest::Client,
    timeout: Duration,
    api_key: String,
    from: String,
}

impl SendGridMailer {
    fn request<'a>(&'a self, email: &'a Email) -> SendGridRequest<'a> {
        SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![Address { email: &email.to }],
            }],
            from: Address { email: &self.from },
            subject: &email.subject,
            content: vec![Content {
                content_type: "text/plain",
                value: &email.body,
            }],
        }
    }
}

#[rocket::async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: Email) -> Result<(), UpstreamError> {
        let response = self
            .client
            .post(SENDGRID_API_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request(&email))
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, self.timeout, e))?;
        upstream::check(SERVICE, response).await?;
        tracing::info!(to = %email.to, subject = %email.subject, "email dispatched");
        Ok(())
    }
}

pub struct ConsoleMailer;

#[rocket::async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: Email) -> Result<(), UpstreamError> {
        tracing::info!(to = %email.to, subject = %email.subject, "email (console)");
        tracing::debug!(to = %email.to, body = %email.body, "email body (console)");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }
}

#[rocket::async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<(), UpstreamError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

pub fn verification_email(domain: &str, to: &str, username: &str, token: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Please verify your email".to_string(),
        body: format!(
            "Hi {},\n\nConfirm your email address by opening the link below:\n\n{}/api/users/verify/{}\n",
            username,
            domain.trim_end_matches('/'),
            token
        ),
    }
}

pub fn password_reset_email(domain: &str, to: &str, token: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Password reset".to_string(),
        body: format!(
            "A password reset was requested for this account.\n\nSend your new password with a PUT request to:\n\n{}/api/users/password_reset/{}\n\nIgnore this email if you did not ask for a reset.\n",
            domain.trim_end_matches('/'),
            token
        ),
    }
}
