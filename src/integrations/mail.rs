//! Outgoing mail
//!
//! Messages are assembled as RFC 822 multipart bodies and handed to Gmail as
//! a base64url `raw` payload.

use crate::error::{is_transient_status, OrchestrationError};
use crate::Result;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
    pub attachments: Vec<Attachment>,
}

impl OutgoingEmail {
    pub fn plain(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            bcc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            html: false,
            attachments: Vec::new(),
        }
    }

    pub fn html(mut self) -> Self {
        self.html = true;
        self
    }

    pub fn with_bcc(mut self, bcc: Vec<String>) -> Self {
        self.bcc = bcc;
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Render a multipart/mixed message. `boundary` must not occur in the parts.
pub fn build_mime(from: &str, email: &OutgoingEmail, boundary: &str) -> String {
    let mut out = String::new();
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!("From: {}\r\n", single_line(from)));
    out.push_str(&format!("To: {}\r\n", single_line(&email.to)));
    if !email.bcc.is_empty() {
        let bcc: Vec<String> = email.bcc.iter().map(|b| single_line(b)).collect();
        out.push_str(&format!("Bcc: {}\r\n", bcc.join(", ")));
    }
    out.push_str(&format!(
        "Subject: {}\r\n",
        encode_header(&single_line(&email.subject))
    ));
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    let subtype = if email.html { "html" } else { "plain" };
    out.push_str(&format!("--{}\r\n", boundary));
    out.push_str(&format!(
        "Content-Type: text/{}; charset=\"utf-8\"\r\n",
        subtype
    ));
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    out.push_str(&wrap_base64(&STANDARD.encode(email.body.as_bytes())));

    for attachment in &email.attachments {
        out.push_str(&format!("--{}\r\n", boundary));
        let filename = single_line(&attachment.filename).replace('"', "");
        out.push_str(&format!(
            "Content-Type: {}; name=\"{}\"\r\n",
            single_line(&attachment.content_type),
            filename
        ));
        out.push_str("Content-Transfer-Encoding: base64\r\n");
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
            filename
        ));
        out.push_str(&wrap_base64(&STANDARD.encode(&attachment.bytes)));
    }

    out.push_str(&format!("--{}--\r\n", boundary));
    out
}

/// Header values come from sheet cells; line breaks would start new headers.
fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// RFC 2047 encoded-word for non-ASCII subjects.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn wrap_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);
    let bytes = encoded.as_bytes();
    for chunk in bytes.chunks(76) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Gmail `users.messages.send` with a caller-supplied bearer token.
pub struct GmailMailer {
    client: Client,
    base_url: String,
    access_token: String,
    sender: String,
}

impl GmailMailer {
    pub fn new(base_url: &str, access_token: String, sender: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            sender,
        })
    }
}

#[async_trait::async_trait]
impl Mailer for GmailMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let boundary = format!("=_boundary_{}", uuid::Uuid::new_v4().simple());
        let mime = build_mime(&self.sender, email, &boundary);
        let raw = URL_SAFE.encode(mime.as_bytes());
        let url = format!("{}/users/me/messages/send", self.base_url);

        debug!(to = %email.to, subject = %email.subject, "Sending mail");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| OrchestrationError::MailError {
                message: format!("send to {} failed: {}", email.to, e),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(to = %email.to, status = %status, "Gmail API error: {}", body);
            return Err(OrchestrationError::MailError {
                message: format!("send to {} returned {}: {}", email.to, status, body),
                retryable: is_transient_status(status),
            });
        }
        Ok(())
    }
}

/// In-memory mailer that records every delivered message.
#[derive(Clone, Default)]
pub struct Outbox {
    sent: Arc<RwLock<Vec<OutgoingEmail>>>,
    failing: Arc<RwLock<HashMap<String, bool>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `recipient` fails. `retryable` picks the error flavour.
    pub async fn fail_for(&self, recipient: &str, retryable: bool) {
        self.failing
            .write()
            .await
            .insert(recipient.to_string(), retryable);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.read().await.clone()
    }

    pub async fn sent_to(&self, recipient: &str) -> Vec<OutgoingEmail> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|m| m.to == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Mailer for Outbox {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        if let Some(retryable) = self.failing.read().await.get(&email.to) {
            return Err(OrchestrationError::MailError {
                message: format!("injected failure for {}", email.to),
                retryable: *retryable,
            });
        }
        self.sent.write().await.push(email.clone());
        Ok(())
    }
}
