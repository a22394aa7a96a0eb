//! Deliver submissions by email.

mod gmail;

use std::borrow::Cow;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};

use crate::credentials::CredentialsError;

pub use gmail::GmailSender;

/// Errors raised while delivering a message.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("finding credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("creating gmail service: {0}")]
    Service(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("sending gmail message: {0}")]
    Send(#[from] reqwest::Error),

    #[error("sending gmail message: api answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Outbound mail capability. Sender and recipient are fixed by the
/// implementation.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one plain-text message. Never retries.
    async fn send(&self, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Plain-text RFC 822 message.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl<'a> Message<'a> {
    pub fn new(from: &'a str, to: &'a str, subject: &'a str, body: &'a str) -> Self {
        Self {
            from,
            to,
            subject,
            body,
        }
    }

    /// Headers, blank line, body.
    pub fn to_rfc822(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=UTF-8\r\n\r\n{}",
            self.from,
            self.to,
            encode_header(self.subject),
            self.body,
        )
    }

    /// Base64url form expected in the `raw` field of the Gmail API.
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.to_rfc822())
    }
}

/// Input bytes per encoded word. 45 bytes give 60 base64 characters,
/// 72 with the `=?UTF-8?B?...?=` wrapper, under the 75 allowed.
const ENCODED_WORD_BYTES: usize = 45;

/// RFC 2047 `B` encoding for anything that is not printable ASCII.
/// It also neutralises CR/LF coming from user input. Long values are split
/// into several encoded words on folded lines, never inside a character.
fn encode_header(value: &str) -> Cow<'_, str> {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Cow::Borrowed(value);
    }

    let mut words = Vec::new();
    let mut start = 0;
    for (index, c) in value.char_indices() {
        if index + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(&value[start..index]);
            start = index;
        }
    }
    words.push(&value[start..]);

    let words: Vec<String> = words
        .into_iter()
        .map(|word| format!("=?UTF-8?B?{}?=", STANDARD.encode(word)))
        .collect();
    Cow::Owned(words.join("\r\n "))
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct NoopSender;

#[async_trait]
impl EmailSender for NoopSender {
    async fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
        tracing::info!(subject, size_bytes = body.len(), "noop: message not sent");
        Ok(())
    }
}
