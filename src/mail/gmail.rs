//! Gmail API `users.messages.send` through domain-wide delegation.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use super::{EmailSender, MailError, Message};
use crate::config::Mail;
use crate::credentials::{AccessToken, GMAIL_SEND_SCOPE, TokenProvider};

const SEND_PATH: &str = "/gmail/v1/users/me/messages/send";
const AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    id: Option<String>,
    thread_id: Option<String>,
}

/// Sends as the configured sender account on behalf of the service
/// identity.
pub struct GmailSender {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    api_url: String,
    from: String,
    to: String,
}

impl GmailSender {
    /// Create a new [`GmailSender`].
    pub fn new(tokens: Arc<dyn TokenProvider>, config: &Mail) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            from: config.sender.clone(),
            to: config.recipient.clone(),
        }
    }

    /// `Authorization` header for `token`, hidden from logs.
    fn authorization(token: &AccessToken) -> Result<HeaderValue, MailError> {
        let mut authorization =
            HeaderValue::from_str(&format!("Bearer {}", token.secret()))
                .map_err(|err| MailError::Service(Box::new(err)))?;
        authorization.set_sensitive(true);

        Ok(authorization)
    }
}

#[async_trait]
impl EmailSender for GmailSender {
    async fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
        // `sub` must be the sender, the API refuses to send as anyone else.
        let token = self.tokens.token(&self.from, &[GMAIL_SEND_SCOPE]).await?;
        let authorization = Self::authorization(&token)?;

        let message = Message::new(&self.from, &self.to, subject, body);
        let response = self
            .http
            .post(format!("{}{SEND_PATH}", self.api_url))
            .header(AUTHORIZATION, authorization)
            .header(USER_AGENT, AGENT)
            .json(&SendRequest {
                raw: message.encode(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        match response.json::<SentMessage>().await {
            Ok(sent) => tracing::info!(
                message_id = ?sent.id,
                thread_id = ?sent.thread_id,
                to = %self.to,
                "message sent"
            ),
            Err(err) => tracing::warn!(error = %err, "message sent, unreadable api response"),
        }

        Ok(())
    }
}
