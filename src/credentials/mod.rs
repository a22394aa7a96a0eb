//! Ambient Google credentials and domain-wide delegation.
//!
//! The relay never holds the sender's own credentials. It discovers the
//! service identity it runs as, builds a JWT assertion with `sub` set to the
//! impersonated account, has it signed, then trades it for an access token
//! at the OAuth token endpoint.
//!
//! Two identities are supported:
//! - a service account key file (`GOOGLE_APPLICATION_CREDENTIALS` or the
//!   gcloud well-known file), signed locally;
//! - the attached service account of the compute platform, read from the
//!   metadata server and signed by the IAM Credentials API.

mod compute;
mod service_account;

use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use compute::ComputeIdentity;
pub use service_account::ServiceAccountKey;

/// Scope needed by `users.messages.send`.
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const WELL_KNOWN_FILE: &str = "application_default_credentials.json";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: u64 = 60 * 60; // 1 hour, the maximum accepted.

/// Errors raised while acquiring a delegated access token.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error(
        "no credentials found: set GOOGLE_APPLICATION_CREDENTIALS or run with an attached service account"
    )]
    NotFound,

    #[error("failed to read credentials file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse credentials: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("credentials of type `{0}` cannot impersonate a user")]
    Unsupported(String),

    #[error("failed to sign delegation assertion: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),

    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: &'static str,
        source: reqwest::Error,
    },

    #[error("{endpoint} answered {status}: {body}")]
    Rejected {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
}

/// OAuth 2.0 bearer token.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            access_token: secret.into(),
            expires_in: None,
        }
    }

    pub fn secret(&self) -> &str {
        &self.access_token
    }

    /// Lifetime in seconds as announced by the issuer.
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Claims of a domain-wide delegation assertion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationClaims {
    /// Service account email.
    pub iss: String,
    /// Impersonated user.
    pub sub: String,
    /// Space separated scopes.
    pub scope: String,
    /// Token endpoint the assertion is meant for.
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

impl DelegationClaims {
    pub fn new(
        issuer: &str,
        subject: &str,
        scopes: &[&str],
        audience: &str,
    ) -> Self {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        Self {
            iss: issuer.to_owned(),
            sub: subject.to_owned(),
            scope: scopes.join(" "),
            aud: audience.to_owned(),
            iat,
            exp: iat + ASSERTION_LIFETIME,
        }
    }
}

/// Capability to act as another account.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get an access token acting as `subject` with `scopes`.
    async fn token(
        &self,
        subject: &str,
        scopes: &[&str],
    ) -> Result<AccessToken, CredentialsError>;
}

/// Identity found by discovery.
#[derive(Debug)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    Compute,
}

/// [`TokenProvider`] backed by application default credentials.
///
/// Discovery runs on every call: the key file is read again, or the
/// metadata server asked again. Nothing is cached between requests.
#[derive(Debug, Clone)]
pub struct DelegatedTokenProvider {
    http: reqwest::Client,
    key_file: Option<PathBuf>,
    compute: ComputeIdentity,
    token_url: Option<String>,
}

impl DelegatedTokenProvider {
    /// Create a provider using an explicit key file, or the compute
    /// identity when `key_file` is `None`.
    pub fn new(key_file: Option<PathBuf>, compute: ComputeIdentity) -> Self {
        Self {
            http: reqwest::Client::new(),
            key_file,
            compute,
            token_url: None,
        }
    }

    /// Create a provider from the process environment, the way Google
    /// client libraries look for application default credentials.
    pub fn from_env() -> Self {
        let key_file = std::env::var_os(CREDENTIALS_ENV)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .or_else(well_known_file);

        match &key_file {
            Some(path) => {
                tracing::info!(path = %path.display(), "using service account key file")
            },
            None => tracing::info!("using compute platform service account"),
        }

        Self::new(key_file, ComputeIdentity::from_env())
    }

    /// Override the OAuth token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Resolve which identity to delegate from.
    pub async fn find_credentials(&self) -> Result<Credentials, CredentialsError> {
        match &self.key_file {
            Some(path) => ServiceAccountKey::from_file(path)
                .await
                .map(Credentials::ServiceAccount),
            None => Ok(Credentials::Compute),
        }
    }

    /// Trade a signed assertion for an access token.
    async fn exchange(
        &self,
        token_url: &str,
        assertion: &str,
    ) -> Result<AccessToken, CredentialsError> {
        let response = self
            .http
            .post(token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await
            .map_err(|source| CredentialsError::Http {
                endpoint: "token endpoint",
                source,
            })?;

        read_json("token endpoint", response).await
    }
}

#[async_trait]
impl TokenProvider for DelegatedTokenProvider {
    async fn token(
        &self,
        subject: &str,
        scopes: &[&str],
    ) -> Result<AccessToken, CredentialsError> {
        let (token_url, assertion) = match self.find_credentials().await? {
            Credentials::ServiceAccount(key) => {
                let token_url = self
                    .token_url
                    .clone()
                    .or_else(|| key.token_uri().map(str::to_owned))
                    .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_owned());
                let claims = DelegationClaims::new(
                    key.client_email(),
                    subject,
                    scopes,
                    &token_url,
                );
                tracing::debug!(
                    service_account = key.client_email(),
                    subject,
                    "signing delegation assertion locally"
                );
                (token_url, key.sign(&claims)?)
            },
            Credentials::Compute => {
                let token_url = self
                    .token_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_owned());
                let email = self.compute.email().await?;
                let claims =
                    DelegationClaims::new(&email, subject, scopes, &token_url);
                tracing::debug!(
                    service_account = %email,
                    subject,
                    "signing delegation assertion with iam credentials"
                );
                (token_url, self.compute.sign_jwt(&email, &claims).await?)
            },
        };

        self.exchange(&token_url, &assertion).await
    }
}

/// Decode a JSON answer, turning non-2xx statuses into
/// [`CredentialsError::Rejected`].
async fn read_json<T: DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, CredentialsError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialsError::Rejected {
            endpoint,
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|source| CredentialsError::Http { endpoint, source })
}

/// gcloud `application-default login` output, if it exists.
fn well_known_file() -> Option<PathBuf> {
    let config_dir = if cfg!(windows) {
        PathBuf::from(std::env::var_os("APPDATA")?).join("gcloud")
    } else {
        PathBuf::from(std::env::var_os("HOME")?)
            .join(".config")
            .join("gcloud")
    };
    let path = config_dir.join(WELL_KNOWN_FILE);
    path.is_file().then_some(path)
}
