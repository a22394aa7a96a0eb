//! Attached service account of Cloud Functions, Cloud Run or GCE.

use serde::{Deserialize, Serialize};

use super::{AccessToken, CredentialsError, DelegationClaims, read_json};

const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal";
const DEFAULT_IAM_URL: &str = "https://iamcredentials.googleapis.com";
const SERVICE_ACCOUNT_PATH: &str =
    "/computeMetadata/v1/instance/service-accounts/default";
const CLOUD_PLATFORM_SCOPE: &str =
    "https://www.googleapis.com/auth/cloud-platform";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignJwtRequest {
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignJwtResponse {
    signed_jwt: String,
}

/// Metadata server plus IAM Credentials API client.
///
/// The attached identity has no private key, so the delegation assertion
/// is signed remotely through `signJwt`. The service account needs the
/// Service Account Token Creator role on itself.
#[derive(Debug, Clone)]
pub struct ComputeIdentity {
    http: reqwest::Client,
    metadata_url: String,
    iam_url: String,
}

impl ComputeIdentity {
    pub fn new(metadata_url: impl Into<String>, iam_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            metadata_url: metadata_url.into().trim_end_matches('/').to_owned(),
            iam_url: iam_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Honor `GCE_METADATA_HOST` like the official client libraries.
    pub fn from_env() -> Self {
        let metadata_url = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|host| !host.is_empty())
            .map(|host| format!("http://{host}"))
            .unwrap_or_else(|| DEFAULT_METADATA_URL.to_owned());

        Self::new(metadata_url, DEFAULT_IAM_URL)
    }

    /// Email of the default service account.
    pub async fn email(&self) -> Result<String, CredentialsError> {
        let response = self
            .http
            .get(format!("{}{SERVICE_ACCOUNT_PATH}/email", self.metadata_url))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|source| {
                // No metadata server outside of Google Cloud.
                if source.is_connect() {
                    CredentialsError::NotFound
                } else {
                    CredentialsError::Http {
                        endpoint: "metadata server",
                        source,
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| {
            CredentialsError::Http {
                endpoint: "metadata server",
                source,
            }
        })?;
        if !status.is_success() {
            return Err(CredentialsError::Rejected {
                endpoint: "metadata server",
                status: status.as_u16(),
                body,
            });
        }

        Ok(body.trim().to_owned())
    }

    /// Token of the service account itself, used to call IAM.
    pub async fn token(&self) -> Result<AccessToken, CredentialsError> {
        let response = self
            .http
            .get(format!("{}{SERVICE_ACCOUNT_PATH}/token", self.metadata_url))
            .query(&[("scopes", CLOUD_PLATFORM_SCOPE)])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|source| CredentialsError::Http {
                endpoint: "metadata server",
                source,
            })?;

        read_json("metadata server", response).await
    }

    /// Have IAM sign `claims` with a Google-managed key of `email`.
    pub async fn sign_jwt(
        &self,
        email: &str,
        claims: &DelegationClaims,
    ) -> Result<String, CredentialsError> {
        let identity = self.token().await?;
        let request = SignJwtRequest {
            payload: serde_json::to_string(claims)?,
        };

        let response = self
            .http
            .post(format!(
                "{}/v1/projects/-/serviceAccounts/{email}:signJwt",
                self.iam_url
            ))
            .bearer_auth(identity.secret())
            .json(&request)
            .send()
            .await
            .map_err(|source| CredentialsError::Http {
                endpoint: "iam credentials",
                source,
            })?;

        let signed: SignJwtResponse =
            read_json("iam credentials", response).await?;
        Ok(signed.signed_jwt)
    }
}
