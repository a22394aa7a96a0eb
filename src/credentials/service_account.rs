//! Service account JSON key files.

use std::fmt;
use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Deserialize;

use super::{CredentialsError, DelegationClaims};

const SERVICE_ACCOUNT_TYPE: &str = "service_account";

/// Subset of a downloaded service account key.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Load a key file. Anything but a `service_account` key is refused
    /// since user credentials cannot impersonate.
    pub async fn from_file(path: &Path) -> Result<Self, CredentialsError> {
        let content = tokio::fs::read(path).await?;
        Self::from_slice(&content)
    }

    pub fn from_slice(content: &[u8]) -> Result<Self, CredentialsError> {
        let key: ServiceAccountKey = serde_json::from_slice(content)?;
        if key.kind != SERVICE_ACCOUNT_TYPE {
            return Err(CredentialsError::Unsupported(key.kind));
        }
        Ok(key)
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn token_uri(&self) -> Option<&str> {
        self.token_uri.as_deref()
    }

    /// Sign `claims` with RS256.
    pub fn sign(&self, claims: &DelegationClaims) -> Result<String, CredentialsError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;

        Ok(encode(&header, claims, &key)?)
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_key_file() {
        let key = ServiceAccountKey::from_file(Path::new(
            crate::credentials::tests::KEY_FILE,
        ))
        .await
        .unwrap();

        assert_eq!(
            key.client_email(),
            "relay@assessment-relay-test.iam.gserviceaccount.com"
        );
        assert_eq!(key.token_uri(), Some("https://oauth2.googleapis.com/token"));
        assert!(!format!("{key:?}").contains("PRIVATE KEY"));
    }

    #[test]
    fn test_refuse_user_credentials() {
        let file = br#"{
            "type": "authorized_user",
            "client_id": "764086051850-6qr4p6gpi6hn506pt8ejuq83di341hur.apps.googleusercontent.com",
            "client_secret": "secret",
            "refresh_token": "1//refresh"
        }"#;

        let err = ServiceAccountKey::from_slice(file).unwrap_err();
        assert!(
            matches!(err, CredentialsError::Unsupported(kind) if kind == "authorized_user")
        );
    }

    #[test]
    fn test_invalid_private_key() {
        let file = br#"{
            "type": "service_account",
            "client_email": "relay@example.iam.gserviceaccount.com",
            "private_key": "not a pem"
        }"#;

        let key = ServiceAccountKey::from_slice(file).unwrap();
        let claims = DelegationClaims::new(
            key.client_email(),
            "info@example.org",
            &[crate::credentials::GMAIL_SEND_SCOPE],
            crate::credentials::DEFAULT_TOKEN_URL,
        );
        assert!(matches!(key.sign(&claims), Err(CredentialsError::Key(_))));
    }
}
