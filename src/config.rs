//! Configuration manager for the relay.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_GMAIL_API_URL: &str = "https://gmail.googleapis.com";

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing `{0}` environment variable")]
    Missing(&'static str),
    #[error("`{0}` is not a valid email address")]
    InvalidAddress(String),
    #[error("allowed origin is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("allowed origin must use http or https, got `{0}`")]
    Scheme(String),
    #[error("`{var}` must be {expected}, got `{value}`")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("failed to deserialize configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to open configuration file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// The only origin allowed to post the form, e.g. `https://example.org`.
    pub allowed_origin: String,
    /// Label printed on the first line of every email.
    /// Falls back to the host of `allowed_origin`.
    pub site: String,
    /// Seconds before an in-flight request is dropped with `408`.
    pub request_timeout: Option<u64>,
    /// Where the Prometheus exporter listens. Disabled when absent.
    pub metrics_address: Option<SocketAddr>,
    /// Related to email delivery.
    pub mail: Mail,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            allowed_origin: String::default(),
            site: String::default(),
            request_timeout: None,
            metrics_address: None,
            mail: Mail::default(),
            path: PathBuf::default(),
        }
    }
}

/// Which [`crate::mail::EmailSender`] delivers submissions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Gmail,
    /// Log the message and drop it.
    Noop,
}

/// Email delivery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mail {
    pub backend: Backend,
    /// Workspace account the service identity impersonates.
    pub sender: String,
    /// Mailbox receiving every submission.
    pub recipient: String,
    /// Base URL of the Gmail API.
    pub api_url: String,
}

impl Default for Mail {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sender: String::default(),
            recipient: String::default(),
            api_url: DEFAULT_GMAIL_API_URL.to_owned(),
        }
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Request deadline, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_secs)
    }

    /// Reads the configuration file then applies process environment
    /// overrides.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        self.read_with(|key| std::env::var(key).ok())
    }

    /// Same as [`Configuration::read`] with a custom variable lookup.
    pub fn read_with<F>(self, env: F) -> Result<Arc<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_path = if self.path.as_os_str().is_empty() {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        } else {
            self.path.clone()
        };

        let mut config = if file_path.is_file() {
            let file = File::open(&file_path)?;
            let config: Configuration = serde_yaml::from_reader(file)?;
            tracing::debug!(path = %file_path.display(), "configuration file loaded");
            config
        } else {
            tracing::debug!(
                path = %file_path.display(),
                "no configuration file, using environment only"
            );
            self
        };

        config.apply_env(env)?;
        config.validate()?;

        Ok(Arc::new(config))
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = env("HOST") {
            self.host = host;
        }
        if let Some(port) = env("PORT") {
            self.port = port.parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                expected: "a port number",
                value: port,
            })?;
        }
        if let Some(origin) = env("ALLOWED_ORIGIN") {
            self.allowed_origin = origin;
        }
        if let Some(site) = env("SITE_NAME") {
            self.site = site;
        }
        if let Some(timeout) = env("REQUEST_TIMEOUT") {
            self.request_timeout =
                Some(timeout.parse().map_err(|_| ConfigError::Invalid {
                    var: "REQUEST_TIMEOUT",
                    expected: "a number of seconds",
                    value: timeout,
                })?);
        }
        if let Some(addr) = env("METRICS_ADDRESS") {
            self.metrics_address =
                Some(addr.parse().map_err(|_| ConfigError::Invalid {
                    var: "METRICS_ADDRESS",
                    expected: "a socket address",
                    value: addr,
                })?);
        }
        if let Some(backend) = env("MAIL_BACKEND") {
            self.mail.backend = match backend.to_ascii_lowercase().as_str() {
                "gmail" => Backend::Gmail,
                "noop" => Backend::Noop,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "MAIL_BACKEND",
                        expected: "`gmail` or `noop`",
                        value: backend,
                    });
                },
            };
        }
        if let Some(sender) = env("SEND_AS_EMAIL") {
            self.mail.sender = sender;
        }
        if let Some(recipient) = env("TO_EMAIL") {
            self.mail.recipient = recipient;
        }
        if let Some(url) = env("GMAIL_API_URL") {
            self.mail.api_url = url;
        }

        Ok(())
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        self.mail.sender = check_address(&self.mail.sender, "SEND_AS_EMAIL")?;
        self.mail.recipient =
            check_address(&self.mail.recipient, "TO_EMAIL")?;

        if self.allowed_origin.trim().is_empty() {
            return Err(ConfigError::Missing("ALLOWED_ORIGIN"));
        }
        let origin = Url::parse(self.allowed_origin.trim())?;
        if origin.scheme() != "http" && origin.scheme() != "https" {
            return Err(ConfigError::Scheme(origin.scheme().to_owned()));
        }
        // `Access-Control-Allow-Origin` wants `scheme://host[:port]` only.
        self.allowed_origin = origin.origin().ascii_serialization();

        if self.site.trim().is_empty() {
            self.site = origin.host_str().unwrap_or_default().to_owned();
        }

        self.mail.api_url = self.mail.api_url.trim_end_matches('/').to_owned();

        Ok(())
    }
}

fn check_address(
    address: &str,
    var: &'static str,
) -> Result<String, ConfigError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ConfigError::Missing(var));
    }
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(address.to_owned())
        },
        _ => Err(ConfigError::InvalidAddress(address.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn read(vars: &[(&str, &str)]) -> Result<Arc<Configuration>, ConfigError> {
        Configuration::default()
            .path(PathBuf::from("does/not/exist.yaml"))
            .read_with(env(vars))
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SEND_AS_EMAIL", "info@example.org"),
        ("TO_EMAIL", "team@example.org"),
        ("ALLOWED_ORIGIN", "https://sandbox.example.org/"),
    ];

    #[test]
    fn test_read_from_env() {
        let config = read(&REQUIRED).unwrap();

        assert_eq!(config.mail.sender, "info@example.org");
        assert_eq!(config.mail.recipient, "team@example.org");
        assert_eq!(config.allowed_origin, "https://sandbox.example.org");
        assert_eq!(config.site, "sandbox.example.org");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.mail.backend, Backend::Gmail);
        assert_eq!(config.mail.api_url, DEFAULT_GMAIL_API_URL);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_env_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("PORT", "3000"),
            ("SITE_NAME", "awareness portal"),
            ("MAIL_BACKEND", "noop"),
            ("REQUEST_TIMEOUT", "30"),
            ("METRICS_ADDRESS", "127.0.0.1:9000"),
            ("GMAIL_API_URL", "http://localhost:1234/"),
        ]);
        let config = read(&vars).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.site, "awareness portal");
        assert_eq!(config.mail.backend, Backend::Noop);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.metrics_address,
            Some("127.0.0.1:9000".parse().unwrap())
        );
        assert_eq!(config.mail.api_url, "http://localhost:1234");
    }

    #[test]
    fn test_read_yaml_file() {
        let config = Configuration::default()
            .path(PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/config.example.yaml"
            )))
            .read_with(env(&[("PORT", "3000")]))
            .unwrap();

        assert_eq!(config.mail.sender, "info@example.org");
        assert_eq!(config.mail.recipient, "team@example.org");
        assert_eq!(config.allowed_origin, "https://example.org");
        assert_eq!(config.site, "example.org");
        assert_eq!(config.port, 3000);
        assert_eq!(config.mail.api_url, DEFAULT_GMAIL_API_URL);
    }

    #[test]
    fn test_missing_variables() {
        let err = read(&REQUIRED[1..]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SEND_AS_EMAIL")));

        let err = read(&REQUIRED[..2]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ALLOWED_ORIGIN")));
    }

    #[test]
    fn test_invalid_values() {
        let vars = [REQUIRED[0], ("TO_EMAIL", "nobody"), REQUIRED[2]];
        assert!(matches!(
            read(&vars).unwrap_err(),
            ConfigError::InvalidAddress(_)
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "http"));
        assert!(matches!(
            read(&vars).unwrap_err(),
            ConfigError::Invalid { var: "PORT", .. }
        ));

        let mut vars = REQUIRED[..2].to_vec();
        vars.push(("ALLOWED_ORIGIN", "ftp://example.org"));
        assert!(matches!(read(&vars).unwrap_err(), ConfigError::Scheme(_)));
    }
}
