pub mod assessment;

use axum::Router;

use crate::AppState;

/// The relay answers on every path, so the assessment handler is the
/// fallback rather than a route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(assessment::handler)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::AppState;
    use crate::config::Configuration;
    use crate::mail::{EmailSender, MailError};

    /// Keeps every message it is asked to send.
    #[derive(Default)]
    pub struct RecordingSender {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingSender {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
            self.calls
                .lock()
                .unwrap()
                .push((subject.to_owned(), body.to_owned()));

            if self.fail {
                Err(MailError::Rejected {
                    status: 503,
                    body: "backend error".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    pub fn config() -> Arc<Configuration> {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SEND_AS_EMAIL", "info@example.org"),
            ("TO_EMAIL", "team@example.org"),
            ("ALLOWED_ORIGIN", "https://sandbox.example.org"),
        ]);

        Configuration::default()
            .path(PathBuf::from("does/not/exist.yaml"))
            .read_with(|key| env.get(key).map(|value| value.to_string()))
            .unwrap()
    }

    pub fn state(mail: Arc<dyn EmailSender>) -> AppState {
        AppState {
            config: config(),
            mail,
        }
    }
}
