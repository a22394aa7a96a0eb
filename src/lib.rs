//! Relay neighborhood assessment requests from a web form to a mailbox.

#![forbid(unsafe_code)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod form;
pub mod mail;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode, header};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use config::{Backend, Configuration};
use credentials::DelegatedTokenProvider;
use mail::{EmailSender, GmailSender, NoopSender};

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ORIGIN, "https://sandbox.example.org")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing with the handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub mail: Arc<dyn EmailSender>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let allow_origin = HeaderValue::from_str(&config.allowed_origin)
        .unwrap_or_else(|_| HeaderValue::from_static("null"));

    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Cross-origin access for the form page only.
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            allow_origin,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ));

    let mut app = router::router(state)
        .layer(AxumMiddleware::from_fn(telemetry::track));

    // Stand-in for a platform deadline, off by default.
    if let Some(timeout) = config.request_timeout() {
        app = app.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));
    }

    app.layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(config: Arc<Configuration>) -> AppState {
    let mail: Arc<dyn EmailSender> = match config.mail.backend {
        Backend::Gmail => Arc::new(GmailSender::new(
            Arc::new(DelegatedTokenProvider::from_env()),
            &config.mail,
        )),
        Backend::Noop => {
            tracing::warn!("mail backend is `noop`, submissions are only logged");
            Arc::new(NoopSender)
        },
    };

    tracing::info!(
        sender = %config.mail.sender,
        recipient = %config.mail.recipient,
        origin = %config.allowed_origin,
        "relay configured"
    );

    AppState { config, mail }
}
