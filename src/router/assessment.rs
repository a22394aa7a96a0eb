use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::form::FormSubmission;
use crate::telemetry::{Outcome, record_submission};

/// Largest body buffered for decoding. The form posts a few hundred bytes.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Answer of a delivered submission.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
}

/// Handler for every request reaching the relay.
pub async fn handler(
    State(state): State<AppState>,
    method: Method,
    body: Body,
) -> Result<Response> {
    // The body is left untouched until the method is known.
    if method == Method::OPTIONS {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    if method != Method::POST {
        return Err(ServerError::MethodNotAllowed);
    }

    let submission = read_submission(body)
        .await
        .inspect_err(|_| record_submission(Outcome::Invalid))?;

    let subject = submission.subject();
    let text = submission.body(&state.config.site);

    // Dropping this future (client gone, request timeout) aborts the
    // outbound call as well.
    if let Err(err) = state.mail.send(&subject, &text).await {
        record_submission(Outcome::Failed);
        return Err(err.into());
    }

    record_submission(Outcome::Sent);
    tracing::info!(
        neighborhood = %submission.neighborhood_name,
        "assessment request relayed"
    );

    Ok(Json(Status {
        status: "ok".to_owned(),
    })
    .into_response())
}

async fn read_submission(body: Body) -> Result<FormSubmission> {
    let body = axum::body::to_bytes(body, MAX_BODY_SIZE).await?;
    FormSubmission::parse(&body)
}
