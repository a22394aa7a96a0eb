//! Error handler for the relay.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::mail::MailError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Message returned to the browser when delivery fails. Internal details
/// stay in the logs.
pub const DELIVERY_FAILED: &str = "Failed to send submission. Please try again.";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("unreadable request body: {0}")]
    Read(#[from] axum::Error),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("delivery failed: {0}")]
    Delivery(#[from] MailError),
}

/// JSON body of a delivery failure.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    error: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
                    .into_response()
            },

            ServerError::Body(err) => {
                tracing::debug!(error = %err, "request body rejected");
                (StatusCode::BAD_REQUEST, "Invalid request body").into_response()
            },

            ServerError::Read(err) => {
                tracing::debug!(error = %err, "request body not read");
                (StatusCode::BAD_REQUEST, "Invalid request body").into_response()
            },

            ServerError::MissingFields(fields) => (
                StatusCode::BAD_REQUEST,
                format!("Missing required fields: {}", fields.join(", ")),
            )
                .into_response(),

            ServerError::Delivery(err) => {
                tracing::error!(error = %err, "error sending assessment email");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ResponseError {
                        error: DELIVERY_FAILED,
                    }),
                )
                    .into_response()
            },
        }
    }
}
