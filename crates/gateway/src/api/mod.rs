//! HTTP API surface.

pub mod router;
pub mod runs;
pub mod toolcalls;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use am_domain::Error;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a core error to its HTTP status and error body.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::Validation(_) | Error::IllegalTransition { .. } | Error::Json(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Permission(_) => StatusCode::FORBIDDEN,
        Error::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::Locked(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}
