use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::fmt;

/// User-facing explanation returned for conflicting contact emails.
pub const DUPLICATE_CONTACT_MESSAGE: &str = "A contact with this email address already exists \
     in HubSpot. This form is only for creating new contacts. Please use the existing contact \
     in HubSpot to update information or create deals.";

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Resource not found error.
    NotFound(String),
    /// Upstream CRM/AI call failed with an HTTP status; the status and
    /// error body are forwarded to the caller as-is.
    Upstream {
        status: u16,
        error: String,
        details: Value,
    },
    /// Contact creation rejected because the email already exists upstream.
    DuplicateContact { details: Value },
    /// Transport-level failure reaching an external API (no status available).
    ExternalApi(String),
    /// A required credential or setting for this endpoint is missing.
    NotConfigured(String),
    /// Internal server error.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Upstream { status, error, .. } => {
                write!(f, "Upstream error {}: {}", status, error)
            }
            AppError::DuplicateContact { .. } => write!(f, "Contact already exists"),
            AppError::ExternalApi(msg) => write!(f, "External API error: {}", msg),
            AppError::NotConfigured(msg) => write!(f, "Not configured: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Upstream failures keep the upstream status code and carry the upstream
    /// error body in `details`, so the caller sees what the CRM reported.
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Upstream {
                status,
                error,
                details,
            } => {
                tracing::error!("Upstream error {}: {}", status, error);
                let status = StatusCode::from_u16(status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (
                    status,
                    Json(json!({ "error": error, "details": details })),
                )
                    .into_response()
            }
            AppError::DuplicateContact { details } => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Contact already exists",
                    "message": DUPLICATE_CONTACT_MESSAGE,
                    "details": details,
                })),
            )
                .into_response(),
            AppError::ExternalApi(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "External service error", "details": msg })),
                )
                    .into_response()
            }
            AppError::NotConfigured(msg) => {
                tracing::warn!("Missing configuration: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": msg })),
                )
                    .into_response()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApi(err.to_string())
    }
}

impl AppError {
    /// Remaps an upstream contact-creation failure to the conflict shape when
    /// it matches the duplicate-email mapping; returns the error unchanged
    /// otherwise.
    ///
    /// The structured check keys on HubSpot's documented error payload
    /// (HTTP 409 or `category: "CONFLICT"`). Substring matching over the
    /// error messages is the documented fallback, applied to 400 responses
    /// where older portals report duplicates without a category.
    pub fn remap_duplicate_contact(self) -> Self {
        match self {
            AppError::Upstream {
                status,
                error,
                details,
            } => {
                if is_duplicate_contact_error(status, &details) {
                    AppError::DuplicateContact { details }
                } else {
                    AppError::Upstream {
                        status,
                        error,
                        details,
                    }
                }
            }
            other => other,
        }
    }
}

const DUPLICATE_FRAGMENTS: [&str; 3] = ["already exists", "duplicate", "unique constraint"];

fn message_matches_duplicate(message: &str) -> bool {
    let lowered = message.to_lowercase();
    DUPLICATE_FRAGMENTS.iter().any(|f| lowered.contains(f))
}

/// Duplicate-email detection against a HubSpot error body.
pub fn is_duplicate_contact_error(status: u16, details: &Value) -> bool {
    if status == 409 {
        return true;
    }
    if details
        .get("category")
        .and_then(|c| c.as_str())
        .is_some_and(|c| c.eq_ignore_ascii_case("CONFLICT"))
    {
        return true;
    }

    // Fallback heuristics only apply to 400-class rejections
    if status != 400 {
        return false;
    }

    if details
        .get("message")
        .and_then(|m| m.as_str())
        .is_some_and(message_matches_duplicate)
    {
        return true;
    }

    details
        .get("errors")
        .and_then(|e| e.as_array())
        .is_some_and(|errors| {
            errors.iter().any(|err| {
                err.get("message")
                    .and_then(|m| m.as_str())
                    .is_some_and(message_matches_duplicate)
            })
        })
}
