use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

// ============ Domain Errors ============

/// Request-level payload errors, raised before any resolution work begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodingError {
    /// The declared format is not one the service understands.
    UnsupportedFormat(String),
    /// The payload could not be parsed as the declared format.
    MalformedInput(String),
    /// Writing an encoded payload failed.
    Encoding(String),
}

impl fmt::Display for TranscodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodingError::UnsupportedFormat(format) => {
                write!(f, "Unsupported format: {}", format)
            }
            TranscodingError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            TranscodingError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
        }
    }
}

impl std::error::Error for TranscodingError {}

impl From<csv::Error> for TranscodingError {
    fn from(err: csv::Error) -> Self {
        TranscodingError::MalformedInput(err.to_string())
    }
}

impl From<serde_json::Error> for TranscodingError {
    fn from(err: serde_json::Error) -> Self {
        TranscodingError::MalformedInput(err.to_string())
    }
}

/// Per-record structural problem. Always absorbed into `Fail` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Infrastructure fault raised by reference-data loading or a lookup.
/// Fatal for the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Reference data could not be read.
    ReferenceDataUnavailable(String),
    /// Lookup configuration or reference tables are inconsistent.
    InvalidConfiguration(String),
    /// The lookup broke its own contract or failed unexpectedly.
    Internal(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::ReferenceDataUnavailable(msg) => {
                write!(f, "Reference data unavailable: {}", msg)
            }
            LookupError::InvalidConfiguration(msg) => {
                write!(f, "Invalid lookup configuration: {}", msg)
            }
            LookupError::Internal(msg) => write!(f, "Lookup error: {}", msg),
        }
    }
}

impl std::error::Error for LookupError {}

/// Batch-level failures of the resolver. No rows are returned with these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The lookup raised an infrastructure error.
    Infrastructure(LookupError),
    /// Two records in the batch share an identifier.
    DuplicateLocationId(String),
    /// Too many locations exceeded the per-location timeout.
    SystemicTimeout { timed_out: usize, threshold: usize },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Infrastructure(e) => write!(f, "{}", e),
            ResolveError::DuplicateLocationId(id) => {
                write!(f, "Duplicate location id in batch: {}", id)
            }
            ResolveError::SystemicTimeout {
                timed_out,
                threshold,
            } => write!(
                f,
                "{} locations timed out (threshold {}), aborting batch",
                timed_out, threshold
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<LookupError> for ResolveError {
    fn from(err: LookupError) -> Self {
        ResolveError::Infrastructure(err)
    }
}

/// Anything that can make a keys request fail as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeysError {
    Transcoding(TranscodingError),
    Resolve(ResolveError),
}

impl fmt::Display for KeysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeysError::Transcoding(e) => write!(f, "{}", e),
            KeysError::Resolve(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for KeysError {}

impl From<TranscodingError> for KeysError {
    fn from(err: TranscodingError) -> Self {
        KeysError::Transcoding(err)
    }
}

impl From<ResolveError> for KeysError {
    fn from(err: ResolveError) -> Self {
        KeysError::Resolve(err)
    }
}

// ============ HTTP Errors ============

/// Application-specific error types returned by HTTP handlers.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Request body declared in a format the service does not accept.
    UnsupportedMediaType(String),
    /// None of the formats in `Accept` can be produced.
    NotAcceptable(String),
    /// Resource not found error.
    NotFound(String),
    /// Reference data or lookup temporarily unusable.
    ServiceUnavailable(String),
    /// Internal server error.
    InternalError(String),
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            AppError::NotAcceptable(msg) => write!(f, "Not acceptable: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Server-side faults are logged; client errors are returned verbatim.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnsupportedMediaType(msg) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg.clone())
            }
            AppError::NotAcceptable(msg) => (StatusCode::NOT_ACCEPTABLE, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "failure",
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<TranscodingError> for AppError {
    fn from(err: TranscodingError) -> Self {
        match err {
            TranscodingError::UnsupportedFormat(_) => {
                AppError::UnsupportedMediaType(err.to_string())
            }
            TranscodingError::MalformedInput(_) => AppError::BadRequest(err.to_string()),
            TranscodingError::Encoding(_) => AppError::InternalError(err.to_string()),
        }
    }
}

impl From<LookupError> for AppError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::ReferenceDataUnavailable(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            LookupError::InvalidConfiguration(_) | LookupError::Internal(_) => {
                AppError::InternalError(err.to_string())
            }
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Infrastructure(e) => e.into(),
            ResolveError::DuplicateLocationId(_) => AppError::BadRequest(err.to_string()),
            ResolveError::SystemicTimeout { .. } => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<KeysError> for AppError {
    fn from(err: KeysError) -> Self {
        match err {
            KeysError::Transcoding(e) => e.into(),
            KeysError::Resolve(e) => e.into(),
        }
    }
}
