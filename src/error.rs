use std::fmt;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Timeout,
    Unavailable,
    InvalidResponse,
    Rejected,
    Unknown,
}

impl ApiErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorCode::Unauthorized => "UNAUTHORIZED",
            ApiErrorCode::Forbidden => "FORBIDDEN",
            ApiErrorCode::NotFound => "API_NOT_FOUND",
            ApiErrorCode::Timeout => "HTTP_TIMEOUT",
            ApiErrorCode::Unavailable => "API_UNAVAILABLE",
            ApiErrorCode::InvalidResponse => "INVALID_RESPONSE",
            ApiErrorCode::Rejected => "REQUEST_REJECTED",
            ApiErrorCode::Unknown => "UNKNOWN_API_ERROR",
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    InvalidGrade { message: String },

    #[error("Grade cannot exceed {max_points} points")]
    GradeExceedsMax { max_points: f64 },

    #[error("No submission found for this student")]
    NoSubmission,

    #[error("Only instructors can edit grades")]
    EditNotPermitted,

    #[error("A grade is already being saved for this cell")]
    EditInProgress,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{message}")]
    Api {
        code: ApiErrorCode,
        status: Option<u16>,
        message: String,
        server_message: Option<String>,
        correlation_id: Option<String>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn invalid_grade(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, "grade rejected");
        AppError::InvalidGrade { message }
    }

    pub fn grade_exceeds_max(max_points: f64) -> Self {
        warn!(target: "app::validation", max_points, "grade above maximum");
        AppError::GradeExceedsMax { max_points }
    }

    pub fn no_submission(student_id: &str, assignment_id: &str) -> Self {
        warn!(
            target: "app::validation",
            %student_id,
            %assignment_id,
            "no submission backs this cell"
        );
        AppError::NoSubmission
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        warn!(target: "app::gradebook", %resource, "resource not found");
        AppError::NotFound { resource }
    }

    pub fn api(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self::api_with_details(code, None, message, None, None)
    }

    pub fn api_with_details(
        code: ApiErrorCode,
        status: Option<u16>,
        message: impl Into<String>,
        server_message: Option<String>,
        correlation_id: Option<&str>,
    ) -> Self {
        let message = message.into();
        let correlation = correlation_id.map(|value| value.to_string());
        match &correlation {
            Some(id) => warn!(
                target: "app::gradebook::api",
                code = %code,
                status = ?status,
                correlation_id = %id,
                %message
            ),
            None => warn!(target: "app::gradebook::api", code = %code, status = ?status, %message),
        }

        AppError::Api {
            code,
            status,
            message,
            server_message,
            correlation_id: correlation,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }

    pub fn api_code(&self) -> Option<ApiErrorCode> {
        match self {
            AppError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn server_message(&self) -> Option<&str> {
        match self {
            AppError::Api { server_message, .. } => server_message.as_deref(),
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            AppError::Api { correlation_id, .. } => correlation_id.as_deref(),
            _ => None,
        }
    }

    /// True for a missing resource, whether the lookup was local or a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NotFound { .. }
                | AppError::Api {
                    code: ApiErrorCode::NotFound,
                    ..
                }
        )
    }

    /// Errors raised before any request leaves the client.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidGrade { .. } | AppError::GradeExceedsMax { .. }
        )
    }

    pub fn details(&self) -> Option<JsonValue> {
        match self {
            AppError::GradeExceedsMax { max_points } => {
                Some(serde_json::json!({ "maxPoints": max_points }))
            }
            AppError::Api {
                status,
                correlation_id,
                ..
            } => {
                let mut map = serde_json::Map::new();
                if let Some(status) = status {
                    map.insert("status".to_string(), JsonValue::from(*status));
                }
                if let Some(id) = correlation_id {
                    map.insert("correlationId".to_string(), JsonValue::String(id.clone()));
                }
                if map.is_empty() {
                    None
                } else {
                    Some(JsonValue::Object(map))
                }
            }
            _ => None,
        }
    }
}
