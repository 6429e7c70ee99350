pub mod gradebook;

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::services::course_api::{CourseApi, HttpCourseApi};
use crate::services::grade_mutation::{GradeMutationService, GradeSink, ViewerRole};
use crate::services::gradebook_service::{AggregationOptions, GradebookService};
use crate::services::student_grades::StudentGradesService;

#[derive(Clone)]
pub struct AppState {
    config: Arc<ClientConfig>,
    api: Arc<dyn CourseApi>,
    role: ViewerRole,
    gradebook_service: Arc<GradebookService>,
    student_grades_service: Arc<StudentGradesService>,
    mutation_service: Arc<RwLock<Arc<GradeMutationService>>>,
}

impl AppState {
    pub fn new(config: ClientConfig, role: ViewerRole) -> AppResult<Self> {
        if let Some(log_dir) = &config.log_dir {
            crate::utils::logger::init_logging(log_dir)?;
        }
        let api: Arc<dyn CourseApi> = Arc::new(HttpCourseApi::try_new(&config)?);
        Ok(Self::with_api(config, api, role))
    }

    /// Wires the services around an existing backend client.
    pub fn with_api(config: ClientConfig, api: Arc<dyn CourseApi>, role: ViewerRole) -> Self {
        let gradebook_service = Arc::new(GradebookService::new(
            Arc::clone(&api),
            AggregationOptions::from(&config),
        ));
        let student_grades_service = Arc::new(StudentGradesService::new(Arc::clone(&api)));
        let mutation_service = Arc::new(GradeMutationService::for_role(
            role,
            Arc::clone(&api),
            &gradebook_service,
        ));

        info!(
            target: "app::command",
            role = ?role,
            concurrency = config.submission_concurrency,
            "gradebook state ready"
        );

        Self {
            config: Arc::new(config),
            api,
            role,
            gradebook_service,
            student_grades_service,
            mutation_service: Arc::new(RwLock::new(mutation_service)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn role(&self) -> ViewerRole {
        self.role
    }

    pub fn gradebook(&self) -> Arc<GradebookService> {
        Arc::clone(&self.gradebook_service)
    }

    pub fn student_grades(&self) -> Arc<StudentGradesService> {
        Arc::clone(&self.student_grades_service)
    }

    pub fn mutations(&self) -> Arc<GradeMutationService> {
        let guard = self
            .mutation_service
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Points grade edits at a different sink, e.g. a freshly loaded
    /// student copy. The editor state starts over.
    pub fn replace_grade_sink(&self, sink: Arc<dyn GradeSink>) {
        let service = Arc::new(GradeMutationService::new(
            Arc::clone(&self.api),
            sink,
            self.role,
        ));
        let mut guard = self
            .mutation_service
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = service;
    }

    /// Must be called from inside a tokio runtime.
    pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        self.gradebook_service.spawn_refresh_loop()
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl CommandError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        let details = error.details();
        match error {
            AppError::InvalidGrade { message } => {
                CommandError::new("VALIDATION_ERROR", message, None)
            }
            error @ AppError::GradeExceedsMax { .. } => {
                CommandError::new("VALIDATION_ERROR", error.to_string(), details)
            }
            error @ AppError::NoSubmission => {
                CommandError::new("NO_SUBMISSION", error.to_string(), None)
            }
            error @ AppError::EditNotPermitted => {
                warn!(target: "app::command", "grade edit refused for role");
                CommandError::new("FORBIDDEN", error.to_string(), None)
            }
            error @ AppError::EditInProgress => {
                CommandError::new("EDIT_IN_PROGRESS", error.to_string(), None)
            }
            error @ AppError::NotFound { .. } => {
                CommandError::new("NOT_FOUND", error.to_string(), None)
            }
            AppError::Api {
                code,
                message,
                server_message,
                ..
            } => {
                let mut merged = match details {
                    Some(JsonValue::Object(map)) => map,
                    _ => JsonMap::new(),
                };
                if let Some(server_message) = server_message {
                    merged.insert(
                        "serverMessage".to_string(),
                        JsonValue::String(server_message),
                    );
                }
                let detail_value = if merged.is_empty() {
                    None
                } else {
                    Some(JsonValue::Object(merged))
                };
                CommandError::new(code.as_str(), message, detail_value)
            }
            AppError::Serialization(error) => {
                error!(target: "app::command", error = %error, "serialization error in command");
                CommandError::new("UNKNOWN", "Failed to serialize data", None)
            }
            AppError::Io(error) => {
                error!(target: "app::command", error = %error, "io error in command");
                CommandError::new("UNKNOWN", "File system access failed", None)
            }
            AppError::Other(message) => {
                error!(target: "app::command", %message, "unexpected error in command");
                CommandError::new("UNKNOWN", message, None)
            }
        }
    }
}
