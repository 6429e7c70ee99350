use std::time::{Duration as StdDuration, Instant};

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ApiErrorCode, AppError, AppResult};
use crate::models::assignment::{AssignmentDto, DiscussionThreadDto, ModuleSummary};
use crate::models::student::Student;
use crate::models::submission::{
    CourseGradeSummary, GradeWriteReceipt, ManualGradeRequest, Submission,
};
use crate::models::from_document;

/// Keys a list endpoint may wrap its array under.
const LIST_KEYS: &[&str] = &[
    "data",
    "assignments",
    "submissions",
    "threads",
    "modules",
    "students",
];

/// Backend contract consumed by the gradebook engine.
#[async_trait::async_trait]
pub trait CourseApi: Send + Sync {
    async fn course_students(&self, course_id: &str) -> AppResult<Vec<Student>>;

    async fn course_modules(&self, course_id: &str) -> AppResult<Vec<ModuleSummary>>;

    async fn module_assignments(&self, module_id: &str) -> AppResult<Vec<AssignmentDto>>;

    async fn group_assignments(&self, course_id: &str) -> AppResult<Vec<AssignmentDto>>;

    async fn course_threads(&self, course_id: &str) -> AppResult<Vec<DiscussionThreadDto>>;

    async fn assignment_submissions(&self, assignment_id: &str) -> AppResult<Vec<Submission>>;

    async fn student_course_submissions(&self, course_id: &str) -> AppResult<Vec<Submission>>;

    async fn student_course_grade(&self, course_id: &str) -> AppResult<CourseGradeSummary>;

    async fn set_submission_grade(
        &self,
        submission_id: &str,
        grade: Option<f64>,
    ) -> AppResult<GradeWriteReceipt>;

    async fn set_manual_grade(&self, request: &ManualGradeRequest)
        -> AppResult<GradeWriteReceipt>;
}

pub struct HttpCourseApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    read_timeout: StdDuration,
}

impl HttpCourseApi {
    pub fn try_new(config: &ClientConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Some(StdDuration::from_secs(90)))
            .build()
            .map_err(|err| AppError::other(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            read_timeout: config.read_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> AppResult<JsonValue> {
        let builder = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .timeout(self.read_timeout);
        self.send(builder, Method::GET, path).await
    }

    async fn post_json(&self, path: &str, body: &JsonValue) -> AppResult<JsonValue> {
        let builder = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        self.send(builder, Method::POST, path).await
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> AppResult<Vec<T>> {
        let body = self.get_json(path).await?;
        extract_list(body, path)
    }

    async fn send(&self, builder: RequestBuilder, method: Method, path: &str) -> AppResult<JsonValue> {
        let correlation_id = Uuid::new_v4().to_string();
        let builder = match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|err| Self::error_from_reqwest(err, &method, path, &correlation_id))?;
        let status = response.status();
        let latency_ms = start.elapsed().as_millis();

        debug!(
            target: "app::gradebook::api",
            method = %method,
            path,
            status = status.as_u16(),
            latency_ms,
            correlation_id = %correlation_id,
            "course service responded"
        );

        let text = response
            .text()
            .await
            .map_err(|err| Self::error_from_reqwest(err, &method, path, &correlation_id))?;
        let body = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            match serde_json::from_str::<JsonValue>(&text) {
                Ok(value) => value,
                Err(_) if !status.is_success() => JsonValue::String(text),
                Err(err) => {
                    return Err(AppError::api_with_details(
                        ApiErrorCode::InvalidResponse,
                        Some(status.as_u16()),
                        format!("{method} {path} returned invalid JSON: {err}"),
                        None,
                        Some(&correlation_id),
                    ))
                }
            }
        };

        if status.is_success() {
            return Ok(body);
        }

        let server_message = body
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        Err(map_http_error(
            status,
            &method,
            path,
            server_message,
            &correlation_id,
        ))
    }

    fn error_from_reqwest(
        err: reqwest::Error,
        method: &Method,
        path: &str,
        correlation_id: &str,
    ) -> AppError {
        let (code, message) = if err.is_timeout() {
            (ApiErrorCode::Timeout, format!("{method} {path} timed out"))
        } else if err.is_connect() {
            (
                ApiErrorCode::Unavailable,
                format!("{method} {path} could not reach the course service"),
            )
        } else {
            (ApiErrorCode::Unknown, format!("{method} {path} failed: {err}"))
        };
        AppError::api_with_details(
            code,
            err.status().map(|status| status.as_u16()),
            message,
            None,
            Some(correlation_id),
        )
    }
}

pub fn map_http_error(
    status: StatusCode,
    method: &Method,
    path: &str,
    server_message: Option<String>,
    correlation_id: &str,
) -> AppError {
    let code = match status {
        StatusCode::UNAUTHORIZED => ApiErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ApiErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ApiErrorCode::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ApiErrorCode::Timeout,
        status if status.is_server_error() => ApiErrorCode::Unavailable,
        status if status.is_client_error() => ApiErrorCode::Rejected,
        _ => ApiErrorCode::Unknown,
    };
    let message = server_message.clone().unwrap_or_else(|| {
        format!("{method} {path} failed with status {}", status.as_u16())
    });
    AppError::api_with_details(
        code,
        Some(status.as_u16()),
        message,
        server_message,
        Some(correlation_id),
    )
}

/// Accepts a bare array or an object wrapping one under a conventional key.
fn extract_list<T: DeserializeOwned>(body: JsonValue, path: &str) -> AppResult<Vec<T>> {
    let list = match body {
        JsonValue::Array(_) => body,
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Object(mut map) => LIST_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(value @ JsonValue::Array(_)) => Some(value),
                _ => None,
            })
            .ok_or_else(|| {
                AppError::api(
                    ApiErrorCode::InvalidResponse,
                    format!("GET {path} did not return a list"),
                )
            })?,
        _ => {
            return Err(AppError::api(
                ApiErrorCode::InvalidResponse,
                format!("GET {path} did not return a list"),
            ))
        }
    };
    from_document(list).map_err(|err| {
        AppError::api(
            ApiErrorCode::InvalidResponse,
            format!("GET {path} returned malformed items: {err}"),
        )
    })
}

#[async_trait::async_trait]
impl CourseApi for HttpCourseApi {
    async fn course_students(&self, course_id: &str) -> AppResult<Vec<Student>> {
        let path = format!("/courses/{course_id}");
        let body = self.get_json(&path).await?;
        let students = ["/students", "/course/students", "/data/students"]
            .iter()
            .find_map(|pointer| body.pointer(pointer))
            .cloned()
            .unwrap_or_else(|| json!([]));
        extract_list(students, &path)
    }

    async fn course_modules(&self, course_id: &str) -> AppResult<Vec<ModuleSummary>> {
        self.get_list(&format!("/modules/{course_id}")).await
    }

    async fn module_assignments(&self, module_id: &str) -> AppResult<Vec<AssignmentDto>> {
        self.get_list(&format!("/assignments/module/{module_id}"))
            .await
    }

    async fn group_assignments(&self, course_id: &str) -> AppResult<Vec<AssignmentDto>> {
        self.get_list(&format!("/assignments/course/{course_id}/group-assignments"))
            .await
    }

    async fn course_threads(&self, course_id: &str) -> AppResult<Vec<DiscussionThreadDto>> {
        self.get_list(&format!("/threads/course/{course_id}")).await
    }

    async fn assignment_submissions(&self, assignment_id: &str) -> AppResult<Vec<Submission>> {
        self.get_list(&format!("/submissions/assignment/{assignment_id}"))
            .await
    }

    async fn student_course_submissions(&self, course_id: &str) -> AppResult<Vec<Submission>> {
        self.get_list(&format!("/submissions/student/course/{course_id}"))
            .await
    }

    async fn student_course_grade(&self, course_id: &str) -> AppResult<CourseGradeSummary> {
        let path = format!("/grades/student/course/{course_id}");
        let body = self.get_json(&path).await?;
        let summary = body.get("data").cloned().unwrap_or(body);
        from_document(summary).map_err(|err| {
            AppError::api(
                ApiErrorCode::InvalidResponse,
                format!("GET {path} returned a malformed grade summary: {err}"),
            )
        })
    }

    async fn set_submission_grade(
        &self,
        submission_id: &str,
        grade: Option<f64>,
    ) -> AppResult<GradeWriteReceipt> {
        let body = self
            .post_json(
                &format!("/submissions/{submission_id}/grade"),
                &json!({ "grade": grade }),
            )
            .await?;
        Ok(GradeWriteReceipt::from_body(&body))
    }

    async fn set_manual_grade(
        &self,
        request: &ManualGradeRequest,
    ) -> AppResult<GradeWriteReceipt> {
        let payload = serde_json::to_value(request)?;
        let body = self.post_json("/submissions/manual-grade", &payload).await?;
        Ok(GradeWriteReceipt::from_body(&body))
    }
}

/// In-memory backend used by the crate's tests and by embedders' tests.
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration as StdDuration;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedGradeWrite {
        Submission {
            submission_id: String,
            grade: Option<f64>,
        },
        Manual(ManualGradeRequest),
    }

    #[derive(Default)]
    struct State {
        students: HashMap<String, Vec<Student>>,
        modules: HashMap<String, Vec<ModuleSummary>>,
        module_assignments: HashMap<String, Vec<AssignmentDto>>,
        group_assignments: HashMap<String, Vec<AssignmentDto>>,
        threads: HashMap<String, Vec<DiscussionThreadDto>>,
        submissions: HashMap<String, Vec<Submission>>,
        student_submissions: HashMap<String, Vec<Submission>>,
        course_grades: HashMap<String, CourseGradeSummary>,
        failures: HashMap<String, (ApiErrorCode, u16, Option<String>)>,
        delays: HashMap<String, StdDuration>,
        manual_submission_id: Option<String>,
        requests: Vec<String>,
        writes: Vec<RecordedGradeWrite>,
    }

    /// Paths mirror the HTTP client so failures can be injected per endpoint.
    #[derive(Default)]
    pub struct InMemoryCourseApi {
        state: Mutex<State>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl InMemoryCourseApi {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        pub fn set_students(&self, course_id: &str, students: Vec<Student>) {
            self.state().students.insert(course_id.into(), students);
        }

        /// Registers a module (if new) and replaces its assignment list.
        pub fn set_module_assignments(
            &self,
            course_id: &str,
            module_id: &str,
            assignments: Vec<AssignmentDto>,
        ) {
            let mut state = self.state();
            let modules = state.modules.entry(course_id.into()).or_default();
            if !modules.iter().any(|module| module.id == module_id) {
                modules.push(ModuleSummary {
                    id: module_id.into(),
                    title: None,
                });
            }
            state
                .module_assignments
                .insert(module_id.into(), assignments);
        }

        pub fn set_group_assignments(&self, course_id: &str, assignments: Vec<AssignmentDto>) {
            self.state()
                .group_assignments
                .insert(course_id.into(), assignments);
        }

        pub fn set_threads(&self, course_id: &str, threads: Vec<DiscussionThreadDto>) {
            self.state().threads.insert(course_id.into(), threads);
        }

        pub fn set_submissions(&self, assignment_id: &str, submissions: Vec<Submission>) {
            self.state()
                .submissions
                .insert(assignment_id.into(), submissions);
        }

        pub fn set_student_submissions(&self, course_id: &str, submissions: Vec<Submission>) {
            self.state()
                .student_submissions
                .insert(course_id.into(), submissions);
        }

        pub fn set_course_grade(&self, course_id: &str, summary: CourseGradeSummary) {
            self.state().course_grades.insert(course_id.into(), summary);
        }

        pub fn set_manual_submission_id(&self, submission_id: &str) {
            self.state().manual_submission_id = Some(submission_id.into());
        }

        pub fn fail(&self, path: &str, code: ApiErrorCode, status: u16, message: Option<&str>) {
            self.state()
                .failures
                .insert(path.into(), (code, status, message.map(str::to_string)));
        }

        pub fn delay(&self, path: &str, delay: StdDuration) {
            self.state().delays.insert(path.into(), delay);
        }

        pub fn requests(&self) -> Vec<String> {
            self.state().requests.clone()
        }

        pub fn request_count(&self, path: &str) -> usize {
            self.state()
                .requests
                .iter()
                .filter(|request| request.as_str() == path)
                .count()
        }

        pub fn writes(&self) -> Vec<RecordedGradeWrite> {
            self.state().writes.clone()
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        async fn enter(&self, path: String) -> AppResult<()> {
            let (delay, failure) = {
                let mut state = self.state();
                state.requests.push(path.clone());
                (
                    state.delays.get(&path).copied(),
                    state.failures.get(&path).cloned(),
                )
            };

            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match failure {
                Some((code, status, message)) => Err(AppError::api_with_details(
                    code,
                    Some(status),
                    message
                        .clone()
                        .unwrap_or_else(|| format!("{path} failed with status {status}")),
                    message,
                    None,
                )),
                None => Ok(()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CourseApi for InMemoryCourseApi {
        async fn course_students(&self, course_id: &str) -> AppResult<Vec<Student>> {
            self.enter(format!("/courses/{course_id}")).await?;
            Ok(self
                .state()
                .students
                .get(course_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn course_modules(&self, course_id: &str) -> AppResult<Vec<ModuleSummary>> {
            self.enter(format!("/modules/{course_id}")).await?;
            Ok(self
                .state()
                .modules
                .get(course_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn module_assignments(&self, module_id: &str) -> AppResult<Vec<AssignmentDto>> {
            self.enter(format!("/assignments/module/{module_id}"))
                .await?;
            Ok(self
                .state()
                .module_assignments
                .get(module_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn group_assignments(&self, course_id: &str) -> AppResult<Vec<AssignmentDto>> {
            self.enter(format!("/assignments/course/{course_id}/group-assignments"))
                .await?;
            Ok(self
                .state()
                .group_assignments
                .get(course_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn course_threads(&self, course_id: &str) -> AppResult<Vec<DiscussionThreadDto>> {
            self.enter(format!("/threads/course/{course_id}")).await?;
            Ok(self
                .state()
                .threads
                .get(course_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn assignment_submissions(&self, assignment_id: &str) -> AppResult<Vec<Submission>> {
            self.enter(format!("/submissions/assignment/{assignment_id}"))
                .await?;
            Ok(self
                .state()
                .submissions
                .get(assignment_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn student_course_submissions(&self, course_id: &str) -> AppResult<Vec<Submission>> {
            self.enter(format!("/submissions/student/course/{course_id}"))
                .await?;
            Ok(self
                .state()
                .student_submissions
                .get(course_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn student_course_grade(&self, course_id: &str) -> AppResult<CourseGradeSummary> {
            self.enter(format!("/grades/student/course/{course_id}"))
                .await?;
            self.state()
                .course_grades
                .get(course_id)
                .cloned()
                .ok_or_else(|| AppError::api(ApiErrorCode::NotFound, "no grade summary"))
        }

        async fn set_submission_grade(
            &self,
            submission_id: &str,
            grade: Option<f64>,
        ) -> AppResult<GradeWriteReceipt> {
            self.enter(format!("/submissions/{submission_id}/grade"))
                .await?;
            self.state().writes.push(RecordedGradeWrite::Submission {
                submission_id: submission_id.into(),
                grade,
            });
            Ok(GradeWriteReceipt {
                submission_id: Some(submission_id.into()),
            })
        }

        async fn set_manual_grade(
            &self,
            request: &ManualGradeRequest,
        ) -> AppResult<GradeWriteReceipt> {
            self.enter("/submissions/manual-grade".to_string()).await?;
            let mut state = self.state();
            state.writes.push(RecordedGradeWrite::Manual(request.clone()));
            Ok(GradeWriteReceipt {
                submission_id: state.manual_submission_id.clone(),
            })
        }
    }
}
