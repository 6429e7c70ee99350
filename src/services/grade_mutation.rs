use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::gradebook::{GradeCell, GradebookSnapshot, SubmissionKey};
use crate::models::submission::ManualGradeRequest;
use crate::services::course_api::CourseApi;
use crate::services::gradebook_service::GradebookService;

const UPDATE_FAILED: &str = "Failed to update grade";
const REMOVE_FAILED: &str = "Failed to remove grade";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewerRole {
    Instructor,
    Admin,
    Student,
}

impl ViewerRole {
    pub fn can_edit(self) -> bool {
        matches!(self, ViewerRole::Instructor | ViewerRole::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum EditorState {
    #[default]
    Idle,
    Editing {
        key: SubmissionKey,
        draft: String,
    },
    Saving {
        key: SubmissionKey,
    },
}

impl EditorState {
    fn key(&self) -> Option<&SubmissionKey> {
        match self {
            EditorState::Idle => None,
            EditorState::Editing { key, .. } | EditorState::Saving { key } => Some(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "camelCase")]
pub enum EditOutcome {
    Committed,
    Rejected(String),
}

/// A grade write the server accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeWrite {
    pub key: SubmissionKey,
    pub grade: Option<f64>,
    /// Set when a manual grade created the backing submission.
    pub created_submission_id: Option<String>,
}

/// Where accepted writes go after the server confirms them.
pub trait GradeSink: Send + Sync {
    fn snapshot(&self) -> Arc<GradebookSnapshot>;

    fn reconcile(&self, write: &GradeWrite) -> AppResult<()>;
}

/// Shared instructor matrix: the server stays the source of truth, so a write
/// only asks for a fresh aggregation cycle.
pub struct RefetchSink {
    gradebook: Arc<GradebookService>,
}

impl RefetchSink {
    pub fn new(gradebook: Arc<GradebookService>) -> Self {
        Self { gradebook }
    }
}

impl GradeSink for RefetchSink {
    fn snapshot(&self) -> Arc<GradebookSnapshot> {
        self.gradebook.current()
    }

    fn reconcile(&self, write: &GradeWrite) -> AppResult<()> {
        let refresh = self.gradebook.request_refresh();
        debug!(target: "app::gradebook::mutation", key = %write.key, refresh, "refresh requested");
        Ok(())
    }
}

/// One student's derived copy, patched in place of a refetch.
pub struct LocalPatchSink {
    snapshot: RwLock<Arc<GradebookSnapshot>>,
}

impl LocalPatchSink {
    pub fn new(snapshot: Arc<GradebookSnapshot>) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }
}

impl GradeSink for LocalPatchSink {
    fn snapshot(&self) -> Arc<GradebookSnapshot> {
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn reconcile(&self, write: &GradeWrite) -> AppResult<()> {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut patched = GradebookSnapshot::clone(&guard);
        let SubmissionKey {
            student_id,
            assignment_id,
        } = &write.key;

        match write.grade {
            Some(grade) => patched
                .grades
                .set(student_id, assignment_id, GradeCell::Graded(grade)),
            None => patched.grades.remove(student_id, assignment_id),
        }
        if let Some(submission_id) = &write.created_submission_id {
            patched
                .submission_map
                .register(write.key.clone(), submission_id.as_str());
        }

        *guard = Arc::new(patched);
        debug!(target: "app::gradebook::mutation", key = %write.key, "local snapshot patched");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WriteTarget {
    Submission(String),
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedWrite {
    key: SubmissionKey,
    grade: Option<f64>,
    target: WriteTarget,
    has_submission: bool,
}

impl PlannedWrite {
    fn fallback_message(&self) -> &'static str {
        if self.grade.is_some() {
            UPDATE_FAILED
        } else {
            REMOVE_FAILED
        }
    }
}

/// Parses an edited grade and checks it against the column maximum.
pub fn validate_grade(raw: &str, max_points: f64) -> AppResult<f64> {
    let parsed = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| AppError::invalid_grade("Grade must be a number"))?;
    if parsed < 0.0 {
        return Err(AppError::invalid_grade("Grade cannot be negative"));
    }
    if parsed > max_points {
        return Err(AppError::grade_exceeds_max(max_points));
    }
    Ok(parsed)
}

fn plan_write(snapshot: &GradebookSnapshot, key: &SubmissionKey, raw: &str) -> AppResult<PlannedWrite> {
    let assignment = snapshot
        .assignment(&key.assignment_id)
        .ok_or_else(|| AppError::not_found(format!("Assignment {}", key.assignment_id)))?;
    let submission_id = snapshot
        .submission_id(&key.student_id, &key.assignment_id)
        .map(str::to_string);
    let offline = assignment.is_offline_assignment;
    let has_submission = submission_id.is_some();
    if !has_submission && !offline {
        return Err(AppError::no_submission(&key.student_id, &key.assignment_id));
    }

    let grade = if raw.trim().is_empty() {
        None
    } else {
        Some(validate_grade(raw, assignment.max_points())?)
    };

    let target = match (submission_id, offline, grade) {
        (Some(submission_id), false, _) | (Some(submission_id), true, Some(_)) => {
            WriteTarget::Submission(submission_id)
        }
        _ => WriteTarget::Manual,
    };

    Ok(PlannedWrite {
        key: key.clone(),
        grade,
        target,
        has_submission,
    })
}

#[derive(Default)]
struct EditorSlots {
    state: EditorState,
    saving: HashSet<SubmissionKey>,
    grade_error: Option<String>,
    last_outcome: Option<EditOutcome>,
}

impl EditorSlots {
    /// Moves the single editor slot unless it now belongs to another cell.
    fn settle(&mut self, key: &SubmissionKey, next: EditorState) {
        if self.state.key().map_or(true, |current| current == key) {
            self.state = next;
        }
    }

    fn reject(&mut self, key: &SubmissionKey, raw: &str, reason: String) {
        self.saving.remove(key);
        self.settle(
            key,
            EditorState::Editing {
                key: key.clone(),
                draft: raw.to_string(),
            },
        );
        self.grade_error = Some(reason.clone());
        self.last_outcome = Some(EditOutcome::Rejected(reason));
    }
}

pub struct GradeMutationService {
    api: Arc<dyn CourseApi>,
    sink: Arc<dyn GradeSink>,
    role: ViewerRole,
    editor: Mutex<EditorSlots>,
}

impl GradeMutationService {
    pub fn new(api: Arc<dyn CourseApi>, sink: Arc<dyn GradeSink>, role: ViewerRole) -> Self {
        Self {
            api,
            sink,
            role,
            editor: Mutex::new(EditorSlots::default()),
        }
    }

    /// Instructors and admins refetch through the shared gradebook; students
    /// patch a private copy of the current snapshot.
    pub fn for_role(
        role: ViewerRole,
        api: Arc<dyn CourseApi>,
        gradebook: &Arc<GradebookService>,
    ) -> Self {
        let sink: Arc<dyn GradeSink> = if role.can_edit() {
            Arc::new(RefetchSink::new(Arc::clone(gradebook)))
        } else {
            Arc::new(LocalPatchSink::new(gradebook.current()))
        };
        Self::new(api, sink, role)
    }

    fn editor(&self) -> MutexGuard<'_, EditorSlots> {
        self.editor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn role(&self) -> ViewerRole {
        self.role
    }

    pub fn snapshot(&self) -> Arc<GradebookSnapshot> {
        self.sink.snapshot()
    }

    pub fn state(&self) -> EditorState {
        self.editor().state.clone()
    }

    pub fn grade_error(&self) -> Option<String> {
        self.editor().grade_error.clone()
    }

    pub fn is_saving(&self, student_id: &str, assignment_id: &str) -> bool {
        self.editor()
            .saving
            .contains(&SubmissionKey::new(student_id, assignment_id))
    }

    pub fn last_outcome(&self) -> Option<EditOutcome> {
        self.editor().last_outcome.clone()
    }

    /// Opens the single editor slot on a cell, seeded with its current value.
    pub fn begin_edit(&self, student_id: &str, assignment_id: &str) -> AppResult<EditorState> {
        if !self.role.can_edit() {
            warn!(
                target: "app::gradebook::mutation",
                role = ?self.role,
                %student_id,
                %assignment_id,
                "grade editor refused"
            );
            return Err(AppError::EditNotPermitted);
        }

        let key = SubmissionKey::new(student_id, assignment_id);
        let draft = self.sink.snapshot().grade(student_id, assignment_id).draft_text();
        let mut editor = self.editor();
        if editor.saving.contains(&key) {
            return Err(AppError::EditInProgress);
        }
        editor.state = EditorState::Editing { key, draft };
        editor.grade_error = None;
        Ok(editor.state.clone())
    }

    pub fn update_draft(&self, draft: impl Into<String>) -> AppResult<EditorState> {
        let mut editor = self.editor();
        match &mut editor.state {
            EditorState::Editing { draft: current, .. } => {
                *current = draft.into();
                Ok(editor.state.clone())
            }
            _ => Err(AppError::not_found("Open grade edit")),
        }
    }

    pub fn cancel_edit(&self) {
        let mut editor = self.editor();
        if matches!(editor.state, EditorState::Editing { .. }) {
            editor.state = EditorState::Idle;
            editor.grade_error = None;
        }
    }

    /// Validates, persists and reconciles one cell edit. A blank value
    /// removes the grade.
    ///
    /// Local rejections never reach the network. Every failure is mirrored
    /// into `grade_error` and leaves the snapshot untouched.
    pub async fn commit_edit(
        &self,
        student_id: &str,
        assignment_id: &str,
        raw: &str,
    ) -> AppResult<GradeWrite> {
        let key = SubmissionKey::new(student_id, assignment_id);

        let planned = {
            let mut editor = self.editor();
            if editor.saving.contains(&key) {
                debug!(target: "app::gradebook::mutation", %key, "commit ignored while saving");
                return Err(AppError::EditInProgress);
            }
            editor.grade_error = None;

            match plan_write(&self.sink.snapshot(), &key, raw) {
                Ok(planned) => {
                    editor.saving.insert(key.clone());
                    editor.settle(&key, EditorState::Saving { key: key.clone() });
                    planned
                }
                Err(err) => {
                    editor.reject(&key, raw, err.to_string());
                    return Err(err);
                }
            }
        };

        let result = match &planned.target {
            WriteTarget::Submission(submission_id) => {
                self.api
                    .set_submission_grade(submission_id, planned.grade)
                    .await
            }
            WriteTarget::Manual => {
                let request = ManualGradeRequest {
                    assignment_id: key.assignment_id.clone(),
                    student_id: key.student_id.clone(),
                    grade: planned.grade,
                };
                self.api.set_manual_grade(&request).await
            }
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(err) => {
                let reason = err
                    .server_message()
                    .unwrap_or(planned.fallback_message())
                    .to_string();
                warn!(
                    target: "app::gradebook::mutation",
                    %key,
                    error = %err,
                    %reason,
                    "grade write failed"
                );
                self.editor().reject(&key, raw, reason);
                return Err(err);
            }
        };

        let created_submission_id = match planned.target {
            WriteTarget::Manual if !planned.has_submission && planned.grade.is_some() => {
                receipt.submission_id
            }
            _ => None,
        };
        let write = GradeWrite {
            key: key.clone(),
            grade: planned.grade,
            created_submission_id,
        };

        if let Err(err) = self.sink.reconcile(&write) {
            self.editor().reject(&key, raw, err.to_string());
            return Err(err);
        }

        let mut editor = self.editor();
        editor.saving.remove(&key);
        editor.settle(&key, EditorState::Idle);
        editor.last_outcome = Some(EditOutcome::Committed);
        info!(
            target: "app::gradebook::mutation",
            %key,
            grade = ?write.grade,
            role = ?self.role,
            "grade committed"
        );

        Ok(write)
    }
}
