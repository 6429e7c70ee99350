use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::gradebook::GradebookSnapshot;
use crate::models::student::Student;
use crate::services::grade_mutation::{EditOutcome, EditorState, GradeWrite, ViewerRole};
use crate::services::gradebook_service::{CycleOutcome, GradebookView};
use crate::services::student_grades::StudentGradebook;

use super::{AppState, CommandError, CommandResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookSnapshotResponse {
    pub course_id: Option<String>,
    pub cycle: u64,
    pub snapshot: GradebookSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookRefreshResponse {
    pub outcome: CycleOutcome,
    pub refresh: u64,
    pub cycle: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEditCommitInput {
    pub student_id: String,
    pub assignment_id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEditorStatus {
    pub role: ViewerRole,
    pub editor: EditorState,
    pub grade_error: Option<String>,
    pub last_outcome: Option<EditOutcome>,
}

/// Switches the gradebook to a course (or clears it) and activates the grades view.
pub async fn gradebook_select_course(
    state: &AppState,
    course_id: Option<String>,
) -> CommandResult<()> {
    let course_id = course_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    debug!(target: "app::command", course_id = ?course_id, "selecting course");

    let gradebook = state.gradebook();
    gradebook.set_view(GradebookView::Grades);
    gradebook.select_course(course_id);
    Ok(())
}

pub async fn gradebook_snapshot_get(state: &AppState) -> CommandResult<GradebookSnapshotResponse> {
    let published = state.gradebook().published();
    Ok(GradebookSnapshotResponse {
        course_id: published.course_id,
        cycle: published.cycle,
        snapshot: GradebookSnapshot::clone(&published.snapshot),
    })
}

/// Bumps the refresh counter. Without a refresh loop the cycle runs inline.
pub async fn gradebook_refresh(state: &AppState) -> CommandResult<GradebookRefreshResponse> {
    let gradebook = state.gradebook();
    let outcome = gradebook.refresh().await;
    let refresh = gradebook.inputs().refresh;
    Ok(GradebookRefreshResponse {
        outcome,
        refresh,
        cycle: gradebook.published().cycle,
    })
}

pub async fn grade_edit_begin(
    state: &AppState,
    student_id: String,
    assignment_id: String,
) -> CommandResult<EditorState> {
    state
        .mutations()
        .begin_edit(&student_id, &assignment_id)
        .map_err(CommandError::from)
}

pub async fn grade_edit_cancel(state: &AppState) -> CommandResult<EditorState> {
    let mutations = state.mutations();
    mutations.cancel_edit();
    Ok(mutations.state())
}

pub async fn grade_edit_commit(
    state: &AppState,
    payload: GradeEditCommitInput,
) -> CommandResult<GradeWrite> {
    state
        .mutations()
        .commit_edit(&payload.student_id, &payload.assignment_id, &payload.value)
        .await
        .map_err(CommandError::from)
}

pub async fn grade_editor_state(state: &AppState) -> CommandResult<GradeEditorStatus> {
    let mutations = state.mutations();
    Ok(GradeEditorStatus {
        role: mutations.role(),
        editor: mutations.state(),
        grade_error: mutations.grade_error(),
        last_outcome: mutations.last_outcome(),
    })
}

/// Loads one student's own grades. For a student session the loaded copy
/// also becomes the target of later grade edits.
pub async fn student_grades_load(
    state: &AppState,
    course_id: String,
    student: Student,
) -> CommandResult<StudentGradebook> {
    let gradebook = state
        .student_grades()
        .load(&course_id, student)
        .await
        .map_err(CommandError::from)?;

    if state.role() == ViewerRole::Student {
        state.replace_grade_sink(Arc::new(gradebook.patch_sink()));
    }
    Ok(gradebook)
}
