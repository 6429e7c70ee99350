use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppResult;
use crate::models::gradebook::{GradebookSnapshot, SubmissionIndex};
use crate::models::student::{Student, UserRef};
use crate::models::submission::{CourseGradeSummary, DiscussionGradeRecord, Submission};
use crate::services::canonicalizer::canonicalize_sources;
use crate::services::course_api::CourseApi;
use crate::services::grade_matrix::GradeMatrixBuilder;
use crate::services::grade_mutation::LocalPatchSink;
use crate::services::source_collector::AssessmentSourceCollector;
use crate::services::submission_index::{SubmissionIndexBuilder, SubmissionsByAssignment};

/// A single student's derived gradebook plus the server-computed standing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradebook {
    pub student: Student,
    pub snapshot: GradebookSnapshot,
    pub summary: Option<CourseGradeSummary>,
}

impl StudentGradebook {
    pub fn patch_sink(&self) -> LocalPatchSink {
        LocalPatchSink::new(Arc::new(self.snapshot.clone()))
    }
}

pub struct StudentGradesService {
    api: Arc<dyn CourseApi>,
    collector: AssessmentSourceCollector,
}

impl StudentGradesService {
    pub fn new(api: Arc<dyn CourseApi>) -> Self {
        Self {
            collector: AssessmentSourceCollector::new(Arc::clone(&api)),
            api,
        }
    }

    pub async fn load(&self, course_id: &str, student: Student) -> AppResult<StudentGradebook> {
        let (collected, summary) = tokio::join!(
            async {
                tokio::try_join!(
                    self.collector.collect(course_id),
                    self.api.student_course_submissions(course_id),
                )
            },
            self.summary(course_id),
        );
        let (sources, submissions) = collected?;

        let assignments: Vec<_> = canonicalize_sources(&sources)
            .into_iter()
            .filter(|assignment| assignment.published)
            .collect();

        let mut by_assignment = SubmissionsByAssignment::new();
        for submission in submissions {
            let Some(assignment_id) = submission.assignment_id().map(str::to_string) else {
                continue;
            };
            if assignments.iter().any(|assignment| assignment.id == assignment_id) {
                by_assignment
                    .entry(assignment_id)
                    .or_default()
                    .push(owned_by(submission, &student.id));
            }
        }

        let records: HashMap<String, DiscussionGradeRecord> = sources
            .discussion_records
            .iter()
            .map(|(thread_id, record)| (thread_id.clone(), only_student(record, &student.id)))
            .collect();

        let full_index = SubmissionIndexBuilder::build_index(&assignments, &by_assignment, &records);
        let mut submission_map = SubmissionIndex::new();
        for (key, submission_id) in full_index.iter().filter(|(key, _)| key.student_id == student.id) {
            submission_map.register(key.clone(), submission_id);
        }

        let grades = GradeMatrixBuilder::build(
            std::slice::from_ref(&student),
            &assignments,
            &by_assignment,
            &records,
        );

        info!(
            target: "app::gradebook",
            course_id,
            student_id = %student.id,
            columns = assignments.len(),
            has_summary = summary.is_some(),
            "student grades loaded"
        );

        Ok(StudentGradebook {
            snapshot: GradebookSnapshot {
                students: vec![student.clone()],
                assignments,
                grades,
                submission_map,
            },
            student,
            summary,
        })
    }

    async fn summary(&self, course_id: &str) -> Option<CourseGradeSummary> {
        match self.api.student_course_grade(course_id).await {
            Ok(summary) => Some(summary),
            Err(err) => {
                debug!(target: "app::gradebook", course_id, error = %err, "course grade summary unavailable");
                None
            }
        }
    }
}

/// The student endpoint may omit the owner on individual submissions.
fn owned_by(mut submission: Submission, student_id: &str) -> Submission {
    if submission.student.is_none() && !submission.has_members() {
        submission.student = Some(UserRef::Id(student_id.to_string()));
    }
    submission
}

fn only_student(record: &DiscussionGradeRecord, student_id: &str) -> DiscussionGradeRecord {
    DiscussionGradeRecord {
        thread_id: record.thread_id.clone(),
        student_grades: record
            .student_grades
            .iter()
            .filter(|entry| entry.student_id() == Some(student_id))
            .cloned()
            .collect(),
        replies: record
            .replies
            .iter()
            .filter(|reply| reply.author_id() == Some(student_id))
            .cloned()
            .collect(),
    }
}
