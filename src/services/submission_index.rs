use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::models::assignment::CanonicalAssignment;
use crate::models::gradebook::{SubmissionIndex, SubmissionKey};
use crate::models::submission::{DiscussionGradeRecord, Submission};
use crate::services::course_api::CourseApi;

pub type SubmissionsByAssignment = HashMap<String, Vec<Submission>>;

pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct SubmissionIndexBuilder {
    api: Arc<dyn CourseApi>,
    concurrency: usize,
}

impl SubmissionIndexBuilder {
    pub fn new(api: Arc<dyn CourseApi>, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches the submissions of every module and group assignment, at most
    /// `concurrency` requests at a time.
    ///
    /// A failed fetch only blanks its own assignment: 404 means "no
    /// submissions yet", anything else is logged and skipped.
    pub async fn fetch_submissions(
        &self,
        assignments: &[CanonicalAssignment],
    ) -> SubmissionsByAssignment {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::new();

        for assignment in assignments
            .iter()
            .filter(|assignment| assignment.kind.has_submission_collection())
        {
            let semaphore = Arc::clone(&semaphore);
            let api = Arc::clone(&self.api);
            let assignment_id = assignment.id.clone();

            tasks.push(tokio::spawn(async move {
                let submissions = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetch_tolerant(api.as_ref(), &assignment_id).await,
                    Err(err) => {
                        warn!(
                            target: "app::gradebook",
                            %assignment_id,
                            error = %err,
                            "submission fetch skipped"
                        );
                        Vec::new()
                    }
                };
                (assignment_id, submissions)
            }));
        }

        let mut by_assignment = SubmissionsByAssignment::new();
        for task in tasks {
            match task.await {
                Ok((assignment_id, submissions)) => {
                    by_assignment.insert(assignment_id, submissions);
                }
                Err(err) => {
                    error!(target: "app::gradebook", error = %err, "submission fetch task failed");
                }
            }
        }

        by_assignment
    }

    /// Builds the cell -> backing id lookup. Assignments are visited in column
    /// order and submissions in server order, so a later registration for the
    /// same cell replaces an earlier one.
    pub fn build_index(
        assignments: &[CanonicalAssignment],
        submissions: &SubmissionsByAssignment,
        discussion_records: &HashMap<String, DiscussionGradeRecord>,
    ) -> SubmissionIndex {
        let mut index = SubmissionIndex::new();

        for assignment in assignments {
            if assignment.is_discussion() {
                let Some(record) = discussion_records.get(&assignment.id) else {
                    continue;
                };
                for reply in &record.replies {
                    let Some(author_id) = reply.author_id() else {
                        continue;
                    };
                    index.register(
                        SubmissionKey::new(author_id, assignment.id.as_str()),
                        reply.id.as_str(),
                    );
                }
                continue;
            }

            for submission in submissions.get(&assignment.id).into_iter().flatten() {
                if assignment.is_group_assignment && submission.has_members() {
                    for member_id in submission.member_ids() {
                        index.register(
                            SubmissionKey::new(member_id, assignment.id.as_str()),
                            submission.id.as_str(),
                        );
                    }
                } else if let Some(student_id) = submission.student_id() {
                    index.register(
                        SubmissionKey::new(student_id, assignment.id.as_str()),
                        submission.id.as_str(),
                    );
                }
            }
        }

        index
    }
}

async fn fetch_tolerant(api: &dyn CourseApi, assignment_id: &str) -> Vec<Submission> {
    match api.assignment_submissions(assignment_id).await {
        Ok(submissions) => submissions,
        Err(err) if err.is_not_found() => {
            debug!(target: "app::gradebook", %assignment_id, "no submissions for assignment");
            Vec::new()
        }
        Err(err) => {
            warn!(
                target: "app::gradebook",
                %assignment_id,
                error = %err,
                "ignoring submission fetch failure"
            );
            Vec::new()
        }
    }
}
