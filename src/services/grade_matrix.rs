use std::collections::HashMap;

use crate::models::assignment::CanonicalAssignment;
use crate::models::gradebook::{GradeCell, GradeMatrix};
use crate::models::student::Student;
use crate::models::submission::{DiscussionGradeRecord, Submission};
use crate::services::submission_index::SubmissionsByAssignment;

pub struct GradeMatrixBuilder;

impl GradeMatrixBuilder {
    /// Fills one cell per (student, assignment) pair.
    pub fn build(
        students: &[Student],
        assignments: &[CanonicalAssignment],
        submissions: &SubmissionsByAssignment,
        discussion_records: &HashMap<String, DiscussionGradeRecord>,
    ) -> GradeMatrix {
        let mut matrix = GradeMatrix::new();

        for assignment in assignments {
            let assignment_submissions = submissions
                .get(&assignment.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let record = discussion_records.get(&assignment.id);

            for student in students {
                let cell = Self::cell_for(&student.id, assignment, assignment_submissions, record);
                matrix.set(&student.id, &assignment.id, cell);
            }
        }

        matrix
    }

    pub fn cell_for(
        student_id: &str,
        assignment: &CanonicalAssignment,
        submissions: &[Submission],
        record: Option<&DiscussionGradeRecord>,
    ) -> GradeCell {
        if assignment.is_discussion() {
            return GradeCell::from_grade(record.and_then(|record| record.grade_for(student_id)));
        }

        if assignment.is_group_assignment {
            let group_submission = submissions
                .iter()
                .rev()
                .find(|submission| submission.has_members() && submission.includes_member(student_id));

            if let Some(submission) = group_submission {
                let member_override = if submission.use_individual_grades {
                    submission.member_grade(student_id)
                } else {
                    None
                };
                return GradeCell::from_grade(member_override.or(submission.grade));
            }
        }

        // Matches the submission index: the last submission for the cell wins.
        let grade = submissions
            .iter()
            .rev()
            .find(|submission| submission.student_id() == Some(student_id))
            .and_then(|submission| submission.grade);
        GradeCell::from_grade(grade)
    }
}
