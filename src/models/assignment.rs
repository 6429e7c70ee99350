use serde::{Deserialize, Serialize};

use crate::models::submission::{DiscussionGradeRecord, DiscussionReply, StudentGradeEntry};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub points: Option<f64>,
}

/// Assignment document as returned by the module and group-assignment endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDto {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub is_offline_assignment: bool,
    #[serde(default)]
    pub is_group_assignment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionThreadDto {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "default_published")]
    pub published: bool,
    #[serde(default)]
    pub is_graded: bool,
    #[serde(default)]
    pub student_grades: Vec<StudentGradeEntry>,
    #[serde(default)]
    pub replies: Vec<DiscussionReply>,
}

impl DiscussionThreadDto {
    pub fn grade_record(&self) -> DiscussionGradeRecord {
        DiscussionGradeRecord {
            thread_id: self.id.clone(),
            student_grades: self.student_grades.clone(),
            replies: self.replies.clone(),
        }
    }
}

fn default_published() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentKind {
    Module,
    Group,
    Discussion,
}

impl AssignmentKind {
    /// Module and group assignments describe the same kind of work item when
    /// collapsing duplicate titles; only discussions stay apart.
    pub fn dedup_label(self) -> &'static str {
        match self {
            AssignmentKind::Module | AssignmentKind::Group => "assignment",
            AssignmentKind::Discussion => "discussion",
        }
    }

    pub fn has_submission_collection(self) -> bool {
        !matches!(self, AssignmentKind::Discussion)
    }
}

/// One upstream assessment record, tagged by the collection it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentSource {
    Module(AssignmentDto),
    Group(AssignmentDto),
    Discussion(DiscussionThreadDto),
}

impl AssignmentSource {
    pub fn id(&self) -> &str {
        match self {
            AssignmentSource::Module(dto) | AssignmentSource::Group(dto) => &dto.id,
            AssignmentSource::Discussion(thread) => &thread.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            AssignmentSource::Module(dto) | AssignmentSource::Group(dto) => &dto.title,
            AssignmentSource::Discussion(thread) => &thread.title,
        }
    }

    pub fn kind(&self) -> AssignmentKind {
        match self {
            AssignmentSource::Module(_) => AssignmentKind::Module,
            AssignmentSource::Group(_) => AssignmentKind::Group,
            AssignmentSource::Discussion(_) => AssignmentKind::Discussion,
        }
    }

    pub fn into_canonical(self) -> CanonicalAssignment {
        let kind = self.kind();
        match self {
            AssignmentSource::Module(dto) | AssignmentSource::Group(dto) => {
                let is_group_assignment =
                    dto.is_group_assignment || kind == AssignmentKind::Group;
                CanonicalAssignment {
                    id: dto.id,
                    title: dto.title,
                    kind,
                    due_date: dto.due_date,
                    created_at: dto.created_at,
                    total_points: dto.total_points,
                    questions: dto.questions,
                    group: dto.group,
                    published: dto.published,
                    is_offline_assignment: dto.is_offline_assignment,
                    is_group_assignment,
                }
            }
            AssignmentSource::Discussion(thread) => CanonicalAssignment {
                id: thread.id,
                title: thread.title,
                kind,
                due_date: thread.due_date,
                created_at: thread.created_at,
                total_points: thread.total_points,
                questions: Vec::new(),
                group: thread.group,
                published: thread.published,
                is_offline_assignment: false,
                is_group_assignment: false,
            },
        }
    }
}

/// A deduplicated grade-matrix column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAssignment {
    pub id: String,
    pub title: String,
    pub kind: AssignmentKind,
    pub due_date: Option<String>,
    pub created_at: Option<String>,
    pub total_points: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<Question>,
    pub group: Option<String>,
    pub published: bool,
    pub is_offline_assignment: bool,
    pub is_group_assignment: bool,
}

impl CanonicalAssignment {
    /// Grade ceiling: the question points when the assignment has questions,
    /// otherwise `totalPoints`, otherwise zero.
    pub fn max_points(&self) -> f64 {
        if !self.questions.is_empty() {
            return self
                .questions
                .iter()
                .map(|question| question.points.unwrap_or(0.0))
                .sum();
        }
        self.total_points.unwrap_or(0.0)
    }

    pub fn is_discussion(&self) -> bool {
        self.kind == AssignmentKind::Discussion
    }
}
