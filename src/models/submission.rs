use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::models::student::UserRef;

/// Drops entries that are null or not a recognizable user reference.
fn present_refs<'de, D>(deserializer: D) -> Result<Vec<UserRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<JsonValue>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect())
}

/// Accepts any JSON value for a grade and keeps it only when it is a number.
fn numeric_grade<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value
        .and_then(|value| value.as_f64())
        .filter(|grade| grade.is_finite()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    #[serde(alias = "_id")]
    pub id: String,
}

/// A reference the backend may or may not have populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EntityRef {
    Id(String),
    Populated(DocumentRef),
}

impl EntityRef {
    pub fn id(&self) -> &str {
        match self {
            EntityRef::Id(id) => id,
            EntityRef::Populated(doc) => &doc.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionGroup {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present_refs")]
    pub members: Vec<UserRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberGrade {
    #[serde(default)]
    pub student: Option<UserRef>,
    #[serde(default, deserialize_with = "numeric_grade")]
    pub grade: Option<f64>,
}

impl MemberGrade {
    pub fn student_id(&self) -> Option<&str> {
        self.student.as_ref().map(UserRef::id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub assignment: Option<EntityRef>,
    #[serde(default)]
    pub student: Option<UserRef>,
    #[serde(default)]
    pub group: Option<SubmissionGroup>,
    #[serde(default, deserialize_with = "numeric_grade")]
    pub grade: Option<f64>,
    #[serde(default)]
    pub use_individual_grades: bool,
    #[serde(default)]
    pub member_grades: Vec<MemberGrade>,
}

impl Submission {
    pub fn assignment_id(&self) -> Option<&str> {
        self.assignment.as_ref().map(EntityRef::id)
    }

    pub fn student_id(&self) -> Option<&str> {
        self.student.as_ref().map(UserRef::id)
    }

    /// Ids of the group members, empty for individual submissions.
    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.group
            .iter()
            .flat_map(|group| group.members.iter().map(UserRef::id))
    }

    pub fn has_members(&self) -> bool {
        self.group
            .as_ref()
            .is_some_and(|group| !group.members.is_empty())
    }

    pub fn includes_member(&self, student_id: &str) -> bool {
        self.member_ids().any(|id| id == student_id)
    }

    pub fn member_grade(&self, student_id: &str) -> Option<f64> {
        self.member_grades
            .iter()
            .find(|entry| entry.student_id() == Some(student_id))
            .and_then(|entry| entry.grade)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeEntry {
    #[serde(default)]
    pub student: Option<UserRef>,
    #[serde(default, deserialize_with = "numeric_grade")]
    pub grade: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl StudentGradeEntry {
    pub fn student_id(&self) -> Option<&str> {
        self.student.as_ref().map(UserRef::id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionReply {
    #[serde(alias = "_id")]
    pub id: String,
    /// Missing when the author account no longer exists.
    #[serde(default)]
    pub author: Option<UserRef>,
}

impl DiscussionReply {
    pub fn author_id(&self) -> Option<&str> {
        self.author.as_ref().map(UserRef::id)
    }
}

/// Grading state of one discussion thread. Replies stand in for submissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionGradeRecord {
    pub thread_id: String,
    #[serde(default)]
    pub student_grades: Vec<StudentGradeEntry>,
    #[serde(default)]
    pub replies: Vec<DiscussionReply>,
}

impl DiscussionGradeRecord {
    pub fn grade_for(&self, student_id: &str) -> Option<f64> {
        self.student_grades
            .iter()
            .find(|entry| entry.student_id() == Some(student_id))
            .and_then(|entry| entry.grade)
    }
}

/// Server-computed course standing for the signed-in student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CourseGradeSummary {
    #[serde(default, alias = "percentage", alias = "totalPercentage")]
    pub total_percent: Option<f64>,
    #[serde(default, alias = "letter")]
    pub letter_grade: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualGradeRequest {
    pub assignment_id: String,
    pub student_id: String,
    pub grade: Option<f64>,
}

/// What the backend tells us after a grade write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GradeWriteReceipt {
    pub submission_id: Option<String>,
}

impl GradeWriteReceipt {
    pub fn from_body(body: &JsonValue) -> Self {
        let submission_id = ["/submission/_id", "/submission/id", "/_id", "/id"]
            .iter()
            .find_map(|pointer| body.pointer(pointer).and_then(JsonValue::as_str))
            .map(str::to_string);
        Self { submission_id }
    }
}
