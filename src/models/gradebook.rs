use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::assignment::CanonicalAssignment;
use crate::models::student::Student;

/// Marker the UI renders for an ungraded cell.
pub const UNGRADED_MARK: &str = "-";

/// One grade-matrix cell. A missing cell and `Ungraded` mean the same thing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GradeCell {
    Graded(f64),
    #[default]
    Ungraded,
}

impl GradeCell {
    pub fn from_grade(grade: Option<f64>) -> Self {
        grade.map_or(GradeCell::Ungraded, GradeCell::Graded)
    }

    /// Text seeded into the cell editor: the number, or blank when ungraded.
    pub fn draft_text(self) -> String {
        match self {
            GradeCell::Graded(value) => value.to_string(),
            GradeCell::Ungraded => String::new(),
        }
    }
}

impl fmt::Display for GradeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeCell::Graded(value) => write!(f, "{value}"),
            GradeCell::Ungraded => f.write_str(UNGRADED_MARK),
        }
    }
}

impl Serialize for GradeCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GradeCell::Graded(value) => serializer.serialize_f64(*value),
            GradeCell::Ungraded => serializer.serialize_str(UNGRADED_MARK),
        }
    }
}

impl<'de> Deserialize<'de> for GradeCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(GradeCell::from_grade(value.and_then(|value| value.as_f64())))
    }
}

/// Composite (student, assignment) identity for a grade cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionKey {
    pub student_id: String,
    pub assignment_id: String,
}

impl SubmissionKey {
    pub fn new(student_id: impl Into<String>, assignment_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            assignment_id: assignment_id.into(),
        }
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.student_id, self.assignment_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionIndexEntry {
    student_id: String,
    assignment_id: String,
    submission_id: String,
}

/// Lookup from a grade cell to the submission (or discussion reply) backing it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmissionIndex {
    entries: BTreeMap<SubmissionKey, String>,
}

impl SubmissionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backing id; a later registration for the same key replaces it.
    pub fn register(&mut self, key: SubmissionKey, submission_id: impl Into<String>) {
        self.entries.insert(key, submission_id.into());
    }

    pub fn get(&self, student_id: &str, assignment_id: &str) -> Option<&str> {
        self.entries
            .get(&SubmissionKey::new(student_id, assignment_id))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubmissionKey, &str)> {
        self.entries.iter().map(|(key, id)| (key, id.as_str()))
    }
}

impl Serialize for SubmissionIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<SubmissionIndexEntry> = self
            .entries
            .iter()
            .map(|(key, submission_id)| SubmissionIndexEntry {
                student_id: key.student_id.clone(),
                assignment_id: key.assignment_id.clone(),
                submission_id: submission_id.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SubmissionIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<SubmissionIndexEntry>::deserialize(deserializer)?;
        let mut index = SubmissionIndex::new();
        for entry in entries {
            index.register(
                SubmissionKey::new(entry.student_id, entry.assignment_id),
                entry.submission_id,
            );
        }
        Ok(index)
    }
}

/// student id -> assignment id -> cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GradeMatrix {
    rows: BTreeMap<String, BTreeMap<String, GradeCell>>,
}

impl GradeMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, student_id: &str, assignment_id: &str) -> GradeCell {
        self.rows
            .get(student_id)
            .and_then(|row| row.get(assignment_id))
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, student_id: &str, assignment_id: &str, cell: GradeCell) {
        self.rows
            .entry(student_id.to_string())
            .or_default()
            .insert(assignment_id.to_string(), cell);
    }

    /// Drops the cell, and the student's row once it has no cells left.
    pub fn remove(&mut self, student_id: &str, assignment_id: &str) {
        if let Some(row) = self.rows.get_mut(student_id) {
            row.remove(assignment_id);
            if row.is_empty() {
                self.rows.remove(student_id);
            }
        }
    }

    pub fn row(&self, student_id: &str) -> Option<&BTreeMap<String, GradeCell>> {
        self.rows.get(student_id)
    }

    pub fn contains_cell(&self, student_id: &str, assignment_id: &str) -> bool {
        self.rows
            .get(student_id)
            .is_some_and(|row| row.contains_key(assignment_id))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The immutable gradebook handed to the UI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookSnapshot {
    pub students: Vec<Student>,
    pub assignments: Vec<CanonicalAssignment>,
    pub grades: GradeMatrix,
    pub submission_map: SubmissionIndex,
}

impl GradebookSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
            && self.assignments.is_empty()
            && self.grades.is_empty()
            && self.submission_map.is_empty()
    }

    pub fn grade(&self, student_id: &str, assignment_id: &str) -> GradeCell {
        self.grades.get(student_id, assignment_id)
    }

    pub fn submission_id(&self, student_id: &str, assignment_id: &str) -> Option<&str> {
        self.submission_map.get(student_id, assignment_id)
    }

    pub fn assignment(&self, assignment_id: &str) -> Option<&CanonicalAssignment> {
        self.assignments
            .iter()
            .find(|assignment| assignment.id == assignment_id)
    }

    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.students.iter().find(|student| student.id == student_id)
    }
}
