use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::models::assignment::{AssignmentSource, CanonicalAssignment};
use crate::services::source_collector::AssessmentSources;

/// Merges the three source collections into ordered grade-matrix columns.
///
/// Sources are considered in module, group, discussion order and the first
/// occurrence wins at both dedup passes: identical id, then identical
/// `trim(lowercase(title)) | kind` where module and group count as one kind.
/// The survivors are sorted by `createdAt`, falling back to `dueDate`; dated
/// columns come first and dateless ones keep their relative order.
pub fn canonicalize(
    module_assignments: &[AssignmentSource],
    group_assignments: &[AssignmentSource],
    discussions: &[AssignmentSource],
) -> Vec<CanonicalAssignment> {
    let mut seen_ids = HashSet::new();
    let mut seen_titles = HashSet::new();

    let mut merged: Vec<CanonicalAssignment> = module_assignments
        .iter()
        .chain(group_assignments)
        .chain(discussions)
        .filter(|source| seen_ids.insert(source.id().to_string()))
        .filter(|source| seen_titles.insert(title_key(source)))
        .cloned()
        .map(AssignmentSource::into_canonical)
        .collect();

    merged.sort_by(compare_effective_dates);
    merged
}

pub fn canonicalize_sources(sources: &AssessmentSources) -> Vec<CanonicalAssignment> {
    canonicalize(
        &sources.module_assignments,
        &sources.group_assignments,
        &sources.discussions,
    )
}

fn title_key(source: &AssignmentSource) -> String {
    format!(
        "{}|{}",
        source.title().trim().to_lowercase(),
        source.kind().dedup_label()
    )
}

fn effective_timestamp(assignment: &CanonicalAssignment) -> Option<i64> {
    let raw = assignment
        .created_at
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            assignment
                .due_date
                .as_deref()
                .filter(|value| !value.trim().is_empty())
        })?;
    parse_timestamp(raw)
}

fn compare_effective_dates(left: &CanonicalAssignment, right: &CanonicalAssignment) -> Ordering {
    match (effective_timestamp(left), effective_timestamp(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Milliseconds since the epoch for RFC 3339 timestamps, naive date-times
/// (read as UTC) and plain dates. Anything else counts as dateless.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
}
