use std::sync::Arc;

use coursehub_gradebook::error::ApiErrorCode;
use coursehub_gradebook::models::assignment::{AssignmentDto, DiscussionThreadDto};
use coursehub_gradebook::models::gradebook::GradeCell;
use coursehub_gradebook::models::student::Student;
use coursehub_gradebook::models::submission::{CourseGradeSummary, Submission};
use coursehub_gradebook::services::course_api::testing::InMemoryCourseApi;
use coursehub_gradebook::services::grade_mutation::GradeSink;
use coursehub_gradebook::services::student_grades::StudentGradesService;
use serde_json::json;

fn published(id: &str, title: &str) -> AssignmentDto {
    AssignmentDto {
        id: id.into(),
        title: title.into(),
        total_points: Some(100.0),
        published: true,
        ..Default::default()
    }
}

fn seeded_api() -> Arc<InMemoryCourseApi> {
    let api = Arc::new(InMemoryCourseApi::new());
    api.set_module_assignments(
        "c1",
        "m1",
        vec![
            published("a1", "Essay"),
            AssignmentDto {
                id: "h1".into(),
                title: "Draft quiz".into(),
                published: false,
                ..Default::default()
            },
        ],
    );
    api.set_group_assignments(
        "c1",
        vec![AssignmentDto {
            is_group_assignment: true,
            ..published("g1", "Team Project")
        }],
    );
    let thread: DiscussionThreadDto = serde_json::from_value(json!({
        "_id": "d1",
        "title": "Week 1 Reflection",
        "isGraded": true,
        "studentGrades": [
            { "student": "s1", "grade": 8 },
            { "student": "s2", "grade": 6 }
        ],
        "replies": [
            { "_id": "r1", "author": "s1" },
            { "_id": "r2", "author": "s2" }
        ]
    }))
    .expect("thread");
    api.set_threads("c1", vec![thread]);

    let submissions: Vec<Submission> = serde_json::from_value(json!([
        { "_id": "sub1", "assignment": "a1", "grade": 87 },
        {
            "_id": "sub-g",
            "assignment": { "_id": "g1" },
            "group": { "members": ["s1", "s2"] },
            "grade": 70,
            "useIndividualGrades": true,
            "memberGrades": [{ "student": "s1", "grade": 72 }]
        },
        { "_id": "sub-h", "assignment": "h1", "student": "s1", "grade": 5 }
    ]))
    .expect("submissions");
    api.set_student_submissions("c1", submissions);
    api
}

#[tokio::test]
async fn student_view_is_scoped_to_one_student() {
    let api = seeded_api();
    api.set_course_grade(
        "c1",
        CourseGradeSummary {
            total_percent: Some(88.5),
            letter_grade: Some("B+".into()),
        },
    );
    let service = StudentGradesService::new(api.clone());

    let loaded = service
        .load("c1", Student::new("s1"))
        .await
        .expect("student grades");
    let snapshot = &loaded.snapshot;

    let mut columns: Vec<&str> = snapshot.assignments.iter().map(|a| a.id.as_str()).collect();
    columns.sort_unstable();
    assert_eq!(columns, vec!["a1", "d1", "g1"]);

    assert_eq!(snapshot.students.len(), 1);
    assert_eq!(snapshot.grade("s1", "a1"), GradeCell::Graded(87.0));
    assert_eq!(snapshot.grade("s1", "g1"), GradeCell::Graded(72.0));
    assert_eq!(snapshot.grade("s1", "d1"), GradeCell::Graded(8.0));

    assert_eq!(snapshot.submission_id("s1", "a1"), Some("sub1"));
    assert_eq!(snapshot.submission_id("s1", "g1"), Some("sub-g"));
    assert_eq!(snapshot.submission_id("s1", "d1"), Some("r1"));
    assert!(snapshot.submission_map.iter().all(|(key, _)| key.student_id == "s1"));
    assert!(snapshot.grades.row("s2").is_none());

    let summary = loaded.summary.expect("summary");
    assert_eq!(summary.letter_grade.as_deref(), Some("B+"));
    assert_eq!(api.request_count("/submissions/student/course/c1"), 1);
    assert_eq!(api.request_count("/submissions/assignment/a1"), 0);
}

#[tokio::test]
async fn missing_summary_is_tolerated() {
    let api = seeded_api();
    let service = StudentGradesService::new(api);

    let loaded = service
        .load("c1", Student::new("s1"))
        .await
        .expect("student grades");
    assert!(loaded.summary.is_none());
    assert_eq!(loaded.snapshot.grade("s1", "a1"), GradeCell::Graded(87.0));
}

#[tokio::test]
async fn source_failure_fails_the_load() {
    let api = seeded_api();
    api.fail("/threads/course/c1", ApiErrorCode::Unavailable, 503, None);
    let service = StudentGradesService::new(api);

    let err = service
        .load("c1", Student::new("s1"))
        .await
        .expect_err("collection failed");
    assert_eq!(err.api_code(), Some(ApiErrorCode::Unavailable));
}

#[tokio::test]
async fn loaded_copy_seeds_a_patch_sink() {
    let api = seeded_api();
    let service = StudentGradesService::new(api);
    let loaded = service
        .load("c1", Student::new("s1"))
        .await
        .expect("student grades");

    let sink = loaded.patch_sink();
    assert_eq!(*sink.snapshot(), loaded.snapshot);
}
