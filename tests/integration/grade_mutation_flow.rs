use std::sync::Arc;
use std::time::Duration as StdDuration;

use coursehub_gradebook::error::{ApiErrorCode, AppError};
use coursehub_gradebook::models::assignment::{AssignmentDto, AssignmentSource};
use coursehub_gradebook::models::gradebook::{GradeCell, GradebookSnapshot, SubmissionKey};
use coursehub_gradebook::models::student::Student;
use coursehub_gradebook::models::submission::{ManualGradeRequest, Submission};
use coursehub_gradebook::services::course_api::testing::{InMemoryCourseApi, RecordedGradeWrite};
use coursehub_gradebook::services::grade_mutation::{
    EditOutcome, EditorState, GradeMutationService, GradeSink, LocalPatchSink, ViewerRole,
};
use coursehub_gradebook::services::gradebook_service::{
    AggregationOptions, CycleOutcome, GradebookService,
};
use serde_json::json;

fn essay() -> AssignmentDto {
    AssignmentDto {
        id: "a1".into(),
        title: "Essay".into(),
        total_points: Some(100.0),
        published: true,
        ..Default::default()
    }
}

fn participation() -> AssignmentDto {
    AssignmentDto {
        id: "o1".into(),
        title: "Participation".into(),
        total_points: Some(10.0),
        is_offline_assignment: true,
        published: true,
        ..Default::default()
    }
}

fn seeded_api() -> Arc<InMemoryCourseApi> {
    let api = Arc::new(InMemoryCourseApi::new());
    api.set_students(
        "c1",
        vec![Student::new("s1"), Student::new("s2"), Student::new("s3")],
    );
    api.set_module_assignments("c1", "m1", vec![essay(), participation()]);
    let submissions: Vec<Submission> = vec![
        serde_json::from_value(json!({ "_id": "sub1", "student": "s1", "grade": 87 })).expect("sub1"),
        serde_json::from_value(json!({ "_id": "sub2", "student": "s2" })).expect("sub2"),
    ];
    api.set_submissions("a1", submissions);
    api
}

async fn instructor_setup() -> (
    Arc<InMemoryCourseApi>,
    Arc<GradebookService>,
    GradeMutationService,
) {
    let api = seeded_api();
    let gradebook = Arc::new(GradebookService::new(
        api.clone(),
        AggregationOptions::default(),
    ));
    gradebook.select_course(Some("c1".into()));
    assert_eq!(gradebook.refresh_now().await, CycleOutcome::Published);

    let mutations = GradeMutationService::for_role(ViewerRole::Instructor, api.clone(), &gradebook);
    (api, gradebook, mutations)
}

fn student_snapshot() -> GradebookSnapshot {
    let mut snapshot = GradebookSnapshot::empty();
    snapshot.students.push(Student::new("s1"));
    snapshot
        .assignments
        .push(AssignmentSource::Module(essay()).into_canonical());
    snapshot
        .assignments
        .push(AssignmentSource::Module(participation()).into_canonical());
    snapshot.grades.set("s1", "a1", GradeCell::Graded(87.0));
    snapshot.grades.set("s1", "o1", GradeCell::Graded(4.0));
    snapshot
        .submission_map
        .register(SubmissionKey::new("s1", "a1"), "sub1");
    snapshot
}

#[tokio::test]
async fn instructor_commit_writes_and_requests_refresh() {
    let (api, gradebook, mutations) = instructor_setup().await;

    mutations.begin_edit("s1", "a1").expect("editor opens");
    let write = mutations.commit_edit("s1", "a1", "95").await.expect("commit");

    assert_eq!(write.grade, Some(95.0));
    assert_eq!(
        api.writes(),
        vec![RecordedGradeWrite::Submission {
            submission_id: "sub1".into(),
            grade: Some(95.0),
        }]
    );
    assert_eq!(gradebook.inputs().refresh, 1);
    assert_eq!(mutations.state(), EditorState::Idle);
    assert_eq!(mutations.last_outcome(), Some(EditOutcome::Committed));
    assert!(mutations.grade_error().is_none());
    assert!(!mutations.is_saving("s1", "a1"));
}

#[tokio::test]
async fn grade_above_maximum_never_reaches_the_network() {
    let (api, gradebook, mutations) = instructor_setup().await;
    let requests_before = api.requests().len();

    mutations.begin_edit("s1", "a1").expect("editor opens");
    let err = mutations
        .commit_edit("s1", "a1", "150")
        .await
        .expect_err("above max");

    assert!(matches!(err, AppError::GradeExceedsMax { .. }));
    assert_eq!(
        mutations.grade_error().as_deref(),
        Some("Grade cannot exceed 100 points")
    );
    assert_eq!(api.requests().len(), requests_before);
    assert!(api.writes().is_empty());
    assert_eq!(gradebook.current().grade("s1", "a1"), GradeCell::Graded(87.0));
    assert_eq!(gradebook.inputs().refresh, 0);
    assert_eq!(
        mutations.state(),
        EditorState::Editing {
            key: SubmissionKey::new("s1", "a1"),
            draft: "150".into(),
        }
    );
}

#[tokio::test]
async fn missing_submission_is_rejected_locally() {
    let (api, _gradebook, mutations) = instructor_setup().await;

    let err = mutations
        .commit_edit("s3", "a1", "50")
        .await
        .expect_err("no submission");

    assert!(matches!(err, AppError::NoSubmission));
    assert_eq!(
        mutations.grade_error().as_deref(),
        Some("No submission found for this student")
    );
    assert!(api.writes().is_empty());
}

#[tokio::test]
async fn missing_submission_wins_over_invalid_values() {
    let (api, _gradebook, mutations) = instructor_setup().await;

    for raw in ["150", "abc", "-1"] {
        let err = mutations
            .commit_edit("s3", "a1", raw)
            .await
            .expect_err("no submission");
        assert!(matches!(err, AppError::NoSubmission), "value {raw:?}");
        assert_eq!(
            mutations.grade_error().as_deref(),
            Some("No submission found for this student")
        );
    }
    assert!(api.writes().is_empty());
}

#[tokio::test]
async fn unknown_assignment_is_not_found() {
    let (api, _gradebook, mutations) = instructor_setup().await;

    let err = mutations
        .commit_edit("s1", "nope", "5")
        .await
        .expect_err("unknown assignment");
    assert!(err.is_not_found());
    assert!(api.writes().is_empty());
}

#[tokio::test]
async fn blank_value_on_regular_assignment_clears_through_submission_endpoint() {
    let (api, _gradebook, mutations) = instructor_setup().await;

    let write = mutations.commit_edit("s1", "a1", "   ").await.expect("removal");
    assert_eq!(write.grade, None);
    assert_eq!(
        api.writes(),
        vec![RecordedGradeWrite::Submission {
            submission_id: "sub1".into(),
            grade: None,
        }]
    );
}

#[tokio::test]
async fn offline_grade_without_submission_goes_through_manual_grade() {
    let (api, _gradebook, mutations) = instructor_setup().await;

    mutations.commit_edit("s3", "o1", "7.5").await.expect("manual grade");
    assert_eq!(
        api.writes(),
        vec![RecordedGradeWrite::Manual(ManualGradeRequest {
            assignment_id: "o1".into(),
            student_id: "s3".into(),
            grade: Some(7.5),
        })]
    );
}

#[tokio::test]
async fn server_rejection_surfaces_message_and_keeps_state() {
    let (api, gradebook, mutations) = instructor_setup().await;
    api.fail(
        "/submissions/sub1/grade",
        ApiErrorCode::Rejected,
        400,
        Some("Grading period is closed"),
    );

    mutations.begin_edit("s1", "a1").expect("editor opens");
    let err = mutations
        .commit_edit("s1", "a1", "90")
        .await
        .expect_err("server rejects");

    assert_eq!(err.api_code(), Some(ApiErrorCode::Rejected));
    assert_eq!(
        mutations.grade_error().as_deref(),
        Some("Grading period is closed")
    );
    assert_eq!(
        mutations.last_outcome(),
        Some(EditOutcome::Rejected("Grading period is closed".into()))
    );
    assert!(!mutations.is_saving("s1", "a1"));
    assert_eq!(gradebook.inputs().refresh, 0);
    assert_eq!(gradebook.current().grade("s1", "a1"), GradeCell::Graded(87.0));
}

#[tokio::test]
async fn server_errors_without_message_use_generic_text() {
    let (api, _gradebook, mutations) = instructor_setup().await;
    api.fail("/submissions/sub1/grade", ApiErrorCode::Unavailable, 500, None);

    mutations
        .commit_edit("s1", "a1", "90")
        .await
        .expect_err("update fails");
    assert_eq!(mutations.grade_error().as_deref(), Some("Failed to update grade"));

    mutations
        .commit_edit("s1", "a1", "")
        .await
        .expect_err("removal fails");
    assert_eq!(mutations.grade_error().as_deref(), Some("Failed to remove grade"));
}

#[tokio::test]
async fn duplicate_commit_on_saving_cell_is_refused() {
    let (api, _gradebook, mutations) = instructor_setup().await;
    api.delay("/submissions/sub1/grade", StdDuration::from_millis(50));

    let (first, second) = futures::join!(
        mutations.commit_edit("s1", "a1", "90"),
        mutations.commit_edit("s1", "a1", "91"),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(AppError::EditInProgress)));
    assert_eq!(api.writes().len(), 1);
}

#[tokio::test]
async fn commits_on_different_cells_run_side_by_side() {
    let (api, gradebook, mutations) = instructor_setup().await;
    api.delay("/submissions/sub1/grade", StdDuration::from_millis(30));
    api.delay("/submissions/sub2/grade", StdDuration::from_millis(30));

    let results = futures::future::join_all(vec![
        mutations.commit_edit("s1", "a1", "80"),
        mutations.commit_edit("s2", "a1", "70"),
    ])
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(api.writes().len(), 2);
    assert_eq!(gradebook.inputs().refresh, 2);
}

#[tokio::test]
async fn student_copy_is_patched_without_refetch() {
    let api = seeded_api();
    api.set_manual_submission_id("sub-new");
    let sink = Arc::new(LocalPatchSink::new(Arc::new(student_snapshot())));
    let mutations = GradeMutationService::new(api.clone(), sink.clone(), ViewerRole::Student);

    mutations.commit_edit("s1", "a1", "91").await.expect("set");
    let snapshot = sink.snapshot();
    assert_eq!(snapshot.grade("s1", "a1"), GradeCell::Graded(91.0));

    let mut fresh = student_snapshot();
    fresh.grades.remove("s1", "o1");
    let sink = Arc::new(LocalPatchSink::new(Arc::new(fresh)));
    let mutations = GradeMutationService::new(api.clone(), sink.clone(), ViewerRole::Student);
    mutations.commit_edit("s1", "o1", "6").await.expect("manual create");
    let snapshot = sink.snapshot();
    assert_eq!(snapshot.grade("s1", "o1"), GradeCell::Graded(6.0));
    assert_eq!(snapshot.submission_id("s1", "o1"), Some("sub-new"));

    let reads = api
        .requests()
        .into_iter()
        .filter(|path| !path.contains("grade"))
        .count();
    assert_eq!(reads, 0);
}

#[tokio::test]
async fn blank_offline_edit_removes_cell_and_empty_row() {
    let api = seeded_api();
    let mut snapshot = student_snapshot();
    snapshot.grades.remove("s1", "a1");
    let sink = Arc::new(LocalPatchSink::new(Arc::new(snapshot)));
    let mutations = GradeMutationService::new(api.clone(), sink.clone(), ViewerRole::Student);

    mutations.commit_edit("s1", "o1", "").await.expect("removal");

    assert_eq!(
        api.writes(),
        vec![RecordedGradeWrite::Manual(ManualGradeRequest {
            assignment_id: "o1".into(),
            student_id: "s1".into(),
            grade: None,
        })]
    );
    let snapshot = sink.snapshot();
    assert_eq!(snapshot.grade("s1", "o1"), GradeCell::Ungraded);
    assert!(snapshot.grades.row("s1").is_none());
    assert!(mutations.grade_error().is_none());
}

#[tokio::test]
async fn students_cannot_open_the_editor() {
    let api = seeded_api();
    let sink = Arc::new(LocalPatchSink::new(Arc::new(student_snapshot())));
    let mutations = GradeMutationService::new(api, sink, ViewerRole::Student);

    assert!(matches!(
        mutations.begin_edit("s1", "a1"),
        Err(AppError::EditNotPermitted)
    ));
}
