use std::sync::Arc;
use std::time::Duration as StdDuration;

use coursehub_gradebook::error::ApiErrorCode;
use coursehub_gradebook::models::assignment::{AssignmentDto, DiscussionThreadDto};
use coursehub_gradebook::models::gradebook::GradeCell;
use coursehub_gradebook::models::student::Student;
use coursehub_gradebook::models::submission::Submission;
use coursehub_gradebook::services::course_api::testing::InMemoryCourseApi;
use coursehub_gradebook::services::gradebook_service::{
    AggregationOptions, CycleOutcome, GradebookService, GradebookView, OuterFailurePolicy,
};
use serde_json::json;
use tokio::time::timeout;

fn submission(value: serde_json::Value) -> Submission {
    serde_json::from_value(value).expect("submission fixture")
}

fn thread(value: serde_json::Value) -> DiscussionThreadDto {
    serde_json::from_value(value).expect("thread fixture")
}

fn seed_course(api: &InMemoryCourseApi) {
    api.set_students(
        "c1",
        vec![Student::new("s1"), Student::new("s2"), Student::new("s3")],
    );
    api.set_module_assignments(
        "c1",
        "m1",
        vec![AssignmentDto {
            id: "a1".into(),
            title: "Essay".into(),
            total_points: Some(100.0),
            created_at: Some("2024-01-10T09:00:00Z".into()),
            published: true,
            ..Default::default()
        }],
    );
    api.set_group_assignments(
        "c1",
        vec![
            AssignmentDto {
                id: "g1".into(),
                title: "Lab Report".into(),
                due_date: Some("2024-01-20".into()),
                is_group_assignment: true,
                published: true,
                ..Default::default()
            },
            AssignmentDto {
                id: "g2".into(),
                title: " essay ".into(),
                is_group_assignment: true,
                ..Default::default()
            },
        ],
    );
    api.set_threads(
        "c1",
        vec![
            thread(json!({
                "_id": "d1",
                "title": "Week 1 Reflection",
                "createdAt": "2024-01-05T00:00:00Z",
                "isGraded": true,
                "studentGrades": [{ "student": "s1", "grade": 9 }],
                "replies": [{ "_id": "r1", "author": { "_id": "s2" } }]
            })),
            thread(json!({ "_id": "d2", "title": "Chatter", "isGraded": false })),
        ],
    );
    api.set_submissions(
        "a1",
        vec![submission(json!({ "_id": "sub1", "student": "s1", "grade": 87 }))],
    );
    api.set_submissions(
        "g1",
        vec![submission(json!({
            "_id": "sub-g",
            "group": { "members": ["s1", { "_id": "s2" }] },
            "grade": 75,
            "useIndividualGrades": false
        }))],
    );
}

fn service_with(api: Arc<InMemoryCourseApi>, policy: OuterFailurePolicy) -> Arc<GradebookService> {
    Arc::new(GradebookService::new(
        api,
        AggregationOptions {
            submission_concurrency: 2,
            outer_failure: policy,
        },
    ))
}

#[tokio::test]
async fn aggregation_merges_all_three_sources() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);

    service.select_course(Some("c1".into()));
    assert_eq!(service.refresh_now().await, CycleOutcome::Published);

    let snapshot = service.current();
    let columns: Vec<&str> = snapshot.assignments.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(columns, vec!["d1", "a1", "g1"]);

    assert_eq!(snapshot.grade("s1", "a1"), GradeCell::Graded(87.0));
    assert_eq!(snapshot.submission_id("s1", "a1"), Some("sub1"));
    assert_eq!(snapshot.grade("s2", "a1"), GradeCell::Ungraded);

    assert_eq!(snapshot.grade("s1", "g1"), GradeCell::Graded(75.0));
    assert_eq!(snapshot.grade("s2", "g1"), GradeCell::Graded(75.0));
    assert_eq!(snapshot.grade("s3", "g1"), GradeCell::Ungraded);
    assert_eq!(snapshot.submission_id("s2", "g1"), Some("sub-g"));

    assert_eq!(snapshot.grade("s1", "d1"), GradeCell::Graded(9.0));
    assert_eq!(snapshot.submission_id("s2", "d1"), Some("r1"));

    assert_eq!(api.request_count("/submissions/assignment/d1"), 0);
    assert_eq!(api.request_count("/submissions/assignment/g2"), 0);

    let published = service.published();
    assert_eq!(published.course_id.as_deref(), Some("c1"));
    assert_eq!(published.cycle, 1);
}

#[tokio::test]
async fn failing_submission_fetch_only_blanks_its_assignment() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    api.fail(
        "/submissions/assignment/a1",
        ApiErrorCode::Unavailable,
        503,
        None,
    );
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);
    service.select_course(Some("c1".into()));

    assert_eq!(service.refresh_now().await, CycleOutcome::Published);
    let snapshot = service.current();
    assert_eq!(snapshot.grade("s1", "a1"), GradeCell::Ungraded);
    assert!(snapshot.submission_id("s1", "a1").is_none());
    assert_eq!(snapshot.grade("s1", "g1"), GradeCell::Graded(75.0));
}

#[tokio::test]
async fn outer_failure_resets_to_empty_snapshot() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);
    service.select_course(Some("c1".into()));
    assert_eq!(service.refresh_now().await, CycleOutcome::Published);
    assert!(!service.current().is_empty());

    api.fail("/threads/course/c1", ApiErrorCode::Unavailable, 503, None);
    assert_eq!(service.refresh_now().await, CycleOutcome::Reset);
    assert!(service.current().is_empty());
    assert_eq!(service.published().cycle, 2);
}

#[tokio::test]
async fn outer_failure_can_keep_previous_snapshot() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    let service = service_with(api.clone(), OuterFailurePolicy::KeepPrevious);
    service.select_course(Some("c1".into()));
    assert_eq!(service.refresh_now().await, CycleOutcome::Published);

    api.fail(
        "/assignments/course/c1/group-assignments",
        ApiErrorCode::Timeout,
        504,
        None,
    );
    assert_eq!(service.refresh_now().await, CycleOutcome::Kept);
    assert_eq!(service.current().grade("s1", "a1"), GradeCell::Graded(87.0));
    assert_eq!(service.published().cycle, 1);
}

#[tokio::test]
async fn nothing_runs_without_course_or_outside_grades_view() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);

    assert_eq!(service.refresh_now().await, CycleOutcome::Skipped);

    service.select_course(Some("c1".into()));
    service.set_view(GradebookView::Other);
    assert_eq!(service.refresh_now().await, CycleOutcome::Skipped);
    assert!(api.requests().is_empty());
}

#[tokio::test]
async fn cycle_finishing_after_course_switch_is_discarded() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    api.delay("/courses/c1", StdDuration::from_millis(100));
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);
    service.select_course(Some("c1".into()));

    let inputs = service.inputs();
    let in_flight = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run_cycle(inputs).await })
    };

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    service.select_course(Some("c2".into()));

    let outcome = in_flight.await.expect("cycle task");
    assert_eq!(outcome, CycleOutcome::Discarded);
    assert_eq!(service.published().cycle, 0);
    assert!(service.current().is_empty());
}

#[tokio::test]
async fn older_cycle_never_replaces_newer_one() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    api.delay("/courses/c1", StdDuration::from_millis(100));
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);
    service.select_course(Some("c1".into()));

    let slow = {
        let service = Arc::clone(&service);
        let inputs = service.inputs();
        tokio::spawn(async move { service.run_cycle(inputs).await })
    };
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    api.delay("/courses/c1", StdDuration::ZERO);
    assert_eq!(service.refresh_now().await, CycleOutcome::Published);
    assert_eq!(service.published().cycle, 2);

    assert_eq!(slow.await.expect("slow cycle"), CycleOutcome::Discarded);
    assert_eq!(service.published().cycle, 2);
}

#[tokio::test]
async fn refresh_loop_follows_course_and_refresh_signals() {
    let api = Arc::new(InMemoryCourseApi::new());
    seed_course(&api);
    let service = service_with(api.clone(), OuterFailurePolicy::ResetEmpty);
    let mut published = service.subscribe();
    let refresh_loop = service.spawn_refresh_loop();

    service.select_course(Some("c1".into()));
    timeout(StdDuration::from_secs(2), published.changed())
        .await
        .expect("first publication")
        .expect("channel open");
    assert_eq!(
        published.borrow().snapshot.grade("s1", "d1"),
        GradeCell::Graded(9.0)
    );

    api.set_threads(
        "c1",
        vec![thread(json!({
            "_id": "d1",
            "title": "Week 1 Reflection",
            "createdAt": "2024-01-05T00:00:00Z",
            "isGraded": true,
            "studentGrades": [{ "student": "s1", "grade": 10 }]
        }))],
    );
    let handle = service.refresh_handle();
    assert_eq!(handle.notify_discussion_graded("d1"), 1);

    timeout(StdDuration::from_secs(2), published.changed())
        .await
        .expect("second publication")
        .expect("channel open");
    assert_eq!(
        published.borrow().snapshot.grade("s1", "d1"),
        GradeCell::Graded(10.0)
    );

    drop(service);
    refresh_loop.abort();
}
