use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::AppResult;
use crate::models::gradebook::GradebookSnapshot;
use crate::services::canonicalizer::canonicalize_sources;
use crate::services::course_api::CourseApi;
use crate::services::grade_matrix::GradeMatrixBuilder;
use crate::services::source_collector::AssessmentSourceCollector;
use crate::services::submission_index::{SubmissionIndexBuilder, DEFAULT_FETCH_CONCURRENCY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradebookView {
    #[default]
    Grades,
    Other,
}

/// Everything that decides whether (and for what) a cycle runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregationInputs {
    pub course_id: Option<String>,
    pub view: GradebookView,
    pub refresh: u64,
}

impl AggregationInputs {
    fn same_target(&self, other: &AggregationInputs) -> bool {
        self.course_id == other.course_id && self.view == other.view
    }
}

/// What to publish when the roster or a source collection cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OuterFailurePolicy {
    #[default]
    ResetEmpty,
    KeepPrevious,
}

#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub submission_concurrency: usize,
    pub outer_failure: OuterFailurePolicy,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            submission_concurrency: DEFAULT_FETCH_CONCURRENCY,
            outer_failure: OuterFailurePolicy::default(),
        }
    }
}

impl From<&ClientConfig> for AggregationOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            submission_concurrency: config.submission_concurrency,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishedGradebook {
    pub course_id: Option<String>,
    pub cycle: u64,
    pub snapshot: Arc<GradebookSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleOutcome {
    Published,
    /// The cycle failed and an empty snapshot replaced the previous one.
    Reset,
    /// The cycle failed and the previous snapshot stayed in place.
    Kept,
    /// The course or view changed, or a newer cycle published first.
    Discarded,
    /// No course selected or the gradebook view is not active.
    Skipped,
    /// Left to the running refresh loop.
    Scheduled,
}

/// Cloneable refresh trigger for code that changes grades elsewhere.
#[derive(Clone)]
pub struct RefreshHandle {
    inputs: Arc<watch::Sender<AggregationInputs>>,
}

impl RefreshHandle {
    pub fn request_refresh(&self) -> u64 {
        bump_refresh(&self.inputs)
    }

    pub fn notify_discussion_graded(&self, thread_id: &str) -> u64 {
        debug!(target: "app::gradebook", %thread_id, "discussion grade changed");
        self.request_refresh()
    }

    pub fn refresh_counter(&self) -> u64 {
        self.inputs.borrow().refresh
    }
}

fn bump_refresh(inputs: &watch::Sender<AggregationInputs>) -> u64 {
    inputs.send_modify(|inputs| inputs.refresh += 1);
    inputs.borrow().refresh
}

pub struct GradebookService {
    api: Arc<dyn CourseApi>,
    collector: AssessmentSourceCollector,
    submissions: SubmissionIndexBuilder,
    options: AggregationOptions,
    inputs: Arc<watch::Sender<AggregationInputs>>,
    published: watch::Sender<PublishedGradebook>,
    next_cycle: AtomicU64,
    live_loops: Arc<AtomicUsize>,
}

/// Counts a refresh loop as live until its task ends or is aborted.
struct LoopGuard(Arc<AtomicUsize>);

impl LoopGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GradebookService {
    pub fn new(api: Arc<dyn CourseApi>, options: AggregationOptions) -> Self {
        let (inputs, _) = watch::channel(AggregationInputs::default());
        let (published, _) = watch::channel(PublishedGradebook::default());

        Self {
            collector: AssessmentSourceCollector::new(Arc::clone(&api)),
            submissions: SubmissionIndexBuilder::new(
                Arc::clone(&api),
                options.submission_concurrency,
            ),
            api,
            options,
            inputs: Arc::new(inputs),
            published,
            next_cycle: AtomicU64::new(0),
            live_loops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn select_course(&self, course_id: Option<String>) {
        self.inputs.send_if_modified(|inputs| {
            if inputs.course_id == course_id {
                return false;
            }
            inputs.course_id = course_id;
            true
        });
    }

    pub fn set_view(&self, view: GradebookView) {
        self.inputs.send_if_modified(|inputs| {
            if inputs.view == view {
                return false;
            }
            inputs.view = view;
            true
        });
    }

    pub fn request_refresh(&self) -> u64 {
        bump_refresh(&self.inputs)
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            inputs: Arc::clone(&self.inputs),
        }
    }

    pub fn inputs(&self) -> AggregationInputs {
        self.inputs.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedGradebook> {
        self.published.subscribe()
    }

    pub fn published(&self) -> PublishedGradebook {
        self.published.borrow().clone()
    }

    pub fn current(&self) -> Arc<GradebookSnapshot> {
        Arc::clone(&self.published.borrow().snapshot)
    }

    /// Builds a complete snapshot for `course_id` without publishing it.
    ///
    /// Every intermediate structure is local to this call; failures of the
    /// roster or of a source collection propagate, per-assignment submission
    /// failures do not.
    pub async fn aggregate(&self, course_id: &str) -> AppResult<GradebookSnapshot> {
        let started = Instant::now();
        let (students, sources) = tokio::try_join!(
            self.api.course_students(course_id),
            self.collector.collect(course_id),
        )?;

        let assignments = canonicalize_sources(&sources);
        let submissions = self.submissions.fetch_submissions(&assignments).await;
        let submission_map = SubmissionIndexBuilder::build_index(
            &assignments,
            &submissions,
            &sources.discussion_records,
        );
        let grades = GradeMatrixBuilder::build(
            &students,
            &assignments,
            &submissions,
            &sources.discussion_records,
        );

        info!(
            target: "app::gradebook",
            course_id,
            students = students.len(),
            sources = sources.total(),
            columns = assignments.len(),
            indexed = submission_map.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "gradebook aggregated"
        );

        Ok(GradebookSnapshot {
            students,
            assignments,
            grades,
            submission_map,
        })
    }

    /// Runs one aggregation cycle for `inputs` and publishes its result in a
    /// single replacement, unless the inputs moved on while it ran.
    pub async fn run_cycle(&self, inputs: AggregationInputs) -> CycleOutcome {
        let Some(course_id) = inputs.course_id.clone() else {
            return CycleOutcome::Skipped;
        };
        if inputs.view != GradebookView::Grades {
            return CycleOutcome::Skipped;
        }

        let cycle = self.next_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(target: "app::gradebook", %course_id, cycle, refresh = inputs.refresh, "cycle started");

        let (snapshot, outcome) = match self.aggregate(&course_id).await {
            Ok(snapshot) => (snapshot, CycleOutcome::Published),
            Err(err) => {
                warn!(
                    target: "app::gradebook",
                    %course_id,
                    cycle,
                    error = %err,
                    policy = ?self.options.outer_failure,
                    "gradebook aggregation failed"
                );
                match self.options.outer_failure {
                    OuterFailurePolicy::ResetEmpty => (GradebookSnapshot::empty(), CycleOutcome::Reset),
                    OuterFailurePolicy::KeepPrevious => return CycleOutcome::Kept,
                }
            }
        };

        if !self.inputs.borrow().same_target(&inputs) {
            debug!(target: "app::gradebook", %course_id, cycle, "discarding stale cycle");
            return CycleOutcome::Discarded;
        }

        let snapshot = Arc::new(snapshot);
        let replaced = self.published.send_if_modified(|current| {
            if current.cycle > cycle {
                return false;
            }
            *current = PublishedGradebook {
                course_id: Some(course_id.clone()),
                cycle,
                snapshot,
            };
            true
        });

        if replaced {
            outcome
        } else {
            debug!(target: "app::gradebook", %course_id, cycle, "newer cycle already published");
            CycleOutcome::Discarded
        }
    }

    pub async fn refresh_now(&self) -> CycleOutcome {
        self.run_cycle(self.inputs()).await
    }

    pub fn has_refresh_loop(&self) -> bool {
        self.live_loops.load(Ordering::SeqCst) > 0
    }

    /// Requests a refresh. A live refresh loop picks it up; otherwise the
    /// cycle runs inline so each request aggregates once.
    pub async fn refresh(&self) -> CycleOutcome {
        self.request_refresh();
        if self.has_refresh_loop() {
            return CycleOutcome::Scheduled;
        }
        self.refresh_now().await
    }

    /// Re-runs the cycle whenever the course, view or refresh counter
    /// changes. Stops once the service is dropped.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        let mut inputs_rx = self.inputs.subscribe();
        let guard = LoopGuard::enter(&self.live_loops);

        tokio::spawn(async move {
            let _guard = guard;
            loop {
                let inputs = inputs_rx.borrow_and_update().clone();
                match service.upgrade() {
                    Some(service) => {
                        service.run_cycle(inputs).await;
                    }
                    None => break,
                }
                if inputs_rx.changed().await.is_err() {
                    break;
                }
            }
            debug!(target: "app::gradebook", "refresh loop stopped");
        })
    }
}
