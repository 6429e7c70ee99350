use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::AppResult;
use crate::models::assignment::AssignmentSource;
use crate::models::submission::DiscussionGradeRecord;
use crate::services::course_api::CourseApi;

/// Raw assessment collections for one course, before canonicalization.
#[derive(Debug, Clone, Default)]
pub struct AssessmentSources {
    pub module_assignments: Vec<AssignmentSource>,
    pub group_assignments: Vec<AssignmentSource>,
    pub discussions: Vec<AssignmentSource>,
    /// Grade sub-records of every graded thread, keyed by thread id.
    pub discussion_records: HashMap<String, DiscussionGradeRecord>,
}

impl AssessmentSources {
    pub fn total(&self) -> usize {
        self.module_assignments.len() + self.group_assignments.len() + self.discussions.len()
    }
}

#[derive(Clone)]
pub struct AssessmentSourceCollector {
    api: Arc<dyn CourseApi>,
}

impl AssessmentSourceCollector {
    pub fn new(api: Arc<dyn CourseApi>) -> Self {
        Self { api }
    }

    /// Fetches all three collections. Any failure here fails the whole
    /// collection; callers decide how to degrade.
    pub async fn collect(&self, course_id: &str) -> AppResult<AssessmentSources> {
        let (module_assignments, group_assignments, threads) = tokio::try_join!(
            self.collect_module_assignments(course_id),
            self.api.group_assignments(course_id),
            self.api.course_threads(course_id),
        )?;

        let mut discussion_records = HashMap::new();
        let discussions: Vec<AssignmentSource> = threads
            .into_iter()
            .filter(|thread| thread.is_graded)
            .map(|thread| {
                discussion_records.insert(thread.id.clone(), thread.grade_record());
                AssignmentSource::Discussion(thread)
            })
            .collect();

        let sources = AssessmentSources {
            module_assignments,
            group_assignments: group_assignments
                .into_iter()
                .map(AssignmentSource::Group)
                .collect(),
            discussions,
            discussion_records,
        };

        debug!(
            target: "app::gradebook",
            course_id,
            modules = sources.module_assignments.len(),
            groups = sources.group_assignments.len(),
            discussions = sources.discussions.len(),
            "assessment sources collected"
        );

        Ok(sources)
    }

    async fn collect_module_assignments(&self, course_id: &str) -> AppResult<Vec<AssignmentSource>> {
        let modules = self.api.course_modules(course_id).await?;
        let mut assignments = Vec::new();
        for module in modules {
            let items = self.api.module_assignments(&module.id).await?;
            assignments.extend(items.into_iter().map(AssignmentSource::Module));
        }
        Ok(assignments)
    }
}
