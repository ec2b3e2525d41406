//! Per-kind behaviour: how a job model is built and what runs after a job
//! is created or deleted.
//!
//! | kind      | model                          | after create        | after delete        |
//! |-----------|--------------------------------|---------------------|---------------------|
//! | Maven     | base fields + snapshot repo    | provision repo      | delete repo         |
//! | Freestyle | base fields                    | nothing             | nothing             |

use crate::artifact::{ArtifactLifecycle, DeleteOutcome, ProvisionOutcome};
use crate::error::LifecycleError;
use crate::job::{JobKind, JobModel, MavenCoordinates};

/// Inputs common to every job model.
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    pub project_key: &'a str,
    pub slug: &'a str,
    pub job_name: &'a str,
    pub description: &'a str,
    /// Git clone URL the job builds from.
    pub repository_url: &'a str,
    pub branch: &'a str,
}

impl JobKind {
    pub fn build_model(self, lifecycle: &ArtifactLifecycle, input: &ModelInput<'_>) -> JobModel {
        let maven = match self {
            JobKind::Maven => Some(MavenCoordinates {
                snapshot_repository_url: lifecycle.repository_url(
                    input.project_key,
                    input.slug,
                    input.branch,
                ),
                repository_id: lifecycle
                    .repository_id(input.project_key, input.slug, input.branch)
                    .to_string(),
            }),
            JobKind::Freestyle => None,
        };
        JobModel {
            job_name: input.job_name.to_string(),
            description: input.description.to_string(),
            branch_name: input.branch.to_string(),
            repository_url: input.repository_url.to_string(),
            maven,
        }
    }

    /// `None` when the kind has no post-create work.
    pub async fn after_create(
        self,
        lifecycle: &ArtifactLifecycle,
        project_key: &str,
        slug: &str,
        branch: &str,
    ) -> Result<Option<ProvisionOutcome>, LifecycleError> {
        match self {
            JobKind::Maven => lifecycle
                .on_job_created(project_key, slug, branch)
                .await
                .map(Some),
            JobKind::Freestyle => Ok(None),
        }
    }

    /// `None` when the kind has no post-delete work.
    pub async fn after_delete(
        self,
        lifecycle: &ArtifactLifecycle,
        project_key: &str,
        slug: &str,
        branch: &str,
    ) -> Result<Option<DeleteOutcome>, LifecycleError> {
        match self {
            JobKind::Maven => lifecycle
                .on_job_deleted(project_key, slug, branch)
                .await
                .map(Some),
            JobKind::Freestyle => Ok(None),
        }
    }
}
