//! Per-branch Maven snapshot repositories.
//!
//! Feature branches get their own hosted snapshot repository, named after
//! `projectKey.slug.branch` and added to a shared repository group. `develop`
//! and other managed non-feature branches deploy to the shared `snapshots`
//! repository and trigger nothing here.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::branch::{strip_leading_origin, BranchPolicy, DEVELOP};
use crate::collaborators::ArtifactRepository;
use crate::error::{Cancelled, LifecycleError, RemoteError};
use crate::retry::RetryPolicy;

/// Repository id shared by every non-feature branch.
pub const SHARED_SNAPSHOTS: &str = "snapshots";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace every character Nexus rejects in a repository id with `_`.
///
/// Letters, digits, `_`, `-` and `.` are kept.
pub fn scrub_repository_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Where the artifact manager lives and which group feature repositories join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusParams {
    /// Base URL, e.g. `http://nexus.example.com/nexus`.
    pub base_url: String,
    pub group_id: GroupId,
}

impl Default for NexusParams {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/nexus".to_string(),
            group_id: GroupId::new("feature-branches"),
        }
    }
}

/// Repository id for `branch` of `project_key/slug`.
pub fn repository_id(project_key: &str, slug: &str, branch: &str) -> RepositoryId {
    let bare = strip_leading_origin(branch);
    if bare == DEVELOP {
        return RepositoryId::new(SHARED_SNAPSHOTS);
    }
    RepositoryId::new(scrub_repository_id(&format!("{project_key}.{slug}.{bare}")))
}

/// Content URL builds deploy to.
pub fn repository_url(base_url: &str, project_key: &str, slug: &str, branch: &str) -> String {
    format!(
        "{}/content/repositories/{}",
        base_url.trim_end_matches('/'),
        repository_id(project_key, slug, branch)
    )
}

/// What `on_job_created` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    SkippedNonFeature,
    Provisioned {
        repository_id: RepositoryId,
        /// A create call was issued by this run.
        created: bool,
        /// The group membership was written by this run.
        joined_group: bool,
    },
}

/// What `on_job_deleted` did. Every variant is a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "repository_id", rename_all = "snake_case")]
pub enum DeleteOutcome {
    SkippedNonFeature,
    Deleted(RepositoryId),
    AlreadyAbsent(RepositoryId),
}

/// Settle poll result: the repository is either visible, not yet, or the
/// existence check itself failed.
#[derive(Debug)]
enum SettlePoll {
    Pending,
    Remote(RemoteError),
}

impl fmt::Display for SettlePoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlePoll::Pending => f.write_str("repository does not exist yet"),
            SettlePoll::Remote(e) => write!(f, "{e}"),
        }
    }
}

impl From<Cancelled> for SettlePoll {
    fn from(c: Cancelled) -> Self {
        SettlePoll::Remote(RemoteError::Cancelled(c))
    }
}

/// Lifecycle of the per-branch snapshot repositories.
#[derive(Clone)]
pub struct ArtifactLifecycle {
    client: Arc<dyn ArtifactRepository>,
    params: NexusParams,
    policy: BranchPolicy,
    request: RetryPolicy,
    settle: RetryPolicy,
    cancel: CancellationToken,
}

impl fmt::Debug for ArtifactLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactLifecycle")
            .field("params", &self.params)
            .field("policy", &self.policy)
            .field("request", &self.request)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl ArtifactLifecycle {
    pub fn new(client: Arc<dyn ArtifactRepository>, params: NexusParams, policy: BranchPolicy) -> Self {
        Self {
            client,
            params,
            policy,
            request: RetryPolicy::request(),
            settle: RetryPolicy::settle(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, request: RetryPolicy, settle: RetryPolicy) -> Self {
        self.request = request;
        self.settle = settle;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &NexusParams {
        &self.params
    }

    pub fn repository_id(&self, project_key: &str, slug: &str, branch: &str) -> RepositoryId {
        repository_id(project_key, slug, branch)
    }

    pub fn repository_url(&self, project_key: &str, slug: &str, branch: &str) -> String {
        repository_url(&self.params.base_url, project_key, slug, branch)
    }

    /// Make sure the branch's repository exists, is visible and is a member
    /// of the configured group.
    ///
    /// The first failing step ends the call. Nothing is rolled back; the
    /// next run starts again from the existence check.
    pub async fn on_job_created(
        &self,
        project_key: &str,
        slug: &str,
        branch: &str,
    ) -> Result<ProvisionOutcome, LifecycleError> {
        if !self.policy.is_feature_branch(branch) {
            debug!(branch, "not a feature branch, no per-branch repository");
            return Ok(ProvisionOutcome::SkippedNonFeature);
        }
        let id = self.repository_id(project_key, slug, branch);

        let mut created = false;
        if self.exists(&id).await? {
            debug!(repository_id = %id, "repository exists");
        } else {
            match self.create(&id).await {
                Ok(()) => {
                    info!(repository_id = %id, "created snapshot repository");
                    created = true;
                }
                Err(LifecycleError::Cancelled(c)) => return Err(c.into()),
                Err(err) => {
                    // Another run may have created it in the meantime.
                    if !self.exists(&id).await? {
                        return Err(err);
                    }
                    info!(repository_id = %id, "repository appeared after failed create");
                }
            }
        }

        if created {
            self.wait_until_visible(&id).await?;
        }

        let joined_group = self.join_group(&id).await?;
        Ok(ProvisionOutcome::Provisioned {
            repository_id: id,
            created,
            joined_group,
        })
    }

    /// Delete the branch's repository. "Already absent" is a success.
    pub async fn on_job_deleted(
        &self,
        project_key: &str,
        slug: &str,
        branch: &str,
    ) -> Result<DeleteOutcome, LifecycleError> {
        if !self.policy.is_feature_branch(branch) {
            debug!(branch, "not a feature branch, no per-branch repository");
            return Ok(DeleteOutcome::SkippedNonFeature);
        }
        let id = self.repository_id(project_key, slug, branch);
        let existed = self
            .request
            .run_if(&self.cancel, |_| self.client.delete(&id), RemoteError::is_transient)
            .await
            .map_err(|e| remote("delete", &id, e))?;

        if existed {
            info!(repository_id = %id, "deleted snapshot repository");
            Ok(DeleteOutcome::Deleted(id))
        } else {
            debug!(repository_id = %id, "snapshot repository already absent");
            Ok(DeleteOutcome::AlreadyAbsent(id))
        }
    }

    async fn exists(&self, id: &RepositoryId) -> Result<bool, LifecycleError> {
        self.request
            .run_if(&self.cancel, |_| self.client.exists(id), RemoteError::is_transient)
            .await
            .map_err(|e| remote("exists", id, e))
    }

    async fn create(&self, id: &RepositoryId) -> Result<(), LifecycleError> {
        self.request
            .run_if(&self.cancel, |_| self.client.create(id), RemoteError::is_transient)
            .await
            .map_err(|e| remote("create", id, e))
    }

    /// Poll until the new repository reports as existing.
    ///
    /// Nexus provisions asynchronously after answering the create call, so
    /// "not yet" is expected for a while. Only an exhausted budget fails.
    async fn wait_until_visible(&self, id: &RepositoryId) -> Result<(), LifecycleError> {
        let result = self
            .settle
            .run_if(
                &self.cancel,
                |attempt| async move {
                    if attempt > 2 {
                        debug!(repository_id = %id, attempt, "waiting for repository to settle");
                    }
                    match self.client.exists(id).await {
                        Ok(true) => Ok(()),
                        Ok(false) => Err(SettlePoll::Pending),
                        Err(e) => Err(SettlePoll::Remote(e)),
                    }
                },
                |poll| match poll {
                    SettlePoll::Pending => true,
                    SettlePoll::Remote(e) => e.is_transient(),
                },
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(SettlePoll::Pending) => {
                warn!(repository_id = %id, "repository did not settle");
                Err(LifecycleError::NotSettled {
                    repository_id: id.to_string(),
                })
            }
            Err(SettlePoll::Remote(e)) => Err(remote("settle", id, e)),
        }
    }

    /// Add `id` to the group unless it is already a member.
    async fn join_group(&self, id: &RepositoryId) -> Result<bool, LifecycleError> {
        let group_id = &self.params.group_id;
        let group = self
            .request
            .run_if(&self.cancel, |_| self.client.group(group_id), RemoteError::is_transient)
            .await
            .map_err(|e| remote("read group", id, e))?;

        if group.contains(id) {
            debug!(repository_id = %id, group = %group_id, "already a group member");
            return Ok(false);
        }

        let mut members = group.members;
        members.push(id.clone());
        self.request
            .run_if(
                &self.cancel,
                |_| self.client.put_group(group_id, &members),
                RemoteError::is_transient,
            )
            .await
            .map_err(|e| remote("update group", id, e))?;
        info!(repository_id = %id, group = %group_id, "added repository to group");
        Ok(true)
    }
}

fn remote(step: &'static str, id: &RepositoryId, err: RemoteError) -> LifecycleError {
    match err {
        RemoteError::Cancelled(c) => LifecycleError::Cancelled(c),
        source => LifecycleError::Remote {
            step,
            repository_id: id.to_string(),
            source,
        },
    }
}
