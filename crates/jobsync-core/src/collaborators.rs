//! Collaborator trait definitions for jobsync
//!
//! The core talks to three remote systems:
//! - `CiServer`: job listing, job configuration, create and delete
//! - `Scm`: repository metadata and branch listing
//! - `ArtifactRepository`: per-branch snapshot repositories and their group
//!
//! All traits are async and transport-agnostic. In-memory fakes live in the
//! `fakes` module; HTTP bindings live in `jobsync-remote`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::{GroupId, RepositoryId};
use crate::branch::Branch;
use crate::error::RemoteResult;
use crate::job::JobRef;

// ---------------------------------------------------------------------------
// CI server
// ---------------------------------------------------------------------------

/// Read access to stored job configurations.
///
/// Implemented by the CI server itself and by a job directory on disk.
#[async_trait]
pub trait JobConfigSource: Send + Sync {
    async fn list_jobs(&self) -> RemoteResult<Vec<JobRef>>;

    /// Raw `config.xml` of one job.
    async fn job_config_xml(&self, job_name: &str) -> RemoteResult<String>;
}

/// A CI server that can also create and delete jobs.
#[async_trait]
pub trait CiServer: JobConfigSource {
    async fn create_job(&self, job_name: &str, config_xml: &str) -> RemoteResult<()>;

    async fn delete_job(&self, job_name: &str) -> RemoteResult<()>;
}

// ---------------------------------------------------------------------------
// SCM
// ---------------------------------------------------------------------------

/// Repository metadata the reconciler needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub project_key: String,
    pub slug: String,
    /// SSH clone URL, if the SCM advertises one.
    pub ssh_url: Option<String>,
}

#[async_trait]
pub trait Scm: Send + Sync {
    async fn repository(&self, project_key: &str, slug: &str) -> RemoteResult<Repository>;

    /// All branches keyed by display name.
    async fn branches(&self, project_key: &str, slug: &str)
        -> RemoteResult<BTreeMap<String, Branch>>;
}

// ---------------------------------------------------------------------------
// Artifact repository manager
// ---------------------------------------------------------------------------

/// A repository group and its current members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryGroup {
    pub id: GroupId,
    pub members: Vec<RepositoryId>,
}

impl RepositoryGroup {
    pub fn contains(&self, id: &RepositoryId) -> bool {
        self.members.iter().any(|m| m == id)
    }
}

/// Snapshot repository management.
///
/// Guarantees:
/// - `delete` reports whether the repository existed; absence is not an error.
/// - `put_group` replaces the member list wholesale.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn exists(&self, id: &RepositoryId) -> RemoteResult<bool>;

    async fn create(&self, id: &RepositoryId) -> RemoteResult<()>;

    /// Returns `true` if the repository existed before the call.
    async fn delete(&self, id: &RepositoryId) -> RemoteResult<bool>;

    async fn group(&self, id: &GroupId) -> RemoteResult<RepositoryGroup>;

    async fn put_group(&self, id: &GroupId, members: &[RepositoryId]) -> RemoteResult<()>;
}
