//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `MemoryCiServer`, `MemoryScm` and `MemoryArtifactRepository`.
//! Each records the calls it receives and can be told to fail a named
//! operation, either a fixed number of times with a transient error or
//! permanently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::artifact::{GroupId, RepositoryId};
use crate::branch::Branch;
use crate::collaborators::{
    ArtifactRepository, CiServer, JobConfigSource, Repository, RepositoryGroup, Scm,
};
use crate::error::{RemoteError, RemoteResult};
use crate::job::JobRef;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail the next `n` calls with HTTP 503.
    Transient(u32),
    /// Fail every call with HTTP 400.
    Permanent,
}

#[derive(Debug, Default)]
struct Faults(Mutex<HashMap<String, Fault>>);

impl Faults {
    fn set(&self, op: &str, fault: Fault) {
        lock(&self.0).insert(op.to_string(), fault);
    }

    fn check(&self, op: &str, target: &str) -> RemoteResult<()> {
        let mut faults = lock(&self.0);
        let status = match faults.get(op).copied() {
            None => return Ok(()),
            Some(Fault::Permanent) => 400,
            Some(Fault::Transient(0)) => {
                faults.remove(op);
                return Ok(());
            }
            Some(Fault::Transient(n)) => {
                faults.insert(op.to_string(), Fault::Transient(n - 1));
                503
            }
        };
        Err(RemoteError::Status {
            method: op.to_string(),
            url: format!("memory://{target}"),
            status,
            body: "injected failure".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryCiServer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiCall {
    ListJobs,
    JobConfig(String),
    CreateJob(String),
    DeleteJob(String),
}

/// In-memory CI server backed by a `BTreeMap<job name, config.xml>`.
#[derive(Debug, Default)]
pub struct MemoryCiServer {
    jobs: Mutex<BTreeMap<String, String>>,
    calls: Mutex<Vec<CiCall>>,
    faults: Faults,
}

impl MemoryCiServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(self, name: &str, config_xml: &str) -> Self {
        lock(&self.jobs).insert(name.to_string(), config_xml.to_string());
        self
    }

    pub fn job_names(&self) -> Vec<String> {
        lock(&self.jobs).keys().cloned().collect()
    }

    pub fn config(&self, name: &str) -> Option<String> {
        lock(&self.jobs).get(name).cloned()
    }

    pub fn calls(&self) -> Vec<CiCall> {
        lock(&self.calls).clone()
    }

    /// Create and delete calls, in order.
    pub fn mutating_calls(&self) -> Vec<CiCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, CiCall::CreateJob(_) | CiCall::DeleteJob(_)))
            .collect()
    }

    /// Fail the next `times` calls of `op` (`list_jobs`, `job_config`,
    /// `create_job`, `delete_job`) with a transient error.
    pub fn fail_transiently(&self, op: &str, times: u32) {
        self.faults.set(op, Fault::Transient(times));
    }

    /// Fail every call of `op` with a non-retryable error.
    pub fn fail_permanently(&self, op: &str) {
        self.faults.set(op, Fault::Permanent);
    }

    fn record(&self, call: CiCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl JobConfigSource for MemoryCiServer {
    async fn list_jobs(&self) -> RemoteResult<Vec<JobRef>> {
        self.record(CiCall::ListJobs);
        self.faults.check("list_jobs", "jobs")?;
        Ok(lock(&self.jobs)
            .keys()
            .map(|name| JobRef {
                name: name.clone(),
                url: format!("memory://job/{name}/"),
            })
            .collect())
    }

    async fn job_config_xml(&self, job_name: &str) -> RemoteResult<String> {
        self.record(CiCall::JobConfig(job_name.to_string()));
        self.faults.check("job_config", job_name)?;
        lock(&self.jobs)
            .get(job_name)
            .cloned()
            .ok_or_else(|| RemoteError::Status {
                method: "GET".to_string(),
                url: format!("memory://job/{job_name}/config.xml"),
                status: 404,
                body: String::new(),
            })
    }
}

#[async_trait]
impl CiServer for MemoryCiServer {
    async fn create_job(&self, job_name: &str, config_xml: &str) -> RemoteResult<()> {
        self.record(CiCall::CreateJob(job_name.to_string()));
        self.faults.check("create_job", job_name)?;
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(job_name) {
            return Err(RemoteError::Status {
                method: "POST".to_string(),
                url: format!("memory://createItem?name={job_name}"),
                status: 400,
                body: format!("A job already exists with the name '{job_name}'"),
            });
        }
        jobs.insert(job_name.to_string(), config_xml.to_string());
        Ok(())
    }

    async fn delete_job(&self, job_name: &str) -> RemoteResult<()> {
        self.record(CiCall::DeleteJob(job_name.to_string()));
        self.faults.check("delete_job", job_name)?;
        lock(&self.jobs).remove(job_name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryScm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ScmRepo {
    ssh_url: Option<String>,
    branches: Vec<String>,
}

/// In-memory SCM keyed by `(project_key, slug)`.
#[derive(Debug, Default)]
pub struct MemoryScm {
    repos: Mutex<HashMap<(String, String), ScmRepo>>,
    faults: Faults,
}

impl MemoryScm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(
        self,
        project_key: &str,
        slug: &str,
        ssh_url: Option<&str>,
        branches: &[&str],
    ) -> Self {
        lock(&self.repos).insert(
            (project_key.to_string(), slug.to_string()),
            ScmRepo {
                ssh_url: ssh_url.map(str::to_string),
                branches: branches.iter().map(|b| b.to_string()).collect(),
            },
        );
        self
    }

    pub fn set_branches(&self, project_key: &str, slug: &str, branches: &[&str]) {
        if let Some(repo) = lock(&self.repos).get_mut(&(project_key.to_string(), slug.to_string())) {
            repo.branches = branches.iter().map(|b| b.to_string()).collect();
        }
    }

    /// Fail the next `times` calls of `op` (`repository`, `branches`).
    pub fn fail_transiently(&self, op: &str, times: u32) {
        self.faults.set(op, Fault::Transient(times));
    }

    pub fn fail_permanently(&self, op: &str) {
        self.faults.set(op, Fault::Permanent);
    }

    fn lookup(&self, project_key: &str, slug: &str) -> RemoteResult<ScmRepo> {
        lock(&self.repos)
            .get(&(project_key.to_string(), slug.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::Status {
                method: "GET".to_string(),
                url: format!("memory://projects/{project_key}/repos/{slug}"),
                status: 404,
                body: String::new(),
            })
    }
}

#[async_trait]
impl Scm for MemoryScm {
    async fn repository(&self, project_key: &str, slug: &str) -> RemoteResult<Repository> {
        self.faults.check("repository", slug)?;
        let repo = self.lookup(project_key, slug)?;
        Ok(Repository {
            project_key: project_key.to_string(),
            slug: slug.to_string(),
            ssh_url: repo.ssh_url,
        })
    }

    async fn branches(
        &self,
        project_key: &str,
        slug: &str,
    ) -> RemoteResult<BTreeMap<String, Branch>> {
        self.faults.check("branches", slug)?;
        let repo = self.lookup(project_key, slug)?;
        Ok(repo
            .branches
            .into_iter()
            .map(|name| (name.clone(), Branch::new(name)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactRepository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCall {
    Exists(RepositoryId),
    Create(RepositoryId),
    Delete(RepositoryId),
    Group(GroupId),
    PutGroup(GroupId, Vec<RepositoryId>),
}

impl ArtifactCall {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ArtifactCall::Create(_) | ArtifactCall::Delete(_) | ArtifactCall::PutGroup(..)
        )
    }
}

/// In-memory artifact manager.
///
/// A repository created here can be made to stay invisible to `exists`
/// for a number of polls, like Nexus provisioning after answering 201.
#[derive(Debug, Default)]
pub struct MemoryArtifactRepository {
    /// Repository id to the number of `exists` polls still answering `false`.
    repositories: Mutex<BTreeMap<RepositoryId, u32>>,
    groups: Mutex<HashMap<GroupId, Vec<RepositoryId>>>,
    settle_lag: Mutex<u32>,
    calls: Mutex<Vec<ArtifactCall>>,
    faults: Faults,
}

impl MemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(self, id: &str) -> Self {
        lock(&self.repositories).insert(RepositoryId::new(id), 0);
        self
    }

    pub fn with_group(self, id: &str, members: &[&str]) -> Self {
        lock(&self.groups).insert(
            GroupId::new(id),
            members.iter().map(|m| RepositoryId::new(*m)).collect(),
        );
        self
    }

    /// Newly created repositories report as absent for the next `polls`
    /// existence checks.
    pub fn with_settle_lag(self, polls: u32) -> Self {
        *lock(&self.settle_lag) = polls;
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.repositories).contains_key(&RepositoryId::new(id))
    }

    pub fn members(&self, group: &str) -> Vec<RepositoryId> {
        lock(&self.groups)
            .get(&GroupId::new(group))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<ArtifactCall> {
        lock(&self.calls).clone()
    }

    pub fn mutating_calls(&self) -> Vec<ArtifactCall> {
        self.calls().into_iter().filter(ArtifactCall::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Fail the next `times` calls of `op` (`exists`, `create`, `delete`,
    /// `group`, `put_group`) with a transient error.
    pub fn fail_transiently(&self, op: &str, times: u32) {
        self.faults.set(op, Fault::Transient(times));
    }

    pub fn fail_permanently(&self, op: &str) {
        self.faults.set(op, Fault::Permanent);
    }

    fn record(&self, call: ArtifactCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl ArtifactRepository for MemoryArtifactRepository {
    async fn exists(&self, id: &RepositoryId) -> RemoteResult<bool> {
        self.record(ArtifactCall::Exists(id.clone()));
        self.faults.check("exists", id.as_str())?;
        let mut repositories = lock(&self.repositories);
        match repositories.get_mut(id) {
            None => Ok(false),
            Some(0) => Ok(true),
            Some(lag) => {
                *lag -= 1;
                Ok(false)
            }
        }
    }

    async fn create(&self, id: &RepositoryId) -> RemoteResult<()> {
        self.record(ArtifactCall::Create(id.clone()));
        self.faults.check("create", id.as_str())?;
        let lag = *lock(&self.settle_lag);
        lock(&self.repositories).entry(id.clone()).or_insert(lag);
        Ok(())
    }

    async fn delete(&self, id: &RepositoryId) -> RemoteResult<bool> {
        self.record(ArtifactCall::Delete(id.clone()));
        self.faults.check("delete", id.as_str())?;
        Ok(lock(&self.repositories).remove(id).is_some())
    }

    async fn group(&self, id: &GroupId) -> RemoteResult<RepositoryGroup> {
        self.record(ArtifactCall::Group(id.clone()));
        self.faults.check("group", id.as_str())?;
        let members = lock(&self.groups).get(id).cloned().unwrap_or_default();
        Ok(RepositoryGroup {
            id: id.clone(),
            members,
        })
    }

    async fn put_group(&self, id: &GroupId, members: &[RepositoryId]) -> RemoteResult<()> {
        self.record(ArtifactCall::PutGroup(id.clone(), members.to_vec()));
        self.faults.check("put_group", id.as_str())?;
        lock(&self.groups).insert(id.clone(), members.to_vec());
        Ok(())
    }
}
