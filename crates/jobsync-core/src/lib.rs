//! jobsync-core: per-branch CI job reconciliation
//!
//! Keeps a CI server's continuous-build jobs in step with the branches of
//! each SCM repository that has a job template, and gives every feature
//! branch its own Maven snapshot repository.
//!
//! ## Key Components
//!
//! - `BranchPolicy`: which branches are managed
//! - `naming`: branch to job name mapping and back
//! - `reconcile`: spec, missing and obsolete job sets
//! - `ArtifactLifecycle`: per-branch repository create, settle-wait and group membership
//! - `RetryPolicy`: bounded exponential backoff with cancellation
//! - `Reconciler`: drives a whole run against the collaborator traits
//!
//! There is no persisted state. Every run recomputes the desired jobs from
//! the SCM and re-reads the existing jobs from the CI server.

pub mod artifact;
pub mod branch;
pub mod collaborators;
pub mod config_xml;
mod error;
pub mod fakes;
pub mod inventory;
pub mod job;
pub mod kind;
pub mod naming;
pub mod reconcile;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod template_source;

pub use artifact::{
    repository_id, repository_url, scrub_repository_id, ArtifactLifecycle, DeleteOutcome, GroupId,
    NexusParams, ProvisionOutcome, RepositoryId, SHARED_SNAPSHOTS,
};
pub use branch::{strip_leading_origin, Branch, BranchPolicy, DEVELOP};
pub use collaborators::{
    ArtifactRepository, CiServer, JobConfigSource, Repository, RepositoryGroup, Scm,
};
pub use config_xml::{summarize_job_config, SummaryError};
pub use error::{
    Cancelled, LifecycleError, NamingError, ReconcileError, RemoteError, RemoteResult,
    TemplateError,
};
pub use inventory::{collect_job_inventory, JobInventory};
pub use job::{JobDescriptor, JobKind, JobModel, JobRef, JobSummary, JobType};
pub use naming::{canonical_job_name, recover_branch, release_job_name, suffix};
pub use reconcile::{
    compute_missing, compute_obsolete, compute_spec_jobs, should_create_release_job,
    ReconciliationPlan,
};
pub use reconciler::{Reconciler, SyncOptions};
pub use report::{FailureStage, ItemFailure, ReconcileReport, RunReport, TemplateFailure};
pub use retry::{retry, RetryPolicy};
pub use template_source::{discover_templates, fetch_templates, Template};

/// Crate version, reported by the command line.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
