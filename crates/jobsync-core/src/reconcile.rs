//! Reconciliation engine: desired jobs versus existing jobs.
//!
//! Everything here is pure. Outputs are sorted by job name so a fixed input
//! always yields the same plan, whatever order branches and jobs arrive in.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::branch::{branch_depth, Branch, BranchPolicy};
use crate::inventory::JobInventory;
use crate::job::{JobDescriptor, JobSummary};
use crate::naming::{canonical_job_name, in_namespace, release_job_name};

/// One desired job per managed branch. Unmanaged branches are dropped.
pub fn compute_spec_jobs<'a, I>(
    project_key: &str,
    slug: &str,
    branches: I,
    policy: &BranchPolicy,
) -> Vec<JobDescriptor>
where
    I: IntoIterator<Item = &'a Branch>,
{
    let mut jobs: Vec<JobDescriptor> = branches
        .into_iter()
        .filter(|b| policy.is_managed(&b.display_id))
        .map(|b| {
            if branch_depth(&b.display_id) > 2 {
                warn!(
                    branch = %b,
                    "branch has more than two segments; its job name does not map back unambiguously"
                );
            }
            JobDescriptor {
                job_name: canonical_job_name(project_key, slug, b),
                branch: b.clone(),
            }
        })
        .collect();
    jobs.sort();
    jobs.dedup_by(|dropped, kept| {
        let collides = dropped.job_name == kept.job_name;
        if collides {
            warn!(
                job = %kept.job_name,
                branch = %kept.branch,
                dropped = %dropped.branch,
                "branches map to the same job name; only the first is managed"
            );
        }
        collides
    });
    jobs
}

/// Spec jobs with no existing job of the identical name.
pub fn compute_missing(spec: &[JobDescriptor], actual: &[JobSummary]) -> Vec<JobDescriptor> {
    let names: BTreeSet<&str> = actual.iter().map(|j| j.job_name.as_str()).collect();
    missing_by_name(spec, &names)
}

fn missing_by_name(spec: &[JobDescriptor], existing: &BTreeSet<&str>) -> Vec<JobDescriptor> {
    let mut missing: Vec<JobDescriptor> = spec
        .iter()
        .filter(|s| !existing.contains(s.job_name.as_str()))
        .cloned()
        .collect();
    missing.sort();
    missing
}

/// Existing jobs in this project's namespace that no spec job accounts for.
///
/// Jobs outside `projectKey-slug-continuous-` are never returned.
pub fn compute_obsolete(
    spec: &[JobDescriptor],
    project_key: &str,
    slug: &str,
    actual: &[JobSummary],
) -> Vec<JobSummary> {
    let wanted: BTreeSet<&str> = spec.iter().map(|s| s.job_name.as_str()).collect();
    let mut obsolete: Vec<JobSummary> = actual
        .iter()
        .filter(|j| in_namespace(&j.job_name, project_key, slug))
        .filter(|j| !wanted.contains(j.job_name.as_str()))
        .cloned()
        .collect();
    obsolete.sort_by(|a, b| a.job_name.cmp(&b.job_name));
    obsolete
}

pub fn should_create_release_job(project_key: &str, slug: &str, actual: &[JobSummary]) -> bool {
    let release = release_job_name(project_key, slug);
    !actual.iter().any(|j| j.job_name == release)
}

/// What one reconciliation of a (project, slug) intends to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub spec_jobs: Vec<JobDescriptor>,
    pub missing_jobs: Vec<JobDescriptor>,
    pub obsolete_jobs: Vec<JobSummary>,
    pub create_release_job: bool,
}

impl ReconciliationPlan {
    /// Build the plan against a job inventory.
    ///
    /// Obsolescence is decided on parsed summaries, whose recorded branch
    /// drives the after-delete work. Missing and release jobs are checked
    /// against every listed job name, so a job whose configuration could not
    /// be read is never created a second time.
    pub fn compute<'a, I>(
        project_key: &str,
        slug: &str,
        branches: I,
        policy: &BranchPolicy,
        inventory: &JobInventory,
    ) -> Self
    where
        I: IntoIterator<Item = &'a Branch>,
    {
        let spec_jobs = compute_spec_jobs(project_key, slug, branches, policy);
        let existing: BTreeSet<&str> = inventory.all_names.iter().map(String::as_str).collect();
        let missing_jobs = missing_by_name(&spec_jobs, &existing);
        let obsolete_jobs = compute_obsolete(&spec_jobs, project_key, slug, &inventory.summaries);
        let create_release_job = !existing.contains(release_job_name(project_key, slug).as_str());

        Self {
            spec_jobs,
            missing_jobs,
            obsolete_jobs,
            create_release_job,
        }
    }

    /// Spec jobs that already exist. Their post-create work is confirmed
    /// again each run, so provisioning that failed after the job was created
    /// is picked up by the next run.
    pub fn existing_jobs(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.spec_jobs
            .iter()
            .filter(|job| !self.missing_jobs.iter().any(|m| m.job_name == job.job_name))
    }

    pub fn is_noop(&self) -> bool {
        self.missing_jobs.is_empty() && self.obsolete_jobs.is_empty() && !self.create_release_job
    }
}
