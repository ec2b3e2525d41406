//! Runs a reconciliation against live collaborators.
//!
//! Per (project, slug): fetch the repository and its branches, compute the
//! plan, delete obsolete jobs, create missing jobs, confirm the repositories
//! of jobs that already exist, then create the release job if there is none.
//! Work is strictly sequential. A failing job is recorded in the report and
//! the run moves on to the next one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::artifact::{ArtifactLifecycle, NexusParams, ProvisionOutcome};
use crate::branch::{strip_leading_origin, BranchPolicy, DEVELOP};
use crate::collaborators::{ArtifactRepository, CiServer, Scm};
use crate::error::{Cancelled, LifecycleError, ReconcileError, RemoteError, RemoteResult};
use crate::inventory::{collect_job_inventory, JobInventory};
use crate::job::{continuous_description, release_description, JobDescriptor, JobSummary};
use crate::kind::ModelInput;
use crate::naming::{recover_branch, release_job_name};
use crate::reconcile::ReconciliationPlan;
use crate::report::{FailureStage, ReconcileReport, RunReport, TemplateFailure};
use crate::retry::RetryPolicy;
use crate::template::render;
use crate::template_source::Template;

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Budget for each collaborator request.
    pub request: RetryPolicy,
    /// Budget for waiting on a new artifact repository to appear.
    pub settle: RetryPolicy,
    /// Compute and log the plan without changing anything.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request: RetryPolicy::request(),
            settle: RetryPolicy::settle(),
            dry_run: false,
        }
    }
}

pub struct Reconciler {
    ci: Arc<dyn CiServer>,
    scm: Arc<dyn Scm>,
    lifecycle: ArtifactLifecycle,
    policy: BranchPolicy,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        ci: Arc<dyn CiServer>,
        scm: Arc<dyn Scm>,
        artifacts: Arc<dyn ArtifactRepository>,
        nexus: NexusParams,
        policy: BranchPolicy,
        options: SyncOptions,
        cancel: CancellationToken,
    ) -> Self {
        let lifecycle = ArtifactLifecycle::new(artifacts, nexus, policy.clone())
            .with_retry(options.request, options.settle)
            .with_cancellation(cancel.clone());
        Self {
            ci,
            scm,
            lifecycle,
            policy,
            options,
            cancel,
        }
    }

    pub fn lifecycle(&self) -> &ArtifactLifecycle {
        &self.lifecycle
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Inventory read from the CI server itself.
    pub async fn collect_inventory(&self) -> RemoteResult<JobInventory> {
        collect_job_inventory(self.ci.as_ref(), &self.options.request, &self.cancel).await
    }

    /// Reconcile every template in turn against one shared inventory.
    ///
    /// A template that fails as a whole is recorded and skipped. Cancellation
    /// stops the run after the current template.
    pub async fn reconcile_all(&self, templates: &[Template], inventory: &JobInventory) -> RunReport {
        let mut run = RunReport::start(self.options.dry_run);
        info!(run_id = %run.run_id, templates = templates.len(), dry_run = self.options.dry_run, "starting run");

        for template in templates {
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            match self.reconcile(template, inventory).await {
                Ok(report) => run.reports.push(report),
                Err(e) if e.is_cancelled() => {
                    warn!(project = %template.project_key, slug = %template.slug, "run cancelled");
                    run.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!(project = %template.project_key, slug = %template.slug, error = %e, "cannot reconcile");
                    run.template_failures.push(TemplateFailure {
                        project_key: template.project_key.clone(),
                        slug: template.slug.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        run.finish();
        info!(
            run_id = %run.run_id,
            created = run.jobs_created(),
            deleted = run.jobs_deleted(),
            item_failures = run.item_failures(),
            template_failures = run.template_failures.len(),
            cancelled = run.cancelled,
            "run finished"
        );
        run
    }

    /// Reconcile one (project, slug).
    #[instrument(
        name = "reconcile",
        skip(self, template, inventory),
        fields(project = %template.project_key, slug = %template.slug)
    )]
    pub async fn reconcile(
        &self,
        template: &Template,
        inventory: &JobInventory,
    ) -> Result<ReconcileReport, ReconcileError> {
        let project_key = template.project_key.as_str();
        let slug = template.slug.as_str();
        let scm_error = |source: RemoteError| match source {
            RemoteError::Cancelled(c) => ReconcileError::Cancelled(c),
            source => ReconcileError::Scm {
                project_key: project_key.to_string(),
                slug: slug.to_string(),
                source,
            },
        };

        let repository = self
            .request(|| self.scm.repository(project_key, slug))
            .await
            .map_err(scm_error)?;
        let ssh_url = repository.ssh_url.ok_or_else(|| ReconcileError::NoSshUrl {
            project_key: project_key.to_string(),
            slug: slug.to_string(),
        })?;
        let branches = self
            .request(|| self.scm.branches(project_key, slug))
            .await
            .map_err(scm_error)?;

        let plan = ReconciliationPlan::compute(project_key, slug, branches.values(), &self.policy, inventory);
        info!(
            branches = branches.len(),
            spec = plan.spec_jobs.len(),
            missing = plan.missing_jobs.len(),
            obsolete = plan.obsolete_jobs.len(),
            release = plan.create_release_job,
            "computed plan"
        );

        let mut report = ReconcileReport::new(project_key, slug);
        if self.options.dry_run {
            for job in &plan.obsolete_jobs {
                info!(job = %job.job_name, "dry run: would delete");
                report.planned_deletes.push(job.job_name.clone());
            }
            for job in &plan.missing_jobs {
                info!(job = %job.job_name, "dry run: would create");
                report.planned_creates.push(job.job_name.clone());
            }
            if plan.create_release_job && template.release.is_some() {
                let name = release_job_name(project_key, slug);
                info!(job = %name, "dry run: would create");
                report.planned_creates.push(name);
            }
            return Ok(report);
        }

        // Deletes strictly before creates.
        for job in &plan.obsolete_jobs {
            self.check_cancelled()?;
            self.delete_obsolete(template, job, &mut report).await?;
        }
        for job in &plan.missing_jobs {
            self.check_cancelled()?;
            self.create_missing(template, &ssh_url, job, &mut report).await?;
        }
        for job in plan.existing_jobs() {
            self.check_cancelled()?;
            self.confirm_existing(template, inventory, job, &mut report).await?;
        }
        if plan.create_release_job {
            self.check_cancelled()?;
            self.create_release(template, &ssh_url, &mut report).await?;
        }

        if report.is_clean() {
            info!(created = report.created.len(), deleted = report.deleted.len(), "reconciled");
        } else {
            warn!(
                created = report.created.len(),
                deleted = report.deleted.len(),
                failures = report.failures.len(),
                "reconciled with failures"
            );
        }
        Ok(report)
    }

    async fn delete_obsolete(
        &self,
        template: &Template,
        job: &JobSummary,
        report: &mut ReconcileReport,
    ) -> Result<(), Cancelled> {
        let name = job.job_name.as_str();
        // The branch recorded in the job's own config drives the side effects;
        // the name only maps back exactly for two-segment branches.
        let branch = strip_leading_origin(&job.branch);
        match recover_branch(name) {
            Ok(from_name) if from_name != branch => {
                debug!(job = %name, branch, from_name = %from_name, "job name does not map back to its branch");
            }
            Ok(_) => {}
            Err(e) => debug!(job = %name, error = %e, "job name does not map back to a branch"),
        }

        if let Err(e) = self.request(|| self.ci.delete_job(name)).await {
            cancelled_or(&e)?;
            error!(job = %name, error = %e, "failed to delete obsolete job, continuing");
            report.fail(name, branch, FailureStage::DeleteJob, e);
            return Ok(());
        }
        info!(job = %name, branch, "deleted obsolete job");
        report.deleted.push(name.to_string());

        let kind = job.job_type.kind().unwrap_or(template.kind);
        match kind
            .after_delete(&self.lifecycle, &template.project_key, &template.slug, branch)
            .await
        {
            Ok(Some(outcome)) => report.deprovisioned.push(outcome),
            Ok(None) => {}
            Err(LifecycleError::Cancelled(c)) => return Err(c),
            Err(e) => {
                error!(job = %name, branch, error = %e, "post-delete task failed");
                report.fail(name, branch, FailureStage::AfterDelete, e);
            }
        }
        Ok(())
    }

    async fn create_missing(
        &self,
        template: &Template,
        ssh_url: &str,
        job: &JobDescriptor,
        report: &mut ReconcileReport,
    ) -> Result<(), Cancelled> {
        let name = job.job_name.as_str();
        let branch = job.branch.display_id.as_str();
        let description = continuous_description(&template.slug, branch);
        let model = template.kind.build_model(
            &self.lifecycle,
            &ModelInput {
                project_key: &template.project_key,
                slug: &template.slug,
                job_name: name,
                description: &description,
                repository_url: ssh_url,
                branch,
            },
        );

        let config = match render(&template.continuous, &model) {
            Ok(config) => config,
            Err(e) => {
                error!(job = %name, error = %e, "cannot render job template, skipping job");
                report.fail(name, branch, FailureStage::Render, e);
                return Ok(());
            }
        };

        if let Err(e) = self.request(|| self.ci.create_job(name, &config)).await {
            cancelled_or(&e)?;
            error!(job = %name, error = %e, "failed to create job, continuing");
            report.fail(name, branch, FailureStage::CreateJob, e);
            return Ok(());
        }
        info!(job = %name, branch, "created job");
        report.created.push(name.to_string());

        match template
            .kind
            .after_create(&self.lifecycle, &template.project_key, &template.slug, branch)
            .await
        {
            Ok(Some(outcome)) => report.provisioned.push(outcome),
            Ok(None) => {}
            Err(LifecycleError::Cancelled(c)) => return Err(c),
            Err(e) => {
                // The job exists; the next run confirms its repository again.
                error!(job = %name, branch, error = %e, "post-create task failed");
                report.fail(name, branch, FailureStage::AfterCreate, e);
            }
        }
        Ok(())
    }

    /// Re-run the post-create work of a job that already exists.
    ///
    /// Once the repository is visible and in the group this only reads.
    /// Anything it had to repair is reported as provisioned.
    async fn confirm_existing(
        &self,
        template: &Template,
        inventory: &JobInventory,
        job: &JobDescriptor,
        report: &mut ReconcileReport,
    ) -> Result<(), Cancelled> {
        let name = job.job_name.as_str();
        let branch = job.branch.display_id.as_str();
        let kind = inventory
            .summaries
            .iter()
            .find(|s| s.job_name == name)
            .and_then(|s| s.job_type.kind())
            .unwrap_or(template.kind);

        match kind
            .after_create(&self.lifecycle, &template.project_key, &template.slug, branch)
            .await
        {
            Ok(Some(outcome @ ProvisionOutcome::Provisioned { created, joined_group, .. }))
                if created || joined_group =>
            {
                info!(job = %name, branch, created, joined_group, "repaired repository of existing job");
                report.provisioned.push(outcome);
            }
            Ok(_) => debug!(job = %name, branch, "existing job is provisioned"),
            Err(LifecycleError::Cancelled(c)) => return Err(c),
            Err(e) => {
                error!(job = %name, branch, error = %e, "post-create task failed for existing job");
                report.fail(name, branch, FailureStage::AfterCreate, e);
            }
        }
        Ok(())
    }

    async fn create_release(
        &self,
        template: &Template,
        ssh_url: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), Cancelled> {
        let Some(release) = template.release.as_deref() else {
            debug!("no release template");
            return Ok(());
        };
        let name = release_job_name(&template.project_key, &template.slug);
        let description = release_description(&template.slug);
        let model = template.kind.build_model(
            &self.lifecycle,
            &ModelInput {
                project_key: &template.project_key,
                slug: &template.slug,
                job_name: &name,
                description: &description,
                repository_url: ssh_url,
                branch: DEVELOP,
            },
        );

        let config = match render(release, &model) {
            Ok(config) => config,
            Err(e) => {
                error!(job = %name, error = %e, "cannot render release template");
                report.fail(&name, DEVELOP, FailureStage::ReleaseJob, e);
                return Ok(());
            }
        };
        if let Err(e) = self.request(|| self.ci.create_job(&name, &config)).await {
            cancelled_or(&e)?;
            error!(job = %name, error = %e, "failed to create release job");
            report.fail(&name, DEVELOP, FailureStage::ReleaseJob, e);
            return Ok(());
        }
        info!(job = %name, "created release job");
        report.release_created = true;
        Ok(())
    }

    async fn request<T, F, Fut>(&self, mut call: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = RemoteResult<T>>,
    {
        self.options
            .request
            .run_if(&self.cancel, |_| call(), RemoteError::is_transient)
            .await
    }

    fn check_cancelled(&self) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

fn cancelled_or(err: &RemoteError) -> Result<(), Cancelled> {
    match err {
        RemoteError::Cancelled(c) => Err(*c),
        _ => Ok(()),
    }
}
