//! jobsync - keep per-branch Jenkins jobs and Nexus snapshot repositories
//! in step with a Bitbucket Server repository's managed branches.
//!
//! One run: fetch the job templates, read the CI server's existing jobs
//! once, then reconcile every `projectKey/slug` template against the
//! repository's current branches. Nothing is persisted between runs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use jobsync_core::telemetry::{init_tracing, level_for};
use jobsync_core::{
    collect_job_inventory, discover_templates, fetch_templates, BranchPolicy, GroupId, NexusParams,
    Reconciler, RemoteError, RetryPolicy, RunReport, SyncOptions, Template,
};
use jobsync_remote::{FsJobSource, JenkinsClient, NexusClient, StashClient, WebClientParams};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

/// Exit status of a run stopped by Ctrl-C or the deadline.
const EXIT_CANCELLED: u8 = 130;
const EXIT_UNREACHABLE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "jobsync")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reconcile per-branch Jenkins jobs and Nexus repositories", long_about = None)]
struct Cli {
    /// Bitbucket Server base URL
    #[arg(long, env = "JOBSYNC_SCM_URL")]
    scm_url: Option<String>,

    /// Jenkins base URL
    #[arg(long, env = "JOBSYNC_CI_URL")]
    ci_url: Option<String>,

    /// User for Bitbucket Server and Jenkins
    #[arg(long, env = "JOBSYNC_USERNAME")]
    username: Option<String>,

    /// Password for Bitbucket Server and Jenkins
    #[arg(long, env = "JOBSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Nexus base URL, e.g. http://nexus.example.com/nexus
    #[arg(long, env = "JOBSYNC_NEXUS_URL")]
    nexus_url: Option<String>,

    #[arg(long, env = "JOBSYNC_NEXUS_USERNAME")]
    nexus_username: Option<String>,

    #[arg(long, env = "JOBSYNC_NEXUS_PASSWORD", hide_env_values = true)]
    nexus_password: Option<String>,

    /// Repository group that collects the per-branch repositories
    #[arg(long, env = "JOBSYNC_NEXUS_GROUP_ID")]
    nexus_group_id: Option<String>,

    /// Comma-separated branch prefixes to manage, each ending in `/`
    #[arg(long, env = "JOBSYNC_MANAGED_BRANCH_PREFIXES", default_value = "feature/")]
    managed_branch_prefixes: String,

    /// Git repository holding the job templates
    #[arg(long, env = "JOBSYNC_TEMPLATE_REPOSITORY_URL")]
    template_repository_url: Option<String>,

    #[arg(long, env = "JOBSYNC_TEMPLATE_REPOSITORY_BRANCH", default_value = "master")]
    template_repository_branch: String,

    /// Use an existing template tree instead of cloning
    #[arg(long, env = "JOBSYNC_TEMPLATE_DIR", conflicts_with = "template_repository_url")]
    template_dir: Option<PathBuf>,

    /// Read existing jobs from the Jenkins master's jobs directory instead of the API
    #[arg(long, env = "JOBSYNC_JENKINS_JOBS_DIRECTORY")]
    jenkins_jobs_directory: Option<PathBuf>,

    /// Only reconcile templates of this project
    #[arg(long, env = "JOBSYNC_PROJECT_KEY")]
    project_key: Option<String>,

    /// Only reconcile templates of this repository slug
    #[arg(long, env = "JOBSYNC_SLUG")]
    slug: Option<String>,

    /// Attempts per remote request
    #[arg(long, env = "JOBSYNC_RETRY_ATTEMPTS", default_value_t = RetryPolicy::request().max_attempts)]
    retry_attempts: u32,

    #[arg(long, env = "JOBSYNC_RETRY_DELAY_MS", default_value_t = RetryPolicy::request().initial_delay_ms)]
    retry_delay_ms: u64,

    /// Polls while waiting for a new Nexus repository to appear
    #[arg(long, env = "JOBSYNC_SETTLE_ATTEMPTS", default_value_t = RetryPolicy::settle().max_attempts)]
    settle_attempts: u32,

    #[arg(long, env = "JOBSYNC_SETTLE_DELAY_MS", default_value_t = RetryPolicy::settle().initial_delay_ms)]
    settle_delay_ms: u64,

    /// Stop the run after this many seconds
    #[arg(long, env = "JOBSYNC_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Log the plan without changing anything
    #[arg(long, env = "JOBSYNC_DRY_RUN")]
    dry_run: bool,

    /// Write the run report as JSON to this file (`-` for stdout)
    #[arg(long, env = "JOBSYNC_REPORT")]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

/// Where the job templates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSource {
    Local(PathBuf),
    Git { url: String, branch: String },
}

/// Validated settings for one run.
#[derive(Debug)]
struct Settings {
    scm: WebClientParams,
    ci: WebClientParams,
    nexus: WebClientParams,
    nexus_params: NexusParams,
    policy: BranchPolicy,
    templates: TemplateSource,
    jobs_directory: Option<PathBuf>,
    project_key: Option<String>,
    slug: Option<String>,
    options: SyncOptions,
    deadline: Option<Duration>,
    report: Option<PathBuf>,
}

fn required(value: Option<String>, flag: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("--{flag} is required"),
    }
}

fn base_url(value: Option<String>, flag: &str) -> Result<String> {
    let value = required(value, flag)?;
    let url = Url::parse(&value).with_context(|| format!("--{flag} is not a valid URL: {value}"))?;
    ensure!(!url.cannot_be_a_base(), "--{flag} cannot be a base URL: {value}");
    Ok(value)
}

impl Cli {
    fn validate(self) -> Result<Settings> {
        let scm_url = base_url(self.scm_url, "scm-url")?;
        let ci_url = base_url(self.ci_url, "ci-url")?;
        let nexus_url = base_url(self.nexus_url, "nexus-url")?;
        let username = required(self.username, "username")?;
        let password = required(self.password, "password")?;
        let nexus_username = required(self.nexus_username, "nexus-username")?;
        let nexus_password = required(self.nexus_password, "nexus-password")?;
        let group_id = required(self.nexus_group_id, "nexus-group-id")?;

        let templates = match (self.template_dir, self.template_repository_url) {
            (Some(dir), _) => TemplateSource::Local(dir),
            (None, Some(url)) if !url.trim().is_empty() => TemplateSource::Git {
                url,
                branch: self.template_repository_branch,
            },
            _ => bail!("one of --template-repository-url or --template-dir is required"),
        };

        if let Some(dir) = &self.jenkins_jobs_directory {
            ensure!(
                dir.is_absolute(),
                "--jenkins-jobs-directory must be an absolute path: {}",
                dir.display()
            );
        }
        ensure!(self.retry_attempts > 0, "--retry-attempts must be at least 1");
        ensure!(self.settle_attempts > 0, "--settle-attempts must be at least 1");

        Ok(Settings {
            scm: WebClientParams::new(&scm_url, &username, &password),
            ci: WebClientParams::new(&ci_url, &username, &password),
            nexus: WebClientParams::new(&nexus_url, &nexus_username, &nexus_password),
            nexus_params: NexusParams {
                base_url: nexus_url,
                group_id: GroupId::new(group_id),
            },
            policy: BranchPolicy::parse(&self.managed_branch_prefixes),
            templates,
            jobs_directory: self.jenkins_jobs_directory,
            project_key: self.project_key,
            slug: self.slug,
            options: SyncOptions {
                request: RetryPolicy::new(self.retry_attempts, self.retry_delay_ms),
                settle: RetryPolicy::new(self.settle_attempts, self.settle_delay_ms),
                dry_run: self.dry_run,
            },
            deadline: self.deadline_secs.map(Duration::from_secs),
            report: self.report,
        })
    }
}

/// Keep only the templates selected by `--project-key` and `--slug`.
fn select_templates(templates: &mut Vec<Template>, project_key: Option<&str>, slug: Option<&str>) {
    if let Some(key) = project_key {
        templates.retain(|t| t.project_key == key);
    }
    if let Some(slug) = slug {
        let slug = slug.to_lowercase();
        templates.retain(|t| t.slug == slug);
    }
}

/// Cancel on Ctrl-C and, if set, once the deadline passes.
fn watch_for_cancellation(cancel: &CancellationToken, deadline: Option<Duration>) {
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current step");
            token.cancel();
        }
    });
    if let Some(deadline) = deadline {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    warn!(deadline_secs = deadline.as_secs(), "deadline reached, stopping");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

async fn load_templates(source: &TemplateSource, checkout: &Path) -> Result<Vec<Template>> {
    let root = match source {
        TemplateSource::Local(dir) => dir.clone(),
        TemplateSource::Git { url, branch } => {
            let (url, branch, dir) = (url.clone(), branch.clone(), checkout.to_path_buf());
            tokio::task::spawn_blocking(move || fetch_templates(&url, &branch, &dir))
                .await
                .context("template fetch task failed")?
                .context("cannot fetch job templates")?;
            checkout.to_path_buf()
        }
    };
    discover_templates(&root).with_context(|| format!("cannot read templates under {}", root.display()))
}

async fn run(settings: Settings, cancel: CancellationToken) -> Result<RunReport> {
    let checkout = tempfile::tempdir().context("cannot create template checkout directory")?;
    let mut templates = load_templates(&settings.templates, checkout.path()).await?;
    select_templates(
        &mut templates,
        settings.project_key.as_deref(),
        settings.slug.as_deref(),
    );
    if templates.is_empty() {
        warn!("no templates to reconcile");
    }
    info!(templates = templates.len(), "loaded job templates");

    let jenkins = JenkinsClient::new(&settings.ci).context("cannot set up CI server client")?;
    let stash = StashClient::new(&settings.scm).context("cannot set up SCM client")?;
    let nexus = NexusClient::new(&settings.nexus).context("cannot set up Nexus client")?;
    let reconciler = Reconciler::new(
        Arc::new(jenkins),
        Arc::new(stash),
        Arc::new(nexus),
        settings.nexus_params,
        settings.policy,
        settings.options.clone(),
        cancel.clone(),
    );

    let inventory = match &settings.jobs_directory {
        Some(dir) => {
            info!(dir = %dir.display(), "reading existing jobs from disk");
            collect_job_inventory(&FsJobSource::new(dir), &settings.options.request, &cancel).await
        }
        None => reconciler.collect_inventory().await,
    };
    let inventory = match inventory {
        Ok(inventory) => inventory,
        Err(RemoteError::Cancelled(_)) => {
            let mut report = RunReport::start(settings.options.dry_run);
            report.cancelled = true;
            report.finish();
            return Ok(report);
        }
        Err(e) => return Err(e).context("cannot list existing jobs"),
    };

    Ok(reconciler.reconcile_all(&templates, &inventory).await)
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    if path == Path::new("-") {
        println!("{json}");
    } else {
        std::fs::write(path, json)
            .with_context(|| format!("cannot write report to {}", path.display()))?;
    }
    Ok(())
}

/// Partial failures are logged and reported but do not fail the run. A run
/// where every template failed as a whole reached nothing and does.
fn exit_status(report: &RunReport) -> u8 {
    if report.cancelled {
        EXIT_CANCELLED
    } else if report.reports.is_empty() && !report.template_failures.is_empty() {
        EXIT_UNREACHABLE
    } else {
        0
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for(cli.verbose));

    let settings = cli.validate()?;
    let report_path = settings.report.clone();
    let cancel = CancellationToken::new();
    watch_for_cancellation(&cancel, settings.deadline);

    let report = match run(settings, cancel).await {
        Ok(report) => report,
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "run failed");
            return Err(e);
        }
    };
    if report.item_failures() > 0 || !report.template_failures.is_empty() {
        warn!(
            item_failures = report.item_failures(),
            template_failures = report.template_failures.len(),
            "run finished with partial failures, the next run retries them"
        );
    }
    if let Some(path) = report_path {
        write_report(&report, &path)?;
    }
    Ok(ExitCode::from(exit_status(&report)))
}
