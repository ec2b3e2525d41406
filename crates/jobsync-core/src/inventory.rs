//! The CI server's existing jobs, fetched once per run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::JobConfigSource;
use crate::config_xml::summarize_job_config;
use crate::error::{RemoteError, RemoteResult};
use crate::job::JobSummary;
use crate::retry::RetryPolicy;

/// Existing jobs: parsed summaries plus every listed name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInventory {
    /// Jobs whose configuration jobsync understands.
    pub summaries: Vec<JobSummary>,
    /// Every job the source listed, summarised or not.
    pub all_names: BTreeSet<String>,
}

impl JobInventory {
    pub fn from_summaries(summaries: Vec<JobSummary>) -> Self {
        let all_names = summaries.iter().map(|s| s.job_name.clone()).collect();
        Self {
            summaries,
            all_names,
        }
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.all_names.contains(job_name)
    }
}

/// List every job and summarise its configuration.
///
/// Unreadable configurations and job types jobsync does not manage are
/// skipped quietly. Jobs with several remotes or branches are skipped with a
/// warning. Failing to list jobs at all is an error.
pub async fn collect_job_inventory(
    source: &dyn JobConfigSource,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> RemoteResult<JobInventory> {
    let jobs = retry
        .run_if(cancel, |_| source.list_jobs(), RemoteError::is_transient)
        .await?;

    let mut inventory = JobInventory::default();
    for job in jobs {
        inventory.all_names.insert(job.name.clone());

        let xml = match retry
            .run_if(cancel, |_| source.job_config_xml(&job.name), RemoteError::is_transient)
            .await
        {
            Ok(xml) => xml,
            Err(RemoteError::Cancelled(c)) => return Err(c.into()),
            Err(e) => {
                warn!(job = %job.name, error = %e, "cannot read job config, skipping");
                continue;
            }
        };

        match summarize_job_config(&job.name, &xml) {
            Ok(summary) => inventory.summaries.push(summary),
            Err(e) if e.is_shape_violation() => {
                warn!(job = %job.name, error = %e, "skipping job");
            }
            Err(e) => {
                debug!(job = %job.name, error = %e, "not a managed job");
            }
        }
    }

    inventory.summaries.sort_by(|a, b| a.job_name.cmp(&b.job_name));
    info!(
        listed = inventory.all_names.len(),
        summarised = inventory.summaries.len(),
        "collected job inventory"
    );
    Ok(inventory)
}
