//! Run outcome reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{DeleteOutcome, ProvisionOutcome};

/// Where a per-item failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    DeleteJob,
    AfterDelete,
    Render,
    CreateJob,
    AfterCreate,
    ReleaseJob,
}

/// A job or branch that could not be processed. The run carried on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub job_name: String,
    pub branch: String,
    pub stage: FailureStage,
    pub error: String,
}

/// What reconciling one (project, slug) did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub project_key: String,
    pub slug: String,
    pub deleted: Vec<String>,
    pub created: Vec<String>,
    pub release_created: bool,
    pub provisioned: Vec<ProvisionOutcome>,
    pub deprovisioned: Vec<DeleteOutcome>,
    /// Jobs that would have been deleted and created, when dry-running.
    pub planned_deletes: Vec<String>,
    pub planned_creates: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
    pub fn new(project_key: &str, slug: &str) -> Self {
        Self {
            project_key: project_key.to_string(),
            slug: slug.to_string(),
            ..Self::default()
        }
    }

    pub fn fail(&mut self, job_name: &str, branch: &str, stage: FailureStage, error: impl ToString) {
        self.failures.push(ItemFailure {
            job_name: job_name.to_string(),
            branch: branch.to_string(),
            stage,
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A (project, slug) whose reconciliation could not start or was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFailure {
    pub project_key: String,
    pub slug: String,
    pub error: String,
}

/// Outcome of a whole run over every template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub reports: Vec<ReconcileReport>,
    pub template_failures: Vec<TemplateFailure>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn start(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            reports: Vec::new(),
            template_failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn item_failures(&self) -> usize {
        self.reports.iter().map(|r| r.failures.len()).sum()
    }

    pub fn jobs_created(&self) -> usize {
        self.reports
            .iter()
            .map(|r| r.created.len() + usize::from(r.release_created))
            .sum()
    }

    pub fn jobs_deleted(&self) -> usize {
        self.reports.iter().map(|r| r.deleted.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut run = RunReport::start(false);
        let mut a = ReconcileReport::new("p", "a");
        a.created.push("p-a-continuous-develop".into());
        a.release_created = true;
        a.fail("p-a-continuous-feature-1", "feature/1", FailureStage::Render, "bad template");
        let mut b = ReconcileReport::new("p", "b");
        b.deleted.push("p-b-continuous-feature-2".into());
        run.reports.push(a);
        run.reports.push(b);
        run.finish();

        assert_eq!(run.jobs_created(), 2);
        assert_eq!(run.jobs_deleted(), 1);
        assert_eq!(run.item_failures(), 1);
        assert!(run.finished_at.is_some());
        assert!(!run.reports[0].is_clean());
    }

    #[test]
    fn test_report_serializes_stage_names() {
        let mut report = ReconcileReport::new("p", "s");
        report.fail("j", "feature/1", FailureStage::AfterCreate, "repository did not settle");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["stage"], "after_create");
    }
}
