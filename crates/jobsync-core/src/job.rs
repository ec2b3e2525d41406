//! CI job records: what exists on the server and what should exist.

use serde::{Deserialize, Serialize};

use crate::branch::Branch;

/// Job flavour as reported by a stored job configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Maven,
    Freestyle,
    Unknown,
}

impl JobType {
    /// Map a config document's root element to a job type.
    pub fn from_root_element(root: &str) -> Self {
        match root {
            "maven2-moduleset" => JobType::Maven,
            "project" => JobType::Freestyle,
            _ => JobType::Unknown,
        }
    }

    /// The concrete kind jobsync can create, if any.
    pub fn kind(self) -> Option<JobKind> {
        match self {
            JobType::Maven => Some(JobKind::Maven),
            JobType::Freestyle => Some(JobKind::Freestyle),
            JobType::Unknown => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Maven => "maven",
            JobType::Freestyle => "freestyle",
            JobType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The job kinds jobsync creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Maven,
    Freestyle,
}

/// A job as listed by the CI server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub name: String,
    pub url: String,
}

/// The CI server's view of one existing job, read from its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_name: String,
    pub git_url: String,
    /// Branch as written in the job's branch spec, e.g. `origin/feature/1`.
    pub branch: String,
    pub job_type: JobType,
}

/// A job that should exist for a managed branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_name: String,
    pub branch: Branch,
}

/// Values substituted into a job template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobModel {
    pub job_name: String,
    pub description: String,
    pub branch_name: String,
    pub repository_url: String,
    /// Present for Maven jobs only.
    pub maven: Option<MavenCoordinates>,
}

/// Where a Maven job deploys its snapshot artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenCoordinates {
    pub snapshot_repository_url: String,
    pub repository_id: String,
}

impl JobModel {
    /// Look up a template field by its placeholder name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "JobName" => Some(&self.job_name),
            "Description" => Some(&self.description),
            "BranchName" => Some(&self.branch_name),
            "RepositoryURL" => Some(&self.repository_url),
            "MavenSnapshotRepositoryURL" => {
                self.maven.as_ref().map(|m| m.snapshot_repository_url.as_str())
            }
            "MavenRepositoryID" => self.maven.as_ref().map(|m| m.repository_id.as_str()),
            _ => None,
        }
    }
}

pub fn continuous_description(slug: &str, branch: &str) -> String {
    format!("This is a continuous build for {slug}, branch {branch}")
}

pub fn release_description(slug: &str) -> String {
    format!("This is a release build for {slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_from_root_element() {
        assert_eq!(JobType::from_root_element("maven2-moduleset"), JobType::Maven);
        assert_eq!(JobType::from_root_element("project"), JobType::Freestyle);
        assert_eq!(JobType::from_root_element("nope"), JobType::Unknown);
        assert_eq!(JobType::Unknown.kind(), None);
        assert_eq!(JobType::Maven.kind(), Some(JobKind::Maven));
    }

    #[test]
    fn test_model_fields() {
        let model = JobModel {
            job_name: "jobName".into(),
            description: "jobDescription".into(),
            branch_name: "feature/f".into(),
            repository_url: "ssh://git@example.com/dot.git".into(),
            maven: None,
        };
        assert_eq!(model.field("JobName"), Some("jobName"));
        assert_eq!(model.field("Description"), Some("jobDescription"));
        assert_eq!(model.field("BranchName"), Some("feature/f"));
        assert_eq!(model.field("RepositoryURL"), Some("ssh://git@example.com/dot.git"));
        assert_eq!(model.field("MavenRepositoryID"), None);
        assert_eq!(model.field("Nope"), None);
    }

    #[test]
    fn test_maven_model_fields() {
        let model = JobModel {
            job_name: "j".into(),
            description: "d".into(),
            branch_name: "feature/f".into(),
            repository_url: "u".into(),
            maven: Some(MavenCoordinates {
                snapshot_repository_url: "http://nexus/content/repositories/key.slug.feature_f"
                    .into(),
                repository_id: "key.slug.feature_f".into(),
            }),
        };
        assert_eq!(
            model.field("MavenSnapshotRepositoryURL"),
            Some("http://nexus/content/repositories/key.slug.feature_f")
        );
        assert_eq!(model.field("MavenRepositoryID"), Some("key.slug.feature_f"));
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            continuous_description("somelib", "feature/1"),
            "This is a continuous build for somelib, branch feature/1"
        );
        assert_eq!(release_description("somelib"), "This is a release build for somelib");
    }
}
