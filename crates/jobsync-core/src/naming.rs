//! Branch to CI job name mapping.
//!
//! `feature/PROJ-123` in `proj/slug` becomes
//! `proj-slug-continuous-feature-PROJ-123`. The mapping back only promotes
//! the first hyphen of the suffix to a `/`, so it is exact for two-segment
//! branches and lossy for deeper ones.

use crate::branch::Branch;
use crate::error::NamingError;

/// Separator between a project's namespace and the branch part of a job name.
pub const CONTINUOUS_TOKEN: &str = "-continuous-";

/// Split a branch name into its base and the hyphenated remainder.
///
/// `develop` gives `("develop", "")`, `feature/12` gives `("feature", "-12")`
/// and `feature/a/b` gives `("feature", "-a-b")`.
pub fn suffix(branch_display_id: &str) -> (String, String) {
    match branch_display_id.split_once('/') {
        None => (branch_display_id.to_string(), String::new()),
        Some((base, rest)) => (base.to_string(), format!("-{}", rest.replace('/', "-"))),
    }
}

/// The job-name prefix every continuous job of `project_key/slug` carries.
pub fn job_namespace(project_key: &str, slug: &str) -> String {
    format!("{project_key}-{slug}{CONTINUOUS_TOKEN}")
}

pub fn in_namespace(job_name: &str, project_key: &str, slug: &str) -> bool {
    job_name.starts_with(&job_namespace(project_key, slug))
}

pub fn canonical_job_name(project_key: &str, slug: &str, branch: &Branch) -> String {
    let (base, suffix) = suffix(&branch.display_id);
    format!("{}{base}{suffix}", job_namespace(project_key, slug))
}

pub fn release_job_name(project_key: &str, slug: &str) -> String {
    format!("{project_key}-{slug}-release")
}

/// Recover the branch a continuous job was named after.
pub fn recover_branch(job_name: &str) -> Result<String, NamingError> {
    let parts: Vec<&str> = job_name.split(CONTINUOUS_TOKEN).collect();
    if parts.len() != 2 {
        return Err(NamingError::MalformedJobName {
            job_name: job_name.to_string(),
            parts: parts.len(),
        });
    }
    Ok(parts[1].replacen('-', "/", 1))
}
