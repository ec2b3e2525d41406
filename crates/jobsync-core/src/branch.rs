//! Branch management policy.
//!
//! Decides which SCM branches jobsync is responsible for: `develop`, plus
//! any branch under one of the configured prefixes (`feature/`, `hotfix/`, ...).

use serde::{Deserialize, Serialize};
use tracing::warn;

/// The integration branch, always managed.
pub const DEVELOP: &str = "develop";

/// Remote prefix Jenkins branch specs may carry.
pub const ORIGIN_PREFIX: &str = "origin/";

/// A source-control branch as reported by the SCM.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Branch {
    /// Display name, e.g. `feature/PROJ-123`.
    pub display_id: String,
}

impl Branch {
    pub fn new(display_id: impl Into<String>) -> Self {
        Self {
            display_id: display_id.into(),
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_id)
    }
}

/// Why a configured prefix candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixRejection {
    Empty,
    MissingTrailingSlash(String),
}

/// Remove exactly one leading `origin/`.
pub fn strip_leading_origin(name: &str) -> &str {
    name.strip_prefix(ORIGIN_PREFIX).unwrap_or(name)
}

/// Number of `/`-separated segments in a branch name.
pub fn branch_depth(name: &str) -> usize {
    name.split('/').count()
}

/// The set of managed branch prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchPolicy {
    prefixes: Vec<String>,
    rejected: Vec<PrefixRejection>,
}

impl BranchPolicy {
    /// Build from a comma-separated list such as `"feature/, hotfix/"`.
    ///
    /// Empty candidates and candidates without a trailing `/` are dropped
    /// with a warning. An empty result is legal: only `develop` stays managed.
    pub fn parse(config: &str) -> Self {
        Self::from_candidates(config.split(','))
    }

    pub fn from_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes = Vec::new();
        let mut rejected = Vec::new();

        for raw in candidates {
            let candidate = raw.as_ref().trim();
            if candidate.is_empty() {
                warn!("managed branch prefix candidate is empty, skipping");
                rejected.push(PrefixRejection::Empty);
                continue;
            }
            if !candidate.ends_with('/') {
                warn!(candidate, "managed branch prefix is missing trailing /, skipping");
                rejected.push(PrefixRejection::MissingTrailingSlash(candidate.to_string()));
                continue;
            }
            if !prefixes.iter().any(|p| p == candidate) {
                prefixes.push(candidate.to_string());
            }
        }

        if prefixes.is_empty() {
            warn!("no managed branch prefixes configured; only {DEVELOP} is managed");
        }

        Self { prefixes, rejected }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn rejected(&self) -> &[PrefixRejection] {
        &self.rejected
    }

    /// A feature branch sits under a managed prefix (after an optional
    /// `origin/`) and contains no `*`. Jenkins branch specs such as
    /// `origin/feature/*` are patterns, not branches.
    pub fn is_feature_branch(&self, name: &str) -> bool {
        if name.contains('*') {
            return false;
        }
        let bare = strip_leading_origin(name);
        self.prefixes.iter().any(|prefix| bare.starts_with(prefix.as_str()))
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.is_feature_branch(name) || strip_leading_origin(name) == DEVELOP
    }
}
