//! Job template discovery.
//!
//! A template tree holds one directory per SCM repository:
//!
//! ```text
//! <root>/<projectKey>/<slug>/continuous-template.xml
//! <root>/<projectKey>/<slug>/release-template.xml
//! ```
//!
//! The tree is usually a clone of a git repository, fetched with the
//! system `git`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config_xml::root_element;
use crate::error::TemplateError;
use crate::job::{JobKind, JobType};

pub const CONTINUOUS_TEMPLATE: &str = "continuous-template.xml";
pub const RELEASE_TEMPLATE: &str = "release-template.xml";

/// Templates for one (project, slug).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub project_key: String,
    pub slug: String,
    pub kind: JobKind,
    pub continuous: String,
    /// Absent when the pair has no release template.
    pub release: Option<String>,
}

/// `(project_key, slug, file name)` of a template path relative to the root.
pub fn project_coordinates(relative: &Path) -> Result<(String, String, String), TemplateError> {
    let layout_error = || TemplateError::Layout {
        path: relative.display().to_string(),
    };
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    if parts.len() != 3 || !parts[2].ends_with(".xml") {
        return Err(layout_error());
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_lowercase(),
        parts[2].to_string(),
    ))
}

/// Collect every template pair under `root`.
///
/// Files in unexpected places, unreadable files and unsupported job
/// documents are skipped with a warning.
pub fn discover_templates(root: &Path) -> Result<Vec<Template>, TemplateError> {
    let mut files = Vec::new();
    walk(root, &mut files)?;

    #[derive(Default)]
    struct Pair {
        continuous: Option<String>,
        release: Option<String>,
    }
    let mut pairs: BTreeMap<(String, String), Pair> = BTreeMap::new();

    for file in files {
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name != CONTINUOUS_TEMPLATE && name != RELEASE_TEMPLATE {
            continue;
        }
        let relative = file.strip_prefix(root).unwrap_or(&file);
        let (project_key, slug, file_name) = match project_coordinates(relative) {
            Ok(coords) => coords,
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "skipping template");
                continue;
            }
        };
        let body = match std::fs::read_to_string(&file) {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "cannot read template, skipping");
                continue;
            }
        };
        let pair = pairs.entry((project_key, slug)).or_default();
        if file_name == CONTINUOUS_TEMPLATE {
            pair.continuous = Some(body);
        } else {
            pair.release = Some(body);
        }
    }

    let mut templates = Vec::new();
    for ((project_key, slug), pair) in pairs {
        let Some(continuous) = pair.continuous else {
            warn!(project = %project_key, slug = %slug, "no {CONTINUOUS_TEMPLATE}, skipping");
            continue;
        };
        let kind = match template_kind(&continuous) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(project = %project_key, slug = %slug, error = %e, "skipping template");
                continue;
            }
        };
        debug!(project = %project_key, slug = %slug, ?kind, "found template");
        templates.push(Template {
            project_key,
            slug,
            kind,
            continuous,
            release: pair.release,
        });
    }
    Ok(templates)
}

/// Job kind of a template, from its root element.
pub fn template_kind(document: &str) -> Result<JobKind, TemplateError> {
    let root = root_element(document).map_err(|e| TemplateError::Xml(e.to_string()))?;
    JobType::from_root_element(&root)
        .kind()
        .ok_or(TemplateError::UnsupportedDocument { root })
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), TemplateError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            walk(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Clone `repository_url` at `branch` into `dir`, or pull if already cloned.
pub fn fetch_templates(repository_url: &str, branch: &str, dir: &Path) -> Result<(), TemplateError> {
    if dir.join(".git").is_dir() {
        info!(dir = %dir.display(), "pulling job templates");
        run_git(Some(dir), &["pull"])
    } else {
        info!(url = %repository_url, branch, "cloning job templates");
        let dir_arg = dir.to_string_lossy();
        run_git(
            None,
            &["clone", "--quiet", "--branch", branch, repository_url, &dir_arg],
        )
    }
}

fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<(), TemplateError> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .map_err(|e| TemplateError::Git(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TemplateError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    const MAVEN: &str = "<?xml version='1.0' encoding='UTF-8'?>\n<maven2-moduleset plugin=\"maven-plugin@2.7.1\"><description>{{.Description}}</description></maven2-moduleset>";
    const FREESTYLE: &str = "<?xml version='1.0' encoding='UTF-8'?>\n<project><description>{{.Description}}</description></project>";
    const UNKNOWN: &str = "<?xml version='1.0' encoding='UTF-8'?>\n<nope/>";

    fn write(root: &Path, relative: &str, body: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_project_coordinates() {
        let (p, s, f) = project_coordinates(Path::new("a/B/c.xml")).unwrap();
        assert_eq!((p.as_str(), s.as_str(), f.as_str()), ("a", "b", "c.xml"));

        let (p, s, _) = project_coordinates(Path::new("/a/B/c.xml")).unwrap();
        assert_eq!((p.as_str(), s.as_str()), ("a", "b"));

        assert!(project_coordinates(Path::new("/a/b")).is_err());
        assert!(project_coordinates(Path::new("/a/b/c")).is_err());
        assert!(project_coordinates(Path::new("a/b/c/d.xml")).is_err());
    }

    #[test]
    fn test_template_kind() {
        assert_eq!(template_kind(MAVEN).unwrap(), JobKind::Maven);
        assert_eq!(template_kind(FREESTYLE).unwrap(), JobKind::Freestyle);
        assert!(matches!(
            template_kind(UNKNOWN),
            Err(TemplateError::UnsupportedDocument { root }) if root == "nope"
        ));
    }

    #[test]
    fn test_discover_templates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "playg1/microservice/continuous-template.xml", MAVEN);
        write(root, "playg1/microservice/release-template.xml", MAVEN);
        write(root, "playg2/Android/continuous-template.xml", FREESTYLE);
        write(root, "playg3/broken/continuous-template.xml", UNKNOWN);
        write(root, "playg4/orphan/release-template.xml", MAVEN);
        write(root, "too/deep/here/continuous-template.xml", MAVEN);
        write(root, "README.md", "templates");

        let templates = discover_templates(root).unwrap();
        assert_eq!(templates.len(), 2);

        let micro = &templates[0];
        assert_eq!(micro.project_key, "playg1");
        assert_eq!(micro.slug, "microservice");
        assert_eq!(micro.kind, JobKind::Maven);
        assert!(micro.release.is_some());

        let android = &templates[1];
        assert_eq!(android.project_key, "playg2");
        assert_eq!(android.slug, "android");
        assert_eq!(android.kind, JobKind::Freestyle);
        assert!(android.release.is_none());
    }

    #[test]
    fn test_discover_missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_templates(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, TemplateError::Io(_)));
    }

    fn git(dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[test]
    fn test_fetch_clones_then_pulls() {
        let source = tempfile::tempdir().unwrap();
        git(source.path(), &["init", "--quiet", "--initial-branch", "master"]);
        git(source.path(), &["config", "user.name", "test-user"]);
        git(source.path(), &["config", "user.email", "test@example.com"]);
        write(source.path(), "playg1/microservice/continuous-template.xml", MAVEN);
        git(source.path(), &["add", "."]);
        git(source.path(), &["commit", "--quiet", "-m", "templates"]);

        let clone_parent = tempfile::tempdir().unwrap();
        let clone = clone_parent.path().join("templates");
        let url = format!("file://{}", source.path().display());

        fetch_templates(&url, "master", &clone).unwrap();
        assert_eq!(discover_templates(&clone).unwrap().len(), 1);

        write(source.path(), "playg2/android/continuous-template.xml", FREESTYLE);
        git(source.path(), &["add", "."]);
        git(source.path(), &["commit", "--quiet", "-m", "more templates"]);

        fetch_templates(&url, "master", &clone).unwrap();
        assert_eq!(discover_templates(&clone).unwrap().len(), 2);
    }

    #[test]
    fn test_fetch_unknown_branch_fails() {
        let source = tempfile::tempdir().unwrap();
        git(source.path(), &["init", "--quiet"]);
        let clone_parent = tempfile::tempdir().unwrap();
        let err = fetch_templates(
            &format!("file://{}", source.path().display()),
            "no-such-branch",
            &clone_parent.path().join("t"),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::Git(_)));
    }
}
