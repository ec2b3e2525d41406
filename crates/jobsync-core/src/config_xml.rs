//! Reading Jenkins job `config.xml` documents.
//!
//! Only the fields reconciliation needs are extracted: the root element
//! (job type), the git remote URL and the built branch. A job must have
//! exactly one of each to be considered.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::job::{JobSummary, JobType};

/// Why a job configuration was not turned into a [`JobSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    /// Not well-formed XML.
    #[error("cannot parse job config: {0}")]
    Parse(String),

    /// A document type jobsync does not manage.
    #[error("unsupported job type <{0}>")]
    Unsupported(String),

    #[error("job {job_name} has {count} git remotes, expected exactly 1")]
    RemoteCount { job_name: String, count: usize },

    #[error("job {job_name} builds {count} branches, expected exactly 1")]
    BranchCount { job_name: String, count: usize },
}

impl SummaryError {
    /// Shape violations are worth a warning; the rest are simply not ours.
    pub fn is_shape_violation(&self) -> bool {
        matches!(
            self,
            SummaryError::RemoteCount { .. } | SummaryError::BranchCount { .. }
        )
    }
}

/// Name of the first element in an XML document.
pub fn root_element(xml: &str) -> Result<String, SummaryError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned())
            }
            Ok(Event::Eof) => return Err(SummaryError::Parse("document has no root element".into())),
            Ok(_) => {}
            Err(e) => return Err(SummaryError::Parse(e.to_string())),
        }
    }
}

// Element paths below the root, relative to <scm>.
const REMOTES: &str = "userRemoteConfigs";
const BRANCHES: &str = "branches";

/// Summarise a job's stored configuration.
pub fn summarize_job_config(job_name: &str, xml: &str) -> Result<JobSummary, SummaryError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut root: Option<String> = None;
    let mut remotes: Vec<String> = Vec::new();
    let mut branches: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SummaryError::Parse(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if root.is_none() {
                    root = Some(name.clone());
                }
                open_entry(&stack, &mut remotes, &mut branches);
                stack.push(name);
            }
            Event::Empty(e) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                }
                open_entry(&stack, &mut remotes, &mut branches);
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| SummaryError::Parse(e.to_string()))?
                    .into_owned();
                record_text(&stack, &text, &mut remotes, &mut branches);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                record_text(&stack, &text, &mut remotes, &mut branches);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let root = root.ok_or_else(|| SummaryError::Parse("document has no root element".into()))?;
    let job_type = JobType::from_root_element(&root);
    if job_type == JobType::Unknown {
        return Err(SummaryError::Unsupported(root));
    }

    if remotes.len() != 1 {
        return Err(SummaryError::RemoteCount {
            job_name: job_name.to_string(),
            count: remotes.len(),
        });
    }
    if branches.len() != 1 {
        return Err(SummaryError::BranchCount {
            job_name: job_name.to_string(),
            count: branches.len(),
        });
    }

    Ok(JobSummary {
        job_name: job_name.to_string(),
        git_url: remotes.remove(0),
        branch: branches.remove(0),
        job_type,
    })
}

/// `stack` is `[root, "scm", list]` when an entry of `list` opens.
fn open_entry(stack: &[String], remotes: &mut Vec<String>, branches: &mut Vec<String>) {
    if stack.len() != 3 || stack[1] != "scm" {
        return;
    }
    match stack[2].as_str() {
        REMOTES => remotes.push(String::new()),
        BRANCHES => branches.push(String::new()),
        _ => {}
    }
}

/// `stack` is `[root, "scm", list, entry, field]` for an entry's text.
fn record_text(stack: &[String], text: &str, remotes: &mut [String], branches: &mut [String]) {
    if stack.len() != 5 || stack[1] != "scm" {
        return;
    }
    let target = match (stack[2].as_str(), stack[4].as_str()) {
        (REMOTES, "url") => remotes.last_mut(),
        (BRANCHES, "name") => branches.last_mut(),
        _ => None,
    };
    if let Some(slot) = target {
        slot.push_str(text.trim());
    }
}
