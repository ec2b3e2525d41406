//! Bitbucket Server (Stash) REST API 1.0 binding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use jobsync_core::{Branch, RemoteResult, Repository, Scm};
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::http::{Response, ServiceClient, WebClientParams};

const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct RepositoryBody {
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    clone: Vec<CloneLink>,
}

#[derive(Debug, Deserialize)]
struct CloneLink {
    href: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchPage {
    #[serde(default)]
    values: Vec<BranchEntry>,
    #[serde(default = "last_page")]
    is_last_page: bool,
    next_page_start: Option<u32>,
}

fn last_page() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchEntry {
    display_id: String,
}

#[derive(Debug, Clone)]
pub struct StashClient {
    client: ServiceClient,
}

impl StashClient {
    pub fn new(params: &WebClientParams) -> RemoteResult<Self> {
        Ok(Self {
            client: ServiceClient::new(params)?,
        })
    }

    async fn get(&self, url: url::Url) -> RemoteResult<Response> {
        let response = self
            .client
            .send(
                self.client
                    .request(Method::GET, url)
                    .header(header::ACCEPT, "application/json"),
            )
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.unexpected(&Method::GET));
        }
        Ok(response)
    }
}

#[async_trait]
impl Scm for StashClient {
    async fn repository(&self, project_key: &str, slug: &str) -> RemoteResult<Repository> {
        let url = self
            .client
            .endpoint(&["rest", "api", "1.0", "projects", project_key, "repos", slug])?;
        let body: RepositoryBody = self.get(url).await?.json()?;
        let ssh_url = body
            .links
            .clone
            .into_iter()
            .find(|link| link.name == "ssh")
            .map(|link| link.href);
        Ok(Repository {
            project_key: project_key.to_string(),
            slug: slug.to_string(),
            ssh_url,
        })
    }

    async fn branches(&self, project_key: &str, slug: &str) -> RemoteResult<BTreeMap<String, Branch>> {
        let mut branches = BTreeMap::new();
        let mut start = 0;
        loop {
            let mut url = self.client.endpoint(&[
                "rest", "api", "1.0", "projects", project_key, "repos", slug, "branches",
            ])?;
            url.query_pairs_mut()
                .append_pair("start", &start.to_string())
                .append_pair("limit", &PAGE_LIMIT.to_string());

            let page: BranchPage = self.get(url).await?.json()?;
            debug!(project = project_key, slug, start, count = page.values.len(), "branch page");
            for entry in page.values {
                branches.insert(entry.display_id.clone(), Branch::new(entry.display_id));
            }
            match (page.is_last_page, page.next_page_start) {
                (false, Some(next)) if next > start => start = next,
                _ => break,
            }
        }
        Ok(branches)
    }
}
