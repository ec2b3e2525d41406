//! Jenkins remote API binding.

use async_trait::async_trait;
use jobsync_core::{CiServer, JobConfigSource, JobRef, RemoteResult};
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::http::{ServiceClient, WebClientParams};

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    name: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Clone)]
pub struct JenkinsClient {
    client: ServiceClient,
}

impl JenkinsClient {
    pub fn new(params: &WebClientParams) -> RemoteResult<Self> {
        Ok(Self {
            client: ServiceClient::new(params)?,
        })
    }
}

#[async_trait]
impl JobConfigSource for JenkinsClient {
    async fn list_jobs(&self) -> RemoteResult<Vec<JobRef>> {
        let mut url = self.client.endpoint(&["api", "json"])?;
        url.query_pairs_mut().append_pair("tree", "jobs[name,url]");
        debug!(%url, "listing jobs");

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
        let list: JobList = response.json()?;
        Ok(list
            .jobs
            .into_iter()
            .map(|j| JobRef {
                name: j.name,
                url: j.url,
            })
            .collect())
    }

    async fn job_config_xml(&self, job_name: &str) -> RemoteResult<String> {
        let url = self.client.endpoint(&["job", job_name, "config.xml"])?;
        let response = self
            .client
            .send(
                self.client
                    .request(Method::GET, url)
                    .header(header::ACCEPT, "application/xml"),
            )
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.unexpected(&Method::GET));
        }
        Ok(response.body)
    }
}

#[async_trait]
impl CiServer for JenkinsClient {
    async fn create_job(&self, job_name: &str, config_xml: &str) -> RemoteResult<()> {
        let mut url = self.client.endpoint(&["createItem"])?;
        url.query_pairs_mut().append_pair("name", job_name);
        debug!(job = job_name, "creating job");

        let response = self
            .client
            .send(
                self.client
                    .request(Method::POST, url)
                    .header(header::CONTENT_TYPE, "application/xml")
                    .body(config_xml.to_string()),
            )
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.unexpected(&Method::POST));
        }
        Ok(())
    }

    /// Jenkins answers a successful delete with a redirect. A job that is
    /// already gone counts as deleted.
    async fn delete_job(&self, job_name: &str) -> RemoteResult<()> {
        let url = self.client.endpoint(&["job", job_name, "doDelete"])?;
        debug!(job = job_name, "deleting job");

        let response = self
            .client
            .send(self.client.request(Method::POST, url).body(""))
            .await?;
        match response.status {
            StatusCode::FOUND | StatusCode::SEE_OTHER => Ok(()),
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(job = job_name, "job already gone");
                Ok(())
            }
            _ => Err(response.unexpected(&Method::POST)),
        }
    }
}
