//! Shared HTTP plumbing: credentials, endpoint building, error mapping.

use std::fmt;
use std::time::Duration;

use jobsync_core::{RemoteError, RemoteResult};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

const USER_AGENT: &str = concat!("jobsync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Base URL and basic-auth credentials of one remote service.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebClientParams {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl WebClientParams {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for WebClientParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebClientParams")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A `reqwest::Client` bound to one service.
#[derive(Clone)]
pub(crate) struct ServiceClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    /// Redirects are not followed: Jenkins answers a delete with 302.
    pub(crate) fn new(params: &WebClientParams) -> RemoteResult<Self> {
        let base = Url::parse(&params.base_url)
            .map_err(|e| RemoteError::Url(format!("{}: {e}", params.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Url(format!("{} cannot be a base url", params.base_url)));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base,
            username: params.username.clone(),
            password: params.password.clone(),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Url(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Send and read the whole body.
    pub(crate) async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let url = response.url().to_string();
        let body = response.text().await.map_err(transport)?;
        Ok(Response { status, url, body })
    }
}

/// A fully read response.
#[derive(Debug)]
pub(crate) struct Response {
    pub status: StatusCode,
    pub url: String,
    pub body: String,
}

impl Response {
    /// Error for a status the caller did not expect.
    pub(crate) fn unexpected(self, method: &Method) -> RemoteError {
        RemoteError::Status {
            method: method.to_string(),
            url: self.url,
            status: self.status.as_u16(),
            body: truncate(&self.body, 512),
        }
    }

    pub(crate) fn json<T: serde::de::DeserializeOwned>(&self) -> RemoteResult<T> {
        serde_json::from_str(&self.body).map_err(|e| RemoteError::Decode {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let params = WebClientParams::new("http://ci.example.com", "bot", "hunter2");
        let debug = format!("{params:?}");
        assert!(debug.contains("bot"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client =
            ServiceClient::new(&WebClientParams::new("http://ci.example.com/jenkins/", "u", "p")).unwrap();
        let url = client.endpoint(&["job", "a b", "config.xml"]).unwrap();
        assert_eq!(url.as_str(), "http://ci.example.com/jenkins/job/a%20b/config.xml");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = ServiceClient::new(&WebClientParams::new("not a url", "u", "p")).unwrap_err();
        assert!(matches!(err, RemoteError::Url(_)));
        assert!(ServiceClient::new(&WebClientParams::new("mailto:ops@example.com", "u", "p")).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
