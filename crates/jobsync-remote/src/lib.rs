//! jobsync-remote: HTTP bindings for the services jobsync reconciles
//!
//! - `JenkinsClient`: job listing, `config.xml`, create and delete
//! - `StashClient`: repository clone links and paged branch listing
//! - `NexusClient`: hosted snapshot repositories and repository groups
//! - `FsJobSource`: job configurations read from a Jenkins home on disk
//!
//! Every client maps non-2xx answers to `RemoteError::Status` so the
//! core's retry policy can tell transient failures from permanent ones.

pub mod fs_jobs;
mod http;
pub mod jenkins;
pub mod nexus;
pub mod stash;

pub use fs_jobs::FsJobSource;
pub use http::WebClientParams;
pub use jenkins::JenkinsClient;
pub use nexus::NexusClient;
pub use stash::StashClient;
