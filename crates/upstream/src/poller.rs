// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Polling of asynchronous controller jobs.
//!
//! An accepted upload answers with a job status document. The poller re-fetches
//! the job's URL on a fixed interval until the job finishes, fails, reports a
//! status this client does not understand, or the request is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, UpstreamError};
use crate::transport;
use crate::uploader::{redacted, split_credentials};

pub const JOB_QUEUED: &str = "queued";
pub const JOB_RUNNING: &str = "running";
pub const JOB_FAILED: &str = "failed";
pub const JOB_FINISHED: &str = "finished";

/// `{"metadata": {"url": ...}, "entity": {"status": ...}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatusDocument {
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(default)]
    pub entity: JobEntity,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobMetadata {
    /// Absolute or host-relative location of the job.
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobEntity {
    #[serde(default)]
    pub status: String,
}

/// Whether a job needs further polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    Pending,
    Finished,
}

impl JobStatusDocument {
    /// Maps the reported status onto the polling state machine.
    ///
    /// # Errors
    ///
    /// [`UpstreamError::JobFailed`] for `failed`, and
    /// [`UpstreamError::UnknownJobStatus`] for anything unrecognised.
    pub fn progress(&self) -> Result<JobProgress> {
        match self.entity.status.as_str() {
            JOB_QUEUED | JOB_RUNNING => Ok(JobProgress::Pending),
            JOB_FINISHED => Ok(JobProgress::Finished),
            JOB_FAILED => Err(UpstreamError::JobFailed),
            other => Err(UpstreamError::UnknownJobStatus(other.to_string())),
        }
    }

    /// Resolves the job URL. Host-relative URLs take scheme, host, port and
    /// credentials from `fallback`; their path is always rooted, never joined
    /// onto the fallback's path.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Url`] if the URL cannot be parsed.
    pub fn job_url(&self, fallback: &Url) -> Result<Url> {
        match Url::parse(&self.metadata.url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let reference = self.metadata.url.split('#').next().unwrap_or_default();
                let (path, query) = match reference.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (reference, None),
                };
                let mut url = fallback.clone();
                url.set_fragment(None);
                if path.starts_with('/') {
                    url.set_path(path);
                } else {
                    url.set_path(&format!("/{path}"));
                }
                url.set_query(query);
                Ok(url)
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
pub trait Poller: Send + Sync {
    /// Consumes the upload `response` and polls until the job is terminal.
    ///
    /// `fallback` qualifies host-relative job URLs.
    ///
    /// # Errors
    ///
    /// Terminal job errors, [`UpstreamError::Cancelled`], or the first
    /// decode/URL/transport error encountered.
    async fn poll(
        &self,
        fallback: &Url,
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Poller for cloud controller jobs.
#[derive(Debug, Clone)]
pub struct CcPoller {
    client: Client,
    interval: Duration,
}

impl CcPoller {
    pub const fn new(client: Client, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

async fn decode(response: Response) -> Result<JobStatusDocument> {
    let body = response.bytes().await.map_err(UpstreamError::Transport)?;
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl Poller for CcPoller {
    async fn poll(
        &self,
        fallback: &Url,
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.interval.is_zero() {
            return Err(UpstreamError::ZeroPollInterval);
        }

        let mut document = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            document = decode(response) => document?,
        };

        let mut polls = 0u32;

        loop {
            if document.progress()? == JobProgress::Finished {
                tracing::debug!(polls, "Upload job finished");
                return Ok(());
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                () = tokio::time::sleep(self.interval) => {},
            }

            let url = document.job_url(fallback)?;
            tracing::debug!(url = %redacted(&url), status = %document.entity.status, "Polling upload job");

            let (target, credentials) = split_credentials(&url);
            let mut request = self.client.get(target);
            if let Some((username, password)) = credentials {
                request = request.basic_auth(username, password);
            }

            let response = transport::fetch(request, cancel).await?;
            polls += 1;
            document = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                document = decode(response) => document?,
            };
        }
    }
}
