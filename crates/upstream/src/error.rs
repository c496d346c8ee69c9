// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Error types for talking to the cloud controller.
//!
//! Every failure of the upload-and-poll pipeline is one of these variants. The
//! HTTP handlers only need [`UpstreamError::status_code`] and `Display` to build
//! a response.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of an upload attempt or of the job polling that follows it.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The inbound request did not declare a positive `Content-Length`.
    ///
    /// Raised before any outbound connection is made.
    #[error("Missing Content Length")]
    LengthRequired,

    /// The upstream answered with something other than a success status.
    ///
    /// `body` holds the drained response body, which is usually the only
    /// useful diagnostic the controller gives back.
    #[error("status code: {}\n{body}", .status.as_u16())]
    UpstreamStatus { status: StatusCode, body: String },

    /// The connection to the upstream could not be established.
    ///
    /// This is the only failure that makes the uploader try the fallback
    /// address.
    #[error("connection to upstream failed: {0}")]
    Connect(#[source] reqwest::Error),

    /// Any other transport failure (request write, response read, TLS, body
    /// stream errors).
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The request's cancellation signal fired while the operation was
    /// outstanding.
    #[error("upstream request was cancelled")]
    Cancelled,

    /// A destination or job status URL could not be parsed.
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),

    /// The controller reported that the asynchronous job failed.
    #[error("upload job failed")]
    JobFailed,

    /// The controller reported a job status this client does not know.
    #[error("unknown job status: {0}")]
    UnknownJobStatus(String),

    /// The poller was configured without a positive interval.
    #[error("job polling interval must be greater than zero")]
    ZeroPollInterval,

    /// A job status document could not be decoded.
    #[error("invalid job status document: {0}")]
    Decode(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Classifies a transport error from `reqwest`, separating connection
    /// establishment failures from everything else.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Transport(err)
        }
    }

    /// The HTTP status that should be relayed to the inbound client, if the
    /// failure carries one.
    ///
    /// `None` means no response was received from upstream; callers answer
    /// with a 500 in that case.
    pub const fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::LengthRequired => Some(StatusCode::LENGTH_REQUIRED),
            Self::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
