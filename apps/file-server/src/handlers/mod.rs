// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fileserver_upstream::UpstreamError;

pub mod download;
pub mod upload;

pub use download::download_build_artifacts;
pub use upload::{upload_build_artifacts, upload_droplet};

/// Failure of an upload or download request, rendered as a plain-text body.
#[derive(Debug)]
pub enum HandlerError {
    /// Malformed query parameters.
    BadRequest(String),
    /// The upload itself failed. Relays the upstream status when there is one.
    Upload(UpstreamError),
    /// The upload was accepted but the job did not finish.
    Poll(UpstreamError),
    /// No usable response from the controller.
    Upstream(String),
    /// The controller answered a download with a failure status.
    UpstreamStatus { status: StatusCode, body: String },
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upload(e) => e.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Poll(_) | Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamStatus { status, .. } => *status,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) | Self::Upstream(msg) => f.write_str(msg),
            Self::Upload(e) | Self::Poll(e) => write!(f, "{e}"),
            Self::UpstreamStatus { status, body } => {
                write!(f, "Got status: {}\n{body}", status.as_u16())
            },
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
