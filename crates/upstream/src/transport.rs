// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Single HTTP attempts against the controller, raced against cancellation.

use std::time::Duration;

use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, UpstreamError};

/// Connection settings for the shared upstream client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub dial_timeout: Duration,
    pub keep_alive: Duration,
    pub skip_cert_verify: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            skip_cert_verify: false,
        }
    }
}

/// Builds the pooled client shared by uploads, polling and downloads.
///
/// # Errors
///
/// Fails if the TLS backend cannot be initialised.
pub fn build_client(options: &ClientOptions) -> Result<Client> {
    if options.skip_cert_verify {
        tracing::warn!("Upstream TLS certificate verification is disabled");
    }

    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(options.dial_timeout)
        .tcp_keepalive(options.keep_alive)
        .danger_accept_invalid_certs(options.skip_cert_verify)
        .build()
        .map_err(UpstreamError::Transport)
}

/// Statuses the controller uses to acknowledge an upload.
pub const fn is_upload_success(status: StatusCode) -> bool {
    matches!(status, StatusCode::OK | StatusCode::CREATED)
}

/// Drains a rejected response into an [`UpstreamError::UpstreamStatus`].
pub async fn rejection(response: Response) -> UpstreamError {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, %status, "Failed to read upstream error body");
            String::new()
        },
    };
    UpstreamError::UpstreamStatus { status, body }
}

/// Performs one upload attempt.
///
/// The request is dropped on every path, which releases its body. If `cancel`
/// fires first the in-flight call is dropped, aborting the connection.
///
/// # Errors
///
/// - [`UpstreamError::Cancelled`] if `cancel` fired first
/// - [`UpstreamError::Connect`] if the connection could not be established
/// - [`UpstreamError::UpstreamStatus`] for any status other than 200 or 201
/// - [`UpstreamError::Transport`] for every other failure
pub async fn attempt(
    client: &Client,
    request: Request,
    cancel: &CancellationToken,
) -> Result<Response> {
    let method = request.method().clone();
    let url = request.url().clone();

    let call = async {
        let response = client.execute(request).await.map_err(UpstreamError::from_transport)?;
        if is_upload_success(response.status()) {
            Ok(response)
        } else {
            Err(rejection(response).await)
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(%method, host = ?url.host_str(), "Upstream request cancelled");
            Err(UpstreamError::Cancelled)
        },
        result = call => result,
    }
}

/// Sends a prepared request, raced against `cancel`, accepting any 2xx status.
///
/// # Errors
///
/// Same classification as [`attempt`], with every non-2xx status rejected.
pub async fn fetch(request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
    let call = async {
        let response = request.send().await.map_err(UpstreamError::from_transport)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(rejection(response).await)
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(UpstreamError::Cancelled),
        result = call => result,
    }
}
