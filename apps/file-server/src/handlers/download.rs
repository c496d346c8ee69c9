// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use fileserver_upstream::uploader::{redacted, split_credentials};
use futures::Stream;
use tracing::{error, info, warn};
use url::Url;

use super::HandlerError;
use crate::state::AppState;

const SESSION: &str = "build-artifacts.download";

/// `{upstream}/staging/buildpack_cache/{app_guid}/download`
///
/// # Errors
///
/// Fails if the upstream base URL cannot have path segments.
pub fn buildpack_cache_url(base: &Url, app_guid: &str) -> Result<Url, HandlerError> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| HandlerError::Upstream(format!("invalid upstream address: {}", redacted(base))))?
        .pop_if_empty()
        .extend(["staging", "buildpack_cache", app_guid, "download"]);
    Ok(url)
}

/// Passes the body through, logging once the stream ends whether the byte
/// count matched the advertised length.
struct CountedDownload<S> {
    inner: S,
    url: String,
    expected: Option<u64>,
    transferred: u64,
    finished: bool,
}

impl<S> CountedDownload<S> {
    const fn new(inner: S, url: String, expected: Option<u64>) -> Self {
        Self { inner, url, expected, transferred: 0, finished: false }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.expected {
            Some(expected) if expected != self.transferred => {
                error!(
                    session = SESSION,
                    url = %self.url,
                    content_length = expected,
                    bytes_transferred = self.transferred,
                    "Content length and body size do not match"
                );
            },
            _ => {
                info!(session = SESSION, url = %self.url, content_length = self.transferred, "Download succeeded");
            },
        }
    }
}

impl<S> Drop for CountedDownload<S> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                session = SESSION,
                url = %self.url,
                bytes_transferred = self.transferred,
                "Download aborted before completion"
            );
        }
    }
}

impl<S> Stream for CountedDownload<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.transferred += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            },
            Poll::Ready(Some(Err(e))) => {
                error!(session = SESSION, url = %self.url, error = %e, "Copying bytes failed");
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            },
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

/// `GET /v1/build_artifacts/{app_guid}`
///
/// # Errors
///
/// Transport failures are 500s; upstream statuses above 203 are relayed
/// together with the upstream body.
pub async fn download_build_artifacts(
    State(state): State<Arc<AppState>>,
    Path(app_guid): Path<String>,
) -> Result<Response, HandlerError> {
    let url = buildpack_cache_url(&state.upstream_url, &app_guid)?;
    let logged_url = redacted(&url);
    info!(session = SESSION, url = %logged_url, "Download started");

    let (target, credentials) = split_credentials(&url);
    let mut request = state.client.get(target);
    if let Some((username, password)) = credentials {
        request = request.basic_auth(username, password);
    }

    let response = request.send().await.map_err(|e| {
        error!(session = SESSION, url = %logged_url, error = %e, "Download failed");
        HandlerError::Upstream(e.to_string())
    })?;

    let status = response.status();
    if status.as_u16() > 203 {
        let body = response.text().await.unwrap_or_default();
        error!(session = SESSION, url = %logged_url, status = status.as_u16(), body = %body, "Upstream returned failure status");
        return Err(HandlerError::UpstreamStatus { status, body });
    }

    let content_length = response.content_length();
    let mut headers = HeaderMap::new();
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }

    let body = CountedDownload::new(Box::pin(response.bytes_stream()), logged_url, content_length);
    Ok((StatusCode::OK, headers, Body::from_stream(body)).into_response())
}
