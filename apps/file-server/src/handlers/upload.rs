// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Droplet and build-artifact upload endpoints.
//!
//! Both stream the request body to a destination chosen by the caller through
//! a query parameter. Droplet uploads are accepted asynchronously by the
//! controller, so the handler also polls the resulting job until it is done.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
};
use fileserver_upstream::{CancelScope, InboundUpload};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use super::HandlerError;
use crate::state::AppState;
use crate::telemetry;

pub const DROPLET_UPLOAD_URI_KEY: &str = "cc-droplet-upload-uri";
pub const BUILD_ARTIFACTS_UPLOAD_URI_KEY: &str = "cc-build-artifacts-upload-uri";
pub const TIMEOUT_KEY: &str = "timeout";

/// Per-endpoint behaviour of the shared upload flow.
#[derive(Debug)]
pub struct UploadKind {
    /// Log and metric label.
    pub name: &'static str,
    pub uri_key: &'static str,
    pub file_name: &'static str,
    pub force_async: bool,
    pub poll: bool,
    pub success: StatusCode,
}

pub const DROPLET: UploadKind = UploadKind {
    name: "droplet.upload",
    uri_key: DROPLET_UPLOAD_URI_KEY,
    file_name: "droplet.tgz",
    force_async: true,
    poll: true,
    success: StatusCode::CREATED,
};

pub const BUILD_ARTIFACTS: UploadKind = UploadKind {
    name: "build-artifacts.upload",
    uri_key: BUILD_ARTIFACTS_UPLOAD_URI_KEY,
    file_name: "buildpack_cache.tgz",
    force_async: false,
    poll: false,
    success: StatusCode::OK,
};

/// Reads and validates the destination URL parameter.
///
/// # Errors
///
/// Missing, empty or unparsable destinations are bad requests.
pub fn destination(params: &HashMap<String, String>, kind: &UploadKind) -> Result<Url, HandlerError> {
    let raw = params
        .get(kind.uri_key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerError::BadRequest(format!("missing {} parameter", kind.uri_key)))?;

    let mut url = Url::parse(raw)
        .map_err(|e| HandlerError::BadRequest(format!("invalid {} parameter: {e}", kind.uri_key)))?;

    if kind.force_async {
        set_query_param(&mut url, "async", "true");
    }
    Ok(url)
}

/// Replaces every occurrence of `key` in the query with a single `key=value`.
fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> =
        url.query_pairs().filter(|(k, _)| k != key).map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
    url.query_pairs_mut().clear().extend_pairs(kept).append_pair(key, value);
}

/// Reads the optional `timeout` parameter, in whole seconds.
///
/// # Errors
///
/// A present but non-numeric timeout is a bad request.
pub fn timeout(params: &HashMap<String, String>, default: Duration) -> Result<Duration, HandlerError> {
    match params.get(TIMEOUT_KEY).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| HandlerError::BadRequest(format!("invalid {TIMEOUT_KEY} parameter: {e}"))),
    }
}

fn inbound(headers: &HeaderMap, body: Body) -> InboundUpload {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    InboundUpload {
        content_length,
        content_md5: headers.get("Content-MD5").cloned(),
        body: Box::pin(body.into_data_stream().map_err(io::Error::other)),
    }
}

async fn transfer(
    state: &AppState,
    kind: &UploadKind,
    url: &Url,
    headers: &HeaderMap,
    body: Body,
    cancel: &CancellationToken,
) -> Result<(), HandlerError> {
    let uploaded = state
        .uploader
        .upload(url, kind.file_name, inbound(headers, body), cancel)
        .await
        .map_err(HandlerError::Upload)?;

    if kind.poll {
        state
            .poller
            .poll(&uploaded.url, uploaded.response, cancel)
            .await
            .map_err(HandlerError::Poll)?;
    }
    Ok(())
}

async fn run(
    state: &AppState,
    kind: &UploadKind,
    url: &Url,
    timeout: Duration,
    headers: &HeaderMap,
    body: Body,
) -> Result<(), HandlerError> {
    // Dropping the scope early (client disconnect) cancels the transfer.
    let scope = CancelScope::new(timeout);
    let result = transfer(state, kind, url, headers, body, scope.token()).await;
    scope.finish();
    result
}

async fn handle(
    state: &AppState,
    kind: &UploadKind,
    guid: &str,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Body,
) -> Result<StatusCode, HandlerError> {
    let started = Instant::now();
    let result = match destination(params, kind)
        .and_then(|url| Ok((url, timeout(params, state.config.upstream.upload_timeout())?)))
    {
        Ok((url, timeout)) => {
            info!(
                session = kind.name,
                guid,
                content_length = ?headers.get(header::CONTENT_LENGTH),
                timeout = ?timeout,
                "Upload started"
            );
            run(state, kind, &url, timeout, headers, body).await
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!(session = kind.name, guid, elapsed = ?started.elapsed(), "Upload succeeded");
            telemetry::record_upload(kind.name, "success", started.elapsed());
            Ok(kind.success)
        },
        Err(e) => {
            error!(session = kind.name, guid, error = %e, status = %e.status(), "Upload failed");
            telemetry::record_upload(kind.name, "failed", started.elapsed());
            Err(e)
        },
    }
}

/// `POST /v1/droplet/{guid}`
pub async fn upload_droplet(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, HandlerError> {
    handle(&state, &DROPLET, &guid, &params, &headers, body).await
}

/// `POST /v1/build_artifacts/{app_guid}`
pub async fn upload_build_artifacts(
    State(state): State<Arc<AppState>>,
    Path(app_guid): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, HandlerError> {
    handle(&state, &BUILD_ARTIFACTS, &app_guid, &params, &headers, body).await
}
