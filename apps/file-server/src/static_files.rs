// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Static file serving with content-addressed ETags.
//!
//! Files under `server.static_directory` are served by `tower_http`'s
//! [`ServeFile`], which takes care of ranges, content types and
//! `If-Modified-Since`. This module adds the path checks and a strong
//! `ETag` holding the SHA-256 of the file, computed once per file version.

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Version {
    len: u64,
    modified: Option<SystemTime>,
}

/// SHA-256 ETags per path, valid for one size and modification time.
#[derive(Debug, Default)]
pub struct EtagCache {
    entries: Mutex<HashMap<PathBuf, (Version, String)>>,
}

impl EtagCache {
    fn cached(&self, path: &FsPath, version: &Version) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(path).filter(|(cached, _)| cached == version).map(|(_, etag)| etag.clone())
    }

    /// Returns the quoted ETag for `path`, hashing the file when it is new or
    /// has changed since it was last hashed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn etag(&self, path: &FsPath, metadata: &std::fs::Metadata) -> io::Result<String> {
        let version = Version { len: metadata.len(), modified: metadata.modified().ok() };
        if let Some(etag) = self.cached(path, &version) {
            return Ok(etag);
        }

        let file_path = path.to_path_buf();
        let digest = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut file = std::fs::File::open(&file_path)?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher)?;
            Ok(hex::encode(hasher.finalize()))
        })
        .await
        .map_err(io::Error::other)??;

        let etag = format!("\"{digest}\"");
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.to_path_buf(), (version, etag.clone()));
        }
        Ok(etag)
    }
}

/// True if any `/` or `\` separated segment is exactly `..`.
pub fn contains_dot_dot(path: &str) -> bool {
    path.contains("..") && path.split(['/', '\\']).any(|segment| segment == "..")
}

/// Evaluates an `If-None-Match` header value against a strong ETag.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

fn error(status: StatusCode, message: String) -> Response {
    (status, message).into_response()
}

/// `GET /v1/static/` lists nothing.
pub async fn static_root() -> Response {
    error(StatusCode::UNAUTHORIZED, "Unauthorized to list the directory".to_string())
}

/// `GET /v1/static/{*path}`
pub async fn serve_static(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    if contains_dot_dot(&path) {
        return error(StatusCode::BAD_REQUEST, "invalid URL path".to_string());
    }

    let relative = path.trim_start_matches(['/', '\\']);
    let file_path = FsPath::new(&state.config.server.static_directory).join(relative);
    let name = FsPath::new(relative)
        .file_name()
        .map_or_else(|| relative.to_string(), |n| n.to_string_lossy().into_owned());

    let metadata = match tokio::fs::metadata(&file_path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!(path = %file_path.display(), error = %e, "Static file not found");
            return error(StatusCode::NOT_FOUND, format!("File not found: {name}"));
        },
    };

    if metadata.is_dir() {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized to list the directory".to_string());
    }

    let etag = match state.etags.etag(&file_path, &metadata).await {
        Ok(etag) => etag,
        Err(e) => {
            warn!(path = %file_path.display(), error = %e, "Failed to checksum static file");
            return error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error calculating checksum of file".to_string(),
            );
        },
    };
    let etag_value = HeaderValue::from_str(&etag).ok();

    let (mut parts, body) = request.into_parts();
    if let Some(if_none_match) =
        parts.headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok())
    {
        if etag_matches(if_none_match, &etag) {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Some(value) = etag_value {
                response.headers_mut().insert(header::ETAG, value);
            }
            return response;
        }
        // If-None-Match takes precedence over If-Modified-Since.
        parts.headers.remove(header::IF_MODIFIED_SINCE);
    }

    let request = Request::from_parts(parts, body);
    let mut response = match ServeFile::new(&file_path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(infallible) => match infallible {},
    };
    if let Some(value) = etag_value {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dot_dot_segments_are_detected() {
        assert!(contains_dot_dot("../etc/passwd"));
        assert!(contains_dot_dot("a/../b"));
        assert!(contains_dot_dot("a\\..\\b"));
        assert!(!contains_dot_dot("a..b/c"));
        assert!(!contains_dot_dot("file..tgz"));
    }

    #[test]
    fn if_none_match_lists_and_wildcards() {
        let etag = "\"abc\"";
        assert!(etag_matches("\"abc\"", etag));
        assert!(etag_matches("\"zzz\", \"abc\"", etag));
        assert!(etag_matches("W/\"abc\"", etag));
        assert!(etag_matches("*", etag));
        assert!(!etag_matches("\"abd\"", etag));
    }

    #[tokio::test]
    async fn etag_is_sha256_of_contents_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, b"hello").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();

        let cache = EtagCache::default();
        let etag = cache.etag(&path, &metadata).await.unwrap();
        assert_eq!(
            etag,
            "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
        );
        assert_eq!(cache.entries.lock().unwrap().len(), 1);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(cache.etag(&path, &metadata).await.unwrap(), etag);
    }

    #[tokio::test]
    async fn rewritten_file_replaces_its_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        let cache = EtagCache::default();

        std::fs::write(&path, b"hello").unwrap();
        let first = cache.etag(&path, &std::fs::metadata(&path).unwrap()).await.unwrap();

        std::fs::write(&path, b"hello, world").unwrap();
        let second = cache.etag(&path, &std::fs::metadata(&path).unwrap()).await.unwrap();

        assert_ne!(first, second);
        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&path].1, second);
    }
}
