// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Streaming `multipart/form-data` encoder.
//!
//! Wraps a size-declared byte stream into a single-file multipart body without
//! buffering the payload. The total `Content-Length` is known before the first
//! byte is sent: payload length plus the framing length, which is measured by
//! encoding a zero-length placeholder part with the same boundary.
//!
//! The body is fed through a channel of capacity one by a producer task. The
//! producer only pulls the next payload chunk once the HTTP client has taken
//! the previous one, so a request that never starts sending (for example
//! because the connection could not be established) leaves the inbound stream
//! untouched and it can be [reclaimed](Producer::reclaim) for another attempt.

use std::io;
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::RequestBuilder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Result, UpstreamError};

/// Form field the controller expects the uploaded file under, for droplets and
/// build artifacts alike.
pub const FORM_FIELD: &str = "upload[droplet]";

const PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Inbound payload as a stream of chunks.
pub type PayloadStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Name and file name of the single file part.
#[derive(Debug, Clone, Copy)]
pub struct FilePart<'a> {
    pub form_field: &'a str,
    pub file_name: &'a str,
}

impl<'a> FilePart<'a> {
    pub const fn new(form_field: &'a str, file_name: &'a str) -> Self {
        Self { form_field, file_name }
    }
}

/// Writes multipart framing for a fixed boundary.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartWriter {
    /// Creates a writer with a random boundary.
    pub fn new() -> Self {
        Self { boundary: uuid::Uuid::new_v4().simple().to_string() }
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into() }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Appends the delimiter and headers that open a form-file part.
    pub fn write_file_header(&self, buf: &mut BytesMut, part: &FilePart<'_>) {
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quotes(part.form_field),
                escape_quotes(part.file_name)
            )
            .as_bytes(),
        );
        buf.put_slice(format!("Content-Type: {PART_CONTENT_TYPE}\r\n\r\n").as_bytes());
    }

    /// Appends the closing delimiter.
    pub fn write_close(&self, buf: &mut BytesMut) {
        buf.put_slice(b"\r\n--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
    }

    /// Length of all framing around a payload, measured by encoding an empty
    /// part into a scratch buffer.
    pub fn framing_len(&self, part: &FilePart<'_>) -> u64 {
        let mut scratch = BytesMut::new();
        self.write_file_header(&mut scratch, part);
        self.write_close(&mut scratch);
        scratch.len() as u64
    }

    fn head(&self, part: &FilePart<'_>) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_file_header(&mut buf, part);
        buf.freeze()
    }

    fn tail(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_close(&mut buf);
        buf.freeze()
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// What the producer hands back once it stops.
pub struct Reclaimed {
    /// The inbound stream, positioned after the last chunk that was consumed.
    pub body: PayloadStream,
    /// Payload bytes pulled from `body`.
    pub consumed: u64,
}

impl std::fmt::Debug for Reclaimed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimed").field("consumed", &self.consumed).finish_non_exhaustive()
    }
}

/// Handle to the task copying the payload into the request body.
#[derive(Debug)]
pub struct Producer {
    handle: JoinHandle<Reclaimed>,
}

impl Producer {
    /// Waits for the producer to stop and returns the inbound stream.
    ///
    /// The producer stops when the copy completes or the request body is
    /// dropped, so this must only be awaited after the request is gone.
    pub async fn reclaim(self) -> Option<Reclaimed> {
        self.handle.await.ok()
    }
}

/// A ready-to-send upload request and the task feeding its body.
#[derive(Debug)]
pub struct Envelope {
    pub request: reqwest::Request,
    pub producer: Producer,
    pub content_length: u64,
}

/// Builds a streaming multipart request on top of `builder`.
///
/// `builder` carries method, URL and any extra headers; this adds the
/// multipart `Content-Type`, the exact `Content-Length` and the body.
///
/// # Errors
///
/// Returns [`UpstreamError::LengthRequired`] when `content_length` is zero and
/// a transport error if the request cannot be built.
pub fn encode(
    builder: RequestBuilder,
    part: &FilePart<'_>,
    content_length: u64,
    body: PayloadStream,
) -> Result<Envelope> {
    encode_with(&MultipartWriter::new(), builder, part, content_length, body)
}

/// Same as [`encode`] with a caller-provided writer.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_with(
    writer: &MultipartWriter,
    builder: RequestBuilder,
    part: &FilePart<'_>,
    content_length: u64,
    body: PayloadStream,
) -> Result<Envelope> {
    if content_length == 0 {
        return Err(UpstreamError::LengthRequired);
    }

    let total = content_length + writer.framing_len(part);
    let (tx, rx) = mpsc::channel(1);
    let handle = tokio::spawn(pump(tx, writer.head(part), writer.tail(), body, content_length));

    let request = builder
        .header(CONTENT_TYPE, writer.content_type())
        .header(CONTENT_LENGTH, total)
        .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)))
        .build()
        .map_err(UpstreamError::Transport)?;

    Ok(Envelope { request, producer: Producer { handle }, content_length: total })
}

async fn pump(
    tx: mpsc::Sender<io::Result<Bytes>>,
    head: Bytes,
    tail: Bytes,
    mut body: PayloadStream,
    declared: u64,
) -> Reclaimed {
    let mut consumed = 0u64;

    if tx.send(Ok(head)).await.is_err() {
        return Reclaimed { body, consumed };
    }

    loop {
        // Wait for room before reading so nothing is pulled from the inbound
        // stream until the client has taken the head.
        let Ok(permit) = tx.reserve().await else {
            tracing::debug!(consumed, "multipart consumer went away");
            break;
        };

        match body.next().await {
            Some(Ok(chunk)) => {
                consumed += chunk.len() as u64;
                if consumed > declared {
                    permit.send(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("payload exceeds declared length of {declared} bytes"),
                    )));
                    break;
                }
                permit.send(Ok(chunk));
            },
            Some(Err(err)) => {
                permit.send(Err(err));
                break;
            },
            None => {
                if consumed < declared {
                    permit.send(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("payload ended after {consumed} of {declared} bytes"),
                    )));
                } else {
                    permit.send(Ok(tail));
                }
                break;
            },
        }
    }

    Reclaimed { body, consumed }
}
