// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Upload-and-poll pipeline between the file server and the cloud controller.
//!
//! ## Modules
//!
//! - [`multipart`]: streaming single-file `multipart/form-data` encoder
//! - [`transport`]: one HTTP attempt raced against cancellation, with outcome classification
//! - [`uploader`]: primary upload with a one-time fallback on connection failure
//! - [`poller`]: fixed-interval job status polling
//! - [`cancel`]: per-request cancellation scope (timeout and disconnect)
//! - [`error`]: the [`UpstreamError`] taxonomy

pub mod cancel;
pub mod error;
pub mod multipart;
pub mod poller;
pub mod transport;
pub mod uploader;

pub use cancel::CancelScope;
pub use error::{Result, UpstreamError};
pub use multipart::{PayloadStream, FORM_FIELD};
pub use poller::{CcPoller, JobStatusDocument, Poller};
pub use transport::{build_client, ClientOptions};
pub use uploader::{CcUploader, InboundUpload, Uploaded, Uploader};
