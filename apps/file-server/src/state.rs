// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use fileserver_upstream::{build_client, CcPoller, CcUploader, Poller, Uploader, UpstreamError};
use url::Url;

use crate::config::{Config, ConfigError};
use crate::static_files::EtagCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Controller base URL with credentials embedded.
    pub upstream_url: Url,
    pub client: reqwest::Client,
    pub uploader: Arc<dyn Uploader>,
    pub poller: Arc<dyn Poller>,
    pub etags: Arc<EtagCache>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build upstream client: {0}")]
    Client(#[from] UpstreamError),
}

impl AppState {
    /// Wires the production uploader and poller from configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the HTTP client cannot be built.
    pub fn from_config(config: Config) -> Result<Self, StateError> {
        config.validate()?;
        let upstream_url = config.upstream.base_url()?;
        let client = build_client(&config.upstream.client_options())?;

        let uploader = Arc::new(CcUploader::new(client.clone(), upstream_url.clone()));
        let poller =
            Arc::new(CcPoller::new(client.clone(), config.upstream.job_polling_interval()));

        Ok(Self::new(config, upstream_url, client, uploader, poller))
    }

    pub fn new(
        config: Config,
        upstream_url: Url,
        client: reqwest::Client,
        uploader: Arc<dyn Uploader>,
        poller: Arc<dyn Poller>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            upstream_url,
            client,
            uploader,
            poller,
            etags: Arc::new(EtagCache::default()),
        }
    }
}
