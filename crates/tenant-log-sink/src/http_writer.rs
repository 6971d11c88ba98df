// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`BatchWriter`] that ships row-sets to an HTTP bulk-insert endpoint.
//!
//! Connection targets are URLs. Each write is a single `POST` whose JSON body carries
//! the whole row-set, so the endpoint either accepts every row or none:
//!
//! ```json
//! {"table": "Logs", "columns": ["Logger", "Message", "LogLevel"], "rows": [["app", "hi", 2]]}
//! ```
//!
//! Bodies are optionally zstd-compressed and sent with `Content-Encoding: zstd`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use crate::errors::WriteError;
use crate::rowset::RowSet;
use crate::writer::{BatchWriter, DestinationHandle};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpWriterConfig {
    pub timeout: Duration,
    /// zstd level; `None` sends uncompressed bodies.
    pub compression_level: Option<i32>,
    pub https_proxy: Option<String>,
}

impl Default for HttpWriterConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            compression_level: None,
            https_proxy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpBatchWriter {
    client: reqwest::Client,
    compression_level: Option<i32>,
}

impl HttpBatchWriter {
    pub fn new(config: HttpWriterConfig) -> Result<Self, WriteError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            compression_level: config.compression_level,
        })
    }
}

#[async_trait]
impl BatchWriter for HttpBatchWriter {
    async fn destination(
        &self,
        target: &str,
    ) -> Result<Box<dyn DestinationHandle>, WriteError> {
        Ok(Box::new(HttpDestination {
            client: self.client.clone(),
            target: target.to_string(),
            url: None,
            compression_level: self.compression_level,
        }))
    }
}

/// One bulk-insert endpoint. Opening validates the target URL.
#[derive(Debug)]
pub struct HttpDestination {
    client: reqwest::Client,
    target: String,
    url: Option<Url>,
    compression_level: Option<i32>,
}

impl HttpDestination {
    fn encode(&self, rows: &RowSet) -> Result<(Vec<u8>, HeaderMap), WriteError> {
        let json = serde_json::to_vec(rows).map_err(|e| WriteError::Payload(e.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let Some(level) = self.compression_level else {
            return Ok((json, headers));
        };
        let compressed = zstd::encode_all(json.as_slice(), level)
            .map_err(|e| WriteError::Payload(format!("zstd compression failed: {e}")))?;
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        Ok((compressed, headers))
    }
}

#[async_trait]
impl DestinationHandle for HttpDestination {
    fn is_open(&self) -> bool {
        self.url.is_some()
    }

    async fn open(&mut self) -> Result<(), WriteError> {
        let url = Url::parse(&self.target)
            .map_err(|e| WriteError::Connect(format!("invalid target '{}': {e}", self.target)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WriteError::Connect(format!(
                "unsupported scheme '{}' in target '{}'",
                url.scheme(),
                self.target
            )));
        }
        self.url = Some(url);
        Ok(())
    }

    async fn write(&mut self, rows: &RowSet) -> Result<(), WriteError> {
        let Some(url) = self.url.clone() else {
            return Err(WriteError::Connect(format!(
                "destination '{}' is not open",
                self.target
            )));
        };
        let (body, headers) = self.encode(rows)?;
        debug!("Posting {} rows ({} bytes) to {url}", rows.len(), body.len());

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(WriteError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }

    async fn close(&mut self) {
        self.url = None;
    }
}
