// SPDX-License-Identifier: Apache-2.0

//! Outbound push of drained metric batches to the agent.
//!
//! A push is a single HTTP POST with the batch serialized as a JSON array.
//! There is no retry queue and no disk spool: a failed push loses that
//! interval's batch, by design, and the next interval pushes fresh data.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::metrics::MetricRecord;

// The agent has historically been fed this literal content type.
const PUSH_CONTENT_TYPE: &str = "plain/text";

#[derive(Error, Debug)]
pub enum PushError {
    #[error("serializing batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("building request: {0}")]
    Request(#[from] http::Error),

    #[error("sending request: {0}")]
    Send(String),

    #[error("reading response body: {0}")]
    Response(String),
}

pub struct Pusher {
    client: HyperClient<HttpConnector, Full<Bytes>>,
}

impl Pusher {
    pub fn new() -> Self {
        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .timer(TokioTimer::new())
            .build_http();

        Self { client }
    }

    /// POST `batch` to `agent`, returning the response body.
    ///
    /// The response status is logged but not interpreted; the agent's body
    /// is returned so the caller can log it. Transport failures surface as
    /// errors and the caller drops the batch.
    pub async fn push(&self, agent: &str, batch: &[MetricRecord]) -> Result<String, PushError> {
        let body = serde_json::to_vec(batch)?;

        let req = Request::builder()
            .method(Method::POST)
            .uri(agent)
            .header(CONTENT_TYPE, PUSH_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| PushError::Send(e.to_string()))?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| PushError::Response(e.to_string()))?
            .to_bytes();

        debug!(%status, "agent push response");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Default for Pusher {
    fn default() -> Self {
        Self::new()
    }
}
