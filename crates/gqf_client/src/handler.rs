//! Request handlers for queries and mutations.

use crate::config::ClientConfig;
use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult};
use crate::operation::RequestDescriptor;
use crate::response::ExecutionResult;
use crate::transport::merge_headers;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Executes one query or mutation and returns its `data`.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn request(
        &self,
        descriptor: RequestDescriptor,
        context: OperationContext,
    ) -> ClientResult<Value>;
}

/// The default handler: a JSON POST to the descriptor's url.
#[derive(Debug, Clone)]
pub struct HttpRequestHandler {
    http: reqwest::Client,
    headers: HashMap<String, String>,
    timeout: Duration,
}

impl HttpRequestHandler {
    /// Takes base headers and the default timeout from `config`. The
    /// context of each request is merged over them.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_http_client(config, reqwest::Client::new())
    }

    pub fn with_http_client(config: &ClientConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            headers: config.headers.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl RequestHandler for HttpRequestHandler {
    async fn request(
        &self,
        descriptor: RequestDescriptor,
        context: OperationContext,
    ) -> ClientResult<Value> {
        let timeout = context.get_timeout().unwrap_or(self.timeout);
        let mut request = self
            .http
            .post(&descriptor.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .json(&descriptor.request_body());
        for (key, value) in merge_headers(&self.headers, &context) {
            request = request.header(key, value);
        }

        debug!(
            url = %descriptor.url,
            operation = %descriptor.operation,
            name = descriptor.operation_name.as_deref().unwrap_or("<anonymous>"),
            "sending request"
        );
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::http(status.as_u16()));
        }

        let body: Value = response.json().await?;
        ExecutionResult::from_value(body)?.into_data()
    }
}
