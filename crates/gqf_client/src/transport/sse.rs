//! Server-sent events transport.
//!
//! The subscription is a GET request carrying `query` and `variables` as
//! query parameters. The server answers with an event stream: `next` events
//! carry execution results, `complete` ends the subscription.

use super::{deliver_next, merge_headers, SubscriptionTransport};
use crate::config::ClientConfig;
use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult, ErrorCode, ResultExt};
use crate::operation::SubscriptionDescriptor;
use crate::session::TransportSink;
use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// A dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type, from `event:`.
    pub event: Option<String>,
    /// Data lines joined with newlines.
    pub data: String,
    pub id: Option<String>,
    /// Reconnection delay in milliseconds, from `retry:`.
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn is_event(&self, event_type: &str) -> bool {
        self.event.as_deref() == Some(event_type)
    }
}

/// Incremental `text/event-stream` parser.
///
/// Accepts LF, CRLF and CR line endings, possibly split across chunks.
#[derive(Debug)]
pub struct SseParser {
    buffer: BytesMut,
    event_type: Option<String>,
    data_lines: Vec<String>,
    data_len: usize,
    event_id: Option<String>,
    retry: Option<u64>,
    last_event_id: Option<String>,
    max_buffer_size: usize,
}

impl SseParser {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            event_type: None,
            data_lines: Vec::new(),
            data_len: 0,
            event_id: None,
            retry: None,
            last_event_id: None,
            max_buffer_size,
        }
    }

    /// Feeds a chunk and returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> ClientResult<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.find_line_end() {
            // A trailing CR may be the first half of a CRLF.
            if self.buffer[line_end] == b'\r' && line_end + 1 == self.buffer.len() {
                break;
            }

            let line = self.buffer.split_to(line_end);
            if self.buffer.starts_with(b"\r\n") {
                self.buffer.advance(2);
            } else {
                self.buffer.advance(1);
            }

            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if !line.starts_with(':') {
                self.process_field(&line);
            }
        }

        if self.buffer.len() + self.data_len > self.max_buffer_size {
            return Err(ClientError::protocol(format!(
                "event exceeds the {} byte buffer limit",
                self.max_buffer_size
            )));
        }

        Ok(events)
    }

    /// The id of the last dispatched event that carried one.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn find_line_end(&self) -> Option<usize> {
        self.buffer
            .iter()
            .position(|byte| *byte == b'\n' || *byte == b'\r')
    }

    fn process_field(&mut self, line: &str) {
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                self.data_len += value.len();
                self.data_lines.push(value.to_string());
            }
            "id" => {
                if !value.contains('\0') {
                    self.event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.event_type.is_none() {
            return None;
        }

        let event = SseEvent {
            event: self.event_type.take(),
            data: self.data_lines.join("\n"),
            id: self.event_id.clone(),
            retry: self.retry.take(),
        };
        if event.id.is_some() {
            self.last_event_id = event.id.clone();
        }
        self.data_lines.clear();
        self.data_len = 0;

        Some(event)
    }
}

/// Base options for the SSE transport.
#[derive(Debug, Clone)]
pub struct SseOptions {
    /// Headers sent with every subscription request.
    pub headers: HashMap<String, String>,
    /// Upper bound on one buffered event.
    pub max_buffer_size: usize,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            max_buffer_size: 1024 * 1024,
        }
    }
}

impl SseOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            headers: config.headers.clone(),
            max_buffer_size: config.sse_max_buffer_size,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }
}

/// The SSE transport.
#[derive(Debug, Clone)]
pub struct SseTransport {
    options: SseOptions,
    http: reqwest::Client,
}

impl SseTransport {
    pub fn new(options: SseOptions) -> Self {
        Self::with_http_client(options, reqwest::Client::new())
    }

    pub fn with_http_client(options: SseOptions, http: reqwest::Client) -> Self {
        Self { options, http }
    }
}

/// Builds `url?query=<printed document>&variables=<json>`.
pub fn subscription_url(descriptor: &SubscriptionDescriptor) -> ClientResult<Url> {
    let mut url = Url::parse(&descriptor.url).map_err(|err| {
        ClientError::invalid_url(format!("invalid subscription url `{}`: {err}", descriptor.url))
    })?;
    let variables =
        serde_json::to_string(&descriptor.variables).map_client_err(ErrorCode::SerializeError)?;
    url.query_pairs_mut()
        .append_pair("query", &descriptor.query)
        .append_pair("variables", &variables);
    Ok(url)
}

impl SubscriptionTransport for SseTransport {
    fn connect(
        &self,
        sink: TransportSink,
        descriptor: SubscriptionDescriptor,
        context: OperationContext,
    ) -> ClientResult<()> {
        let url = subscription_url(&descriptor)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::internal("the SSE transport must run inside a tokio runtime"))?;

        let cancel = CancellationToken::new();
        let guard = cancel.clone();
        sink.on_unsubscribe(move || {
            guard.cancel();
            Ok(())
        });

        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        for (key, value) in merge_headers(&self.options.headers, &context) {
            request = request.header(key, value);
        }

        let max_buffer_size = self.options.max_buffer_size;
        runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(attempt = sink.attempt(), "SSE subscription cancelled");
                }
                result = stream_events(request, &sink, max_buffer_size) => {
                    if let Err(err) = result {
                        sink.close(Some(err));
                    }
                }
            }
        });

        Ok(())
    }
}

async fn stream_events(
    request: reqwest::RequestBuilder,
    sink: &TransportSink,
    max_buffer_size: usize,
) -> ClientResult<()> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::http(status.as_u16()));
    }
    info!(attempt = sink.attempt(), "SSE subscription stream opened");

    let mut parser = SseParser::new(max_buffer_size);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk)? {
            match event.event.as_deref() {
                None | Some("next") => {
                    let payload = serde_json::from_str(&event.data)
                        .map_client_err(ErrorCode::DeserializeError)?;
                    if !deliver_next(sink, payload) {
                        return Ok(());
                    }
                }
                Some("complete") => {
                    sink.close(None);
                    return Ok(());
                }
                Some("error") => {
                    let payload = serde_json::from_str(&event.data)
                        .unwrap_or(serde_json::Value::String(event.data));
                    sink.close(Some(ClientError::graphql(payload)));
                    return Ok(());
                }
                Some(other) => debug!(event = other, "ignoring SSE event"),
            }
        }
    }

    Err(ClientError::connection_closed(
        "event stream ended without a complete event",
    ))
}
