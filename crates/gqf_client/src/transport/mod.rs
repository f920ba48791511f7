//! Subscription transports.
//!
//! A transport receives a [`TransportSink`], the subscription descriptor and
//! the merged context. `connect` must return promptly: it validates what it
//! can, registers a teardown hook and spawns the actual I/O. Errors returned
//! from `connect` fail the connection attempt at once; errors found later
//! are reported through [`TransportSink::close`].

pub mod sse;
pub mod ws;

pub use sse::{SseEvent, SseOptions, SseParser, SseTransport};
pub use ws::{ProtocolMessage, WsOptions, WsTransport};

use crate::config::ClientConfig;
use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult, ErrorCode};
use crate::operation::SubscriptionDescriptor;
use crate::response::ExecutionResult;
use crate::session::TransportSink;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// A subscription transport.
pub trait SubscriptionTransport: Send + Sync {
    fn connect(
        &self,
        sink: TransportSink,
        descriptor: SubscriptionDescriptor,
        context: OperationContext,
    ) -> ClientResult<()>;
}

impl<F> SubscriptionTransport for F
where
    F: Fn(TransportSink, SubscriptionDescriptor, OperationContext) -> ClientResult<()> + Send + Sync,
{
    fn connect(
        &self,
        sink: TransportSink,
        descriptor: SubscriptionDescriptor,
        context: OperationContext,
    ) -> ClientResult<()> {
        self(sink, descriptor, context)
    }
}

/// Which transport subscriptions use.
#[derive(Clone, Default)]
pub enum TransportKind {
    /// Server-sent events over a GET request.
    #[default]
    Sse,
    /// WebSocket with the `graphql-transport-ws` sub-protocol.
    Ws,
    /// Any other transport.
    Custom(Arc<dyn SubscriptionTransport>),
}

impl TransportKind {
    pub fn custom(transport: impl SubscriptionTransport + 'static) -> Self {
        Self::Custom(Arc::new(transport))
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Ws => "ws",
            Self::Custom(_) => "custom",
        }
    }

    /// Instantiates the transport with the client's base options.
    pub fn build(&self, config: &ClientConfig) -> Arc<dyn SubscriptionTransport> {
        match self {
            Self::Sse => Arc::new(SseTransport::new(SseOptions::from_config(config))),
            Self::Ws => Arc::new(WsTransport::new(WsOptions::from_config(config))),
            Self::Custom(transport) => Arc::clone(transport),
        }
    }
}

impl fmt::Debug for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransportKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sse" => Ok(Self::Sse),
            "ws" | "websocket" => Ok(Self::Ws),
            other => Err(ClientError::new(
                ErrorCode::InternalError,
                format!("unknown transport `{other}`, expected `sse` or `ws`"),
            )),
        }
    }
}

/// Base headers overlaid by the context's headers.
pub(crate) fn merge_headers(
    base: &HashMap<String, String>,
    context: &OperationContext,
) -> HashMap<String, String> {
    let mut headers = base.clone();
    headers.extend(
        context
            .headers()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    headers
}

/// Routes a `next` payload to the sink. Returns false when the payload
/// ended the subscription.
pub(crate) fn deliver_next(sink: &TransportSink, payload: Value) -> bool {
    let result = match ExecutionResult::from_value(payload) {
        Ok(result) => result,
        Err(err) => {
            sink.close(Some(err));
            return false;
        }
    };

    match result.data {
        Some(data) => {
            if !result.errors.is_empty() {
                debug!(errors = result.errors.len(), "next payload carried partial errors");
            }
            sink.update(data);
            true
        }
        None if !result.errors.is_empty() => {
            sink.close(Some(ClientError::graphql(result.errors_value())));
            false
        }
        None => {
            sink.close(Some(ClientError::no_data()));
            false
        }
    }
}
