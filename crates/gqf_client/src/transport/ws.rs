//! WebSocket transport speaking `graphql-transport-ws`.
//!
//! Sequence: `connection_init`, wait for `connection_ack`, `subscribe` with
//! id `"1"`, then `next` results until `complete` or `error`. Pings are
//! answered with pongs at the protocol level.

use super::{deliver_next, merge_headers, SubscriptionTransport};
use crate::config::ClientConfig;
use crate::context::OperationContext;
use crate::error::{ClientError, ClientResult, ErrorCode, ResultExt};
use crate::operation::SubscriptionDescriptor;
use crate::session::TransportSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// The sub-protocol negotiated during the handshake.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

const SUBSCRIPTION_ID: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A `graphql-transport-ws` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: Value,
    },
    Next {
        id: String,
        payload: Value,
    },
    Error {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
    },
}

impl ProtocolMessage {
    pub fn to_message(&self) -> ClientResult<Message> {
        let text = serde_json::to_string(self).map_client_err(ErrorCode::SerializeError)?;
        Ok(Message::Text(text.into()))
    }

    pub fn from_text(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_client_err_with(
            ErrorCode::ProtocolError,
            "malformed graphql-transport-ws message",
        )
    }
}

/// Base options for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Headers sent with the handshake request.
    pub headers: HashMap<String, String>,
    /// How long to wait for `connection_ack`.
    pub ack_timeout: Duration,
    /// Payload of `connection_init`.
    pub init_payload: Option<Value>,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            ack_timeout: Duration::from_secs(10),
            init_payload: None,
        }
    }
}

impl WsOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            headers: config.headers.clone(),
            ack_timeout: config.ws_ack_timeout,
            init_payload: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn init_payload(mut self, payload: Value) -> Self {
        self.init_payload = Some(payload);
        self
    }
}

/// The WebSocket transport.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    options: WsOptions,
}

impl WsTransport {
    pub fn new(options: WsOptions) -> Self {
        Self { options }
    }
}

/// Maps `http`/`https` endpoints to `ws`/`wss`.
pub fn websocket_url(endpoint: &str) -> ClientResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|err| ClientError::invalid_url(format!("invalid subscription url `{endpoint}`: {err}")))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => {
            return Err(ClientError::invalid_url(format!(
                "unsupported scheme `{other}` for a WebSocket subscription"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::invalid_url(format!("cannot use `{scheme}` for `{endpoint}`")))?;
    Ok(url)
}

fn handshake_request(url: &Url, headers: HashMap<String, String>) -> ClientResult<Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| ClientError::invalid_url(err.to_string()))?;
    let request_headers = request.headers_mut();
    request_headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_client_err_with(ErrorCode::InvalidUrl, format!("invalid header name `{key}`"))?;
        let value = HeaderValue::from_str(&value)
            .map_client_err_with(ErrorCode::InvalidUrl, format!("invalid value for header `{key}`"))?;
        request_headers.insert(name, value);
    }
    Ok(request)
}

impl SubscriptionTransport for WsTransport {
    fn connect(
        &self,
        sink: TransportSink,
        descriptor: SubscriptionDescriptor,
        context: OperationContext,
    ) -> ClientResult<()> {
        let url = websocket_url(&descriptor.url)?;
        let request = handshake_request(&url, merge_headers(&self.options.headers, &context))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::internal("the WebSocket transport must run inside a tokio runtime")
        })?;

        let cancel = CancellationToken::new();
        let guard = cancel.clone();
        sink.on_unsubscribe(move || {
            guard.cancel();
            Ok(())
        });

        let options = self.options.clone();
        runtime.spawn(async move {
            let connected = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(attempt = sink.attempt(), "WebSocket subscription cancelled while connecting");
                    return;
                }
                connected = open(request, &descriptor, &options) => connected,
            };
            match connected {
                Ok(socket) => pump(socket, &sink, &cancel).await,
                Err(err) => sink.close(Some(err)),
            }
        });

        Ok(())
    }
}

async fn send(socket: &mut Socket, message: &ProtocolMessage) -> ClientResult<()> {
    socket
        .send(message.to_message()?)
        .await
        .map_client_err(ErrorCode::NetworkError)
}

/// Reads the next protocol message, skipping control frames.
async fn recv(socket: &mut Socket) -> ClientResult<Option<ProtocolMessage>> {
    loop {
        match socket.next().await {
            None | Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Err(err)) => return Err(ClientError::network(err.to_string())),
            Some(Ok(Message::Text(text))) => return ProtocolMessage::from_text(text.as_str()).map(Some),
            Some(Ok(Message::Binary(bytes))) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                return ProtocolMessage::from_text(&text).map(Some);
            }
            Some(Ok(_)) => continue,
        }
    }
}

/// Opens the socket, completes the init/ack exchange and subscribes.
async fn open(
    request: Request,
    descriptor: &SubscriptionDescriptor,
    options: &WsOptions,
) -> ClientResult<Socket> {
    let (mut socket, _) = connect_async(request)
        .await
        .map_err(|err| ClientError::network(format!("WebSocket connect failed: {err}")))?;

    send(
        &mut socket,
        &ProtocolMessage::ConnectionInit {
            payload: options.init_payload.clone(),
        },
    )
    .await?;

    let ack = tokio::time::timeout(options.ack_timeout, async {
        loop {
            match recv(&mut socket).await? {
                Some(ProtocolMessage::ConnectionAck { .. }) => return Ok::<(), ClientError>(()),
                Some(ProtocolMessage::Ping { payload }) => {
                    send(&mut socket, &ProtocolMessage::Pong { payload }).await?;
                }
                Some(other) => {
                    return Err(ClientError::protocol(format!(
                        "expected connection_ack, got {other:?}"
                    )))
                }
                None => return Err(ClientError::connection_closed("socket closed before connection_ack")),
            }
        }
    })
    .await;
    match ack {
        Ok(result) => result?,
        Err(_) => {
            return Err(ClientError::new(
                ErrorCode::Timeout,
                format!("no connection_ack within {:?}", options.ack_timeout),
            ))
        }
    }

    send(
        &mut socket,
        &ProtocolMessage::Subscribe {
            id: SUBSCRIPTION_ID.to_string(),
            payload: descriptor.request_body(),
        },
    )
    .await?;
    info!(url = %descriptor.url, "WebSocket subscription opened");

    Ok(socket)
}

async fn pump(mut socket: Socket, sink: &TransportSink, cancel: &CancellationToken) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                let _ = send(
                    &mut socket,
                    &ProtocolMessage::Complete { id: SUBSCRIPTION_ID.to_string() },
                )
                .await;
                let _ = socket.close(None).await;
                debug!(attempt = sink.attempt(), "WebSocket subscription cancelled");
                return;
            }
            message = recv(&mut socket) => message,
        };

        let keep_going = match message {
            Ok(None) => {
                sink.close(None);
                false
            }
            Err(err) => {
                sink.close(Some(err));
                false
            }
            Ok(Some(ProtocolMessage::Next { payload, .. })) => deliver_next(sink, payload),
            Ok(Some(ProtocolMessage::Error { payload, .. })) => {
                sink.close(Some(ClientError::graphql(payload)));
                false
            }
            Ok(Some(ProtocolMessage::Complete { .. })) => {
                sink.close(None);
                false
            }
            Ok(Some(ProtocolMessage::Ping { payload })) => {
                send(&mut socket, &ProtocolMessage::Pong { payload }).await.is_ok()
            }
            Ok(Some(ProtocolMessage::Pong { .. })) => true,
            Ok(Some(other)) => {
                sink.close(Some(ClientError::protocol(format!("unexpected message {other:?}"))));
                false
            }
        };

        if !keep_going {
            let _ = socket.close(None).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protocol_message_wire_format() {
        let init = serde_json::to_value(ProtocolMessage::ConnectionInit { payload: None }).unwrap();
        assert_eq!(init, json!({ "type": "connection_init" }));

        let subscribe = serde_json::to_value(ProtocolMessage::Subscribe {
            id: "1".into(),
            payload: json!({ "query": "subscription { tick }" }),
        })
        .unwrap();
        assert_eq!(
            subscribe,
            json!({ "type": "subscribe", "id": "1", "payload": { "query": "subscription { tick }" } })
        );

        assert_eq!(
            ProtocolMessage::from_text(r#"{"type":"connection_ack"}"#).unwrap(),
            ProtocolMessage::ConnectionAck { payload: None }
        );
        assert_eq!(
            ProtocolMessage::from_text(r#"{"type":"next","id":"1","payload":{"data":{"n":1}}}"#)
                .unwrap(),
            ProtocolMessage::Next {
                id: "1".into(),
                payload: json!({ "data": { "n": 1 } })
            }
        );
    }

    #[test]
    fn test_malformed_message() {
        let err = ProtocolMessage::from_text(r#"{"type":"bogus"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolError);
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:4000/graphql").unwrap().as_str(),
            "ws://localhost:4000/graphql"
        );
        assert_eq!(
            websocket_url("https://api.example.com/graphql").unwrap().scheme(),
            "wss"
        );
        assert_eq!(websocket_url("ws://h/g").unwrap().scheme(), "ws");
        assert_eq!(
            websocket_url("ftp://h/g").unwrap_err().code,
            ErrorCode::InvalidUrl
        );
    }

    #[test]
    fn test_handshake_request_headers() {
        let url = websocket_url("http://localhost/graphql").unwrap();
        let headers = HashMap::from([("authorization".to_string(), "Bearer t".to_string())]);
        let request = handshake_request(&url, headers).unwrap();
        assert_eq!(request.headers()[SEC_WEBSOCKET_PROTOCOL], SUBPROTOCOL);
        assert_eq!(request.headers()["authorization"], "Bearer t");
    }
}
