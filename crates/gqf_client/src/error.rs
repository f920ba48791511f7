//! Typed error system for the gqf client.
//!
//! Every failure the client reports is a [`ClientError`] carrying an
//! [`ErrorCode`]. Errors are `Clone + Serialize` because sessions keep the
//! last one in their published snapshot.

use gqf_syntax::{OperationType, SyntaxError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Typed error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Document errors
    AmbiguousDocument,
    UnrecognizedDocument,
    WrongOperationKind,
    ParseError,

    // Configuration errors
    MissingEndpoint,
    InvalidUrl,

    // Subscription lifecycle errors
    ConnectFailure,
    TeardownHookFailure,
    ConnectionClosed,

    // Transport errors
    NetworkError,
    Timeout,
    HttpError,
    ProtocolError,

    // Response errors
    GraphqlErrors,
    NoData,

    // Serialization errors
    SerializeError,
    DeserializeError,

    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AmbiguousDocument => "AMBIGUOUS_DOCUMENT",
            Self::UnrecognizedDocument => "UNRECOGNIZED_DOCUMENT",
            Self::WrongOperationKind => "WRONG_OPERATION_KIND",
            Self::ParseError => "PARSE_ERROR",
            Self::MissingEndpoint => "MISSING_ENDPOINT",
            Self::InvalidUrl => "INVALID_URL",
            Self::ConnectFailure => "CONNECT_FAILURE",
            Self::TeardownHookFailure => "TEARDOWN_HOOK_FAILURE",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::HttpError => "HTTP_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::GraphqlErrors => "GRAPHQL_ERRORS",
            Self::NoData => "NO_DATA",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true if reconnecting may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ConnectionClosed | Self::ConnectFailure
        )
    }

    /// Returns true if the error is raised when an operation is defined,
    /// before anything is sent.
    pub const fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousDocument
                | Self::UnrecognizedDocument
                | Self::WrongOperationKind
                | Self::ParseError
                | Self::MissingEndpoint
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strongly typed client error.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{code}] {message}")]
pub struct ClientError {
    /// Typed error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// The error this one wraps, if any.
    #[source]
    pub source: Option<Box<ClientError>>,
    /// Extension data, such as GraphQL error lists.
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl ClientError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            extensions: None,
        }
    }

    /// Adds a source error.
    pub fn with_source(mut self, source: ClientError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let extensions = self.extensions.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            extensions.insert(key.into(), v);
        }
        self
    }

    /// Returns an extension value.
    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.as_ref().and_then(|ext| ext.get(key))
    }

    // Convenience constructors

    pub fn ambiguous_document(count: usize) -> Self {
        Self::new(
            ErrorCode::AmbiguousDocument,
            format!("document contains {count} operation definitions, expected exactly one"),
        )
        .with_extension("operations", count)
    }

    pub fn unrecognized_document() -> Self {
        Self::new(
            ErrorCode::UnrecognizedDocument,
            "document contains no operation definition",
        )
    }

    pub fn wrong_operation_kind(found: OperationType, hint: &str) -> Self {
        Self::new(
            ErrorCode::WrongOperationKind,
            format!("`{found}` operations are not accepted here; {hint}"),
        )
        .with_extension("operation", found.as_str())
    }

    pub fn missing_endpoint() -> Self {
        Self::new(
            ErrorCode::MissingEndpoint,
            "no endpoint configured: the schema handle has none and the config sets none",
        )
    }

    /// The subscription closed before it connected.
    pub fn connect_failure(source: Option<ClientError>) -> Self {
        let err = Self::new(
            ErrorCode::ConnectFailure,
            "subscription closed before it connected",
        );
        match source {
            Some(source) => err.with_source(source),
            None => err,
        }
    }

    pub fn teardown_hook_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TeardownHookFailure, message)
    }

    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionClosed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "request timed out")
    }

    pub fn http(status: u16) -> Self {
        Self::new(ErrorCode::HttpError, format!("server responded with HTTP {status}"))
            .with_extension("status", status)
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidUrl, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolError, message)
    }

    /// A GraphQL error list returned by the server.
    ///
    /// The first message becomes the error message; the whole list is kept
    /// under the `errors` extension.
    pub fn graphql(errors: serde_json::Value) -> Self {
        let first = errors
            .as_array()
            .and_then(|list| list.first())
            .and_then(|error| error.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("the server returned GraphQL errors")
            .to_string();
        Self::new(ErrorCode::GraphqlErrors, first).with_extension("errors", errors)
    }

    pub fn no_data() -> Self {
        Self::new(ErrorCode::NoData, "response contained no data")
    }

    pub fn serialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializeError, message)
    }

    pub fn deserialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializeError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl Serialize for ClientError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("ClientError", 4)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref source) = self.source {
            state.serialize_field("source", source)?;
        }
        if let Some(ref ext) = self.extensions {
            state.serialize_field("extensions", ext)?;
        }
        state.end()
    }
}

impl From<SyntaxError> for ClientError {
    fn from(err: SyntaxError) -> Self {
        let offset = err.offset();
        Self::new(ErrorCode::ParseError, err.message).with_extension("offset", offset)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout()
        } else if let Some(status) = err.status() {
            Self::http(status.as_u16())
        } else if err.is_decode() {
            Self::deserialize(err.to_string())
        } else if err.is_builder() {
            Self::invalid_url(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Type alias for client results.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Extension trait for converting other errors to ClientError.
pub trait IntoClientError {
    fn into_client_error(self, code: ErrorCode) -> ClientError;
}

impl<E: std::error::Error> IntoClientError for E {
    fn into_client_error(self, code: ErrorCode) -> ClientError {
        ClientError::new(code, self.to_string())
    }
}

/// Result extension for mapping errors with context.
pub trait ResultExt<T> {
    /// Maps the error to a ClientError with the given code.
    fn map_client_err(self, code: ErrorCode) -> ClientResult<T>;

    /// Maps the error to a ClientError with the given code and message.
    fn map_client_err_with(self, code: ErrorCode, message: impl Into<String>) -> ClientResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn map_client_err(self, code: ErrorCode) -> ClientResult<T> {
        self.map_err(|e| e.into_client_error(code))
    }

    fn map_client_err_with(self, code: ErrorCode, message: impl Into<String>) -> ClientResult<T> {
        self.map_err(|e| {
            ClientError::new(code, message).with_extension("original_error", e.to_string())
        })
    }
}
