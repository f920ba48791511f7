//! Client configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Where the client runs.
///
/// A server-only process renders once and never holds live connections, so
/// subscriptions there stay `Pending` and never connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Interactive,
    ServerOnly,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint override. When unset the schema handle's endpoint is used.
    pub endpoint: Option<String>,
    /// Default request timeout.
    pub timeout: Duration,
    /// Default headers, sent with every request and subscription.
    pub headers: HashMap<String, String>,
    /// Runtime environment.
    pub environment: Environment,
    /// How long a WebSocket subscription waits for `connection_ack`.
    pub ws_ack_timeout: Duration,
    /// Upper bound on a buffered, not yet terminated SSE event.
    pub sse_max_buffer_size: usize,
    /// Endpoints the application declares. Empty means "anything goes".
    pub known_endpoints: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(30),
            headers: HashMap::new(),
            environment: Environment::Interactive,
            ws_ack_timeout: Duration::from_secs(10),
            sse_max_buffer_size: 1024 * 1024,
            known_endpoints: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Creates a config that targets `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    /// Sets the endpoint override.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a default header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn ws_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ws_ack_timeout = timeout;
        self
    }

    pub fn sse_max_buffer_size(mut self, size: usize) -> Self {
        self.sse_max_buffer_size = size;
        self
    }

    /// Declares an endpoint the application knows about.
    pub fn known_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.known_endpoints.push(endpoint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ClientConfig::default()
            .endpoint("http://localhost:4000/graphql")
            .timeout(Duration::from_secs(3))
            .header("x-app", "gqf")
            .environment(Environment::ServerOnly)
            .known_endpoint("http://localhost:4000/graphql");

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:4000/graphql"));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.headers.get("x-app").map(String::as_str), Some("gqf"));
        assert_eq!(config.environment, Environment::ServerOnly);
        assert_eq!(config.known_endpoints.len(), 1);
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.endpoint.is_none());
        assert_eq!(config.environment, Environment::Interactive);
        assert_eq!(config.ws_ack_timeout, Duration::from_secs(10));
    }
}
