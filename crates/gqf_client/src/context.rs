//! Per-operation context.
//!
//! A context travels with every request and subscription: headers, an
//! optional timeout and arbitrary typed data keyed by `TypeId`. Operations
//! carry a definition context that each call may override.

use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Request-scoped options passed to handlers and transports.
///
/// ```
/// use gqf_client::OperationContext;
///
/// #[derive(Debug, PartialEq)]
/// struct TraceId(u64);
///
/// let base = OperationContext::new().header("x-app", "demo");
/// let call = OperationContext::new().header("authorization", "Bearer t").with(TraceId(7));
///
/// let merged = base.merged(&call);
/// assert_eq!(merged.get_header("x-app"), Some("demo"));
/// assert_eq!(merged.get::<TraceId>(), Some(&TraceId(7)));
/// ```
#[derive(Clone, Default)]
pub struct OperationContext {
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
    data: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl OperationContext {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a typed value, replacing any value of the same type.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.data.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Gets a typed value.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    /// Returns true if the context contains a value of the given type.
    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Gets a header value.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns all headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns `self` overlaid by `other`: headers and typed values from
    /// `other` win, and its timeout replaces ours when set.
    pub fn merged(&self, other: &OperationContext) -> OperationContext {
        let mut merged = self.clone();
        merged.headers.extend(
            other
                .headers
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        if other.timeout.is_some() {
            merged.timeout = other.timeout;
        }
        merged.data.extend(
            other
                .data
                .iter()
                .map(|(key, value)| (*key, Arc::clone(value))),
        );
        merged
    }

    /// Merges an optional override.
    pub fn merged_with(&self, other: Option<&OperationContext>) -> OperationContext {
        match other {
            Some(other) => self.merged(other),
            None => self.clone(),
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("data_count", &self.data.len())
            .finish()
    }
}
