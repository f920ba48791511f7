//! Operation variables: a plain value or a getter read at execution time.

use crate::error::{ClientResult, ErrorCode, ResultExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Variables for an operation call.
///
/// A getter is read every time the operation actually executes, so an
/// async query refreshed later sees the current value rather than the one
/// captured at call time.
pub enum Variables<V> {
    Value(V),
    Getter(Arc<dyn Fn() -> V + Send + Sync>),
}

impl<V> Variables<V> {
    /// Wraps a getter.
    pub fn getter(getter: impl Fn() -> V + Send + Sync + 'static) -> Self {
        Self::Getter(Arc::new(getter))
    }

    /// Reads the current value.
    pub fn resolve(&self) -> V
    where
        V: Clone,
    {
        match self {
            Self::Value(value) => value.clone(),
            Self::Getter(getter) => getter(),
        }
    }
}

impl<V: Serialize + Send + Sync + 'static> Variables<V> {
    /// Reads the variables once, as JSON.
    pub(crate) fn into_json(self) -> ClientResult<Value> {
        match self {
            Self::Value(value) => to_json(&value),
            Self::Getter(getter) => to_json(&getter()),
        }
    }

    /// Converts into a resolver producing the JSON form on each call.
    pub(crate) fn into_json_resolver(self) -> JsonResolver {
        match self {
            Self::Value(value) => {
                let resolved = to_json(&value);
                Arc::new(move || resolved.clone())
            }
            Self::Getter(getter) => Arc::new(move || to_json(&getter())),
        }
    }
}

/// Produces the JSON variables of one execution.
pub(crate) type JsonResolver = Arc<dyn Fn() -> ClientResult<Value> + Send + Sync>;

/// Serializes variables. `null` (from `()` or `None`) becomes `{}`.
pub(crate) fn to_json<V: Serialize>(value: &V) -> ClientResult<Value> {
    let json = serde_json::to_value(value).map_client_err(ErrorCode::SerializeError)?;
    Ok(match json {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    })
}

impl<V> From<V> for Variables<V> {
    fn from(value: V) -> Self {
        Self::Value(value)
    }
}

impl<V: Default> Default for Variables<V> {
    fn default() -> Self {
        Self::Value(V::default())
    }
}

impl<V: Clone> Clone for Variables<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Getter(getter) => Self::Getter(Arc::clone(getter)),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Variables<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Getter(_) => f.write_str("Getter(..)"),
        }
    }
}
