//! GraphQL response payloads.

use crate::error::{ClientError, ClientResult, ErrorCode, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A GraphQL execution result, as returned by a POST or carried in a
/// subscription `next` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    pub fn from_value(value: Value) -> ClientResult<Self> {
        serde_json::from_value(value).map_client_err(ErrorCode::DeserializeError)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The error list as JSON.
    pub fn errors_value(&self) -> Value {
        serde_json::to_value(&self.errors).unwrap_or(Value::Null)
    }

    /// Returns `data`, failing on GraphQL errors or a missing `data`.
    pub fn into_data(self) -> ClientResult<Value> {
        if self.has_errors() {
            return Err(ClientError::graphql(self.errors_value()));
        }
        self.data.ok_or_else(ClientError::no_data)
    }
}

/// A GraphQL error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_data() {
        let result = ExecutionResult::from_value(json!({ "data": { "hello": "world" } })).unwrap();
        assert_eq!(result.into_data().unwrap(), json!({ "hello": "world" }));
    }

    #[test]
    fn test_errors_take_precedence() {
        let result = ExecutionResult::from_value(json!({
            "data": null,
            "errors": [{ "message": "denied", "path": ["secret"], "locations": [{ "line": 1, "column": 3 }] }]
        }))
        .unwrap();
        assert!(result.data.is_none());
        let err = result.into_data().unwrap_err();
        assert_eq!(err.code, ErrorCode::GraphqlErrors);
        assert_eq!(err.message, "denied");
        assert_eq!(err.extension("errors").unwrap()[0]["path"][0], "secret");
    }

    #[test]
    fn test_missing_data() {
        let err = ExecutionResult::from_value(json!({})).unwrap().into_data().unwrap_err();
        assert_eq!(err.code, ErrorCode::NoData);
    }

    #[test]
    fn test_malformed_payload() {
        let err = ExecutionResult::from_value(json!({ "errors": "nope" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeserializeError);
    }
}
