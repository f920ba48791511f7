//! Operation classification and the descriptors handed to handlers.

use crate::error::{ClientError, ClientResult};
use gqf_syntax::{print, OperationDocument, OperationType};
use serde_json::Value;
use std::sync::Arc;

/// Returns the kind of the single operation in `document`.
///
/// Fragment definitions are not counted. A document with no operation
/// fails with `UNRECOGNIZED_DOCUMENT`, one with several with
/// `AMBIGUOUS_DOCUMENT`.
pub fn classify(document: &OperationDocument) -> ClientResult<OperationType> {
    let mut operations = document.operations();
    let Some(first) = operations.next() else {
        return Err(ClientError::unrecognized_document());
    };
    let extra = operations.count();
    if extra > 0 {
        return Err(ClientError::ambiguous_document(extra + 1));
    }
    Ok(first.operation)
}

/// Everything a handler needs to execute one operation.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub document: Arc<OperationDocument>,
    /// The printed document, as sent on the wire.
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Value,
    pub url: String,
    pub operation: OperationType,
}

impl OperationDescriptor {
    pub fn new(
        document: Arc<OperationDocument>,
        operation: OperationType,
        variables: Value,
        url: impl Into<String>,
    ) -> Self {
        let query = print(&document);
        let operation_name = document.operation_name().map(str::to_string);
        Self {
            document,
            query,
            operation_name,
            variables,
            url: url.into(),
            operation,
        }
    }

    /// The JSON body of a GraphQL request: `{query, variables}` plus
    /// `operationName` when the operation is named.
    pub fn request_body(&self) -> Value {
        let mut body = serde_json::json!({
            "query": self.query,
            "variables": self.variables,
        });
        if let (Some(name), Some(map)) = (&self.operation_name, body.as_object_mut()) {
            map.insert("operationName".to_string(), Value::String(name.clone()));
        }
        body
    }
}

/// A query or mutation handed to a request handler.
pub type RequestDescriptor = OperationDescriptor;

/// A subscription handed to a transport.
pub type SubscriptionDescriptor = OperationDescriptor;
