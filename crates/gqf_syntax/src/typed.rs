//! Documents tagged with their result and variable types.

use crate::ast::{OperationDocument, OperationType};
use crate::error::SyntaxError;
use crate::parser::parse;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A document whose result type is `D` and whose variables type is `V`.
///
/// The type parameters are phantom: nothing is checked against a schema.
/// They flow into the typed operations built from the document.
pub struct TypedDocument<D, V> {
    document: Arc<OperationDocument>,
    _types: PhantomData<fn() -> (D, V)>,
}

impl<D, V> TypedDocument<D, V> {
    pub fn new(document: OperationDocument) -> Self {
        Self::from_shared(Arc::new(document))
    }

    pub fn from_shared(document: Arc<OperationDocument>) -> Self {
        Self {
            document,
            _types: PhantomData,
        }
    }

    /// Parses source text into a typed document.
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        parse(source).map(Self::new)
    }

    pub fn document(&self) -> &OperationDocument {
        &self.document
    }

    pub fn shared(&self) -> Arc<OperationDocument> {
        Arc::clone(&self.document)
    }

    /// The operation types present in the document, in source order.
    pub fn operation_types(&self) -> Vec<OperationType> {
        self.document
            .operations()
            .map(|operation| operation.operation)
            .collect()
    }

    /// Reinterprets the document with different result and variable types.
    pub fn retype<D2, V2>(self) -> TypedDocument<D2, V2> {
        TypedDocument::from_shared(self.document)
    }
}

impl<D, V> Clone for TypedDocument<D, V> {
    fn clone(&self) -> Self {
        Self::from_shared(Arc::clone(&self.document))
    }
}

impl<D, V> fmt::Debug for TypedDocument<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedDocument")
            .field("document", &self.document)
            .finish()
    }
}

impl<D, V> From<OperationDocument> for TypedDocument<D, V> {
    fn from(document: OperationDocument) -> Self {
        Self::new(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Data;
    struct Vars;

    #[test]
    fn test_clone_shares_document() {
        let typed = TypedDocument::<Data, Vars>::parse("subscription { tick }").unwrap();
        let cloned = typed.clone();
        assert!(Arc::ptr_eq(&typed.shared(), &cloned.shared()));
        assert_eq!(cloned.operation_types(), vec![OperationType::Subscription]);
    }

    #[test]
    fn test_retype_keeps_document() {
        let typed = TypedDocument::<Data, Vars>::parse("{ a } mutation M { b }").unwrap();
        let shared = typed.shared();
        let retyped: TypedDocument<(), ()> = typed.retype();
        assert!(Arc::ptr_eq(&shared, &retyped.shared()));
        assert_eq!(
            retyped.operation_types(),
            vec![OperationType::Query, OperationType::Mutation]
        );
    }
}
