//! Operation keys.
//!
//! A key fingerprints a document together with its variables. It addresses
//! async-data cache entries and subscription sessions, so two structurally
//! equal (document, variables) pairs must always produce the same key.

use gqf_syntax::{print, OperationDocument};
use rustc_hash::FxHasher;
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A deterministic fingerprint of (document, variables).
///
/// Equality, hashing and ordering use the canonical text, so two pairs whose
/// digests collide still address different slots. The digest is only the
/// rendered form.
#[derive(Clone)]
pub struct OperationKey {
    digest: Arc<str>,
    document: Arc<str>,
    variables: Arc<str>,
}

impl OperationKey {
    /// Computes the key of a document and its variables.
    pub fn new(document: &OperationDocument, variables: &Value) -> Self {
        Self::from_printed(&print(document), variables)
    }

    /// Computes the key from an already printed document.
    pub fn from_printed(printed: &str, variables: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(variables, &mut canonical);

        let mut hasher = FxHasher::default();
        printed.hash(&mut hasher);
        canonical.hash(&mut hasher);
        let key = Self {
            digest: format!("{:016x}", hasher.finish()).into(),
            document: printed.into(),
            variables: canonical.into(),
        };

        tracing::debug!(key = %key, "computed operation key");
        key
    }

    /// The 16-hex-digit digest.
    pub fn as_str(&self) -> &str {
        &self.digest
    }

    /// The canonical variables JSON, with object keys sorted.
    pub fn canonical_variables(&self) -> &str {
        &self.variables
    }

    fn canonical(&self) -> (&str, &str) {
        (&self.document, &self.variables)
    }
}

impl PartialEq for OperationKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for OperationKey {}

impl Hash for OperationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl PartialOrd for OperationKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OperationKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl fmt::Debug for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OperationKey").field(&self.digest).finish()
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

impl AsRef<str> for OperationKey {
    fn as_ref(&self) -> &str {
        &self.digest
    }
}

/// Writes JSON with object keys sorted at every level. Array order is kept.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
