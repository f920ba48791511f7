//! The schema handle an application binds its operations to.

use gqf_syntax::{EnumHelper, Gqf};

/// A schema handle: the document builder, the enum helper and the endpoint
/// documents built with them are sent to.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    endpoint: Option<String>,
    gqf: Gqf,
    enum_helper: EnumHelper,
}

impl Schema {
    /// A schema handle without an endpoint. The client config must then
    /// supply one.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn gqf(&self) -> &Gqf {
        &self.gqf
    }

    pub fn enum_helper(&self) -> &EnumHelper {
        &self.enum_helper
    }
}
