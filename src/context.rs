//! Read-only view of the ambient call context.
//!
//! # Responsibilities
//! - Expose request-scoped metadata (tenant id, auth claims, headers) as a
//!   plain attribute lookup at interception time
//! - Provide a small owned context for callers that do not carry headers
//!
//! # Design Decisions
//! - Lookup only; the guard never mutates or propagates context
//! - Attribute names are matched case-insensitively (HTTP/2 metadata is lowercase)

use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderMap;

/// Metadata header carrying the tenant id.
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Attribute lookup over the current call's metadata.
pub trait ContextLookup {
    /// Returns the value of `name`, or `None` when absent.
    fn get(&self, name: &str) -> Option<&str>;
}

/// A context with no attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyContext;

impl ContextLookup for EmptyContext {
    fn get(&self, _name: &str) -> Option<&str> {
        None
    }
}

impl ContextLookup for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        HashMap::get(self, name).map(String::as_str)
    }
}

impl ContextLookup for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        BTreeMap::get(self, name).map(String::as_str)
    }
}

impl ContextLookup for HeaderMap {
    fn get(&self, name: &str) -> Option<&str> {
        HeaderMap::get(self, name).and_then(|v| v.to_str().ok())
    }
}

/// Owned request context keyed by lowercase attribute name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestContext {
    attributes: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying only a tenant id.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self::new().with(TENANT_ID_HEADER, tenant_id)
    }

    /// Add an attribute, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.get(TENANT_ID_HEADER)
    }
}

impl ContextLookup for RequestContext {
    fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl From<&HeaderMap> for RequestContext {
    fn from(headers: &HeaderMap) -> Self {
        let mut ctx = RequestContext::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                ctx.insert(name.as_str(), value);
            }
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_context_is_case_insensitive() {
        let ctx = RequestContext::new().with("X-Tenant-Id", "acme");
        assert_eq!(ctx.get("x-tenant-id"), Some("acme"));
        assert_eq!(ctx.tenant_id(), Some("acme"));
        assert_eq!(ctx.get("authorization"), None);
    }

    #[test]
    fn header_map_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_ID_HEADER, HeaderValue::from_static("t1"));

        assert_eq!(ContextLookup::get(&headers, "x-tenant-id"), Some("t1"));
        assert_eq!(RequestContext::from(&headers).tenant_id(), Some("t1"));
    }
}
