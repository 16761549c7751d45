//! Per-request input to the authorization engine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::authz::resolver::PermissionName;

/// Coarse classification of an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Admin,
    Collection,
    Core,
    #[default]
    Unknown,
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    /// Key of the scheme that authenticated this principal (multi-scheme mode)
    pub scheme: Option<String>,
    /// Roles asserted by the credential itself, e.g. verified token claims
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: None,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }
}

/// Capability a request handler may expose: naming the permission its request needs.
pub trait PermissionNameProvider: Send + Sync {
    fn permission_name(&self, ctx: &RequestContext) -> PermissionName;
}

impl<F> PermissionNameProvider for F
where
    F: Fn(&RequestContext) -> PermissionName + Send + Sync,
{
    fn permission_name(&self, ctx: &RequestContext) -> PermissionName {
        self(ctx)
    }
}

/// Everything the engine knows about one request. Built per request and dropped after.
#[derive(Clone, Default)]
pub struct RequestContext {
    pub resource: String,
    pub method: Option<String>,
    pub request_type: RequestType,
    pub collections: Vec<String>,
    pub params: BTreeMap<String, Vec<String>>,
    pub handler: Option<Arc<dyn PermissionNameProvider>>,
    pub principal: Option<Principal>,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn request_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn handler(mut self, handler: Arc<dyn PermissionNameProvider>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Handler that always announces the same permission name.
    pub fn named(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.handler(Arc::new(move |_: &RequestContext| {
            PermissionName::Named(name.clone())
        }))
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn user(self, name: impl Into<String>) -> Self {
        self.principal(Principal::new(name))
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// First submitted value of a request parameter.
    pub fn first_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("resource", &self.resource)
            .field("method", &self.method)
            .field("request_type", &self.request_type)
            .field("collections", &self.collections)
            .field("params", &self.params)
            .field("has_handler", &self.handler.is_some())
            .field("principal", &self.principal)
            .finish()
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allow,
    Forbidden,
    NeedsCredentials,
}

impl AuthorizationDecision {
    pub fn status_code(self) -> StatusCode {
        match self {
            AuthorizationDecision::Allow => StatusCode::OK,
            AuthorizationDecision::Forbidden => StatusCode::FORBIDDEN,
            AuthorizationDecision::NeedsCredentials => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthorizationDecision::Allow => "allow",
            AuthorizationDecision::Forbidden => "forbidden",
            AuthorizationDecision::NeedsCredentials => "needs-credentials",
        }
    }
}
