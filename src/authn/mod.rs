//! Authentication plugins.
//!
//! A plugin inspects request headers and either produces a [`Principal`], reports
//! that no credential of its kind was presented, or rejects the presented one.
//! Plugins also own their section of the security document and edit it through
//! [`ConfigEditable`].

pub mod basic;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::{json, Value};
use thiserror::Error;

use crate::authz::context::Principal;
use crate::command::ConfigEditable;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthnError {
    #[error("Unknown authentication plugin class `{0}`")]
    #[diagnostic(
        code(warden::authn::unknown_class),
        help("Register a factory for this class in the plugin registry, or use `basic`")
    )]
    UnknownClass(String),

    #[error("Authentication config must name a `class` or a `scheme`")]
    #[diagnostic(code(warden::authn::missing_class))]
    MissingClass,

    #[error("Invalid authentication config: {0}")]
    #[diagnostic(code(warden::authn::invalid_config))]
    InvalidConfig(String),

    #[error("Password hashing failed: {0}")]
    #[diagnostic(code(warden::authn::hash))]
    Hash(String),
}

impl IntoResponse for AuthnError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthnError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// What a plugin made of the request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthnOutcome {
    Authenticated(Principal),
    /// No credential this plugin understands was presented
    NotPresented,
    /// A credential was presented and rejected
    Invalid,
}

pub trait AuthenticationPlugin: ConfigEditable + fmt::Debug {
    /// HTTP auth scheme token the plugin reads from `Authorization`, e.g. `Basic`.
    fn scheme(&self) -> &str;

    fn realm(&self) -> Option<&str>;

    /// Whether requests without a credential must be rejected.
    fn block_unknown(&self) -> bool;

    fn authenticate(&self, headers: &HeaderMap) -> AuthnOutcome;
}

/// `<scheme>` or `<scheme> realm="<realm>"`.
pub fn format_challenge(scheme: &str, realm: Option<&str>) -> String {
    match realm {
        Some(realm) => format!("{scheme} realm=\"{realm}\""),
        None => scheme.to_string(),
    }
}

pub type PluginFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn AuthenticationPlugin>, AuthnError> + Send + Sync>;

/// Plugin constructors keyed by class name.
#[derive(Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// A registry with no classes at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, class: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(class.into(), factory);
    }

    /// Class of a plugin config: its `class`, else its `scheme`.
    pub fn class_of(config: &Value) -> Result<&str, AuthnError> {
        config
            .get("class")
            .and_then(Value::as_str)
            .or_else(|| config.get("scheme").and_then(Value::as_str))
            .ok_or(AuthnError::MissingClass)
    }

    pub fn create(&self, config: &Value) -> Result<Arc<dyn AuthenticationPlugin>, AuthnError> {
        let class = Self::class_of(config)?;
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| AuthnError::UnknownClass(class.to_string()))?;
        factory(config)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            basic::CLASS,
            Arc::new(|config: &Value| {
                let plugin = basic::BasicAuthPlugin::from_config(config)?;
                Ok(Arc::new(plugin) as Arc<dyn AuthenticationPlugin>)
            }),
        );
        registry
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<_> = self.factories.keys().collect();
        classes.sort();
        f.debug_struct("PluginRegistry")
            .field("classes", &classes)
            .finish()
    }
}
