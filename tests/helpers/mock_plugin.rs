use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use serde_json::{Map, Value};
use warden::authn::{AuthenticationPlugin, AuthnError, AuthnOutcome, PluginRegistry};
use warden::authz::context::Principal;
use warden::command::{CommandOperation, ConfigEditable};

pub const MOCK_CLASS: &str = "mock";

/// Bearer-token plugin whose tokens carry their own roles, standing in for a
/// token-based scheme such as JWT.
///
/// Config: `{"class": "mock", "tokens": {"<token>": {"user": "..", "roles": [..]}}}`
#[derive(Debug, Clone)]
pub struct MockTokenPlugin {
    realm: Option<String>,
    block_unknown: bool,
    tokens: BTreeMap<String, Principal>,
}

impl MockTokenPlugin {
    pub fn from_config(config: &Value) -> Result<Self, AuthnError> {
        let mut tokens = BTreeMap::new();
        if let Some(entries) = config.get("tokens").and_then(Value::as_object) {
            for (token, claims) in entries {
                let user = claims
                    .get("user")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AuthnError::InvalidConfig(format!("token {token} has no user")))?;
                let roles: Vec<String> = claims
                    .get("roles")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                tokens.insert(token.clone(), Principal::new(user).with_roles(roles));
            }
        }
        Ok(Self {
            realm: config.get("realm").and_then(Value::as_str).map(str::to_string),
            block_unknown: config
                .get("blockUnknown")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            tokens,
        })
    }
}

impl AuthenticationPlugin for MockTokenPlugin {
    fn scheme(&self) -> &str {
        "Bearer"
    }

    fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    fn block_unknown(&self) -> bool {
        self.block_unknown
    }

    fn authenticate(&self, headers: &HeaderMap) -> AuthnOutcome {
        let Some(token) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        else {
            return AuthnOutcome::NotPresented;
        };
        match self.tokens.get(token) {
            Some(principal) => AuthnOutcome::Authenticated(principal.clone()),
            None => AuthnOutcome::Invalid,
        }
    }
}

impl ConfigEditable for MockTokenPlugin {
    fn edit(&self, latest: &Value, ops: &mut [CommandOperation]) -> Option<Value> {
        let mut working = latest.as_object().cloned().unwrap_or_default();
        let mut modified = false;
        for op in ops.iter_mut() {
            match op.name.as_str() {
                "set-token" => {
                    let Some(args) = op.data_map() else { continue };
                    let mut tokens = match working.remove("tokens") {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    for (token, claims) in args {
                        if claims.is_null() {
                            tokens.remove(&token);
                        } else {
                            tokens.insert(token, claims);
                        }
                    }
                    working.insert("tokens".into(), Value::Object(tokens));
                    modified = true;
                }
                other => {
                    let msg = format!("Unknown command '{other}'");
                    op.add_error(msg);
                }
            }
        }
        modified.then_some(Value::Object(working))
    }
}

/// The default registry plus the mock token class.
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::default();
    registry.register(
        MOCK_CLASS,
        Arc::new(|config: &Value| {
            Ok(Arc::new(MockTokenPlugin::from_config(config)?) as Arc<dyn AuthenticationPlugin>)
        }),
    );
    registry
}
