use std::sync::Arc;

use base64ct::{Base64, Encoding};
use serde_json::{json, Value};
use warden::authn::basic::hash_password;
use warden::authz::resolver::PermissionNameTable;
use warden::security::SecurityService;
use warden::store::MemoryStore;

use super::mock_plugin::registry;

pub fn basic_header(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        Base64::encode_string(format!("{user}:{password}").as_bytes())
    )
}

pub fn bearer_header(token: &str) -> String {
    format!("Bearer {token}")
}

/// Rules of the canonical collection scenario.
pub fn canonical_rules() -> Value {
    json!({
        "user-role": {
            "steve": ["dev", "user"],
            "tim": ["dev", "admin"],
            "joe": ["user"],
            "noble": ["dev", "user"]
        },
        "permissions": [
            {"name": "schema-edit", "role": "admin"},
            {"name": "collection-admin-read", "role": null},
            {"name": "collection-admin-edit", "role": "admin"},
            {"name": "mycoll_update", "collection": "mycoll", "path": "/update/*", "role": ["dev", "admin"]},
            {"name": "security-read", "role": "admin"},
            {"name": "security-edit", "role": "admin"}
        ]
    })
}

/// Builder for composite security documents in multi-scheme form
#[derive(Default)]
pub struct SecurityDocBuilder {
    authentication: Vec<Value>,
    authorization: Vec<Value>,
}

impl SecurityDocBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn basic_scheme(mut self, key: &str, users: &[(&str, &str)]) -> Self {
        let credentials: serde_json::Map<String, Value> = users
            .iter()
            .map(|(user, pw)| {
                let hash = hash_password(pw).expect("Failed to hash password");
                (user.to_string(), Value::String(hash))
            })
            .collect();
        self.authentication.push(json!({
            "scheme": key,
            "class": "basic",
            "realm": "warden",
            "credentials": credentials
        }));
        self
    }

    pub fn mock_scheme(mut self, key: &str, tokens: Value, block_unknown: bool) -> Self {
        self.authentication.push(json!({
            "scheme": key,
            "class": "mock",
            "blockUnknown": block_unknown,
            "tokens": tokens
        }));
        self
    }

    pub fn rules(mut self, key: &str, rules: Value) -> Self {
        let mut entry = rules;
        if let Some(map) = entry.as_object_mut() {
            map.insert("scheme".into(), Value::String(key.to_string()));
        }
        self.authorization.push(entry);
        self
    }

    pub fn build(self) -> Value {
        json!({
            "authentication": {"schemes": self.authentication},
            "authorization": {"schemes": self.authorization}
        })
    }
}

/// A service over an in-memory store, with the mock plugin class registered.
pub fn service(document: Value) -> (Arc<SecurityService>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(document));
    let service = SecurityService::open(
        store.clone(),
        Arc::new(registry()),
        Arc::new(PermissionNameTable::default()),
    )
    .expect("Failed to open security service");
    (Arc::new(service), store)
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not json")
}
