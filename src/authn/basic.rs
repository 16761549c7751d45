//! HTTP Basic authentication against argon2-hashed credentials.

use std::collections::BTreeMap;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64ct::{Base64, Encoding};
use serde_json::{Map, Value};

use crate::authn::{AuthenticationPlugin, AuthnError, AuthnOutcome};
use crate::authz::context::Principal;
use crate::authz::types::string_list;
use crate::command::{CommandOperation, ConfigEditable};

pub const CLASS: &str = "basic";
pub const SCHEME: &str = "Basic";

const BLOCK_UNKNOWN: &str = "blockUnknown";
const FORWARD_CREDENTIALS: &str = "forwardCredentials";
const REALM: &str = "realm";
const CREDENTIALS: &str = "credentials";

#[derive(Debug, Clone)]
pub struct BasicAuthPlugin {
    realm: Option<String>,
    block_unknown: bool,
    /// user -> PHC string
    credentials: BTreeMap<String, String>,
}

impl BasicAuthPlugin {
    pub fn from_config(config: &Value) -> Result<Self, AuthnError> {
        let realm = match config.get(REALM) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(AuthnError::InvalidConfig(format!(
                    "`realm` must be a string, got {other}"
                )))
            }
        };

        let mut credentials = BTreeMap::new();
        match config.get(CREDENTIALS) {
            None | Some(Value::Null) => {}
            Some(Value::Object(entries)) => {
                for (user, hash) in entries {
                    let hash = hash.as_str().ok_or_else(|| {
                        AuthnError::InvalidConfig(format!(
                            "credential of user `{user}` must be a string"
                        ))
                    })?;
                    credentials.insert(user.clone(), hash.to_string());
                }
            }
            Some(other) => {
                return Err(AuthnError::InvalidConfig(format!(
                    "`credentials` must be an object, got {other}"
                )))
            }
        }

        // stored for whoever forwards requests between nodes; only its type matters here
        bool_property(config, FORWARD_CREDENTIALS, false)?;

        Ok(Self {
            realm,
            block_unknown: bool_property(config, BLOCK_UNKNOWN, true)?,
            credentials,
        })
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.credentials.contains_key(user)
    }
}

fn bool_property(config: &Value, key: &str, default: bool) -> Result<bool, AuthnError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(AuthnError::InvalidConfig(format!(
            "`{key}` must be a boolean, got {other}"
        ))),
    }
}

/// Hash a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, AuthnError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthnError::Hash(e.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("stored credential is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Split a `Basic` authorization header into user and password.
///
/// `None` means the header is not a Basic credential at all; `Some(Err(()))` means
/// it is one but cannot be decoded.
fn decode_basic(headers: &HeaderMap) -> Option<Result<(String, String), ()>> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return None;
    }
    let decoded = Base64::decode_vec(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    Some(
        decoded
            .and_then(|s| {
                s.split_once(':')
                    .map(|(user, pass)| (user.to_string(), pass.to_string()))
            })
            .ok_or(()),
    )
}

impl AuthenticationPlugin for BasicAuthPlugin {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    fn block_unknown(&self) -> bool {
        self.block_unknown
    }

    fn authenticate(&self, headers: &HeaderMap) -> AuthnOutcome {
        let (user, password) = match decode_basic(headers) {
            None => return AuthnOutcome::NotPresented,
            Some(Err(())) => {
                tracing::debug!("malformed Basic credential");
                return AuthnOutcome::Invalid;
            }
            Some(Ok(pair)) => pair,
        };
        match self.credentials.get(&user) {
            Some(hash) if verify_password(hash, &password) => {
                AuthnOutcome::Authenticated(Principal::new(user))
            }
            _ => {
                tracing::debug!(%user, "Basic authentication failed");
                AuthnOutcome::Invalid
            }
        }
    }
}

impl ConfigEditable for BasicAuthPlugin {
    fn edit(&self, latest: &Value, ops: &mut [CommandOperation]) -> Option<Value> {
        let mut working = match latest {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let mut modified = false;

        for op in ops.iter_mut() {
            let mut candidate = working.clone();
            let applied = match op.name.as_str() {
                "set-user" => set_user(&mut candidate, op),
                "delete-user" => delete_user(&mut candidate, op),
                "set-property" => set_property(&mut candidate, op),
                other => {
                    let msg = format!("Unknown command '{other}'");
                    op.add_error(msg);
                    false
                }
            };
            if applied {
                working = candidate;
                modified = true;
            }
        }

        modified.then_some(Value::Object(working))
    }
}

fn take_credentials(section: &mut Map<String, Value>) -> Map<String, Value> {
    match section.remove(CREDENTIALS) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn set_user(section: &mut Map<String, Value>, op: &mut CommandOperation) -> bool {
    let Some(args) = op.data_map() else {
        return false;
    };
    let mut hashed = Vec::with_capacity(args.len());
    for (user, password) in args {
        match password {
            Value::Null => hashed.push((user, None)),
            Value::String(pw) => match hash_password(&pw) {
                Ok(h) => hashed.push((user, Some(h))),
                Err(e) => {
                    op.add_error(e.to_string());
                    return false;
                }
            },
            other => {
                op.add_error(format!(
                    "password of user '{user}' must be a string or null, got {other}"
                ));
                return false;
            }
        }
    }

    let mut credentials = take_credentials(section);
    for (user, hash) in hashed {
        match hash {
            Some(h) => {
                credentials.insert(user, Value::String(h));
            }
            None => {
                credentials.remove(&user);
            }
        }
    }
    section.insert(CREDENTIALS.to_string(), Value::Object(credentials));
    true
}

fn delete_user(section: &mut Map<String, Value>, op: &mut CommandOperation) -> bool {
    let Some(users) = string_list(&op.data) else {
        op.add_error("delete-user takes a user name or a list of user names");
        return false;
    };
    let mut credentials = take_credentials(section);
    let mut removed = false;
    for user in users {
        removed |= credentials.remove(&user).is_some();
    }
    section.insert(CREDENTIALS.to_string(), Value::Object(credentials));
    removed
}

fn set_property(section: &mut Map<String, Value>, op: &mut CommandOperation) -> bool {
    let Some(args) = op.data_map() else {
        return false;
    };
    for (key, value) in &args {
        let valid = match key.as_str() {
            BLOCK_UNKNOWN | FORWARD_CREDENTIALS => value.is_boolean(),
            REALM => value.is_string(),
            _ => {
                op.add_error(format!("Unknown property {key}"));
                return false;
            }
        };
        if !valid {
            op.add_error(format!("Invalid value for property {key}: {value}"));
            return false;
        }
    }
    section.extend(args);
    true
}
