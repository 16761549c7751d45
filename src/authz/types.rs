use std::collections::{BTreeMap, BTreeSet};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authz::context::RequestType;
use crate::authz::errors::AuthzError;

/// Prefix marking a param matcher as a (case-insensitive) regular expression.
pub const REGEX_PREFIX: &str = "REGEX:";
/// Role token meaning "any authenticated principal".
pub const WILDCARD_ROLE: &str = "*";

const PERMISSION_KEYS: &[&str] = &[
    "name",
    "role",
    "collection",
    "path",
    "method",
    "params",
    "index",
];

/// user -> roles held by that user.
pub type RoleMap = BTreeMap<String, BTreeSet<String>>;

// ---------- Permission building blocks ----------

/// Role requirement of a permission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleSpec {
    /// `role: null` or absent: no authentication required.
    #[default]
    Open,
    /// `role: "*"`: any authenticated principal.
    AnyAuthenticated,
    /// One of these roles is required.
    Roles(BTreeSet<String>),
}

impl RoleSpec {
    pub fn from_value(value: &Value) -> Result<Self, AuthzError> {
        let roles = match value {
            Value::Null => return Ok(RoleSpec::Open),
            other => string_list(other).ok_or_else(|| {
                AuthzError::InvalidPermission(format!(
                    "`role` must be null, a string or a list of strings, got {other}"
                ))
            })?,
        };
        if roles.iter().any(|r| r == WILDCARD_ROLE) {
            return Ok(RoleSpec::AnyAuthenticated);
        }
        if roles.is_empty() {
            return Ok(RoleSpec::Open);
        }
        Ok(RoleSpec::Roles(roles.into_iter().collect()))
    }

    pub fn to_value(&self) -> Value {
        match self {
            RoleSpec::Open => Value::Null,
            RoleSpec::AnyAuthenticated => Value::String(WILDCARD_ROLE.to_string()),
            RoleSpec::Roles(roles) => scalar_or_list(roles.iter()),
        }
    }

    /// True when a principal holding `roles` satisfies this requirement.
    pub fn accepts(&self, authenticated: bool, roles: &BTreeSet<String>) -> bool {
        match self {
            RoleSpec::Open => true,
            RoleSpec::AnyAuthenticated => authenticated,
            RoleSpec::Roles(required) => authenticated && !required.is_disjoint(roles),
        }
    }
}

/// Resource path glob: a literal prefix with an optional trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern(String);

impl PathPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, resource: &str) -> bool {
        let pattern = self.0.as_str();
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return resource == prefix
                || resource
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'));
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return resource.starts_with(prefix);
        }
        resource == pattern
    }
}

/// One accepted value for a request parameter.
#[derive(Debug, Clone)]
pub struct ParamMatcher {
    raw: String,
    regex: Option<Regex>,
}

impl ParamMatcher {
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let regex = match raw.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| AuthzError::InvalidRegex {
                        pattern: raw.to_string(),
                        source,
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(value),
            None => self.raw == value,
        }
    }
}

impl PartialEq for ParamMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

// ---------- Permission ----------

/// One access-control rule. `index` is its 1-based position in the rule list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Permission {
    pub name: Option<String>,
    pub role: RoleSpec,
    pub collection: Option<String>,
    pub path: Option<PathPattern>,
    pub method: Option<Vec<String>>,
    pub params: Option<BTreeMap<String, Vec<ParamMatcher>>>,
    pub index: usize,
}

impl Permission {
    /// Build a permission from its JSON object form. The stored `index` is ignored;
    /// positions are always assigned by the owning document.
    pub fn from_json(map: &Map<String, Value>) -> Result<Self, AuthzError> {
        if let Some(unknown) = map.keys().find(|k| !PERMISSION_KEYS.contains(&k.as_str())) {
            return Err(AuthzError::InvalidPermission(format!(
                "unknown key `{unknown}`"
            )));
        }

        let role = match map.get("role") {
            Some(v) => RoleSpec::from_value(v)?,
            None => RoleSpec::Open,
        };

        let method = match map.get("method") {
            None | Some(Value::Null) => None,
            Some(v) => Some(string_list(v).ok_or_else(|| {
                AuthzError::InvalidPermission("`method` must be a string or a list of strings".into())
            })?),
        };

        let params = match map.get("params") {
            None | Some(Value::Null) => None,
            Some(Value::Object(entries)) => {
                let mut params = BTreeMap::new();
                for (key, values) in entries {
                    let raw = string_list(values).ok_or_else(|| {
                        AuthzError::InvalidPermission(format!(
                            "values of param `{key}` must be a string or a list of strings"
                        ))
                    })?;
                    let matchers = raw
                        .iter()
                        .map(|r| ParamMatcher::parse(r))
                        .collect::<Result<Vec<_>, _>>()?;
                    params.insert(key.clone(), matchers);
                }
                Some(params)
            }
            Some(other) => {
                return Err(AuthzError::InvalidPermission(format!(
                    "`params` must be an object, got {other}"
                )))
            }
        };

        Ok(Self {
            name: optional_string(map, "name")?,
            role,
            collection: optional_string(map, "collection")?,
            path: optional_string(map, "path")?.map(PathPattern::new),
            method,
            params,
            index: 0,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".into(), Value::String(name.clone()));
        }
        map.insert("role".into(), self.role.to_value());
        if let Some(collection) = &self.collection {
            map.insert("collection".into(), Value::String(collection.clone()));
        }
        if let Some(path) = &self.path {
            map.insert("path".into(), Value::String(path.as_str().to_string()));
        }
        if let Some(method) = &self.method {
            map.insert("method".into(), scalar_or_list(method.iter()));
        }
        if let Some(params) = &self.params {
            let entries = params
                .iter()
                .map(|(k, v)| {
                    let raw: Vec<Value> = v
                        .iter()
                        .map(|m| Value::String(m.as_str().to_string()))
                        .collect();
                    (k.clone(), Value::Array(raw))
                })
                .collect();
            map.insert("params".into(), Value::Object(entries));
        }
        map.insert("index".into(), Value::from(self.index));
        Value::Object(map)
    }

    /// Reject rules that mix a well-known permission name with structural constraints.
    pub fn validate(&self, known_names: &BTreeSet<String>) -> Result<(), AuthzError> {
        let Some(name) = &self.name else {
            return Ok(());
        };
        if known_names.contains(name)
            && (self.path.is_some() || self.method.is_some() || self.params.is_some())
        {
            return Err(AuthzError::InvalidPermission(format!(
                "permission `{name}` is a well-known permission and cannot have path, method or params"
            )));
        }
        Ok(())
    }
}

// ---------- Rule document ----------

/// Ordered permission list plus role map: the unit of atomic replacement.
///
/// Positions are explicit. Every structural change goes through `insert`,
/// `replace` or `remove`, which restore the `index == position + 1` invariant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleDocument {
    pub user_roles: RoleMap,
    permissions: Vec<Permission>,
}

impl RuleDocument {
    pub fn new(user_roles: RoleMap, permissions: Vec<Permission>) -> Self {
        let mut doc = Self {
            user_roles,
            permissions,
        };
        doc.renumber();
        doc
    }

    pub fn from_json(value: &Value) -> Result<Self, AuthzError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(AuthzError::InvalidDocument(format!(
                    "expected a json object, got {other}"
                )))
            }
        };

        let mut user_roles = RoleMap::new();
        match map.get("user-role") {
            None | Some(Value::Null) => {}
            Some(Value::Object(entries)) => {
                for (user, roles) in entries {
                    let roles = string_list(roles).ok_or_else(|| {
                        AuthzError::InvalidDocument(format!(
                            "roles of user `{user}` must be a string or a list of strings"
                        ))
                    })?;
                    user_roles.insert(user.clone(), roles.into_iter().collect());
                }
            }
            Some(other) => {
                return Err(AuthzError::InvalidDocument(format!(
                    "`user-role` must be an object, got {other}"
                )))
            }
        }

        let mut permissions = Vec::new();
        match map.get("permissions") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let Value::Object(perm) = item else {
                        return Err(AuthzError::InvalidDocument(format!(
                            "permission entries must be objects, got {item}"
                        )));
                    };
                    permissions.push(Permission::from_json(perm)?);
                }
            }
            Some(other) => {
                return Err(AuthzError::InvalidDocument(format!(
                    "`permissions` must be an array, got {other}"
                )))
            }
        }

        Ok(Self::new(user_roles, permissions))
    }

    pub fn to_json(&self) -> Value {
        let user_roles: Map<String, Value> = self
            .user_roles
            .iter()
            .map(|(user, roles)| (user.clone(), scalar_or_list(roles.iter())))
            .collect();
        let permissions = self.permissions.iter().map(Permission::to_json).collect();
        let mut map = Map::new();
        map.insert("user-role".into(), Value::Object(user_roles));
        map.insert("permissions".into(), Value::Array(permissions));
        Value::Object(map)
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Permission at the 1-based `index`.
    pub fn get(&self, index: usize) -> Option<&Permission> {
        index.checked_sub(1).and_then(|i| self.permissions.get(i))
    }

    /// Roles configured for `user` in the role map.
    pub fn roles_of(&self, user: &str) -> BTreeSet<String> {
        self.user_roles.get(user).cloned().unwrap_or_default()
    }

    /// Insert at the 1-based position `before` (`len + 1` appends), shifting later rules up.
    pub fn insert(&mut self, before: usize, permission: Permission) -> bool {
        if before == 0 || before > self.permissions.len() + 1 {
            return false;
        }
        self.permissions.insert(before - 1, permission);
        self.renumber();
        true
    }

    pub fn push(&mut self, permission: Permission) {
        self.permissions.push(permission);
        self.renumber();
    }

    /// Replace the rule at the 1-based `index` in place.
    pub fn replace(&mut self, index: usize, mut permission: Permission) -> bool {
        let Some(slot) = index.checked_sub(1).and_then(|i| self.permissions.get_mut(i)) else {
            return false;
        };
        permission.index = index;
        *slot = permission;
        true
    }

    /// Remove the rule at the 1-based `index`, shifting later rules down.
    pub fn remove(&mut self, index: usize) -> Option<Permission> {
        if index == 0 || index > self.permissions.len() {
            return None;
        }
        let removed = self.permissions.remove(index - 1);
        self.renumber();
        Some(removed)
    }

    fn renumber(&mut self) {
        for (pos, perm) in self.permissions.iter_mut().enumerate() {
            perm.index = pos + 1;
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// e.g. "/update/json/docs"
    pub resource: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Vec<String>>,
    /// Permission name announced by the handler serving the request, if it knows it
    #[serde(default)]
    pub permission: Option<String>,
    /// Raw `Authorization` header value presented by the client
    #[serde(default)]
    pub authorization: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub decision: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    pub challenges: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionsQuery {
    /// Comma-separated role names, e.g. `?role=dev,admin`. Absent means anonymous.
    #[serde(default)]
    pub role: Option<String>,
}

impl PermissionsQuery {
    pub fn roles(&self) -> Option<BTreeSet<String>> {
        let roles: BTreeSet<String> = self
            .role
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        (!roles.is_empty()).then_some(roles)
    }
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub permissions: BTreeSet<String>,
}

// ---------- helpers ----------

pub(crate) fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn scalar_or_list<'a>(mut items: impl ExactSizeIterator<Item = &'a String>) -> Value {
    if items.len() == 1 {
        if let Some(only) = items.next() {
            return Value::String(only.clone());
        }
    }
    Value::Array(items.map(|s| Value::String(s.clone())).collect())
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Result<Option<String>, AuthzError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(AuthzError::InvalidPermission(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}
