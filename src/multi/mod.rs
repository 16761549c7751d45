//! Multi-scheme dispatch.
//!
//! The composite security document has an `authentication` and an `authorization`
//! section. In single-scheme mode each section holds one plugin config (or rule
//! document) directly. In multi-scheme mode each section holds
//! `"schemes": [{"scheme": <key>, ...}]`, and every edit command names its target
//! scheme one level below the command: `{"set-user": {"basic": {"harry": "pw"}}}`.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use crate::authn::{format_challenge, AuthenticationPlugin, AuthnOutcome, PluginRegistry};
use crate::authz::context::{AuthorizationDecision, Principal, RequestContext};
use crate::authz::resolver::PermissionNameTable;
use crate::authz::types::RuleDocument;
use crate::authz::RuleBasedAuthorization;
use crate::command::{CommandOperation, ConfigEditable};
use crate::errors::WardenError;

pub const SCHEMES: &str = "schemes";
pub const SCHEME_KEY: &str = "scheme";
pub const DEFAULT_SCHEME: &str = "default";

pub const ADD_SCHEME: &str = "add-scheme";
pub const REMOVE_SCHEME: &str = "remove-scheme";

/// Top-level section of the composite security document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Authentication,
    Authorization,
}

impl Section {
    pub fn key(self) -> &'static str {
        match self {
            Section::Authentication => "authentication",
            Section::Authorization => "authorization",
        }
    }
}

/// One named authentication + authorization pairing.
#[derive(Debug, Clone)]
pub struct SchemeEntry {
    pub key: String,
    /// `None` when only authorization is configured
    pub authn: Option<Arc<dyn AuthenticationPlugin>>,
    pub authz: RuleBasedAuthorization,
    /// Scheme name sent in `WWW-Authenticate`
    challenge_name: String,
}

impl SchemeEntry {
    /// `<scheme> realm="<realm>"`, or `None` for an authorization-only scheme.
    pub fn challenge(&self) -> Option<String> {
        let plugin = self.authn.as_ref()?;
        Some(format_challenge(&self.challenge_name, plugin.realm()))
    }
}

/// Outcome of authentication routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthnResult {
    Authenticated(Principal),
    Anonymous,
    /// Reject the request, sending one `WWW-Authenticate` value per entry
    Challenge(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct MultiSchemeDispatcher {
    schemes: Vec<SchemeEntry>,
    multi: bool,
    registry: Arc<PluginRegistry>,
    names: Arc<PermissionNameTable>,
}

impl MultiSchemeDispatcher {
    /// Build every scheme described by a composite security document.
    pub fn from_config(
        document: &Value,
        registry: Arc<PluginRegistry>,
        names: Arc<PermissionNameTable>,
    ) -> Result<Self, WardenError> {
        let authn_section = present(document.get(Section::Authentication.key()));
        let authz_section = present(document.get(Section::Authorization.key()));

        let mut schemes = Vec::new();
        let multi = authn_section.is_some_and(|s| s.get(SCHEMES).is_some());

        if multi {
            let entries = scheme_list(authn_section, Section::Authentication)?.unwrap_or_default();
            let rule_entries = match scheme_list(authz_section, Section::Authorization)? {
                Some(list) => list,
                None if authz_section.is_none() => Vec::new(),
                None => {
                    return Err(WardenError::InvalidDocument(
                        "`authorization` must list `schemes` in multi-scheme mode".into(),
                    ))
                }
            };

            let no_rules = Value::Null;
            for entry in &entries {
                let key = scheme_key(entry).ok_or_else(|| {
                    WardenError::InvalidDocument(format!(
                        "authentication scheme entry without a `scheme` key: {entry}"
                    ))
                })?;
                if schemes.iter().any(|s: &SchemeEntry| s.key == key) {
                    return Err(WardenError::InvalidDocument(format!(
                        "scheme `{key}` is configured twice"
                    )));
                }
                let authn = registry.create(entry)?;
                let rules = rule_entries
                    .iter()
                    .find(|e| scheme_key(e) == Some(key))
                    .unwrap_or(&no_rules);
                let authz = RuleBasedAuthorization::from_config(rules, names.clone())?;
                schemes.push(SchemeEntry {
                    key: key.to_string(),
                    authn: Some(authn),
                    authz,
                    challenge_name: key.to_string(),
                });
            }

            if let Some(orphan) = rule_entries
                .iter()
                .find(|e| !schemes.iter().any(|s| Some(s.key.as_str()) == scheme_key(e)))
            {
                return Err(WardenError::InvalidDocument(format!(
                    "authorization entry names no configured scheme: {orphan}"
                )));
            }
        } else if authn_section.is_some() || authz_section.is_some() {
            let authn = authn_section.map(|s| registry.create(s)).transpose()?;
            let authz = RuleBasedAuthorization::from_config(
                authz_section.unwrap_or(&Value::Null),
                names.clone(),
            )?;
            let key = authn_section
                .and_then(|s| scheme_key(s).or_else(|| PluginRegistry::class_of(s).ok()))
                .unwrap_or(DEFAULT_SCHEME);
            // without an explicit scheme name the plugin's own HTTP token is used
            let challenge_name = match (authn_section.and_then(scheme_key), &authn) {
                (Some(named), _) => named.to_string(),
                (None, Some(plugin)) => plugin.scheme().to_string(),
                (None, None) => key.to_string(),
            };
            schemes.push(SchemeEntry {
                key: key.to_string(),
                authn,
                authz,
                challenge_name,
            });
        }

        tracing::debug!(
            schemes = ?schemes.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(),
            multi,
            "Configured security schemes"
        );

        Ok(Self {
            schemes,
            multi,
            registry,
            names,
        })
    }

    pub fn schemes(&self) -> &[SchemeEntry] {
        &self.schemes
    }

    pub fn scheme(&self, key: &str) -> Option<&SchemeEntry> {
        self.schemes.iter().find(|s| s.key == key)
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    pub fn names(&self) -> &PermissionNameTable {
        &self.names
    }

    /// Try each scheme in declared order; the first to authenticate wins.
    pub fn authenticate(&self, headers: &HeaderMap) -> AuthnResult {
        let mut rejected = Vec::new();
        for entry in &self.schemes {
            let Some(plugin) = &entry.authn else {
                continue;
            };
            match plugin.authenticate(headers) {
                AuthnOutcome::Authenticated(principal) => {
                    tracing::debug!(scheme = %entry.key, principal = %principal.name, "authenticated");
                    return AuthnResult::Authenticated(principal.with_scheme(entry.key.clone()));
                }
                AuthnOutcome::Invalid => rejected.push(entry.key.as_str()),
                AuthnOutcome::NotPresented => {}
            }
        }

        let challenges: Vec<String> = self
            .schemes
            .iter()
            .filter_map(|entry| {
                let plugin = entry.authn.as_ref()?;
                if plugin.block_unknown() || rejected.contains(&entry.key.as_str()) {
                    entry.challenge()
                } else {
                    None
                }
            })
            .collect();

        if challenges.is_empty() {
            AuthnResult::Anonymous
        } else {
            AuthnResult::Challenge(challenges)
        }
    }

    /// Logical OR over every scheme's rules. Among denials, asking for credentials
    /// beats forbidding.
    pub fn authorize(&self, ctx: &RequestContext) -> AuthorizationDecision {
        if self.schemes.is_empty() {
            return AuthorizationDecision::Allow;
        }
        let mut needs_credentials = false;
        for entry in &self.schemes {
            match entry.authz.authorize(ctx) {
                AuthorizationDecision::Allow => return AuthorizationDecision::Allow,
                AuthorizationDecision::NeedsCredentials => needs_credentials = true,
                AuthorizationDecision::Forbidden => {}
            }
        }
        if needs_credentials {
            AuthorizationDecision::NeedsCredentials
        } else {
            AuthorizationDecision::Forbidden
        }
    }

    /// One challenge per scheme that has an authentication plugin.
    pub fn challenges(&self) -> Vec<String> {
        self.schemes
            .iter()
            .filter_map(SchemeEntry::challenge)
            .collect()
    }

    pub fn permission_names(&self, roles: Option<&BTreeSet<String>>) -> BTreeSet<String> {
        self.schemes
            .iter()
            .flat_map(|entry| entry.authz.permission_names(roles))
            .collect()
    }

    /// Apply an edit batch to one section of the composite document `latest`.
    ///
    /// Returns the new composite document, or `None` when nothing changed. In
    /// multi-scheme mode the whole batch is refused with
    /// [`WardenError::SchemeRouting`] before anything is forwarded if any command
    /// lacks a valid scheme wrapper.
    pub fn edit(
        &self,
        section: Section,
        latest: &Value,
        ops: &mut [CommandOperation],
    ) -> Result<Option<Value>, WardenError> {
        let mut working = match latest {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        if !self.multi {
            let sub = working
                .get(section.key())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            let edited = match section {
                Section::Authentication => {
                    let plugin = self
                        .schemes
                        .first()
                        .and_then(|e| e.authn.clone())
                        .ok_or_else(|| {
                            WardenError::BadRequest("no authentication plugin is configured".into())
                        })?;
                    plugin.edit(&sub, ops)
                }
                Section::Authorization => self.rule_editor(self.schemes.first()).edit(&sub, ops),
            };
            return Ok(edited.map(|sub| {
                working.insert(section.key().to_string(), sub);
                Value::Object(working)
            }));
        }

        self.check_routing(section, ops)?;

        let mut modified = false;
        for op in ops.iter_mut() {
            if section == Section::Authentication && is_composite_command(&op.name) {
                modified |= self.apply_composite(&mut working, op);
                continue;
            }
            let Some((key, args)) = unwrap_scheme(op) else {
                continue;
            };
            let Some(entry) = self.scheme(&key) else {
                continue;
            };

            let mut inner = CommandOperation::new(op.name.clone(), args);
            let sub = scheme_section(&working, section, &key);
            let edited = match section {
                Section::Authentication => match &entry.authn {
                    Some(plugin) => plugin.edit(&sub, std::slice::from_mut(&mut inner)),
                    None => None,
                },
                Section::Authorization => entry.authz.edit(&sub, std::slice::from_mut(&mut inner)),
            };
            for error in inner.errors() {
                op.add_error(error.clone());
            }
            if let Some(sub) = edited {
                put_scheme_section(&mut working, section, &key, sub);
                modified = true;
            }
        }

        Ok(modified.then_some(Value::Object(working)))
    }

    fn rule_editor(&self, entry: Option<&SchemeEntry>) -> RuleBasedAuthorization {
        entry
            .map(|e| e.authz.clone())
            .unwrap_or_else(|| RuleBasedAuthorization::new(RuleDocument::default(), self.names.clone()))
    }

    /// Validate every scheme wrapper up front, recording errors on the offending
    /// commands.
    fn check_routing(&self, section: Section, ops: &mut [CommandOperation]) -> Result<(), WardenError> {
        let mut first_error = None;
        for op in ops.iter_mut() {
            if section == Section::Authentication && is_composite_command(&op.name) {
                continue;
            }
            let error = match &op.data {
                Value::Object(map) if map.len() == 1 => map
                    .keys()
                    .next()
                    .filter(|key| self.scheme(key).is_none())
                    .map(|key| format!("Unknown scheme '{key}' in command '{}'", op.name)),
                _ => Some(format!(
                    "Command '{}' must wrap its arguments under exactly one scheme key, e.g. {{\"{}\": {{\"<scheme>\": ...}}}}",
                    op.name, op.name
                )),
            };
            if let Some(error) = error {
                first_error.get_or_insert_with(|| error.clone());
                op.add_error(error);
            }
        }
        match first_error {
            Some(error) => {
                tracing::warn!(%error, "rejected edit batch");
                Err(WardenError::SchemeRouting(error))
            }
            None => Ok(()),
        }
    }

    fn apply_composite(&self, working: &mut Map<String, Value>, op: &mut CommandOperation) -> bool {
        match op.name.as_str() {
            ADD_SCHEME => self.add_scheme(working, op),
            REMOVE_SCHEME => remove_scheme(working, op),
            _ => false,
        }
    }

    fn add_scheme(&self, working: &mut Map<String, Value>, op: &mut CommandOperation) -> bool {
        let Some(args) = op.data_map() else {
            return false;
        };
        let Some(key) = args.get(SCHEME_KEY).and_then(Value::as_str).map(str::to_string) else {
            op.add_error("add-scheme requires a 'scheme' key");
            return false;
        };

        let mut authn = schemes_of(working, Section::Authentication);
        if authn.iter().any(|e| scheme_key(e) == Some(key.as_str())) {
            op.add_error(format!("Scheme '{key}' already exists"));
            return false;
        }
        let config = Value::Object(args);
        if let Err(e) = self.registry.create(&config) {
            op.add_error(e.to_string());
            return false;
        }
        authn.push(config);
        set_schemes(working, Section::Authentication, authn);

        let mut authz = schemes_of(working, Section::Authorization);
        if !authz.iter().any(|e| scheme_key(e) == Some(key.as_str())) {
            authz.push(json!({SCHEME_KEY: key, "user-role": {}, "permissions": []}));
        }
        set_schemes(working, Section::Authorization, authz);
        true
    }
}

fn remove_scheme(working: &mut Map<String, Value>, op: &mut CommandOperation) -> bool {
    let key = match &op.data {
        Value::String(key) => Some(key.clone()),
        Value::Object(map) => map.get(SCHEME_KEY).and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    let Some(key) = key else {
        op.add_error("remove-scheme takes a scheme key or {\"scheme\": <key>}");
        return false;
    };

    let mut authn = schemes_of(working, Section::Authentication);
    let before = authn.len();
    authn.retain(|e| scheme_key(e) != Some(key.as_str()));
    if authn.len() == before {
        op.add_error(format!("No such scheme: '{key}'"));
        return false;
    }
    set_schemes(working, Section::Authentication, authn);

    let mut authz = schemes_of(working, Section::Authorization);
    authz.retain(|e| scheme_key(e) != Some(key.as_str()));
    set_schemes(working, Section::Authorization, authz);
    true
}

fn is_composite_command(name: &str) -> bool {
    name == ADD_SCHEME || name == REMOVE_SCHEME
}

/// `{"<scheme>": args}` -> (scheme, args)
fn unwrap_scheme(op: &CommandOperation) -> Option<(String, Value)> {
    match &op.data {
        Value::Object(map) if map.len() == 1 => {
            map.iter().next().map(|(k, v)| (k.clone(), v.clone()))
        }
        _ => None,
    }
}

/// A section that is neither missing, null nor an empty object.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

fn scheme_list(section: Option<&Value>, which: Section) -> Result<Option<Vec<Value>>, WardenError> {
    match section.and_then(|s| s.get(SCHEMES)) {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.clone())),
        Some(other) => Err(WardenError::InvalidDocument(format!(
            "`{}.schemes` must be an array, got {other}",
            which.key()
        ))),
    }
}

fn scheme_key(entry: &Value) -> Option<&str> {
    entry.get(SCHEME_KEY).and_then(Value::as_str)
}

fn schemes_of(working: &Map<String, Value>, section: Section) -> Vec<Value> {
    working
        .get(section.key())
        .and_then(|s| s.get(SCHEMES))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn set_schemes(working: &mut Map<String, Value>, section: Section, schemes: Vec<Value>) {
    let mut sub = match working.remove(section.key()) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    sub.insert(SCHEMES.to_string(), Value::Array(schemes));
    working.insert(section.key().to_string(), Value::Object(sub));
}

fn scheme_section(working: &Map<String, Value>, section: Section, key: &str) -> Value {
    schemes_of(working, section)
        .into_iter()
        .find(|e| scheme_key(e) == Some(key))
        .unwrap_or_else(|| json!({ SCHEME_KEY: key }))
}

fn put_scheme_section(working: &mut Map<String, Value>, section: Section, key: &str, sub: Value) {
    let mut schemes = schemes_of(working, section);
    match schemes.iter().position(|e| scheme_key(e) == Some(key)) {
        Some(pos) => schemes[pos] = sub,
        None => schemes.push(sub),
    }
    set_schemes(working, section, schemes);
}
