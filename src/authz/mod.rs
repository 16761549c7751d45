pub mod context;
pub mod edit;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod resolver;
pub mod types;
pub mod web;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::command::{CommandOperation, ConfigEditable};
use context::{AuthorizationDecision, RequestContext};
use errors::AuthzError;
use resolver::PermissionNameTable;
use types::RuleDocument;

/// Rule-based authorization over one immutable rule document snapshot.
///
/// Cheap to clone. Edits never touch the snapshot; they produce a new document
/// from which a new instance is built once the change has been persisted.
#[derive(Debug, Clone)]
pub struct RuleBasedAuthorization {
    document: Arc<RuleDocument>,
    names: Arc<PermissionNameTable>,
}

impl RuleBasedAuthorization {
    pub fn new(document: RuleDocument, names: Arc<PermissionNameTable>) -> Self {
        Self {
            document: Arc::new(document),
            names,
        }
    }

    /// Build from the JSON form of a rule document, validating every rule.
    pub fn from_config(config: &Value, names: Arc<PermissionNameTable>) -> Result<Self, AuthzError> {
        let document = loader::load_document(config, &names)?;
        Ok(Self::new(document, names))
    }

    pub fn document(&self) -> &RuleDocument {
        &self.document
    }

    pub fn names(&self) -> &PermissionNameTable {
        &self.names
    }

    pub fn authorize(&self, ctx: &RequestContext) -> AuthorizationDecision {
        engine::authorize(ctx, &self.document, &self.names)
    }

    pub fn permission_names(&self, roles: Option<&BTreeSet<String>>) -> BTreeSet<String> {
        engine::permission_names_for_roles(&self.document, roles)
    }
}

impl ConfigEditable for RuleBasedAuthorization {
    fn edit(&self, latest: &Value, ops: &mut [CommandOperation]) -> Option<Value> {
        let current = match loader::load_document(latest, &self.names) {
            Ok(doc) => doc,
            Err(e) => {
                for op in ops.iter_mut() {
                    op.add_error(format!("stored rule document is invalid: {e}"));
                }
                return None;
            }
        };

        let edited = edit::edit(&current, ops, &self.names)?;

        // keep keys the rule document does not own, e.g. `scheme` or `class`
        let mut out = match latest {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Value::Object(rules) = edited.to_json() {
            out.extend(rules);
        }
        Some(Value::Object(out))
    }
}
