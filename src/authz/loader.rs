use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::resolver::PermissionNameTable;
use crate::authz::types::RuleDocument;

/// Parse and validate a rule document from its JSON form.
///
/// Every permission is checked against the known-name table, so a document that
/// loads here can be evaluated without further checks.
pub fn load_document(value: &Value, names: &PermissionNameTable) -> Result<RuleDocument, AuthzError> {
    let doc = RuleDocument::from_json(value)?;
    for permission in doc.permissions() {
        permission
            .validate(&names.known_names)
            .map_err(|e| match e {
                AuthzError::InvalidPermission(msg) => {
                    AuthzError::InvalidPermission(format!("rule {}: {msg}", permission.index))
                }
                other => other,
            })?;
    }

    tracing::debug!(
        permissions = doc.len(),
        users = doc.user_roles.len(),
        "Loaded rule document"
    );

    Ok(doc)
}
