//! Maps a request to the canonical permission name it needs.
//!
//! A handler that knows its own permission name is authoritative. Otherwise the
//! operator-supplied [`PermissionNameTable`] classifies admin actions and schema
//! requests. Anything else stays unresolved and is judged structurally.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::authz::context::{RequestContext, RequestType};

pub const ALL_PERMISSION: &str = "all";

/// Result of permission-name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionName {
    Named(String),
    /// The request needs no permission at all.
    Unrestricted,
    Unresolved,
}

/// An admin endpoint whose actions split into read-only and mutating ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminEndpoint {
    /// e.g. "/admin/collections"
    pub path: String,
    /// e.g. "collection" -> "collection-admin-read" / "collection-admin-edit"
    pub prefix: String,
    /// Upper-case action names that only read state
    pub read_actions: BTreeSet<String>,
}

impl AdminEndpoint {
    fn new(path: &str, prefix: &str, read_actions: &[&str]) -> Self {
        Self {
            path: path.to_string(),
            prefix: prefix.to_string(),
            read_actions: read_actions.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Externally supplied naming conventions used by the resolver and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionNameTable {
    /// Names that rules match by name rather than by path/method/params
    pub known_names: BTreeSet<String>,
    pub admin_endpoints: Vec<AdminEndpoint>,
    pub schema_path: String,
}

impl Default for PermissionNameTable {
    fn default() -> Self {
        let known_names = [
            "schema-edit",
            "collection-admin-read",
            "collection-admin-edit",
            "core-admin-read",
            "core-admin-edit",
            "security-read",
            "security-edit",
            "config-edit",
            "config-read",
            "metrics-read",
            "read",
            "update",
            ALL_PERMISSION,
        ]
        .iter()
        .map(|n| n.to_string())
        .collect();

        Self {
            known_names,
            admin_endpoints: vec![
                AdminEndpoint::new(
                    "/admin/collections",
                    "collection",
                    &[
                        "LIST",
                        "CLUSTERSTATUS",
                        "OVERSEERSTATUS",
                        "REQUESTSTATUS",
                        "LISTALIASES",
                        "COLSTATUS",
                        "LISTSNAPSHOTS",
                        "LISTBACKUP",
                    ],
                ),
                AdminEndpoint::new(
                    "/admin/cores",
                    "core",
                    &["STATUS", "REQUESTSTATUS", "LISTSNAPSHOTS"],
                ),
            ],
            schema_path: "/schema".to_string(),
        }
    }
}

impl PermissionNameTable {
    pub fn is_known(&self, name: &str) -> bool {
        self.known_names.contains(name)
    }

    /// Resolve the permission name for `ctx`.
    pub fn resolve(&self, ctx: &RequestContext) -> PermissionName {
        if let Some(handler) = &ctx.handler {
            return handler.permission_name(ctx);
        }

        if ctx.request_type == RequestType::Admin {
            if let Some(endpoint) = self
                .admin_endpoints
                .iter()
                .find(|e| under_path(&ctx.resource, &e.path))
            {
                let Some(action) = ctx.first_param("action") else {
                    return PermissionName::Unresolved;
                };
                let kind = if endpoint.read_actions.contains(&action.to_ascii_uppercase()) {
                    "read"
                } else {
                    "edit"
                };
                return PermissionName::Named(format!("{}-admin-{kind}", endpoint.prefix));
            }
        }

        if under_path(&ctx.resource, &self.schema_path) {
            let read_only = ctx
                .method
                .as_deref()
                .is_some_and(|m| m.eq_ignore_ascii_case("GET") || m.eq_ignore_ascii_case("HEAD"));
            return if read_only {
                PermissionName::Unrestricted
            } else {
                PermissionName::Named("schema-edit".to_string())
            };
        }

        PermissionName::Unresolved
    }
}

fn under_path(resource: &str, base: &str) -> bool {
    resource == base
        || resource
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}
