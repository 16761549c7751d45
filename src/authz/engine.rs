use std::collections::BTreeSet;

use crate::authz::context::{AuthorizationDecision, RequestContext};
use crate::authz::resolver::{PermissionName, PermissionNameTable, ALL_PERMISSION};
use crate::authz::types::{Permission, RoleSpec, RuleDocument, WILDCARD_ROLE};

/// Judge `ctx` against one rule document snapshot.
///
/// Pure and infallible: the absence of a matching rule is itself a decision (the
/// endpoint is open). Rule order is authoritative, the first matching rule wins,
/// except that a principal holding a role granted the `all` permission is always
/// allowed.
pub fn authorize(
    ctx: &RequestContext,
    doc: &RuleDocument,
    names: &PermissionNameTable,
) -> AuthorizationDecision {
    // 1. Resolve the permission name
    let permission = names.resolve(ctx);
    if permission == PermissionName::Unrestricted {
        tracing::debug!(resource = %ctx.resource, "unrestricted request");
        return AuthorizationDecision::Allow;
    }

    let authenticated = ctx.principal.is_some();
    let roles = principal_roles(ctx, doc);

    // 2. The `all` permission grants everything to its roles
    let all_rule = doc
        .permissions()
        .iter()
        .find(|p| p.name.as_deref() == Some(ALL_PERMISSION));
    if let Some(all) = all_rule {
        let grants = !matches!(all.role, RoleSpec::Open)
            && collection_matches(all, ctx)
            && all.role.accepts(authenticated, &roles);
        if grants {
            tracing::debug!(resource = %ctx.resource, "allowed through the `all` permission");
            return AuthorizationDecision::Allow;
        }
    }

    // 3. First matching rule, falling back to `all` as the controlling rule
    let matched = doc
        .permissions()
        .iter()
        .find(|p| rule_matches(p, ctx, &permission, names));
    let Some(rule) = matched.or(all_rule) else {
        tracing::debug!(resource = %ctx.resource, ?permission, "no rule matched, open by default");
        return AuthorizationDecision::Allow;
    };

    // 4. Evaluate the rule's role requirement
    let decision = match &rule.role {
        RoleSpec::Open => AuthorizationDecision::Allow,
        _ if !authenticated => AuthorizationDecision::NeedsCredentials,
        role if role.accepts(authenticated, &roles) => AuthorizationDecision::Allow,
        _ => AuthorizationDecision::Forbidden,
    };

    tracing::debug!(
        resource = %ctx.resource,
        rule = rule.index,
        rule_name = rule.name.as_deref().unwrap_or("-"),
        decision = decision.as_str(),
        "rule evaluated"
    );
    decision
}

/// Roles asserted by the principal plus those assigned in the role map.
fn principal_roles(ctx: &RequestContext, doc: &RuleDocument) -> BTreeSet<String> {
    let Some(principal) = &ctx.principal else {
        return BTreeSet::new();
    };
    let mut roles = doc.roles_of(&principal.name);
    roles.extend(principal.roles.iter().cloned());
    roles
}

fn rule_matches(
    rule: &Permission,
    ctx: &RequestContext,
    permission: &PermissionName,
    names: &PermissionNameTable,
) -> bool {
    if let Some(name) = rule.name.as_deref().filter(|n| names.is_known(n)) {
        return matches!(permission, PermissionName::Named(p) if p == name)
            && collection_matches(rule, ctx);
    }

    // Unnamed and custom-named rules match by structure
    rule.path.as_ref().map_or(true, |p| p.matches(&ctx.resource))
        && collection_matches(rule, ctx)
        && method_matches(rule, ctx)
        && params_match(rule, ctx)
}

fn collection_matches(rule: &Permission, ctx: &RequestContext) -> bool {
    match &rule.collection {
        None => true,
        Some(c) => ctx.collections.iter().any(|target| target == c),
    }
}

fn method_matches(rule: &Permission, ctx: &RequestContext) -> bool {
    let Some(methods) = &rule.method else {
        return true;
    };
    let Some(method) = ctx.method.as_deref() else {
        return false;
    };
    methods.iter().any(|m| m.eq_ignore_ascii_case(method))
}

fn params_match(rule: &Permission, ctx: &RequestContext) -> bool {
    let Some(params) = &rule.params else {
        return true;
    };
    params.iter().all(|(key, matchers)| {
        ctx.params.get(key).is_some_and(|values| {
            values
                .iter()
                .any(|v| matchers.iter().any(|m| m.matches(v)))
        })
    })
}

/// Names of the named rules visible to a holder of `roles`.
///
/// With no roles (anonymous) only open rules are listed. The wildcard role lists
/// rules open to any authenticated principal. Path-only rules have no name and are
/// never listed.
pub fn permission_names_for_roles(
    doc: &RuleDocument,
    roles: Option<&BTreeSet<String>>,
) -> BTreeSet<String> {
    let roles = roles.filter(|r| !r.is_empty());
    doc.permissions()
        .iter()
        .filter_map(|p| {
            let name = p.name.as_ref()?;
            let visible = match (&p.role, roles) {
                (RoleSpec::Open, None) => true,
                (_, None) => false,
                (RoleSpec::Open, Some(_)) => false,
                (RoleSpec::AnyAuthenticated, Some(r)) => r.contains(WILDCARD_ROLE),
                (RoleSpec::Roles(required), Some(r)) => !required.is_disjoint(r),
            };
            visible.then(|| name.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::context::{Principal, RequestType};
    use crate::authz::types::Permission;
    use serde_json::{json, Value};

    fn base_rules() -> Value {
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
                {"name": "read", "role": "dev"},
                {"name": "freeforall", "path": "/foo", "role": "*"}
            ]
        })
    }

    fn doc_with(extra: &[Value], user_roles: &[(&str, &str)]) -> RuleDocument {
        let mut doc = RuleDocument::from_json(&base_rules()).unwrap();
        for p in extra {
            doc.push(Permission::from_json(p.as_object().unwrap()).unwrap());
        }
        for (user, role) in user_roles {
            doc.user_roles
                .insert(user.to_string(), BTreeSet::from([role.to_string()]));
        }
        doc
    }

    fn check(ctx: RequestContext, doc: &RuleDocument) -> AuthorizationDecision {
        authorize(&ctx, doc, &PermissionNameTable::default())
    }

    fn update(user: Option<&str>, collection: &str) -> RequestContext {
        let ctx = RequestContext::new("/update/json/docs")
            .method("POST")
            .collection(collection)
            .named("update");
        match user {
            Some(u) => ctx.user(u),
            None => ctx,
        }
    }

    fn admin_collections(user: Option<&str>, action: &str) -> RequestContext {
        let ctx = RequestContext::new("/admin/collections")
            .request_type(RequestType::Admin)
            .param("action", action);
        match user {
            Some(u) => ctx.user(u),
            None => ctx,
        }
    }

    #[test]
    fn test_path_and_collection_rule() {
        let doc = doc_with(&[], &[]);
        assert_eq!(
            check(update(Some("tim"), "mycoll"), &doc),
            AuthorizationDecision::Allow
        );
        assert_eq!(
            check(update(None, "mycoll"), &doc),
            AuthorizationDecision::NeedsCredentials
        );
        // no rule controls updates to other collections
        assert_eq!(
            check(update(Some("unknownuser"), "freeforall"), &doc),
            AuthorizationDecision::Allow
        );
    }

    #[test]
    fn test_schema_requests() {
        let doc = doc_with(&[], &[]);
        let post = RequestContext::new("/schema")
            .method("POST")
            .collection("mycoll")
            .user("somebody");
        assert_eq!(check(post, &doc), AuthorizationDecision::Forbidden);

        let get = RequestContext::new("/schema/fields")
            .method("GET")
            .collection("mycoll")
            .user("somebody");
        assert_eq!(check(get, &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_collection_admin() {
        let doc = doc_with(&[], &[]);
        assert_eq!(
            check(admin_collections(Some("tim"), "LIST"), &doc),
            AuthorizationDecision::Allow
        );
        assert_eq!(
            check(admin_collections(None, "LIST"), &doc),
            AuthorizationDecision::Allow
        );
        assert_eq!(
            check(admin_collections(None, "CREATE"), &doc),
            AuthorizationDecision::NeedsCredentials
        );
        assert_eq!(
            check(admin_collections(None, "RELOAD"), &doc),
            AuthorizationDecision::NeedsCredentials
        );
        assert_eq!(
            check(admin_collections(Some("somebody"), "CREATE"), &doc),
            AuthorizationDecision::Forbidden
        );
        assert_eq!(
            check(admin_collections(Some("tim"), "CREATE"), &doc),
            AuthorizationDecision::Allow
        );
    }

    #[test]
    fn test_named_read_rule() {
        let doc = doc_with(&[], &[]);
        let select = RequestContext::new("/select")
            .method("GET")
            .collection("mycoll")
            .named("read");
        assert_eq!(
            check(select.clone().user("joe"), &doc),
            AuthorizationDecision::Forbidden
        );
        assert_eq!(check(select.user("steve"), &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_wildcard_role() {
        let doc = doc_with(&[], &[]);
        let foo = RequestContext::new("/foo").method("GET");
        assert_eq!(
            check(foo.clone().user("anyone"), &doc),
            AuthorizationDecision::Allow
        );
        assert_eq!(check(foo, &doc), AuthorizationDecision::NeedsCredentials);
    }

    #[test]
    fn test_all_permission_grants_its_role_everything() {
        let doc = doc_with(&[json!({"name": "all", "role": "su"})], &[("cio", "su")]);
        let replication = RequestContext::new("/replication")
            .method("POST")
            .collection("mycoll")
            .named("read");
        assert_eq!(
            check(replication.clone().user("tim"), &doc),
            AuthorizationDecision::Allow
        );
        assert_eq!(check(replication.user("cio"), &doc), AuthorizationDecision::Allow);
        assert_eq!(
            check(admin_collections(Some("cio"), "CREATE"), &doc),
            AuthorizationDecision::Allow
        );
    }

    #[test]
    fn test_core_admin_permissions() {
        let doc = doc_with(
            &[
                json!({"name": "core-admin-edit", "role": "su"}),
                json!({"name": "core-admin-read", "role": "user"}),
                json!({"name": "all", "role": "su"}),
            ],
            &[("cio", "su")],
        );
        let cores = |user: Option<&str>, action: &str| {
            let ctx = RequestContext::new("/admin/cores")
                .request_type(RequestType::Admin)
                .param("action", action);
            match user {
                Some(u) => ctx.user(u),
                None => ctx,
            }
        };
        assert_eq!(
            check(cores(None, "CREATE"), &doc),
            AuthorizationDecision::NeedsCredentials
        );
        assert_eq!(
            check(cores(Some("joe"), "CREATE"), &doc),
            AuthorizationDecision::Forbidden
        );
        assert_eq!(
            check(cores(Some("joe"), "STATUS"), &doc),
            AuthorizationDecision::Allow
        );
        assert_eq!(
            check(cores(Some("cio"), "CREATE"), &doc),
            AuthorizationDecision::Allow
        );
    }

    #[test]
    fn test_params_rule() {
        let doc = doc_with(
            &[json!({"name": "test-params", "role": "admin", "path": "/x",
                     "params": {"key": ["REGEX:(?i)val1", "VAL2"]}})],
            &[],
        );
        let x = |user: Option<&str>, value: &str| {
            let ctx = RequestContext::new("/x").collection("go").param("key", value);
            match user {
                Some(u) => ctx.user(u),
                None => ctx,
            }
        };
        assert_eq!(check(x(None, "VAL1"), &doc), AuthorizationDecision::NeedsCredentials);
        assert_eq!(check(x(None, "Val1"), &doc), AuthorizationDecision::NeedsCredentials);
        assert_eq!(check(x(Some("joe"), "Val1"), &doc), AuthorizationDecision::Forbidden);
        assert_eq!(check(x(Some("joe"), "Val2"), &doc), AuthorizationDecision::Allow);
        assert_eq!(check(x(Some("joe"), "VAL2"), &doc), AuthorizationDecision::Forbidden);
    }

    #[test]
    fn test_method_rule() {
        let doc = RuleDocument::from_json(&json!({
            "permissions": [{"path": "/a/*", "method": ["post", "PUT"], "role": "admin"}]
        }))
        .unwrap();
        let post = RequestContext::new("/a/b").method("POST");
        assert_eq!(check(post, &doc), AuthorizationDecision::NeedsCredentials);
        let get = RequestContext::new("/a/b").method("GET");
        assert_eq!(check(get, &doc), AuthorizationDecision::Allow);
        let none = RequestContext::new("/a/b");
        assert_eq!(check(none, &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_custom_rules_forbid_unknown_user() {
        let doc = RuleDocument::from_json(&json!({
            "permissions": [
                {"name": "update", "role": ["admin_role", "update_role"]},
                {"name": "read", "role": ["admin_role", "update_role", "read_role"]}
            ]
        }))
        .unwrap();
        let ctx = RequestContext::new("/update")
            .collection("go")
            .param("key", "VAL2")
            .named("update")
            .user("solr");
        assert_eq!(check(ctx, &doc), AuthorizationDecision::Forbidden);
    }

    #[test]
    fn test_all_with_matching_role() {
        let doc = doc_with(
            &[json!({"name": "all", "role": ["dev", "admin"]})],
            &[("dev", "dev"), ("admin", "admin")],
        );
        let update = RequestContext::new("/update")
            .collection("go")
            .named("update")
            .user("dev");
        assert_eq!(check(update, &doc), AuthorizationDecision::Allow);
        let props = RequestContext::new("/admin/info/properties")
            .collection("go")
            .named("config-read")
            .user("dev");
        assert_eq!(check(props, &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_all_with_wildcard_role() {
        let doc = doc_with(&[json!({"name": "all", "role": "*"})], &[("dev", "dev")]);
        let update = RequestContext::new("/update")
            .collection("go")
            .named("update")
            .user("dev");
        assert_eq!(check(update, &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_all_with_other_role_denies() {
        let doc = doc_with(
            &[json!({"name": "all", "role": "admin"})],
            &[("dev", "dev"), ("admin", "admin")],
        );
        let update = RequestContext::new("/update")
            .collection("go")
            .named("update")
            .user("dev");
        assert_eq!(check(update, &doc), AuthorizationDecision::Forbidden);
        let props = RequestContext::new("/admin/info/properties")
            .collection("go")
            .named("config-read")
            .user("dev");
        assert_eq!(check(props, &doc), AuthorizationDecision::Forbidden);
    }

    #[test]
    fn test_all_grants_schema_edit_and_core_admin() {
        let doc = doc_with(
            &[
                json!({"name": "core-admin-edit", "role": "admin"}),
                json!({"name": "all", "role": "root"}),
            ],
            &[("boss", "root")],
        );
        let post = RequestContext::new("/schema").method("POST").user("boss");
        assert_eq!(check(post, &doc), AuthorizationDecision::Allow);
        let create = RequestContext::new("/admin/cores")
            .request_type(RequestType::Admin)
            .param("action", "CREATE")
            .user("boss");
        assert_eq!(check(create, &doc), AuthorizationDecision::Allow);
        // a role outside `all` still needs the specific permission's role
        let joe = RequestContext::new("/schema").method("POST").user("joe");
        assert_eq!(check(joe, &doc), AuthorizationDecision::Forbidden);
    }

    #[test]
    fn test_first_match_wins() {
        let doc = RuleDocument::from_json(&json!({
            "user-role": {"joe": "user"},
            "permissions": [
                {"path": "/data/*", "role": "user"},
                {"path": "/data/secret", "role": "admin"}
            ]
        }))
        .unwrap();
        let ctx = RequestContext::new("/data/secret").user("joe");
        assert_eq!(check(ctx, &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_principal_asserted_roles() {
        let doc = doc_with(&[], &[]);
        let ctx = RequestContext::new("/schema")
            .method("POST")
            .principal(Principal::new("svc").with_roles(["admin"]));
        assert_eq!(check(ctx, &doc), AuthorizationDecision::Allow);
    }

    #[test]
    fn test_deterministic() {
        let doc = doc_with(&[], &[]);
        let first = check(update(Some("joe"), "mycoll"), &doc);
        for _ in 0..10 {
            assert_eq!(check(update(Some("joe"), "mycoll"), &doc), first);
        }
        assert_eq!(first, AuthorizationDecision::Forbidden);
    }

    #[test]
    fn test_permission_names_for_roles() {
        let doc = doc_with(&[], &[]);
        let set = |roles: &[&str]| roles.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>();

        assert_eq!(
            permission_names_for_roles(&doc, Some(&set(&["dev"]))),
            set(&["mycoll_update", "read"])
        );
        assert!(permission_names_for_roles(&doc, Some(&set(&["user"]))).is_empty());
        assert_eq!(
            permission_names_for_roles(&doc, Some(&set(&["admin"]))),
            set(&["schema-edit", "collection-admin-edit", "mycoll_update"])
        );
        assert_eq!(
            permission_names_for_roles(&doc, Some(&set(&["admin", "dev"]))),
            set(&["schema-edit", "collection-admin-edit", "mycoll_update", "read"])
        );
        assert_eq!(
            permission_names_for_roles(&doc, None),
            set(&["collection-admin-read"])
        );
        assert_eq!(
            permission_names_for_roles(&doc, Some(&set(&[]))),
            set(&["collection-admin-read"])
        );
        assert_eq!(
            permission_names_for_roles(&doc, Some(&set(&["*"]))),
            set(&["freeforall"])
        );
    }
}
