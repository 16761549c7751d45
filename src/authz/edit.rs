//! Rule-side edit commands.
//!
//! A batch is applied in order to a private copy of the document. A failed command
//! records its error and leaves the copy untouched; later commands still run.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::authz::resolver::PermissionNameTable;
use crate::authz::types::{string_list, Permission, RuleDocument};
use crate::command::{parse_integer, position, CommandOperation};

pub const SET_PERMISSION: &str = "set-permission";
pub const UPDATE_PERMISSION: &str = "update-permission";
pub const DELETE_PERMISSION: &str = "delete-permission";
pub const SET_USER_ROLE: &str = "set-user-role";

/// Apply `ops` to a copy of `doc`. Returns `None` when no command changed anything.
pub fn edit(
    doc: &RuleDocument,
    ops: &mut [CommandOperation],
    names: &PermissionNameTable,
) -> Option<RuleDocument> {
    let mut working = doc.clone();
    let mut modified = false;

    for op in ops.iter_mut() {
        let applied = match op.name.as_str() {
            SET_PERMISSION => set_permission(&mut working, op, names),
            UPDATE_PERMISSION => update_permission(&mut working, op, names),
            DELETE_PERMISSION => delete_permission(&mut working, op),
            SET_USER_ROLE => set_user_role(&mut working, op),
            other => {
                let msg = format!("Unknown command '{other}'");
                op.add_error(msg);
                false
            }
        };
        modified |= applied;
    }

    modified.then_some(working)
}

fn set_permission(doc: &mut RuleDocument, op: &mut CommandOperation, names: &PermissionNameTable) -> bool {
    let Some(mut args) = op.data_map() else {
        return false;
    };
    let Some(index) = take_position(&mut args, "index", op) else {
        return false;
    };
    let Some(before) = take_position(&mut args, "before", op) else {
        return false;
    };
    if index.is_some() && before.is_some() {
        op.add_error("Cannot use 'index' and 'before' together");
        return false;
    }

    let permission = match build_permission(&args, names) {
        Ok(p) => p,
        Err(e) => {
            op.add_error(e);
            return false;
        }
    };

    match (index, before) {
        (Some(i), _) => {
            if !position(i).is_some_and(|p| doc.replace(p, permission)) {
                op.add_error(format!("No such index: {i}"));
                return false;
            }
        }
        (None, Some(b)) => {
            if !position(b).is_some_and(|p| doc.insert(p, permission)) {
                op.add_error(format!("Invalid 'before' index: {b}"));
                return false;
            }
        }
        (None, None) => doc.push(permission),
    }
    true
}

fn update_permission(
    doc: &mut RuleDocument,
    op: &mut CommandOperation,
    names: &PermissionNameTable,
) -> bool {
    let Some(mut args) = op.data_map() else {
        return false;
    };
    if args.contains_key("before") {
        op.add_error("'before' is not supported by update-permission");
        return false;
    }
    let Some(Some(index)) = take_position(&mut args, "index", op) else {
        if !op.has_errors() {
            op.add_error("update-permission requires an 'index'");
        }
        return false;
    };
    let Some((index, existing)) = position(index).and_then(|p| doc.get(p).map(|e| (p, e))) else {
        op.add_error(format!("No such index: {index}"));
        return false;
    };

    let mut merged = match existing.to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    merged.remove("index");
    for (key, value) in args {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }

    match build_permission(&merged, names) {
        Ok(p) => doc.replace(index, p),
        Err(e) => {
            op.add_error(e);
            false
        }
    }
}

fn delete_permission(doc: &mut RuleDocument, op: &mut CommandOperation) -> bool {
    let Some(index) = op.index_arg() else {
        return false;
    };
    if position(index).and_then(|p| doc.remove(p)).is_none() {
        op.add_error(format!("No such index: {index}"));
        return false;
    }
    true
}

fn set_user_role(doc: &mut RuleDocument, op: &mut CommandOperation) -> bool {
    let Some(args) = op.data_map() else {
        return false;
    };

    let mut updates: Vec<(String, Option<BTreeSet<String>>)> = Vec::with_capacity(args.len());
    for (user, roles) in args {
        if roles.is_null() {
            updates.push((user, None));
            continue;
        }
        let Some(roles) = string_list(&roles) else {
            op.add_error(format!(
                "roles for user '{user}' must be a string or a list of strings"
            ));
            return false;
        };
        let roles: BTreeSet<String> = roles.into_iter().collect();
        updates.push((user, (!roles.is_empty()).then_some(roles)));
    }

    for (user, roles) in updates {
        match roles {
            Some(roles) => {
                doc.user_roles.insert(user, roles);
            }
            None => {
                doc.user_roles.remove(&user);
            }
        }
    }
    true
}

/// Remove a positional argument from `args`.
///
/// Outer `None` means the value was present but not an integer (an error was recorded).
fn take_position(
    args: &mut Map<String, Value>,
    key: &str,
    op: &mut CommandOperation,
) -> Option<Option<i64>> {
    match args.remove(key) {
        None | Some(Value::Null) => Some(None),
        Some(raw) => match parse_integer(&raw) {
            Some(n) => Some(Some(n)),
            None => {
                op.add_error(format!("Invalid '{key}' value: {raw}"));
                None
            }
        },
    }
}

fn build_permission(args: &Map<String, Value>, names: &PermissionNameTable) -> Result<Permission, String> {
    let permission = Permission::from_json(args).map_err(|e| e.to_string())?;
    permission
        .validate(&names.known_names)
        .map_err(|e| e.to_string())?;
    Ok(permission)
}
