//! Edit-command batches.
//!
//! Operators mutate the security configuration by posting small commands such as
//! `{"set-permission": {"name": "read", "role": "dev"}}`. A batch is either a single
//! object holding one or more commands, or an array of such objects. Every command
//! carries its own error list so that one bad command never hides the outcome of
//! the others.

use serde_json::{Map, Value};

use crate::errors::WardenError;

/// One parsed edit command together with the errors recorded while applying it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOperation {
    pub name: String,
    pub data: Value,
    errors: Vec<String>,
}

impl CommandOperation {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The command arguments as an object, recording an error when the shape is wrong.
    pub fn data_map(&mut self) -> Option<Map<String, Value>> {
        if let Value::Object(map) = &self.data {
            return Some(map.clone());
        }
        let msg = format!(
            "The command '{}' should have the values as a json object",
            self.name
        );
        self.add_error(msg);
        None
    }

    /// The command arguments as a single integer (`3`, `"3"` or `{"index": 3}`).
    /// Whether it names an existing position is up to the command.
    pub fn index_arg(&mut self) -> Option<i64> {
        let parsed = match &self.data {
            Value::Object(map) => map.get("index").and_then(parse_integer),
            other => parse_integer(other),
        };
        if parsed.is_none() {
            let msg = format!("The command '{}' requires a numeric index", self.name);
            self.add_error(msg);
        }
        parsed
    }

    /// Render this command the way error responses report it.
    pub fn to_error_report(&self) -> Value {
        let mut report = Map::new();
        report.insert(self.name.clone(), self.data.clone());
        report.insert(
            "errorMessages".to_string(),
            Value::Array(self.errors.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(report)
    }
}

/// Parse an integer from a JSON number or a numeric string.
pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// The 1-based position `n` names, if any position at all.
pub fn position(n: i64) -> Option<usize> {
    usize::try_from(n).ok().filter(|n| *n > 0)
}

/// Parse a command batch.
pub fn parse_batch(body: &Value) -> Result<Vec<CommandOperation>, WardenError> {
    let mut ops = Vec::new();
    match body {
        Value::Object(map) => push_commands(map, &mut ops),
        Value::Array(items) => {
            for item in items {
                let Value::Object(map) = item else {
                    return Err(WardenError::BadRequest(
                        "each entry of a command array must be a json object".into(),
                    ));
                };
                push_commands(map, &mut ops);
            }
        }
        _ => {
            return Err(WardenError::BadRequest(
                "command batch must be a json object or an array of objects".into(),
            ))
        }
    }
    if ops.is_empty() {
        return Err(WardenError::BadRequest("no commands found in request body".into()));
    }
    Ok(ops)
}

fn push_commands(map: &Map<String, Value>, ops: &mut Vec<CommandOperation>) {
    for (name, data) in map {
        ops.push(CommandOperation::new(name.clone(), data.clone()));
    }
}

/// Collect the error reports of every failed command in the batch.
pub fn capture_errors(ops: &[CommandOperation]) -> Vec<Value> {
    ops.iter()
        .filter(|op| op.has_errors())
        .map(CommandOperation::to_error_report)
        .collect()
}

/// A configuration section that can be mutated by edit commands.
///
/// `edit` works on a private copy of `latest`: it returns the mutated copy when at
/// least one command changed it, or `None` when nothing needs to be persisted.
pub trait ConfigEditable: Send + Sync {
    fn edit(&self, latest: &Value, ops: &mut [CommandOperation]) -> Option<Value>;
}
