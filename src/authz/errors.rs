use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Invalid rule document: {0}")]
    #[diagnostic(
        code(warden::authz::invalid_document),
        help("A rule document has the shape {{\"user-role\": {{...}}, \"permissions\": [...]}}")
    )]
    InvalidDocument(String),

    #[error("Invalid permission: {0}")]
    #[diagnostic(
        code(warden::authz::invalid_permission),
        help("Known permission names (e.g. `read`, `schema-edit`) may only be scoped by `collection`; use a custom name for path, method or params rules")
    )]
    InvalidPermission(String),

    #[error("Invalid param matcher `{pattern}`")]
    #[diagnostic(
        code(warden::authz::invalid_regex),
        help("Regex matchers use the `REGEX:` prefix followed by a Rust regex, e.g. REGEX:(?i)val1")
    )]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}
