use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::authn::AuthnError;
use crate::authz::errors::AuthzError;
use crate::store::StoreError;

#[derive(Debug, Error, Diagnostic)]
pub enum WardenError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authn(#[from] AuthnError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    #[diagnostic(code(warden::bad_request))]
    BadRequest(String),

    #[error("Scheme routing error: {0}")]
    #[diagnostic(
        code(warden::scheme_routing),
        help("In multi-scheme mode wrap the command arguments under a configured scheme key, e.g. {{\"set-user\": {{\"basic\": {{...}}}}}}")
    )]
    SchemeRouting(String),

    #[error("Invalid security document: {0}")]
    #[diagnostic(code(warden::invalid_document))]
    InvalidDocument(String),
}

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        match self {
            WardenError::Authz(e) => e.into_response(),
            WardenError::Authn(e) => e.into_response(),
            WardenError::Store(e) => e.into_response(),
            other => {
                let body = Json(json!({ "error": other.to_string() }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
        }
    }
}
