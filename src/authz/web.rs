use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::context::RequestContext;
use crate::authz::types::{CheckRequest, CheckResponse, PermissionsQuery, PermissionsResponse};
use crate::errors::WardenError;
use crate::web::AppState;

/// Decision endpoints: these judge requests on behalf of other services and are
/// not themselves guarded.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/permissions", get(handle_permissions))
        .route("/healthz", get(health))
}

async fn handle_check(State(state): State<AppState>, Json(req): Json<CheckRequest>) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(raw) = &req.authorization {
        match HeaderValue::from_str(raw) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                return WardenError::BadRequest("`authorization` is not a valid header value".into())
                    .into_response()
            }
        }
    }

    let mut ctx = RequestContext::new(req.resource)
        .request_type(req.request_type)
        .headers(headers);
    ctx.method = req.method;
    ctx.collections = req.collections;
    ctx.params = req.params;
    if let Some(permission) = req.permission {
        ctx = ctx.named(permission);
    }

    let outcome = state.security.check(ctx);
    Json(CheckResponse {
        decision: outcome.decision.as_str(),
        status: outcome.decision.status_code().as_u16(),
        principal: outcome.principal.map(|p| p.name),
        challenges: outcome.challenges,
    })
    .into_response()
}

async fn handle_permissions(
    State(state): State<AppState>,
    Query(query): Query<PermissionsQuery>,
) -> impl IntoResponse {
    let roles = query.roles();
    let permissions = state
        .security
        .snapshot()
        .dispatcher
        .permission_names(roles.as_ref());
    Json(PermissionsResponse { permissions })
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
