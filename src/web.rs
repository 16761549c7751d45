//! HTTP surface: decision endpoints plus the guarded security edit API.
use crate::authz::context::{AuthorizationDecision, RequestContext, RequestType};
use crate::multi::Section;
use crate::security::{EditOutcome, SecurityService};
use crate::settings::Settings;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub const SECURITY_READ: &str = "security-read";
pub const SECURITY_EDIT: &str = "security-edit";

#[derive(Clone)]
pub struct AppState {
    pub security: Arc<SecurityService>,
}

async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    // security documents carry credential hashes
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(crate::authz::web::routes())
        .route(
            "/admin/authentication",
            get(read_authentication).post(edit_authentication),
        )
        .route(
            "/admin/authorization",
            get(read_authorization).post(edit_authorization),
        )
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(settings: &Settings, security: Arc<SecurityService>) -> miette::Result<()> {
    let router = router(AppState { security });

    let addr: SocketAddr = settings
        .bind_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    tracing::info!(%addr, "Security API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

async fn read_authentication(State(state): State<AppState>, headers: HeaderMap) -> Response {
    read_section(&state, &headers, Section::Authentication)
}

async fn edit_authentication(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    edit_section(&state, &headers, Section::Authentication, &body)
}

async fn read_authorization(State(state): State<AppState>, headers: HeaderMap) -> Response {
    read_section(&state, &headers, Section::Authorization)
}

async fn edit_authorization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    edit_section(&state, &headers, Section::Authorization, &body)
}

fn read_section(state: &AppState, headers: &HeaderMap, section: Section) -> Response {
    if let Err(denied) = guard(state, headers, "GET", section, SECURITY_READ) {
        return denied;
    }
    let snapshot = state.security.snapshot();
    let body = snapshot
        .document
        .get(section.key())
        .cloned()
        .unwrap_or_else(|| json!({}));
    Json(json!({ section.key(): body, "version": snapshot.version })).into_response()
}

fn edit_section(state: &AppState, headers: &HeaderMap, section: Section, body: &Value) -> Response {
    if let Err(denied) = guard(state, headers, "POST", section, SECURITY_EDIT) {
        return denied;
    }
    match state.security.edit(section, body) {
        Ok(EditOutcome::Applied { version }) => Json(json!({ "version": version })).into_response(),
        Ok(EditOutcome::Unchanged) => Json(json!({ "unchanged": true })).into_response(),
        Ok(EditOutcome::Rejected(errors)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "errorMessages": errors })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Authenticate and authorize a call to the edit API itself.
fn guard(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    section: Section,
    permission: &str,
) -> Result<(), Response> {
    let ctx = RequestContext::new(format!("/admin/{}", section.key()))
        .method(method)
        .request_type(RequestType::Admin)
        .headers(headers.clone())
        .named(permission);
    let outcome = state.security.check(ctx);
    match outcome.decision {
        AuthorizationDecision::Allow => Ok(()),
        AuthorizationDecision::Forbidden => Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": format!("permission `{permission}` is required") })),
        )
            .into_response()),
        AuthorizationDecision::NeedsCredentials => Err(unauthorized(&outcome.challenges)),
    }
}

fn unauthorized(challenges: &[String]) -> Response {
    let mut resp = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "authentication required" })),
    )
        .into_response();
    let h = resp.headers_mut();
    for challenge in challenges {
        if let Ok(v) = HeaderValue::from_str(challenge) {
            h.append(WWW_AUTHENTICATE, v);
        }
    }
    resp
}
