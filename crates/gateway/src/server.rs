use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        body::Bytes,
        extract::{ConnectInfo, State},
        http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
        response::{IntoResponse, Json, Response},
        routing::{any, get, post},
    },
    ctigate_common::entities::Account,
    ctigate_protocol::{
        Message, StatusError, generate_message_id,
        negotiation::{
            CONTENT_TYPE_JSON, CONTENT_TYPE_XML, X_TAXII_CONTENT_TYPE, accepts,
            explicitly_accepts, options_headers, response_headers, validate_response_headers,
        },
    },
    secrecy::Secret,
    serde::Deserialize,
    tower_http::trace::TraceLayer,
    tracing::{debug, error, info, warn},
};

use crate::{dispatch::dispatch, error::Result, registry::Service, state::GatewayState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let taxii_route = format!("{}/{{*path}}", state.settings.path_prefix);
    info!(
        route = taxii_route,
        services = state.registry.services().len(),
        "registering taxii routes"
    );

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth", post(auth_handler))
        .route(&taxii_route, any(taxii_handler))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `bind:port` and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, bind: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((bind, port)).await?;
    let addr = listener.local_addr()?;
    info!(
        %addr,
        version = state.version,
        prefix = state.settings.path_prefix,
        "ctigate listening"
    );
    for service in state.registry.services() {
        info!(
            service_id = service.id(),
            service_type = service.service_type().as_str(),
            path = service.path(),
            available = service.is_available(),
            "service registered"
        );
    }

    let app = build_gateway_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("ctigate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Admin endpoints ──────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "alive": true }))
}

#[derive(Deserialize)]
struct AuthRequest {
    username: Option<String>,
    password: Option<Secret<String>>,
}

async fn auth_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<AuthRequest>,
) -> Response {
    let (Some(username), Some(password)) = (body.username, body.password) else {
        return (StatusCode::BAD_REQUEST, "username and password are required").into_response();
    };
    match state.accounts.authenticate(&username, &password).await {
        Ok(Some(token)) => Json(serde_json::json!({ "token": token })).into_response(),
        Ok(None) => {
            info!(username, "authentication failed");
            (StatusCode::UNAUTHORIZED, "invalid credentials").into_response()
        },
        Err(e) => {
            error!(username, error = %e, "authentication error");
            (StatusCode::INTERNAL_SERVER_ERROR, "authentication error").into_response()
        },
    }
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

// ── TAXII endpoint ───────────────────────────────────────────────────────────

/// What kind of client sent a request to the catch-all route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Taxii,
    NotAcceptable,
    UnsupportedMediaType,
    NotFound,
}

fn classify(headers: &HeaderMap) -> RequestKind {
    let has_taxii_content_type = headers.contains_key(X_TAXII_CONTENT_TYPE);
    let wants_json = explicitly_accepts(headers, CONTENT_TYPE_JSON);
    if has_taxii_content_type {
        if accepts(headers, CONTENT_TYPE_XML) {
            return RequestKind::Taxii;
        }
        if !wants_json {
            return RequestKind::NotAcceptable;
        }
    }
    if wants_json {
        RequestKind::UnsupportedMediaType
    } else {
        RequestKind::NotFound
    }
}

async fn taxii_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path();
    match classify(&headers) {
        RequestKind::Taxii => {},
        RequestKind::NotAcceptable => {
            return (StatusCode::NOT_ACCEPTABLE, "Unacceptable").into_response();
        },
        RequestKind::UnsupportedMediaType => {
            return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
        },
        RequestKind::NotFound => return StatusCode::NOT_FOUND.into_response(),
    }

    let Some(service) = state.registry.find_by_path(path) else {
        debug!(path, %peer, "no service at path");
        return StatusCode::NOT_FOUND.into_response();
    };

    let account = match authorize(&state, &service, &headers).await {
        Ok(account) => account,
        Err(status) => return status_response(&state, &status),
    };

    if !service.is_available() {
        return status_response(&state, &StatusError::failure("The service is not available"));
    }

    match method {
        Method::POST => {
            debug!(service_id = service.id(), %peer, bytes = body.len(), "taxii request");
            match dispatch(&state, &service, account, &headers, body).await {
                Ok(message) => message_response(&state, &message),
                Err(status) => status_response(&state, &status),
            }
        },
        Method::OPTIONS => {
            let mut response = StatusCode::OK.into_response();
            response
                .headers_mut()
                .extend(options_headers(state.message_bindings()));
            response
        },
        other => {
            debug!(service_id = service.id(), method = %other, "method not allowed");
            let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
            response
        },
    }
}

/// Resolve the caller and enforce the service's authentication requirement.
async fn authorize(
    state: &GatewayState,
    service: &Service,
    headers: &HeaderMap,
) -> std::result::Result<Option<Account>, StatusError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let account = match state
        .accounts
        .authenticate_request(authorization, state.settings.support_basic_auth)
        .await
    {
        Ok(account) => account,
        Err(e) if e.is_unauthorized() => {
            info!(service_id = service.id(), "credentials rejected");
            return Err(StatusError::unauthorized());
        },
        Err(e) => {
            error!(service_id = service.id(), error = %e, "authentication failed");
            return Err(StatusError::failure("Authentication could not be completed"));
        },
    };

    if service.authentication_required() && account.is_none() {
        debug!(service_id = service.id(), "anonymous request to protected service");
        return Err(StatusError::unauthorized());
    }
    Ok(account)
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn message_response(state: &GatewayState, message: &Message) -> Response {
    let headers = response_headers(message.message_binding(), state.settings.secure);
    if let Err(status) = validate_response_headers(&headers, &state.supported) {
        error!(reason = %status.message, "refusing to send invalid response headers");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match state.codec.serialize(message) {
        Ok(body) => (StatusCode::OK, headers, body).into_response(),
        Err(e) => {
            error!(
                message_id = message.message_id(),
                error = %e,
                "failed to serialize response"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

/// Status messages travel with HTTP 200 like any other TAXII response.
fn status_response(state: &GatewayState, status: &StatusError) -> Response {
    warn!(
        status = %status.status_type(),
        in_response_to = status.in_response_to.as_deref().unwrap_or_default(),
        reason = %status.message,
        "status exception"
    );
    let message = Message::from(status.to_status_message(generate_message_id()));
    message_response(state, &message)
}
