use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header},
    routing::{get, post},
};

use crate::{
    dto::auth::{CallbackRequest, LoginResponse},
    error::AppResult,
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    services::identity_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/callback", post(callback))
        .route("/user", get(current_user))
}

#[utoipa::path(
    post,
    path = "/api/auth/callback",
    request_body = CallbackRequest,
    responses(
        (status = 200, description = "Resolve a provider login into a session", body = ApiResponse<LoginResponse>),
        (status = 401, description = "Invalid identity token")
    ),
    tag = "Auth"
)]
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CallbackRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    // The serving host picks the identity provider to verify against.
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let provider = state.providers.for_host(host);

    let claims = identity_service::verify_identity_token(provider, &payload.id_token)?;
    let user = identity_service::resolve_login(&state, &claims).await?;
    let token = identity_service::issue_session_token(&user)?;

    Ok(Json(ApiResponse::success(
        "Logged in",
        LoginResponse { token, user },
        Some(Meta::empty()),
    )))
}

#[utoipa::path(
    get,
    path = "/api/auth/user",
    responses(
        (status = 200, description = "Current user", body = ApiResponse<User>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = identity_service::get_current_user(&state, &user).await?;
    Ok(Json(resp))
}
