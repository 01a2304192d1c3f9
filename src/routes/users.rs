use axum::{Json, Router, extract::State, routing::patch};

use crate::{
    dto::users::UpdateProfileRequest,
    error::AppResult,
    middleware::auth::AuthUser,
    models::User,
    response::ApiResponse,
    services::identity_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/profile", patch(update_profile))
}

#[utoipa::path(
    patch,
    path = "/api/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Update own profile", body = ApiResponse<User>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = identity_service::update_profile(&state, &user, payload).await?;
    Ok(Json(resp))
}
