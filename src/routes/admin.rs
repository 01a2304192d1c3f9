use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
};

use crate::{
    dto::users::{
        CreatePreassignedRoleRequest, PreassignedRoleList, UpdateUserRoleRequest, UserList,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::{PreassignedRole, User},
    response::ApiResponse,
    routes::params::Pagination,
    services::admin_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}/role", patch(update_user_role))
        .route("/users/{id}", delete(delete_user))
        .route("/preassigned-roles", get(list_preassigned_roles))
        .route("/preassigned-roles", post(create_preassigned_role))
        .route("/preassigned-roles/{id}", delete(delete_preassigned_role))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20")
    ),
    responses(
        (status = 200, description = "All users, newest first", body = ApiResponse<UserList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<UserList>>> {
    let resp = admin_service::list_users(&state, &user, pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}/role",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    request_body = UpdateUserRoleRequest,
    responses(
        (status = 200, description = "Update user role", body = ApiResponse<User>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_user_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserRoleRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = admin_service::update_user_role(&state, &user, &id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 204, description = "User erased, orders and reviews cascade"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    admin_service::delete_user(&state, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/admin/preassigned-roles",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20")
    ),
    responses(
        (status = 200, description = "Preassigned roles, newest first", body = ApiResponse<PreassignedRoleList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_preassigned_roles(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<PreassignedRoleList>>> {
    let resp = admin_service::list_preassigned_roles(&state, &user, pagination).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/preassigned-roles",
    request_body = CreatePreassignedRoleRequest,
    responses(
        (status = 201, description = "Create preassigned role", body = ApiResponse<PreassignedRole>),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Email already has a pending role")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn create_preassigned_role(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePreassignedRoleRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<PreassignedRole>>)> {
    let resp = admin_service::create_preassigned_role(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    delete,
    path = "/api/admin/preassigned-roles/{id}",
    params(
        ("id" = i32, Path, description = "Preassigned role ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn delete_preassigned_role(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    admin_service::delete_preassigned_role(&state, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
