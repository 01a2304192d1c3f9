use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use crate::{
    dto::reviews::{CreateReviewRequest, EligibilityResponse, ReviewList},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Review,
    response::ApiResponse,
    services::review_service,
    state::AppState,
};

/// Merged into the products router; paths hang off a product id.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/reviews", get(list_reviews).post(create_review))
        .route("/{id}/can-review", get(can_review))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}/reviews",
    params(
        ("id" = i32, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Reviews with author info, newest first", body = ApiResponse<ReviewList>)
    ),
    tag = "Reviews"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<ReviewList>>> {
    let resp = review_service::list_product_reviews(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}/can-review",
    params(
        ("id" = i32, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Review eligibility for the caller", body = ApiResponse<EligibilityResponse>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Reviews"
)]
pub async fn can_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ApiResponse<EligibilityResponse>>> {
    let resp = review_service::eligibility(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/products/{id}/reviews",
    params(
        ("id" = i32, Path, description = "Product ID")
    ),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Create review", body = ApiResponse<Review>),
        (status = 400, description = "Invalid rating"),
        (status = 403, description = "No qualifying purchase"),
        (status = 409, description = "Already reviewed")
    ),
    security(("bearer_auth" = [])),
    tag = "Reviews"
)]
pub async fn create_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<CreateReviewRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Review>>)> {
    let resp = review_service::create_review(&state, &user, id, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
