use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, SqlErr};

use crate::{
    audit::log_audit,
    dto::reviews::{CreateReviewRequest, EligibilityResponse, ReviewAuthor, ReviewList, ReviewWithAuthor},
    entity::{
        products::Entity as Products,
        reviews::{ActiveModel as ReviewActive, Model as ReviewModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Review,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Whether `user_id` may review `product_id`: a qualifying purchase on
/// record (any order status counts) and no prior review for the pair.
/// Unknown users or products simply come back false.
pub async fn can_review(state: &AppState, user_id: &str, product_id: i32) -> AppResult<bool> {
    Ok(has_purchased(state, user_id, product_id).await?
        && !has_reviewed(state, user_id, product_id).await?)
}

pub async fn eligibility(
    state: &AppState,
    user: &AuthUser,
    product_id: i32,
) -> AppResult<ApiResponse<EligibilityResponse>> {
    let can_review = can_review(state, &user.user_id, product_id).await?;
    Ok(ApiResponse::success(
        "Ok",
        EligibilityResponse { can_review },
        None,
    ))
}

pub async fn create_review(
    state: &AppState,
    user: &AuthUser,
    product_id: i32,
    payload: CreateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::BadRequest("Rating must be between 1 and 5".into()));
    }

    if Products::find_by_id(product_id).one(&state.orm).await?.is_none() {
        return Err(AppError::NotFound);
    }

    if !has_purchased(state, &user.user_id, product_id).await? {
        return Err(AppError::Forbidden);
    }
    if has_reviewed(state, &user.user_id, product_id).await? {
        return Err(AppError::Conflict("Product already reviewed".into()));
    }

    // The pre-checks are advisory; the unique constraint on
    // (user_id, product_id) settles concurrent submissions.
    let review = ReviewActive {
        id: NotSet,
        user_id: Set(user.user_id.clone()),
        product_id: Set(product_id),
        rating: Set(payload.rating),
        comment: Set(payload.comment),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await
    .map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict("Product already reviewed".into())
        }
        _ => AppError::OrmError(err),
    })?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "review_create",
        Some("reviews"),
        Some(serde_json::json!({ "review_id": review.id, "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Review created",
        review_from_entity(review),
        Some(Meta::empty()),
    ))
}

pub async fn list_product_reviews(
    state: &AppState,
    product_id: i32,
) -> AppResult<ApiResponse<ReviewList>> {
    #[derive(Debug, sqlx::FromRow)]
    struct ReviewRow {
        id: i32,
        user_id: String,
        product_id: i32,
        rating: i32,
        comment: Option<String>,
        created_at: DateTime<Utc>,
        first_name: Option<String>,
        last_name: Option<String>,
        profile_image_url: Option<String>,
    }

    let rows: Vec<ReviewRow> = sqlx::query_as(
        r#"
        SELECT r.id, r.user_id, r.product_id, r.rating, r.comment, r.created_at,
               u.first_name, u.last_name, u.profile_image_url
        FROM reviews r
        JOIN users u ON u.id = r.user_id
        WHERE r.product_id = $1
        ORDER BY r.created_at DESC
        "#,
    )
    .bind(product_id)
    .fetch_all(&state.pool)
    .await?;

    let items = rows
        .into_iter()
        .map(|row| ReviewWithAuthor {
            review: Review {
                id: row.id,
                user_id: row.user_id,
                product_id: row.product_id,
                rating: row.rating,
                comment: row.comment,
                created_at: row.created_at,
            },
            author: ReviewAuthor {
                first_name: row.first_name,
                last_name: row.last_name,
                profile_image_url: row.profile_image_url,
            },
        })
        .collect();

    Ok(ApiResponse::success("Reviews", ReviewList { items }, None))
}

async fn has_purchased(state: &AppState, user_id: &str, product_id: i32) -> AppResult<bool> {
    let purchased: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            WHERE o.user_id = $1 AND oi.product_id = $2
        )
        "#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(purchased)
}

async fn has_reviewed(state: &AppState, user_id: &str, product_id: i32) -> AppResult<bool> {
    let reviewed: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM reviews WHERE user_id = $1 AND product_id = $2)",
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(&state.pool)
    .await?;
    Ok(reviewed)
}

fn review_from_entity(model: ReviewModel) -> Review {
    Review {
        id: model.id,
        user_id: model.user_id,
        product_id: model.product_id,
        rating: model.rating,
        comment: model.comment,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
