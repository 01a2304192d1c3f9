use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, SqlErr};

use crate::{
    audit::log_audit,
    dto::products::{CreateProductRequest, ProductList, UpdateProductRequest},
    entity::products::{ActiveModel as ProductActive, Entity as Products, Model as ProductModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_staff},
    models::{Product, ProductWithRating},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

/// Catalog row with its review aggregates, straight from the grouped query.
#[derive(Debug, sqlx::FromRow)]
struct ProductRatingRow {
    id: i32,
    name: String,
    description: Option<String>,
    price: Decimal,
    image_url: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    average_rating: f64,
    review_count: i64,
}

/// Storefront listing: active products with live rating aggregates.
/// Averages are computed per request; nothing is cached or denormalized.
pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();

    // The listing query binds limit/offset first, so its search pattern is
    // $3; the count query only binds the pattern.
    let mut where_clause = String::from("WHERE p.is_active = TRUE");
    let mut where_count = where_clause.clone();
    let search = query.q.as_ref().filter(|s| !s.is_empty());
    if search.is_some() {
        where_clause.push_str(" AND (p.name ILIKE $3 OR p.description ILIKE $3)");
        where_count.push_str(" AND (p.name ILIKE $1 OR p.description ILIKE $1)");
    }

    let sort_col = query.sort_by.unwrap_or(ProductSortBy::CreatedAt).as_sql();
    let sort_dir = query.sort_order.unwrap_or(SortOrder::Desc).as_sql();

    let sql = format!(
        r#"
        SELECT p.id, p.name, p.description, p.price, p.image_url, p.is_active,
               p.created_at, p.updated_at,
               COALESCE(AVG(r.rating), 0)::float8 AS average_rating,
               COUNT(r.id) AS review_count
        FROM products p
        LEFT JOIN reviews r ON r.product_id = p.id
        {where_clause}
        GROUP BY p.id
        ORDER BY {sort_col} {sort_dir}
        LIMIT $1 OFFSET $2
        "#
    );
    let count_sql = format!("SELECT COUNT(*) FROM products p {where_count}");

    let mut rows_query = sqlx::query_as::<_, ProductRatingRow>(&sql)
        .bind(limit)
        .bind(offset);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(q) = search {
        let pattern = format!("%{q}%");
        rows_query = rows_query.bind(pattern.clone());
        count_query = count_query.bind(pattern);
    }

    let rows = rows_query.fetch_all(&state.pool).await?;
    let total = count_query.fetch_one(&state.pool).await?;

    let items = rows.into_iter().map(rated_from_row).collect();
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(meta),
    ))
}

/// Product detail with aggregates. Inactive products still resolve so
/// historical orders can show what was bought.
pub async fn get_product(state: &AppState, id: i32) -> AppResult<ApiResponse<ProductWithRating>> {
    let row: Option<ProductRatingRow> = sqlx::query_as(
        r#"
        SELECT p.id, p.name, p.description, p.price, p.image_url, p.is_active,
               p.created_at, p.updated_at,
               COALESCE(AVG(r.rating), 0)::float8 AS average_rating,
               COUNT(r.id) AS review_count
        FROM products p
        LEFT JOIN reviews r ON r.product_id = p.id
        WHERE p.id = $1
        GROUP BY p.id
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Product", rated_from_row(row), None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_staff(user)?;
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name must not be empty".into()));
    }
    if payload.price < Decimal::ZERO {
        return Err(AppError::BadRequest("Price must not be negative".into()));
    }
    // Money columns are NUMERIC(10, 2), so 99999999.99 is the ceiling.
    if payload.price > Decimal::new(9_999_999_999, 2) {
        return Err(AppError::BadRequest("Price is out of range".into()));
    }

    let active = ProductActive {
        id: NotSet,
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        image_url: Set(payload.image_url),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = active.insert(&state.orm).await.map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict("Product name already exists".into())
        }
        _ => AppError::OrmError(err),
    })?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: i32,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_staff(user)?;
    if let Some(price) = payload.price {
        if price < Decimal::ZERO {
            return Err(AppError::BadRequest("Price must not be negative".into()));
        }
        if price > Decimal::new(9_999_999_999, 2) {
            return Err(AppError::BadRequest("Price is out of range".into()));
        }
    }

    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ProductActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(image_url) = payload.image_url {
        active.image_url = Set(Some(image_url));
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await.map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict("Product name already exists".into())
        }
        _ => AppError::OrmError(err),
    })?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "product_update",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

/// Soft delete: the product disappears from the storefront but stays
/// resolvable for order history.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: i32,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_staff(user)?;
    let existing = Products::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(p) => p,
        None => return Err(AppError::NotFound),
    };

    let mut active: ProductActive = existing.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product deactivated",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn rated_from_row(row: ProductRatingRow) -> ProductWithRating {
    ProductWithRating {
        id: row.id,
        name: row.name,
        description: row.description,
        price: row.price,
        image_url: row.image_url,
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
        average_rating: row.average_rating,
        review_count: row.review_count,
    }
}

fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        image_url: model.image_url,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
