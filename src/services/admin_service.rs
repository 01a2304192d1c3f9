use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, EntityTrait, PaginatorTrait, QueryOrder, QuerySelect, Set, SqlErr,
};

use crate::{
    audit::log_audit,
    dto::users::{
        CreatePreassignedRoleRequest, PreassignedRoleList, UpdateUserRoleRequest, UserList,
    },
    entity::{
        preassigned_roles::{
            ActiveModel as PreassignedActive, Column as PreassignedCol, Entity as PreassignedRoles,
            Model as PreassignedModel,
        },
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{PreassignedRole, User},
    notify,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

pub async fn list_users(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Users::find().order_by_desc(UserCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(user_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Users", UserList { items }, Some(meta)))
}

pub async fn update_user_role(
    state: &AppState,
    user: &AuthUser,
    id: &str,
    payload: UpdateUserRoleRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;

    let existing = Users::find_by_id(id.to_string()).one(&state.orm).await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let mut active: UserActive = existing.into();
    active.role = Set(payload.role);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "user_role_update",
        Some("users"),
        Some(serde_json::json!({ "user_id": updated.id, "role": updated.role.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Role updated",
        user_from_entity(updated),
        Some(Meta::empty()),
    ))
}

/// Hard delete: the account and, via cascade, its orders and reviews are
/// erased. There is no soft variant for users.
pub async fn delete_user(state: &AppState, user: &AuthUser, id: &str) -> AppResult<()> {
    ensure_admin(user)?;

    let result = Users::delete_by_id(id.to_string()).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "user_delete",
        Some("users"),
        Some(serde_json::json!({ "user_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}

pub async fn list_preassigned_roles(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<PreassignedRoleList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = PreassignedRoles::find().order_by_desc(PreassignedCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(preassigned_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Preassigned roles",
        PreassignedRoleList { items },
        Some(meta),
    ))
}

pub async fn create_preassigned_role(
    state: &AppState,
    user: &AuthUser,
    payload: CreatePreassignedRoleRequest,
) -> AppResult<ApiResponse<PreassignedRole>> {
    ensure_admin(user)?;
    if payload.email.trim().is_empty() {
        return Err(AppError::BadRequest("Email must not be empty".into()));
    }

    let active = PreassignedActive {
        id: NotSet,
        email: Set(payload.email),
        first_name: Set(payload.first_name),
        last_name: Set(payload.last_name),
        phone_number: Set(payload.phone_number),
        role: Set(payload.role),
        consumed: Set(false),
        created_by: Set(Some(user.user_id.clone())),
        created_at: NotSet,
    };
    // The partial unique index rejects a second pending binding for the
    // same email; consumed rows do not block re-assignment.
    let created = active.insert(&state.orm).await.map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict("Email already has a pending role".into())
        }
        _ => AppError::OrmError(err),
    })?;

    if let Some(phone) = created.phone_number.as_deref() {
        notify::send_welcome_sms(
            phone,
            created.first_name.as_deref(),
            &created.email,
            created.role,
        );
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "preassigned_role_create",
        Some("preassigned_roles"),
        Some(serde_json::json!({
            "preassigned_role_id": created.id,
            "role": created.role.as_str()
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Preassigned role created",
        preassigned_from_entity(created),
        Some(Meta::empty()),
    ))
}

pub async fn delete_preassigned_role(state: &AppState, user: &AuthUser, id: i32) -> AppResult<()> {
    ensure_admin(user)?;

    let result = PreassignedRoles::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "preassigned_role_delete",
        Some("preassigned_roles"),
        Some(serde_json::json!({ "preassigned_role_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(())
}

fn user_from_entity(model: UserModel) -> User {
    User {
        id: model.id,
        email: model.email,
        first_name: model.first_name,
        last_name: model.last_name,
        phone_number: model.phone_number,
        address: model.address,
        profile_image_url: model.profile_image_url,
        role: model.role,
        consent_accepted_at: model.consent_accepted_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn preassigned_from_entity(model: PreassignedModel) -> PreassignedRole {
    PreassignedRole {
        id: model.id,
        email: model.email,
        first_name: model.first_name,
        last_name: model.last_name,
        phone_number: model.phone_number,
        role: model.role,
        consumed: model.consumed,
        created_by: model.created_by,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
