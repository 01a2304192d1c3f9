use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, Set, TransactionTrait,
};

use crate::{
    audit::log_audit,
    config::ProviderConfig,
    dto::auth::{IdentityClaims, SessionClaims},
    dto::users::UpdateProfileRequest,
    entity::{
        Role,
        preassigned_roles::{Column as PreassignedCol, Entity as PreassignedRoles},
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::User,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Verify a provider-issued identity token against one registry entry.
/// Issuer, audience and expiry are all enforced by the decoder.
pub fn verify_identity_token(
    provider: &ProviderConfig,
    token: &str,
) -> AppResult<IdentityClaims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[provider.issuer.as_str()]);
    validation.set_audience(&[provider.audience.as_str()]);

    let decoded = decode::<IdentityClaims>(
        token,
        &DecodingKey::from_secret(provider.secret.as_bytes()),
        &validation,
    )
    .map_err(|_| AppError::Unauthorized)?;

    Ok(decoded.claims)
}

/// Resolve a verified login into a local user record.
///
/// Runs on every callback: refreshes claim-supplied fields for known
/// subjects, merges by email when the provider re-keys a subject, creates
/// the record on first contact, and applies any unconsumed preassigned
/// role bound to the claim email. Consumption is the commit point: the
/// role is applied only when the conditional update actually flipped the
/// row, so two racing logins cannot both win the binding.
pub async fn resolve_login(state: &AppState, claims: &IdentityClaims) -> AppResult<User> {
    let txn = state.orm.begin().await?;

    let by_subject = Users::find_by_id(claims.sub.clone()).one(&txn).await?;

    // Preassignments only bind on first contact with a subject, and
    // without an email there is nothing to match one against.
    let preassigned = match (&by_subject, claims.email.as_deref()) {
        (None, Some(email)) => {
            PreassignedRoles::find()
                .filter(
                    Condition::all()
                        .add(PreassignedCol::Email.eq(email))
                        .add(PreassignedCol::Consumed.eq(false)),
                )
                .one(&txn)
                .await?
        }
        _ => None,
    };

    let mut user = match by_subject {
        Some(existing) => {
            let mut active: UserActive = existing.into();
            if let Some(email) = claims.email.clone() {
                active.email = Set(Some(email));
            }
            if let Some(first_name) = claims.first_name.clone() {
                active.first_name = Set(Some(first_name));
            }
            if let Some(last_name) = claims.last_name.clone() {
                active.last_name = Set(Some(last_name));
            }
            if let Some(url) = claims.profile_image_url.clone() {
                active.profile_image_url = Set(Some(url));
            }
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?
        }
        None => {
            let by_email = match claims.email.as_deref() {
                Some(email) => Users::find()
                    .filter(UserCol::Email.eq(email))
                    .one(&txn)
                    .await?,
                None => None,
            };

            match by_email {
                Some(existing) => {
                    // Same email, new subject: the provider re-keyed this
                    // account. Move the row to the new id; order and review
                    // references follow via ON UPDATE CASCADE.
                    let mut update = Users::update_many()
                        .col_expr(UserCol::Id, Expr::value(claims.sub.clone()))
                        .col_expr(UserCol::UpdatedAt, Expr::value(Utc::now()));
                    if let Some(first_name) = claims.first_name.clone() {
                        update = update.col_expr(UserCol::FirstName, Expr::value(first_name));
                    }
                    if let Some(last_name) = claims.last_name.clone() {
                        update = update.col_expr(UserCol::LastName, Expr::value(last_name));
                    }
                    if let Some(url) = claims.profile_image_url.clone() {
                        update = update.col_expr(UserCol::ProfileImageUrl, Expr::value(url));
                    }
                    update
                        .filter(UserCol::Id.eq(existing.id.clone()))
                        .exec(&txn)
                        .await?;

                    Users::find_by_id(claims.sub.clone())
                        .one(&txn)
                        .await?
                        .ok_or_else(|| {
                            AppError::Internal(anyhow::anyhow!("user vanished during email merge"))
                        })?
                }
                None => {
                    let first_name = claims.first_name.clone().or_else(|| {
                        preassigned.as_ref().and_then(|p| p.first_name.clone())
                    });
                    let last_name = claims.last_name.clone().or_else(|| {
                        preassigned.as_ref().and_then(|p| p.last_name.clone())
                    });
                    let phone_number =
                        preassigned.as_ref().and_then(|p| p.phone_number.clone());

                    UserActive {
                        id: Set(claims.sub.clone()),
                        email: Set(claims.email.clone()),
                        first_name: Set(first_name),
                        last_name: Set(last_name),
                        phone_number: Set(phone_number),
                        address: Set(None),
                        profile_image_url: Set(claims.profile_image_url.clone()),
                        role: Set(Role::Client),
                        consent_accepted_at: Set(Some(Utc::now().into())),
                        created_at: NotSet,
                        updated_at: NotSet,
                    }
                    .insert(&txn)
                    .await?
                }
            }
        }
    };

    if let Some(pre) = &preassigned {
        let consumed = PreassignedRoles::update_many()
            .col_expr(PreassignedCol::Consumed, Expr::value(true))
            .filter(
                Condition::all()
                    .add(PreassignedCol::Email.eq(pre.email.clone()))
                    .add(PreassignedCol::Consumed.eq(false)),
            )
            .exec(&txn)
            .await?;

        // Zero rows means a concurrent login already claimed the binding.
        if consumed.rows_affected == 1 {
            let mut active: UserActive = user.into();
            active.role = Set(pre.role);
            active.updated_at = Set(Utc::now().into());
            user = active.update(&txn).await?;
        }
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.id.as_str()),
        "login",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id, "role": user.role.as_str() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(user_from_entity(user))
}

/// Mint the API's own bearer session token for a resolved user.
pub fn issue_session_token(user: &User) -> AppResult<String> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = SessionClaims {
        sub: user.id.clone(),
        role: user.role,
        exp: expiration.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(format!("Bearer {}", token))
}

pub async fn get_current_user(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let model = Users::find_by_id(user.user_id.clone()).one(&state.orm).await?;
    let model = match model {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Ok", user_from_entity(model), None))
}

pub async fn update_profile(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    let existing = Users::find_by_id(user.user_id.clone()).one(&state.orm).await?;
    let existing = match existing {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let mut active: UserActive = existing.into();
    if let Some(first_name) = payload.first_name {
        active.first_name = Set(Some(first_name));
    }
    if let Some(last_name) = payload.last_name {
        active.last_name = Set(Some(last_name));
    }
    if let Some(phone_number) = payload.phone_number {
        active.phone_number = Set(Some(phone_number));
    }
    if let Some(address) = payload.address {
        active.address = Set(Some(address));
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id.as_str()),
        "profile_update",
        Some("users"),
        Some(serde_json::json!({ "user_id": updated.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Profile updated",
        user_from_entity(updated),
        Some(Meta::empty()),
    ))
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
