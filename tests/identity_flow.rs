use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use cupcake_shop_api::{
    config::{AppConfig, ProviderConfig, ProviderRegistry},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        auth::{IdentityClaims, SessionClaims},
        orders::{CreateOrderRequest, NewOrderItem},
        users::{CreatePreassignedRoleRequest, UpdateProfileRequest, UpdateUserRoleRequest},
    },
    entity::{
        Role,
        orders::{Column as OrderCol, Entity as Orders},
        products::ActiveModel as ProductActive,
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::Pagination,
    services::{admin_service, identity_service, order_service},
    state::AppState,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    Statement,
};
use serde::Serialize;

/// What the identity provider signs into its tokens in these flows.
#[derive(Serialize)]
struct ProviderToken {
    sub: String,
    email: String,
    first_name: String,
    iss: String,
    aud: String,
    exp: usize,
}

// Integration flow: provider logins provision local accounts, preassigned
// roles bind on first contact, and admins manage the result.
#[tokio::test]
async fn login_provisioning_and_admin_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    // Session tokens read their signing secret from the environment.
    unsafe { std::env::set_var("JWT_SECRET", "test-session-secret") };

    let state = setup_state(&database_url).await?;
    let admin = create_admin(&state, "auth0|boss", "boss@example.com").await?;

    // First contact, full callback path: verify the provider token, resolve
    // the login, mint a session token.
    let provider = state.providers.for_host("localhost:3000");
    let token = identity_token(
        provider,
        "auth0|nina",
        "nina@example.com",
        "Nina",
        Utc::now() + Duration::hours(1),
    )?;
    let claims = identity_service::verify_identity_token(provider, &token)?;
    let nina = identity_service::resolve_login(&state, &claims).await?;

    assert_eq!(nina.id, "auth0|nina");
    assert_eq!(nina.role, Role::Client);
    assert_eq!(nina.email.as_deref(), Some("nina@example.com"));
    assert_eq!(nina.first_name.as_deref(), Some("Nina"));
    assert!(nina.consent_accepted_at.is_some());

    let session = identity_service::issue_session_token(&nina)?;
    let raw = session.strip_prefix("Bearer ").expect("bearer prefix");
    let decoded = decode::<SessionClaims>(
        raw,
        &DecodingKey::from_secret(b"test-session-secret"),
        &Validation::default(),
    )?;
    assert_eq!(decoded.claims.sub, nina.id);
    assert_eq!(decoded.claims.role, Role::Client);

    let logins: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = 'login'")
            .fetch_one(&state.pool)
            .await?;
    assert_eq!(logins, 1);

    // Bad provider tokens never reach provisioning.
    let rogue = ProviderToken {
        sub: "auth0|rogue".into(),
        email: "rogue@example.com".into(),
        first_name: "Rogue".into(),
        iss: "https://rogue.example".into(),
        aud: provider.audience.clone(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    let rogue = encode(
        &Header::default(),
        &rogue,
        &EncodingKey::from_secret(provider.secret.as_bytes()),
    )?;
    assert!(matches!(
        identity_service::verify_identity_token(provider, &rogue),
        Err(AppError::Unauthorized)
    ));

    let expired = identity_token(
        provider,
        "auth0|late",
        "late@example.com",
        "Late",
        Utc::now() - Duration::hours(2),
    )?;
    assert!(matches!(
        identity_service::verify_identity_token(provider, &expired),
        Err(AppError::Unauthorized)
    ));

    // Profile fields the provider does not know about survive the next login.
    let nina_auth = AuthUser {
        user_id: nina.id.clone(),
        role: nina.role,
    };
    identity_service::update_profile(
        &state,
        &nina_auth,
        UpdateProfileRequest {
            first_name: None,
            last_name: None,
            phone_number: Some("+15550009999".into()),
            address: Some("Baker St 1".into()),
        },
    )
    .await?;

    let nina = identity_service::resolve_login(
        &state,
        &IdentityClaims {
            sub: "auth0|nina".into(),
            email: Some("nina@example.com".into()),
            first_name: Some("Nina".into()),
            last_name: Some("Lund".into()),
            profile_image_url: Some("https://cdn.example/nina.png".into()),
        },
    )
    .await?;
    assert_eq!(nina.last_name.as_deref(), Some("Lund"));
    assert_eq!(nina.phone_number.as_deref(), Some("+15550009999"));
    assert_eq!(nina.address.as_deref(), Some("Baker St 1"));
    assert_eq!(nina.role, Role::Client);

    // Preassignment: admin-only, one pending binding per email.
    let denied = admin_service::create_preassigned_role(
        &state,
        &nina_auth,
        preassignment("emp@example.com", Some("Emil"), Some("+15550001111"), Role::Employee),
    )
    .await;
    assert!(matches!(denied, Err(AppError::Forbidden)));

    admin_service::create_preassigned_role(
        &state,
        &admin,
        preassignment("emp@example.com", Some("Emil"), Some("+15550001111"), Role::Employee),
    )
    .await?;

    let duplicate = admin_service::create_preassigned_role(
        &state,
        &admin,
        preassignment("emp@example.com", None, None, Role::Admin),
    )
    .await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    // First login with the bound email: role applied, names and phone
    // fall back to the preassignment, binding flips to consumed.
    let emp = identity_service::resolve_login(
        &state,
        &IdentityClaims {
            sub: "auth0|emp-1".into(),
            email: Some("emp@example.com".into()),
            first_name: None,
            last_name: None,
            profile_image_url: None,
        },
    )
    .await?;
    assert_eq!(emp.role, Role::Employee);
    assert_eq!(emp.first_name.as_deref(), Some("Emil"));
    assert_eq!(emp.phone_number.as_deref(), Some("+15550001111"));

    let bindings = admin_service::list_preassigned_roles(&state, &admin, page_one()).await?;
    let bindings = bindings.data.expect("bindings");
    assert!(bindings.items.iter().all(|b| b.consumed));

    // A consumed binding is spent; the next login keeps the granted role.
    let emp = identity_service::resolve_login(
        &state,
        &IdentityClaims {
            sub: "auth0|emp-1".into(),
            email: Some("emp@example.com".into()),
            first_name: None,
            last_name: None,
            profile_image_url: None,
        },
    )
    .await?;
    assert_eq!(emp.role, Role::Employee);

    // Consumed bindings do not block a fresh one for the same email.
    admin_service::create_preassigned_role(
        &state,
        &admin,
        preassignment("emp@example.com", None, None, Role::Admin),
    )
    .await?;

    // The employee shops before the provider re-keys their subject.
    let emp_auth = AuthUser {
        user_id: "auth0|emp-1".into(),
        role: Role::Employee,
    };
    let carrot = create_product(&state, "Carrot Cake", Decimal::new(425, 2)).await?;
    order_service::create_order(
        &state,
        &emp_auth,
        CreateOrderRequest {
            items: vec![NewOrderItem {
                product_id: carrot,
                quantity: 1,
                price_at_purchase: Decimal::new(425, 2),
            }],
            total_amount: Decimal::new(425, 2),
        },
    )
    .await?;

    // Same email, new subject: the account is re-keyed in place, history
    // follows, and the fresh binding is applied.
    let rekeyed = identity_service::resolve_login(
        &state,
        &IdentityClaims {
            sub: "auth0|emp-2".into(),
            email: Some("emp@example.com".into()),
            first_name: None,
            last_name: None,
            profile_image_url: None,
        },
    )
    .await?;
    assert_eq!(rekeyed.id, "auth0|emp-2");
    assert_eq!(rekeyed.role, Role::Admin);
    assert_eq!(rekeyed.phone_number.as_deref(), Some("+15550001111"));

    let old_orders = Orders::find()
        .filter(OrderCol::UserId.eq("auth0|emp-1"))
        .count(&state.orm)
        .await?;
    assert_eq!(old_orders, 0);
    let moved_orders = Orders::find()
        .filter(OrderCol::UserId.eq("auth0|emp-2"))
        .count(&state.orm)
        .await?;
    assert_eq!(moved_orders, 1);

    // Claims without an email still provision a bare client account.
    let anon = identity_service::resolve_login(
        &state,
        &IdentityClaims {
            sub: "auth0|anon-1".into(),
            email: None,
            first_name: None,
            last_name: None,
            profile_image_url: None,
        },
    )
    .await?;
    assert_eq!(anon.role, Role::Client);
    assert!(anon.email.is_none());

    // Admin user management.
    let everyone = admin_service::list_users(&state, &admin, page_one()).await?;
    assert_eq!(everyone.data.expect("users").items.len(), 4);

    let promoted = admin_service::update_user_role(
        &state,
        &admin,
        "auth0|anon-1",
        UpdateUserRoleRequest {
            role: Role::Employee,
        },
    )
    .await?;
    assert_eq!(promoted.data.expect("user").role, Role::Employee);

    let missing = admin_service::update_user_role(
        &state,
        &admin,
        "auth0|nobody",
        UpdateUserRoleRequest { role: Role::Client },
    )
    .await;
    assert!(matches!(missing, Err(AppError::NotFound)));

    // Hard delete removes the account and its order history with it.
    admin_service::delete_user(&state, &admin, "auth0|emp-2").await?;
    let gone = Orders::find()
        .filter(OrderCol::UserId.eq("auth0|emp-2"))
        .count(&state.orm)
        .await?;
    assert_eq!(gone, 0);
    assert!(matches!(
        admin_service::delete_user(&state, &admin, "auth0|emp-2").await,
        Err(AppError::NotFound)
    ));

    // Deleting a pending binding before anyone logs in cancels the grant.
    admin_service::create_preassigned_role(
        &state,
        &admin,
        preassignment("temp@example.com", None, None, Role::Employee),
    )
    .await?;
    let bindings = admin_service::list_preassigned_roles(&state, &admin, page_one()).await?;
    let pending = bindings
        .data
        .expect("bindings")
        .items
        .into_iter()
        .find(|b| !b.consumed)
        .expect("pending binding");
    admin_service::delete_preassigned_role(&state, &admin, pending.id).await?;
    assert!(matches!(
        admin_service::delete_preassigned_role(&state, &admin, pending.id).await,
        Err(AppError::NotFound)
    ));

    let temp = identity_service::resolve_login(
        &state,
        &IdentityClaims {
            sub: "auth0|temp-1".into(),
            email: Some("temp@example.com".into()),
            first_name: None,
            last_name: None,
            profile_image_url: None,
        },
    )
    .await?;
    assert_eq!(temp.role, Role::Client);

    Ok(())
}

fn identity_token(
    provider: &ProviderConfig,
    sub: &str,
    email: &str,
    first_name: &str,
    exp: DateTime<Utc>,
) -> anyhow::Result<String> {
    let claims = ProviderToken {
        sub: sub.to_string(),
        email: email.to_string(),
        first_name: first_name.to_string(),
        iss: provider.issuer.clone(),
        aud: provider.audience.clone(),
        exp: exp.timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(provider.secret.as_bytes()),
    )?;
    Ok(token)
}

fn preassignment(
    email: &str,
    first_name: Option<&str>,
    phone_number: Option<&str>,
    role: Role,
) -> CreatePreassignedRoleRequest {
    CreatePreassignedRoleRequest {
        email: email.to_string(),
        first_name: first_name.map(str::to_string),
        last_name: None,
        phone_number: phone_number.map(str::to_string),
        role,
    }
}

fn page_one() -> Pagination {
    Pagination {
        page: Some(1),
        per_page: Some(50),
    }
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let orm = create_orm_conn(database_url).await?;
    let pool = create_pool(database_url).await?;
    run_migrations(&orm).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, reviews, preassigned_roles, audit_logs, products, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".to_string(),
        port: 3000,
        strict_order_status_flow: false,
    };
    let providers = ProviderRegistry::new(
        ProviderConfig {
            issuer: "https://idp.test".to_string(),
            audience: "cupcake-shop".to_string(),
            secret: "test-provider-secret".to_string(),
        },
        HashMap::new(),
    );

    Ok(AppState {
        pool,
        orm,
        config: Arc::new(config),
        providers: Arc::new(providers),
    })
}

async fn create_admin(state: &AppState, id: &str, email: &str) -> anyhow::Result<AuthUser> {
    UserActive {
        id: Set(id.to_string()),
        email: Set(Some(email.to_string())),
        first_name: Set(Some("Boss".into())),
        last_name: Set(None),
        phone_number: Set(None),
        address: Set(None),
        profile_image_url: Set(None),
        role: Set(Role::Admin),
        consent_accepted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: id.to_string(),
        role: Role::Admin,
    })
}

async fn create_product(state: &AppState, name: &str, price: Decimal) -> anyhow::Result<i32> {
    let product = ProductActive {
        id: NotSet,
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        image_url: Set(None),
        is_active: Set(true),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}
