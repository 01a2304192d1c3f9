use cupcake_shop_api::{config::AppConfig, db::create_pool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    // Ensure migrations are applied.
    sqlx::migrate!("./migrations").run(&pool).await?;

    seed_products(&pool).await?;

    // Accounts are created by the identity provider at first login, so the
    // only way to bootstrap an administrator is a preassigned role.
    if let Ok(admin_email) = std::env::var("ADMIN_EMAIL") {
        ensure_admin_preassignment(&pool, &admin_email).await?;
    }

    println!("Seed completed");
    Ok(())
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products = vec![
        (
            "Classic Vanilla",
            "Vanilla sponge with vanilla buttercream",
            "4.50",
        ),
        (
            "Double Chocolate",
            "Chocolate sponge, chocolate ganache frosting",
            "5.00",
        ),
        (
            "Red Velvet",
            "Cocoa sponge with cream cheese frosting",
            "5.50",
        ),
        (
            "Salted Caramel",
            "Caramel core, caramel buttercream, sea salt",
            "5.50",
        ),
        (
            "Lemon Meringue",
            "Lemon curd filling topped with torched meringue",
            "5.00",
        ),
        (
            "Strawberry Shortcake",
            "Strawberry compote and whipped mascarpone",
            "5.25",
        ),
    ];

    for (name, description, price) in products {
        sqlx::query(
            r#"
            INSERT INTO products (name, description, price)
            VALUES ($1, $2, $3::numeric)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(price)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

async fn ensure_admin_preassignment(pool: &sqlx::PgPool, email: &str) -> anyhow::Result<()> {
    // Skip when the email already has a pending binding; the partial
    // unique index only covers unconsumed rows.
    let pending: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM preassigned_roles WHERE email = $1 AND NOT consumed)",
    )
    .bind(email)
    .fetch_one(pool)
    .await?;

    if !pending {
        sqlx::query("INSERT INTO preassigned_roles (email, role) VALUES ($1, 'admin')")
            .bind(email)
            .execute(pool)
            .await?;
    }

    println!("Ensured admin preassignment for {email}");
    Ok(())
}
