use axum::Router;

use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod dashboard;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod products;
pub mod reviews;
pub mod users;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/products", products::router().merge(reviews::router()))
        .nest("/orders", orders::router())
        .nest("/dashboard", dashboard::router())
        .nest("/auth", auth::router())
        .nest("/user", users::router())
        .nest("/admin", admin::router())
}
