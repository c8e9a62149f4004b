use axum::{routing::get, Router};

pub mod admin;
pub mod cart;
pub mod products;
pub mod security;
pub mod system;

/// Router for everything behind the middleware stack.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/csrf-token", get(security::csrf_token))
        .nest("/auth", security::router())
        .nest("/products", products::router())
        .nest("/cart", cart::router())
        .nest("/admin", admin::router())
}
