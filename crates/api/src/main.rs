use std::net::SocketAddr;

use storefront_api::app::{build_app, AppServices};
use storefront_api::config::AppConfig;

#[tokio::main]
async fn main() {
    storefront_observability::init();

    let config = AppConfig::from_env();

    let services = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::PgPool::connect(&url)
                .await
                .expect("failed to connect to Postgres");
            AppServices::postgres(pool)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using in-memory user store");
            AppServices::in_memory()
        }
    };

    let app = build_app(config.clone(), services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
