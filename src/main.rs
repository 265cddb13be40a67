use std::sync::Arc;

use axum::{Router, routing::get};
use huddle::{AppState, auth::{IdentityVerifier, TokenVerifier}, chats, db};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".into()))
        .await?;
    db::init(&db_pool).await?;

    let rooms = chats::Rooms::new();
    let store = chats::ChatStore::new(db_pool.clone()).with_sink(Arc::new(rooms.clone()));
    let verifier: Arc<dyn IdentityVerifier> = Arc::new(TokenVerifier::new(db_pool));

    let app_state = AppState { store, rooms, verifier };

    let app = Router::new()
        .route("/", get(|| async { "huddle" }))
        .nest("/c", chats::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
