use axum::{extract::DefaultBodyLimit, Extension, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

use lockstep::{config::Config, routes, state::AppState};

const BODY_LIMIT: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;
    let bind_addr = cfg.bind_addr.clone();
    let (state, _tasks) = AppState::bootstrap(cfg).await?;

    let app: Router = routes::router()
        .layer(Extension(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
