use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use serde_json::json;
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use academy_live::{db, routes, state::AppState, utils::config::AppConfig};

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Lazy::force(&START_TIME);

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = match db::connection::init_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize store: {}", e);
            std::process::exit(1);
        }
    };

    let cors = match cors_layer(config.cors_origin.as_deref()) {
        Some(cors) => cors,
        None => std::process::exit(1),
    };

    let addr = config.server_addr;
    let app_state = AppState::new(config, store);

    let app = Router::new()
        .route("/", get(root))
        .merge(routes::api_router(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server running at http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Credentialed CORS for a configured origin; any origin without
/// credentials otherwise.
fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];
    let headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::USER_AGENT,
        header::COOKIE,
        HeaderName::from_static("x-requested-with"),
    ];

    let Some(origin) = origin else {
        warn!("CORS_ORIGIN not set, allowing any origin without credentials");
        return Some(CorsLayer::new().allow_origin(Any).allow_methods(methods).allow_headers(headers));
    };

    match origin.parse::<HeaderValue>() {
        Ok(value) => {
            info!("CORS origin: {}", origin);
            Some(
                CorsLayer::new()
                    .allow_origin(value)
                    .allow_methods(methods)
                    .allow_headers(headers)
                    .allow_credentials(true),
            )
        }
        Err(_) => {
            error!("Failed to parse CORS origin: {}", origin);
            None
        }
    }
}

async fn root() -> Json<serde_json::Value> {
    let elapsed = START_TIME.elapsed();
    let seconds = elapsed.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    let uptime_message = if days > 0 {
        format!("{}d {}h {}m {}s", days, hours % 24, minutes % 60, seconds % 60)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    };

    Json(json!({
        "status": "ok",
        "message": format!("Backend is running! Uptime: {}", uptime_message)
    }))
}
