use axum::{extract::Path, routing::any, Json, Router};
use blog_ratelimit::{config::AppConfig, init_tracing, run};
use std::env;
use std::path::PathBuf;
use std::process;

/// Stand-in for the blog API routes, which are served by the host application
fn api_router() -> Router {
    Router::new().route(
        "/api/*path",
        any(|Path(path): Path<String>| async move {
            Json(serde_json::json!({ "success": true, "data": { "path": format!("/api/{}", path) } }))
        }),
    )
}

#[tokio::main]
async fn main() {
    // Config file path is optional; environment variables apply either way
    let config_path = env::args().nth(1).map(PathBuf::from);

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            eprintln!("Usage: blog-ratelimit [config_file]");
            process::exit(1);
        }
    };

    init_tracing(config.logging.json);

    if let Err(e) = run(config, api_router()).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
