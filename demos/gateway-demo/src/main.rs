mod error;

use fluxguard_core::prelude::*;
use fluxguard_web::constants::ROUTER_BEAN_NAME;
use fluxguard_web::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::error::GatewayError;

#[derive(Debug, Clone, Serialize)]
struct Route {
    name: String,
    upstream: String,
}

fn configured_routes() -> Vec<Route> {
    vec![
        Route {
            name: "orders".to_string(),
            upstream: "http://orders.internal:9000".to_string(),
        },
        Route {
            name: "billing".to_string(),
            upstream: "http://billing.internal:9000".to_string(),
        },
    ]
}

async fn list_routes() -> Json<Vec<Route>> {
    Json(configured_routes())
}

async fn get_route(Path(name): Path<String>) -> Result<Json<Route>, Failure> {
    configured_routes()
        .into_iter()
        .find(|r| r.name == name)
        .map(Json)
        .ok_or_else(|| GatewayError::RouteNotFound(name).into())
}

async fn forward(Path(name): Path<String>) -> Result<&'static str, Failure> {
    let route = configured_routes()
        .into_iter()
        .find(|r| r.name == name)
        .ok_or_else(|| GatewayError::RouteNotFound(name.clone()))?;

    Err(GatewayError::UpstreamUnavailable {
        upstream: route.upstream,
        source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
    }
    .into())
}

async fn throttled() -> Result<&'static str, Failure> {
    Err(GatewayError::RateLimited("203.0.113.7".to_string()).into())
}

async fn crash() -> String {
    let routes: Vec<Route> = Vec::new();
    // 越界访问，panic 同样会被转换为错误响应
    routes[0].name.clone()
}

fn router() -> Router {
    Router::new()
        .route("/health", get(|| async { "UP" }))
        .route("/routes", get(list_routes))
        .route("/routes/:name", get(get_route))
        .route("/forward/:name", get(forward))
        .route("/throttled", get(throttled))
        .route("/crash", get(crash))
}

#[tokio::main]
async fn main() -> ApplicationResult<()> {
    println!("Fluxguard Gateway Demo");
    println!("======================\n");

    let config_file = if std::path::Path::new("demos/gateway-demo/application.toml").exists() {
        "demos/gateway-demo/application.toml"
    } else {
        "application.toml"
    };

    let app = FluxguardApplication::new("GatewayDemo")
        .config_file(config_file)
        .env_prefix("GATEWAY_")
        .initializer(|context: &Arc<ApplicationContext>| context.register_bean(ROUTER_BEAN_NAME, router()))
        .run()
        .await?;

    let handler = app
        .context()
        .get_bean_by_type::<Arc<dyn ErrorWebExceptionHandler>>()?;
    tracing::info!(handler = handler.name(), "Active error handler");

    println!("\nAvailable endpoints:\n");
    println!("  GET /health              - health check");
    println!("  GET /routes              - configured routes");
    println!("  GET /routes/:name        - single route (404 for unknown names)");
    println!("  GET /forward/:name       - upstream failure (503, add ?trace to see the cause chain)");
    println!("  GET /throttled           - rate limited (429)");
    println!("  GET /crash               - handler panic (500)\n");
    println!("Try `-H 'Accept: text/html'` for the template views and `-H 'Accept: text/plain'` for plain text.\n");

    app.wait_for_shutdown().await
}
