//! Demo server: answers "Hello World" on `/` and `/abcd`.
//!
//! ```text
//! cargo run --example server                 # plain HTTP on 0.0.0.0:8080
//! cargo run --example server -- relay.toml   # settings from a TOML/JSON file
//! RUST_LOG=relay=trace cargo run --example server
//! ```

use relay::{Request, Response, Router, Server, ServerConfig, StatusCode};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig {
            port: 8080,
            ..ServerConfig::default()
        },
    };

    let mut router = Router::new();
    for path in ["/", "/abcd"] {
        router.add_handler(path, |req: Request| async move {
            info!(path = req.path(), "hello");
            Response::new(StatusCode::Ok).body("Hello World")
        });
    }

    let server = Server::new(config, router);
    server
        .listen_and_serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    info!("server stopped");
    Ok(())
}
