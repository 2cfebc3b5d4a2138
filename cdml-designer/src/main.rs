//! CDML designer backend: live sync for one project directory.
//!
//! Usage: `cdml-designer [PROJECT_ROOT]`
//!
//! Environment: `BIND_ADDR`, `PORT`, `PROJECT_ROOT` and `RUST_LOG`. The
//! positional argument takes precedence over `PROJECT_ROOT`.

use cdml_sync::server::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::from_env();
    if let Some(root) = std::env::args().nth(1) {
        config.project_root = root.into();
    }

    let server = SyncServer::new(config);
    let snapshot = server.service().snapshot().await?;
    log::info!(
        "Project {}: {} component(s)",
        snapshot.name,
        snapshot.components.len()
    );
    for component in &snapshot.components {
        log::debug!("  {} ({}): {}", component.fqn, component.file, component.summary());
    }

    server.run().await
}
