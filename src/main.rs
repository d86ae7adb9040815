//! Bee Relay
//!
//! 入口：初始化日志、加载配置、启动中继服务，从 stdin 读取 NDJSON 命令，结果逐行写到 stdout。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_relay::config::{load_config, AppConfig};
use bee_relay::core::{
    run_with_graceful_shutdown, RelayCleanup, RelayService, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
use bee_relay::observability;
use bee_relay::protocol::stream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let name = cfg.app.name.clone().unwrap_or_else(|| "bee-relay".to_string());
    let service = Arc::new(RelayService::start(cfg).context("Failed to start relay service")?);
    tracing::info!("{} started, reading commands from stdin", name);

    let manager = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
    coordinator.register(RelayCleanup::new(Arc::clone(&service)));

    let app = {
        let service = Arc::clone(&service);
        let manager = Arc::clone(&manager);
        async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let stdout = tokio::io::stdout();
            if let Err(e) = stream::run(&service, stdin, stdout, manager.token()).await {
                tracing::error!("Command stream failed: {}", e);
                manager.shutdown(ShutdownReason::FatalError(e.to_string()));
                return;
            }
            manager.shutdown(ShutdownReason::InputClosed);
        }
    };

    run_with_graceful_shutdown(manager, app, move || async move {
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}
