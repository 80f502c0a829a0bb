//! HTTP server command (`buildbay serve`).

use anyhow::Result;

use buildbay::config::OrchestratorConfig;
use buildbay::orchestrator::Orchestrator;
use buildbay::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    mut config: OrchestratorConfig,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(
        projects_dir = %config.paths.projects_dir.display(),
        state_dir = %config.paths.state_dir.display(),
        sdk_root = %config.toolchain.sdk_root.display(),
        "starting buildbay"
    );

    let server = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        dev_mode: dev,
    };
    start_server(server, Orchestrator::new(config)).await
}
