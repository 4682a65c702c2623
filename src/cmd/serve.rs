//! HTTP server command: `coursehub serve`.

use anyhow::{Result, bail};

use coursehub::academy::server::{ServerConfig, start_server};
use coursehub::config::AppConfig;

pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration: {}", problems.join("; "));
    }
    start_server(ServerConfig::from(config)).await
}
