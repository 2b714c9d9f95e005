//! Shop server commands: `repairshop serve` and `repairshop init`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use repairshop::config::{CliOverrides, DEFAULT_CONFIG_FILE, ShopConfig};
use repairshop::shop::server::{ServerConfig, init_database, start_server};

/// Resolve the effective configuration: file, then environment, then flags.
pub fn load_config(config_path: Option<&Path>, overrides: &CliOverrides) -> Result<ShopConfig> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = ShopConfig::load_or_default(&path)?;
    config.apply_env()?;
    config.apply_cli(overrides);
    Ok(config)
}

pub async fn cmd_serve(config_path: Option<&Path>, overrides: CliOverrides, open: bool) -> Result<()> {
    let config = load_config(config_path, &overrides)?;
    let server = ServerConfig::from_config(&config);

    // No browser inside dev containers.
    if open && !server.dev_mode {
        let url = format!("http://localhost:{}/tickets", server.port);
        tokio::spawn(async move {
            // Give the listener a moment to bind.
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!(error = %e, %url, "failed to open browser");
            }
        });
    }

    start_server(server, config).await
}

pub fn cmd_init(config_path: Option<&Path>, db_path: Option<PathBuf>) -> Result<()> {
    let overrides = CliOverrides {
        db_path,
        ..CliOverrides::default()
    };
    let config = load_config(config_path, &overrides)?;
    init_database(&config.server.db_path)?;
    println!("Shop database initialized at {}", config.server.db_path.display());
    Ok(())
}
