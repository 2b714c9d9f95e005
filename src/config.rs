//! Layered configuration for the repair shop server.
//!
//! Values are resolved in order, later layers winning:
//! defaults → `repairshop.toml` → environment (`REPAIRSHOP_*`, with `.env`
//! loaded by `main`) → CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! db_path = "repairshop.db"
//! dev_mode = false
//!
//! [tables]
//! ticket_page_size = 10
//! customer_page_size = 8
//!
//! [poll]
//! interval_secs = 3
//!
//! [shop]
//! name = "Computer Repair Shop"
//! technicians = ["tech@shop.com"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shop::poll::DEFAULT_POLL_INTERVAL;

pub const DEFAULT_CONFIG_FILE: &str = "repairshop.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS and bind on all interfaces.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("repairshop.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablesSection {
    #[serde(default = "default_ticket_page_size")]
    pub ticket_page_size: usize,
    #[serde(default = "default_customer_page_size")]
    pub customer_page_size: usize,
}

fn default_ticket_page_size() -> usize {
    10
}

fn default_customer_page_size() -> usize {
    8
}

impl Default for TablesSection {
    fn default() -> Self {
        Self {
            ticket_page_size: default_ticket_page_size(),
            customer_page_size: default_customer_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

impl PollSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopSection {
    #[serde(default = "default_shop_name")]
    pub name: String,
    /// Technicians a manager can assign tickets to.
    #[serde(default)]
    pub technicians: Vec<String>,
}

fn default_shop_name() -> String {
    "Computer Repair Shop".to_string()
}

impl Default for ShopSection {
    fn default() -> Self {
        Self {
            name: default_shop_name(),
            technicians: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tables: TablesSection,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub shop: ShopSection,
}

/// Flags from the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: bool,
}

impl ShopConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse repairshop.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `REPAIRSHOP_HOST`, `REPAIRSHOP_PORT` and `REPAIRSHOP_DB_PATH`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("REPAIRSHOP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("REPAIRSHOP_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid REPAIRSHOP_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("REPAIRSHOP_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = &cli.db_path {
            self.server.db_path = path.clone();
        }
        if cli.dev_mode {
            self.server.dev_mode = true;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tables.ticket_page_size == 0 || self.tables.customer_page_size == 0 {
            anyhow::bail!("Table page sizes must be at least 1");
        }
        if self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be at least 1");
        }
        Ok(())
    }
}
