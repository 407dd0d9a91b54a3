use crate::detector::{CRITICAL_REGISTER_MAX, CRITICAL_WRITE_LIMIT};
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "turbotrapd",
    about = "Attack detection and incident fan-out daemon for a simulated turbocharger control unit"
)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(
        long,
        env = "TURBOTRAP_CONFIG",
        default_value = "/etc/turbotrap/turbotrap.toml"
    )]
    pub config: PathBuf,

    /// Override the observability API listen address.
    #[arg(long, env = "TURBOTRAP_LISTEN")]
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: SocketAddr,
    pub audit_file: PathBuf,
    pub feed_capacity: usize,
    pub shutdown_grace_secs: u64,
    pub critical_register_max: u16,
    pub critical_write_limit: u16,
    pub alert: Option<AlertConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".parse().expect("static listen address"),
            audit_file: PathBuf::from("/var/lib/turbotrap/incidents.jsonl"),
            feed_capacity: 128,
            shutdown_grace_secs: 2,
            critical_register_max: CRITICAL_REGISTER_MAX,
            critical_write_limit: CRITICAL_WRITE_LIMIT,
            alert: None,
        }
    }
}

/// Alert webhook settings. Absent means alerting is disabled, never an
/// error; set once at startup and read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default = "default_alert_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_alert_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = if args.config.exists() {
            let text = std::fs::read_to_string(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("failed to parse {}", args.config.display()))?
        } else {
            info!(
                "[config] {} not found, using built-in defaults",
                args.config.display()
            );
            Config::default()
        };
        if let Some(listen) = args.listen {
            config.listen = listen;
        }
        Ok(config)
    }
}
