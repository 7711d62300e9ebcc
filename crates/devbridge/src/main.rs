//! Device bridge: entry point.
//!
//! This binary lets a browser drive Android and iOS devices attached to the
//! host: open a remote shell, stream the screen, tail the device log, and run
//! one-shot device operations.  All traffic for one browser tab is
//! multiplexed over a single WebSocket connection using a JSON envelope
//! protocol.
//!
//! # Usage
//!
//! ```text
//! devbridge [OPTIONS]
//!
//! Options:
//!   --config    <FILE>       TOML configuration file
//!   --bind      <ADDR:PORT>  WebSocket listener address [default: 0.0.0.0:8081]
//!   --path      <PATH>       WebSocket route path [default: /device-bridge]
//!   --log-level <LEVEL>      Default log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Configuration layering
//!
//! Lowest precedence first:
//!
//! 1. Built-in defaults (`BridgeConfig::default()`).
//! 2. The TOML file given with `--config`.
//! 3. CLI flags, each of which also reads an environment variable.
//!
//! | Variable              | Flag          |
//! |-----------------------|---------------|
//! | `DEVBRIDGE_CONFIG`    | `--config`    |
//! | `DEVBRIDGE_BIND`      | `--bind`      |
//! | `DEVBRIDGE_PATH`      | `--path`      |
//! | `DEVBRIDGE_LOG_LEVEL` | `--log-level` |
//!
//! `RUST_LOG`, when set, overrides the log level entirely.
//!
//! # Architecture overview
//!
//! ```text
//! Browser  (JSON envelopes over WebSocket)
//!       ↕
//! devbridge  ← this process
//!   infrastructure/ws_server   accept loop, per-connection tasks
//!   application/router         dispatch + broadcast fan-out
//!   application/{terminal, screen, logs, device_ops}
//!   infrastructure/shell_executor
//!       ↕
//! adb / libimobiledevice / ssh  → devices
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use devbridge::application::Router;
use devbridge::domain::BridgeConfig;
use devbridge::infrastructure::{load_file_config, run_server, ShellExecutor, ToolDiscovery};
use devbridge_core::{Executors, Platform};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Real-time device bridge.
///
/// Every flag is optional; an absent flag leaves the value from the config
/// file (or the built-in default) in place.
#[derive(Debug, Parser)]
#[command(
    name = "devbridge",
    about = "Multiplexes terminal, screen and log sessions for Android/iOS devices over one WebSocket",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "DEVBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address and port the WebSocket server binds to, e.g. `127.0.0.1:8081`.
    #[arg(long, env = "DEVBRIDGE_BIND")]
    bind: Option<String>,

    /// URL path the WebSocket endpoint is served on.
    #[arg(long, env = "DEVBRIDGE_PATH")]
    path: Option<String>,

    /// Default log filter (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, env = "DEVBRIDGE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Builds the effective [`BridgeConfig`]: defaults, then the config file,
    /// then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or is invalid, if
    /// `--bind` is not a socket address, or if `--path` does not start with
    /// `/`.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = BridgeConfig::default();

        if let Some(path) = &self.config {
            load_file_config(path)
                .and_then(|file| file.apply_to(&mut config))
                .with_context(|| format!("invalid config file {}", path.display()))?;
        }

        if let Some(bind) = self.bind {
            config.bind_addr = bind
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
        }
        if let Some(path) = self.path {
            anyhow::ensure!(path.starts_with('/'), "route path must start with '/': '{path}'");
            config.route_path = path;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and layered over the config file.
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over the
///    configured level.
/// 3. One [`ShellExecutor`] per platform and a [`ToolDiscovery`] are built
///    from the command templates, and the [`Router`] wires up the managers.
/// 4. A Ctrl+C handler is spawned; it clears a shared `AtomicBool`.
/// 5. [`run_server`] accepts connections until the flag is cleared.
/// 6. Every capture and log session is stopped and terminals are closed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_bridge_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    info!(
        "device bridge starting: ws://{}{}",
        config.bind_addr, config.route_path
    );

    // ── Wiring ────────────────────────────────────────────────────────────────
    let android = ShellExecutor::from_templates(Platform::Android, &config.android)
        .context("invalid android command templates")?;
    let ios = ShellExecutor::from_templates(Platform::Ios, &config.ios)
        .context("invalid ios command templates")?;
    let executors = Executors::new(Arc::new(android), Arc::new(ios));
    let discovery =
        Arc::new(ToolDiscovery::from_config(&config).context("invalid device list command")?);
    let router = Router::new(executors, discovery, &config);

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ───────────────────────────────────────────────────────
    run_server(&config, router.clone(), running).await?;

    router.shutdown().await;
    info!("device bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("devbridge").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_defaults_leave_everything_unset() {
        // Arrange: no flags and no config file
        let cli = Cli {
            config: None,
            bind: None,
            path: None,
            log_level: None,
        };

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr.port(), 8081);
        assert_eq!(config.route_path, "/device-bridge");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_bind_override() {
        let config = cli(&["--bind", "127.0.0.1:9999"]).into_bridge_config().unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn test_cli_path_override() {
        let config = cli(&["--path", "/bridge"]).into_bridge_config().unwrap();
        assert_eq!(config.route_path, "/bridge");
    }

    #[test]
    fn test_cli_log_level_override() {
        let config = cli(&["--log-level", "debug"]).into_bridge_config().unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_invalid_bind_returns_error() {
        let result = cli(&["--bind", "not.an.addr"]).into_bridge_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_relative_path_returns_error() {
        let result = cli(&["--path", "bridge"]).into_bridge_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_config_file_returns_error() {
        let result = cli(&["--config", "/nonexistent/devbridge.toml"]).into_bridge_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        // Arrange: a config file that sets bind and grace delay
        let path = std::env::temp_dir().join(format!(
            "devbridge-test-{}.toml",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(
            &path,
            "[server]\nbind = \"127.0.0.1:7000\"\n\n[terminal]\ngrace_delay_ms = 100\n",
        )
        .unwrap();

        // Act
        let config = cli(&[
            "--config",
            path.to_str().unwrap(),
            "--bind",
            "127.0.0.1:7001",
        ])
        .into_bridge_config();
        let _ = std::fs::remove_file(&path);
        let config = config.unwrap();

        // Assert: the flag wins for bind, the file still supplies the delay
        assert_eq!(config.bind_addr.port(), 7001);
        assert_eq!(config.terminal.grace_delay, Duration::from_millis(100));
    }
}
