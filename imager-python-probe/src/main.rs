//! # imager-python-probe
//!
//! Boots the embedded Python runtime and smoke-tests the imager's scripted
//! modules.
//!
//! ## Configuration
//!
//! Reads `$XDG_CONFIG_HOME/imager-python/probe.toml`, or the file given as the
//! first argument.
//!
//! ## Running
//!
//! ```bash
//! # Probe with the default configuration
//! cargo run --bin imager-python-probe
//!
//! # With debug logging (lists module attributes)
//! RUST_LOG=debug cargo run --bin imager-python-probe -- ./probe.toml
//! ```

use anyhow::Result;
use imager_python::InterpreterHost;
use imager_python_probe::config::Config;
use imager_python_probe::probe;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let loaded = match std::env::args().nth(1) {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    let (config, load_error) = match loaded {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.probe.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting imager-python-probe v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {:#}", e);
    }

    let exe_dir = config.exe_dir()?;
    let host = InterpreterHost::with_config(&exe_dir, config.host.clone())?;

    let report = probe::run(&host, &config.probe);
    info!(
        "Probe complete: {} search path entries, {} failure(s)",
        report.search_path.len(),
        report.failures()
    );

    // Handles are gone; finalize before deciding the exit status.
    drop(host);

    if !report.all_passed() {
        anyhow::bail!("{} probe check(s) failed", report.failures());
    }
    Ok(())
}
