//! Configuration management commands

use anyhow::Result;
use river_core::RiverConfig;
use std::path::Path;

/// Print the effective configuration as TOML
pub fn show(config: &RiverConfig, source: Option<&Path>) -> Result<()> {
    match source {
        Some(path) => println!("# Loaded from {}", path.display()),
        None => println!("# No config file given, showing defaults with environment overrides"),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Validate the configuration and print a summary
pub fn validate(config: &RiverConfig) -> Result<()> {
    config.validate()?;
    println!("Configuration is valid");
    println!("  backend:      {:?}", config.store.backend);
    if let Some(path) = &config.store.path {
        println!("  store path:   {}", path.display());
    }
    println!("  lease ttl:    {:?}", config.registry.lease_ttl);
    println!("  max run:      {:?}", config.runner.max_run_duration);
    println!("  bind:         {}{}", config.server.bind, config.server.base_path);
    println!(
        "  auth:         {}",
        if config.auth.shared_secret.is_some() {
            "shared secret"
        } else {
            "open"
        }
    );
    Ok(())
}
