use anyhow::{Context, Result};
use docket_core::config::NotificationConfig;
use docket_infrastructure::ConfigService;

pub fn show(config: &NotificationConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render config")?;
    println!("{rendered}");
    Ok(())
}

pub fn path(service: &ConfigService) -> Result<()> {
    let path = service.config_path()?;
    let state = if path.exists() { "" } else { " (not created, defaults in use)" };
    println!("{}{}", path.display(), state);
    Ok(())
}
