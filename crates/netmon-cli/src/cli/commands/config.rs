//! `netmon config` – show where the config lives and what it resolves to.

use anyhow::Result;
use netmon_core::config;

pub fn run_config() -> Result<()> {
    let cfg = config::load_or_init()?;
    println!("# config:    {}", config::config_path()?.display());
    println!("# overrides: {}", config::override_path()?.display());
    print!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}
