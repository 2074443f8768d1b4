use std::path::Path;

use redfleet_core::FleetConfig;
use redfleet_state::StateStore;
use redfleet_vault::CredentialVault;
use tracing::info;

pub fn init(config_path: &Path, store_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    let config = FleetConfig::scaffold(store_path);
    std::fs::write(config_path, config.to_toml_string()?)?;
    StateStore::open(store_path)?;
    info!(config = %config_path.display(), store = %store_path.display(), "initialized");

    println!("✓ Wrote {}", config_path.display());
    println!("  Store: {}", store_path.display());
    println!("  Set the vault key with: export REDFLEET_VAULT_KEY=$(redfleet keygen)");
    Ok(())
}

pub fn keygen() -> anyhow::Result<()> {
    println!("{}", CredentialVault::generate_key()?);
    Ok(())
}
