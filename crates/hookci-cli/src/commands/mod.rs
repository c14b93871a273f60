//! CLI command implementations.

pub mod builds;
pub mod run_build;

use anyhow::{Context, Result};
use hookci_config::load_system_config;
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let config = load_system_config(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;
    println!("Configuration is valid");
    println!("  dispatch:        {:?}", config.dispatch);
    println!("  parallel builds: {}", config.parallel_builds);
    println!("  build dir:       {}", config.build_dir.display());
    println!("  repositories:    {}", config.repositories.len());
    for repository in &config.repositories {
        println!("    {} ({})", repository.name, repository.clone_url);
    }
    Ok(())
}

pub fn gen_secret() {
    println!("{}", hookci_core::secret::generate_secret());
}
