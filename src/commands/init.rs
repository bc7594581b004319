//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use std::path::PathBuf;
use tracing::info;

/// Commented source entry appended to a fresh config file
const SAMPLE_SOURCE: &str = r#"
# [[sources]]
# name = "cnn"
# storage = "local"
# root = "incoming/cnn"
# grouping = "by-identity"
# version_check = false
# identity_prefix = "CNNA-ST1-"
"#;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// Write a default config, create local storage roots and the database
pub async fn cmd_init(options: InitOptions) -> Result<Config> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}; use --force to overwrite",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.paths.base_dir = base_dir.clone();
    config.paths.config_file = config_path.clone();
    config.paths.db_file = base_dir.join("metadata.db");
    config.validate()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut rendered = toml::to_string_pretty(&config)?;
    rendered.push_str(SAMPLE_SOURCE);
    std::fs::write(&config_path, rendered)?;
    info!("Created config at {:?}", config_path);

    for storage in &config.storages {
        if let Some(root) = &storage.root {
            let root = if root.is_relative() {
                base_dir.join(root)
            } else {
                root.clone()
            };
            std::fs::create_dir_all(&root)?;
            info!(storage = %storage.name, "Created storage root {:?}", root);
        }
    }

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(config)
}

/// Print next steps after init
pub fn print_init(config: &Config) {
    println!("✓ Initialized newsreel at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Database: {:?}", config.paths.db_file);
    println!("\nNext steps:");
    println!("  Add a [[sources]] entry to the config file");
    println!("  export {}=...", config.analysis.api_key_env);
    println!("  newsreel run --source NAME --mode text    # Extract metadata");
    println!("  newsreel run --source NAME --mode video   # Analyse media");
    println!("  newsreel status                           # Show progress");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_loadable_config() {
        let tmp = TempDir::new().unwrap();
        let base_dir = tmp.path().join("newsreel");
        let config_path = base_dir.join("config.toml");
        let options = InitOptions {
            base_dir: base_dir.clone(),
            config_path: config_path.clone(),
            force: false,
        };

        cmd_init(options.clone()).await.unwrap();
        assert!(config_path.exists());
        assert!(base_dir.join("metadata.db").exists());
        assert!(base_dir.join("media").is_dir());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.analysis.max_media_mb, 300);
        assert!(loaded.sources.is_empty());

        let err = cmd_init(options.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let forced = InitOptions { force: true, ..options };
        cmd_init(forced).await.unwrap();
    }
}
