//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::create_vector_store;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What `init` created
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub db_file: PathBuf,
    pub data_dir: PathBuf,
    pub vector_store_ready: bool,
}

/// Resolve `--config` into a base directory.
///
/// A `.toml` path names the config file itself; anything else is taken as
/// the directory that holds it.
pub fn resolve_base_dir(config_arg: Option<&Path>) -> PathBuf {
    match config_arg {
        Some(path) if path.extension().map_or(false, |e| e == "toml") => path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(path) => path.to_path_buf(),
        None => Config::default_base_dir(),
    }
}

/// Write a default config, create the database schema and the reader data
/// directory, then try to prepare the vector collection.
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;
    std::fs::create_dir_all(&config.paths.data_dir)?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    // The collection can be created later by any command that opens the store
    let vector_store_ready = match create_vector_store(&config).await {
        Ok(store) => {
            info!(
                backend = store.backend(),
                collection = store.collection(),
                "Vector store ready"
            );
            true
        }
        Err(e) => {
            warn!(
                "Could not prepare vector store at {}: {}",
                config.qdrant_url, e
            );
            false
        }
    };

    Ok(InitReport {
        base_dir: config.paths.base_dir,
        config_file: config.paths.config_file,
        db_file: config.paths.db_file,
        data_dir: config.paths.data_dir,
        vector_store_ready,
    })
}

/// Print init report to console
pub fn print_init_report(report: &InitReport) {
    println!("✓ kbforge initialized at {}", report.base_dir.display());
    println!("  Config: {}", report.config_file.display());
    println!("  Database: {}", report.db_file.display());
    println!("  Reader data: {}", report.data_dir.display());
    if !report.vector_store_ready {
        println!("  ⚠ Vector store not reachable; start Qdrant before serving");
    }
    println!("\nNext steps:");
    println!("  1. Edit the config file to point at your embedding service");
    println!("  2. Start Qdrant: docker run -p 6334:6334 qdrant/qdrant");
    println!("  3. Schedule history: kbforge backfill <tenant>");
    println!("  4. Run the workers: kbforge serve");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_resolve_base_dir() {
        assert_eq!(
            resolve_base_dir(Some(Path::new("/srv/kb/config.toml"))),
            PathBuf::from("/srv/kb")
        );
        assert_eq!(resolve_base_dir(Some(Path::new("/srv/kb"))), PathBuf::from("/srv/kb"));
        assert_eq!(resolve_base_dir(None), Config::default_base_dir());
    }

    #[tokio::test]
    async fn test_init_creates_layout_and_refuses_overwrite() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("kb");

        let report = cmd_init(Some(base.clone()), false).await.unwrap();
        assert!(report.config_file.exists());
        assert!(report.db_file.exists());
        assert!(report.data_dir.is_dir());

        let loaded = Config::load(&report.config_file).unwrap();
        assert_eq!(loaded.paths.base_dir, base);

        let err = assert_err!(cmd_init(Some(base.clone()), false).await);
        assert!(matches!(err, Error::Config(_)));
        assert_ok!(cmd_init(Some(base), true).await);
    }
}
