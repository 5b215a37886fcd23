use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strata_store::StoreConfig;

/// Settings read from the `--config` TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// SQLite database file.
    pub database: PathBuf,
    pub store: StoreConfig,
}

impl CliConfig {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply the `--db` flag.
    pub fn with_database(mut self, database: Option<PathBuf>) -> Self {
        if let Some(database) = database {
            self.database = database;
        }
        self
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("strata.db"),
            store: StoreConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = CliConfig::load(None).unwrap();
        assert_eq!(c.database, PathBuf::from("strata.db"));
        assert_eq!(c.store, StoreConfig::default());
    }

    #[test]
    fn toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            "database = \"/var/lib/strata/kv.db\"\n\n[store]\nop_timeout_ms = 250\nstrict_registration = true\n",
        )
        .unwrap();

        let c = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(c.database, PathBuf::from("/var/lib/strata/kv.db"));
        assert_eq!(c.store.op_timeout_ms, 250);
        assert!(c.store.strict_registration);
        assert_eq!(c.store.list_page_size, 256);
    }

    #[test]
    fn db_flag_overrides_file() {
        let c = CliConfig::default().with_database(Some("other.db".into()));
        assert_eq!(c.database, PathBuf::from("other.db"));
        let c = c.with_database(None);
        assert_eq!(c.database, PathBuf::from("other.db"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/strata.toml"))).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
