//! Storage configuration and startup health check.

use std::collections::HashMap;

use acadra_core::EngineError;

use super::sqlite_store::SqliteAcademicStore;

const DEFAULT_DB_PATH: &str = "acadra.db";

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub sqlite_db_path: String,
    pub seed_catalog: bool,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let mut envs = HashMap::new();
        for key in ["ACADRA_SQLITE_DB", "ACADRA_SEED_CATALOG"] {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    fn from_env_map(envs: &HashMap<String, String>) -> Self {
        let sqlite_db_path = envs
            .get("ACADRA_SQLITE_DB")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let seed_catalog = envs
            .get("ACADRA_SEED_CATALOG")
            .map(|v| parse_bool(v))
            .unwrap_or(true);
        Self {
            sqlite_db_path,
            seed_catalog,
        }
    }

    /// Open the store once to verify the path is usable.
    pub fn startup_health_check(&self) -> Result<(), EngineError> {
        SqliteAcademicStore::new(&self.sqlite_db_path).map_err(|e| {
            EngineError::Internal(format!(
                "storage health check failed for ACADRA_SQLITE_DB='{}': {}",
                self.sqlite_db_path, e
            ))
        })?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;

    use super::StorageConfig;

    fn temp_sqlite_path() -> PathBuf {
        std::env::temp_dir().join(format!("acadra-backend-config-{}.db", uuid::Uuid::new_v4()))
    }

    #[test]
    fn parse_defaults() {
        let cfg = StorageConfig::from_env_map(&HashMap::new());
        assert_eq!(cfg.sqlite_db_path, "acadra.db");
        assert!(cfg.seed_catalog);
    }

    #[test]
    fn parse_explicit_values() {
        let envs = HashMap::from([
            ("ACADRA_SQLITE_DB".to_string(), "/tmp/x.db".to_string()),
            ("ACADRA_SEED_CATALOG".to_string(), "off".to_string()),
        ]);
        let cfg = StorageConfig::from_env_map(&envs);
        assert_eq!(cfg.sqlite_db_path, "/tmp/x.db");
        assert!(!cfg.seed_catalog);
    }

    #[test]
    fn health_check_accepts_writable_path() {
        let path = temp_sqlite_path();
        let cfg = StorageConfig {
            sqlite_db_path: path.to_string_lossy().to_string(),
            seed_catalog: true,
        };
        cfg.startup_health_check().expect("health check should pass");
        let _ = fs::remove_file(path);
    }
}
