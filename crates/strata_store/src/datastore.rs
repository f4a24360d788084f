use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::{ChangeBroker, SchemaRegistry, StrataResult};

use crate::config::{DEFAULT_DB_NAME, StrataConfig};
use crate::store::EntityStore;

pub fn load_or_init_config(base: &Path) -> StrataResult<StrataConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    StrataConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_store(
    base: &Path,
    registry: Arc<SchemaRegistry>,
    broker: Arc<ChangeBroker>,
) -> StrataResult<EntityStore> {
    let config = load_or_init_config(base)?;
    EntityStore::connect(&config, base, registry, broker).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_core::{ChangeBroker, LevelApi, LevelId, StrataResult};
    use tempfile::tempdir;

    use super::{default_sqlite_path, load_or_init_config, open_store};
    use crate::catalog::catalog_registry;

    #[tokio::test]
    async fn opens_store_with_default_config() -> StrataResult<()> {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = load_or_init_config(base)?;
        assert_eq!(config.backend_name(), "sqlite");
        assert!(base.join("strata.json").exists());
        let store = open_store(base, catalog_registry()?, Arc::new(ChangeBroker::new())).await?;
        assert!(default_sqlite_path(base).exists());
        let levels = store.list_levels().await?;
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].id, LevelId::BASE);
        assert!(levels[0].active);
        Ok(())
    }
}
