use std::path::Path as FsPath;
use std::sync::Arc;

use log::{debug, info};

use strata_core::{
    ChangeBroker, ChangeSet, Entity, EntityReadApi, EntityWriteApi, GetInput, Id, LevelId,
    OrFilter, Paging, Path, QueryInput, SchemaRegistry, StrataResult, SubscriptionId,
};
use strata_store::{EntityStore, catalog_registry, open_store};

/// The boundary surface: one store, one broker, created at startup and
/// closed at shutdown.
#[derive(Clone)]
pub struct Strata {
    store: EntityStore,
    broker: Arc<ChangeBroker>,
}

impl Strata {
    /// Opens (or initializes) the data directory with `registry` as schema.
    pub async fn open(base_dir: &FsPath, registry: Arc<SchemaRegistry>) -> StrataResult<Self> {
        let broker = Arc::new(ChangeBroker::new());
        let store = open_store(base_dir, registry, Arc::clone(&broker)).await?;
        info!("strata opened at {}", base_dir.display());
        Ok(Self { store, broker })
    }

    pub async fn open_catalog(base_dir: &FsPath) -> StrataResult<Self> {
        Self::open(base_dir, catalog_registry()?).await
    }

    pub fn from_store(store: EntityStore) -> Self {
        let broker = Arc::clone(store.broker());
        Self { store, broker }
    }

    pub async fn write(&self, level: LevelId, entity: Entity) -> StrataResult<ChangeSet> {
        debug!("write {} at {level}", entity.struct_name);
        self.store.replace_variable(level, entity).await
    }

    pub async fn remove(&self, level: LevelId, struct_name: &str, ids: &[Id]) -> StrataResult<()> {
        self.store.remove_variables(level, struct_name, ids).await?;
        Ok(())
    }

    pub async fn query(
        &self,
        struct_name: &str,
        active: bool,
        level: Option<LevelId>,
        filter: impl Into<OrFilter>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> StrataResult<Vec<Entity>> {
        let input = QueryInput {
            struct_name: struct_name.to_string(),
            active,
            level,
            filter: filter.into(),
            paging: Paging { limit, offset },
        };
        self.store.get_variables(input).await
    }

    pub async fn get(
        &self,
        struct_name: &str,
        active: bool,
        level: Option<LevelId>,
        id: Id,
        requested_paths: Vec<Path>,
    ) -> StrataResult<Entity> {
        let input = GetInput {
            struct_name: struct_name.to_string(),
            active,
            level,
            id,
            requested_paths,
        };
        self.store.get_variable(input).await
    }

    pub fn subscribe<F>(&self, struct_name: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.broker.subscribe(struct_name, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broker.unsubscribe(id)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn broker(&self) -> &Arc<ChangeBroker> {
        &self.broker
    }

    /// Drops every subscription; the store stays usable for reads.
    pub fn close(&self) {
        self.broker.shutdown();
        info!("strata closed");
    }
}
