use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChangeSet, Entity, Id, LevelId, OrFilter, Path, StrataResult, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    pub active: bool,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Paging {
    pub fn page(limit: u64, offset: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub struct_name: String,
    pub active: bool,
    #[serde(default)]
    pub level: Option<LevelId>,
    #[serde(default)]
    pub filter: OrFilter,
    #[serde(default)]
    pub paging: Paging,
}

impl QueryInput {
    pub fn new(struct_name: impl Into<String>) -> Self {
        Self {
            struct_name: struct_name.into(),
            active: true,
            level: None,
            filter: OrFilter::all(),
            paging: Paging::default(),
        }
    }

    pub fn at_level(mut self, level: LevelId) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<OrFilter>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetInput {
    pub struct_name: String,
    pub active: bool,
    #[serde(default)]
    pub level: Option<LevelId>,
    pub id: Id,
    #[serde(default)]
    pub requested_paths: Vec<Path>,
}

impl GetInput {
    pub fn new(struct_name: impl Into<String>, id: Id) -> Self {
        Self {
            struct_name: struct_name.into(),
            active: true,
            level: None,
            id,
            requested_paths: Vec::new(),
        }
    }

    pub fn at_level(mut self, level: LevelId) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_paths(mut self, paths: Vec<Path>) -> Self {
        self.requested_paths = paths;
        self
    }
}

#[async_trait]
pub trait LevelApi {
    async fn create_level(&self, id: LevelId) -> StrataResult<Level>;
    async fn activate_level(&self, id: LevelId) -> StrataResult<()>;
    async fn deactivate_level(&self, id: LevelId) -> StrataResult<()>;
    async fn remove_level(&self, id: LevelId) -> StrataResult<()>;
    async fn list_levels(&self) -> StrataResult<Vec<Level>>;
    async fn next_level_id(&self) -> StrataResult<LevelId>;
}

#[async_trait]
pub trait EntityWriteApi {
    async fn replace_variable(&self, level: LevelId, entity: Entity) -> StrataResult<ChangeSet>;
    async fn remove_variables(
        &self,
        level: LevelId,
        struct_name: &str,
        ids: &[Id],
    ) -> StrataResult<ChangeSet>;
}

#[async_trait]
pub trait EntityReadApi {
    async fn get_variables(&self, input: QueryInput) -> StrataResult<Vec<Entity>>;
    async fn get_variable(&self, input: GetInput) -> StrataResult<Entity>;
}

#[async_trait]
pub trait StoreUtilityApi {
    async fn get_param(&self, name: &str) -> StrataResult<Option<String>>;
    async fn replace_param(&self, name: &str, value: &str) -> StrataResult<()>;
    async fn get_struct_counter(&self, struct_name: &str) -> StrataResult<i64>;
    async fn increment_struct_counter(&self, struct_name: &str) -> StrataResult<Id>;
}
