use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use sea_orm::sea_query::{
    Expr, Func, OnConflict, Order, PostgresQueryBuilder, Query, QueryStatementWriter,
    SqliteQueryBuilder,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use tokio::sync::Mutex;

use strata_core::{
    ChangeBroker, Entity, EntityReadApi, Filter, GetInput, Id, Level, LevelApi, LevelId,
    OrFilter, Paging, Path, Predicate, QueryInput, SchemaRegistry, StoreUtilityApi, StrataError,
    StrataResult, Timestamp, Value,
};

use crate::config::{StoreLimits, StrataConfig};
use crate::db::*;
use crate::migration::Migrator;
use crate::query::{self, Dialect, RenderedQuery, Scope};

/// Layered entity store over the six physical tables. Cloning shares the
/// connection pool, registry, broker and writer lock.
#[derive(Clone)]
pub struct EntityStore {
    pub(crate) conn: DatabaseConnection,
    pub(crate) backend: DatabaseBackend,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) broker: Arc<ChangeBroker>,
    pub(crate) limits: StoreLimits,
    pub(crate) write_lock: Arc<Mutex<()>>,
}

impl EntityStore {
    pub async fn connect(
        config: &StrataConfig,
        base_dir: &FsPath,
        registry: Arc<SchemaRegistry>,
        broker: Arc<ChangeBroker>,
    ) -> StrataResult<Self> {
        let url = config.connection_url(base_dir)?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(false);
        match &config.pool {
            Some(pool) => {
                if let Some(max) = pool.max_connections {
                    options.max_connections(max);
                }
                if let Some(min) = pool.min_connections {
                    options.min_connections(min);
                }
                if let Some(timeout_ms) = pool.connect_timeout_ms {
                    options.connect_timeout(Duration::from_millis(timeout_ms));
                }
                if let Some(timeout_ms) = pool.acquire_timeout_ms {
                    options.acquire_timeout(Duration::from_millis(timeout_ms));
                }
                if let Some(timeout_ms) = pool.idle_timeout_ms {
                    options.idle_timeout(Duration::from_millis(timeout_ms));
                }
            }
            None => {
                if config.backend_name() == "sqlite" {
                    options.max_connections(1).min_connections(1);
                }
            }
        }
        let conn = Database::connect(options).await?;
        let backend = conn.get_database_backend();
        Migrator::up(&conn, None).await?;
        info!(
            "strata store opened on {} with {} structs",
            config.backend_name(),
            registry.get_structs().count()
        );
        Ok(Self {
            conn,
            backend,
            registry,
            broker,
            limits: config.limits(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn connect_sqlite(
        path: &FsPath,
        registry: Arc<SchemaRegistry>,
        broker: Arc<ChangeBroker>,
    ) -> StrataResult<Self> {
        let config = StrataConfig::default_sqlite(path.to_string_lossy());
        let base = path.parent().unwrap_or_else(|| FsPath::new("."));
        Self::connect(&config, base, registry, broker).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<ChangeBroker> {
        &self.broker
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::from_backend(self.backend)
    }

    /// Renders the statement `get_variables` would run, without running it.
    pub fn compile_query(&self, input: &QueryInput) -> StrataResult<RenderedQuery> {
        let plan = query::compile(&self.registry, &self.clamp(input.clone()))?;
        Ok(query::render(&plan, self.dialect()))
    }

    fn clamp(&self, mut input: QueryInput) -> QueryInput {
        let max = self.limits.max_page_size;
        input.paging.limit = Some(input.paging.limit.map_or(max, |limit| limit.min(max)));
        input
    }
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> StrataResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> StrataResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> StrataResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

/// Compiles, runs and materializes one entity query on `conn`.
pub(crate) async fn fetch_entities<C: ConnectionTrait>(
    conn: &C,
    registry: &SchemaRegistry,
    scope: &Scope<'_>,
) -> StrataResult<Vec<Entity>> {
    let plan = query::compile_scoped(registry, scope)?;
    let backend = conn.get_database_backend();
    let rendered = query::render(&plan, Dialect::from_backend(backend));
    debug!("entity query on {}: {}", plan.root_struct, rendered.sql);
    let rows = conn
        .query_all(Statement::from_sql_and_values(
            backend,
            rendered.sql,
            rendered.values,
        ))
        .await?;
    query::materialize(&plan, &rows)
}

/// The entity as visible at `level`, whatever its active flag.
pub(crate) async fn fetch_visible<C: ConnectionTrait>(
    conn: &C,
    registry: &SchemaRegistry,
    level: LevelId,
    struct_name: &str,
    id: Id,
    paths: &[Path],
) -> StrataResult<Option<Entity>> {
    let filter = OrFilter::from(Filter::new().with_id(Predicate::eq(Value::Integer(id.0))));
    let scope = Scope {
        struct_name,
        active: None,
        level,
        filter: &filter,
        paging: Paging {
            limit: Some(1),
            offset: None,
        },
        extra_paths: paths,
    };
    Ok(fetch_entities(conn, registry, &scope).await?.into_iter().next())
}

fn level_from_row(row: &QueryResult) -> StrataResult<Level> {
    let id: i64 = row.try_get("", "id")?;
    let active: i16 = row.try_get("", "active")?;
    let created_at: i64 = row.try_get("", "created_at")?;
    Ok(Level {
        id: LevelId(id),
        active: active != 0,
        created_at: Timestamp(created_at),
    })
}

pub(crate) async fn find_level<C: ConnectionTrait>(
    conn: &C,
    id: LevelId,
) -> StrataResult<Option<Level>> {
    let select = Query::select()
        .from(Levels::Table)
        .columns([Levels::Id, Levels::Active, Levels::CreatedAt])
        .and_where(Expr::col(Levels::Id).eq(id.as_i64()))
        .to_owned();
    query_one(conn, &select)
        .await?
        .map(|row| level_from_row(&row))
        .transpose()
}

pub(crate) async fn require_level<C: ConnectionTrait>(conn: &C, id: LevelId) -> StrataResult<Level> {
    find_level(conn, id)
        .await?
        .ok_or_else(|| StrataError::not_found(id.to_string()))
}

async fn read_counter<C: ConnectionTrait>(conn: &C, struct_name: &str) -> StrataResult<Option<i64>> {
    let select = Query::select()
        .from(Counters::Table)
        .column(Counters::NextId)
        .and_where(Expr::col(Counters::StructName).eq(struct_name))
        .to_owned();
    match query_one(conn, &select).await? {
        Some(row) => Ok(Some(row.try_get("", "next_id")?)),
        None => Ok(None),
    }
}

async fn write_counter<C: ConnectionTrait>(
    conn: &C,
    struct_name: &str,
    next_id: i64,
) -> StrataResult<()> {
    let upsert = Query::insert()
        .into_table(Counters::Table)
        .columns([Counters::StructName, Counters::NextId])
        .values_panic([struct_name.into(), next_id.into()])
        .on_conflict(
            OnConflict::column(Counters::StructName)
                .update_column(Counters::NextId)
                .to_owned(),
        )
        .to_owned();
    exec(conn, &upsert).await?;
    Ok(())
}

/// Hands out the next id of `struct_name`; ids start at 1.
pub(crate) async fn allocate_id<C: ConnectionTrait>(conn: &C, struct_name: &str) -> StrataResult<Id> {
    let next = read_counter(conn, struct_name).await?.unwrap_or(1);
    write_counter(conn, struct_name, next + 1).await?;
    Ok(Id(next))
}

/// Keeps the counter ahead of ids chosen by callers.
pub(crate) async fn reserve_id<C: ConnectionTrait>(
    conn: &C,
    struct_name: &str,
    id: Id,
) -> StrataResult<()> {
    let next = read_counter(conn, struct_name).await?.unwrap_or(1);
    if id.0 >= next {
        write_counter(conn, struct_name, id.0 + 1).await?;
    }
    Ok(())
}

async fn set_level_active(store: &EntityStore, id: LevelId, active: bool) -> StrataResult<()> {
    if id.is_base() {
        return Err(StrataError::invalid("the base level is always active"));
    }
    let _guard = store.write_lock.lock().await;
    require_level(&store.conn, id).await?;
    let update = Query::update()
        .table(Levels::Table)
        .value(Levels::Active, i16::from(active))
        .and_where(Expr::col(Levels::Id).eq(id.as_i64()))
        .to_owned();
    exec(&store.conn, &update).await?;
    info!("{id} {}", if active { "activated" } else { "deactivated" });
    Ok(())
}

#[async_trait]
impl LevelApi for EntityStore {
    async fn create_level(&self, id: LevelId) -> StrataResult<Level> {
        if id.as_i64() <= 0 {
            return Err(StrataError::invalid(format!("{id} cannot be created")));
        }
        let _guard = self.write_lock.lock().await;
        if find_level(&self.conn, id).await?.is_some() {
            return Err(StrataError::invalid(format!("{id} already exists")));
        }
        let level = Level {
            id,
            active: true,
            created_at: Timestamp::now(),
        };
        let insert = Query::insert()
            .into_table(Levels::Table)
            .columns([Levels::Id, Levels::Active, Levels::CreatedAt])
            .values_panic([
                id.as_i64().into(),
                1i16.into(),
                level.created_at.as_millis().into(),
            ])
            .to_owned();
        exec(&self.conn, &insert).await?;
        info!("{id} created");
        Ok(level)
    }

    async fn activate_level(&self, id: LevelId) -> StrataResult<()> {
        set_level_active(self, id, true).await
    }

    async fn deactivate_level(&self, id: LevelId) -> StrataResult<()> {
        set_level_active(self, id, false).await
    }

    async fn remove_level(&self, id: LevelId) -> StrataResult<()> {
        if id.is_base() {
            return Err(StrataError::invalid("the base level cannot be removed"));
        }
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.begin().await?;
        require_level(&tx, id).await?;
        let delete_vals = Query::delete()
            .from_table(Vals::Table)
            .and_where(Expr::col(Vals::Level).eq(id.as_i64()))
            .to_owned();
        exec(&tx, &delete_vals).await?;
        let delete_vars = Query::delete()
            .from_table(Vars::Table)
            .and_where(Expr::col(Vars::Level).eq(id.as_i64()))
            .to_owned();
        exec(&tx, &delete_vars).await?;
        let delete_removed = Query::delete()
            .from_table(RemovedVars::Table)
            .and_where(Expr::col(RemovedVars::Level).eq(id.as_i64()))
            .to_owned();
        exec(&tx, &delete_removed).await?;
        let delete_level = Query::delete()
            .from_table(Levels::Table)
            .and_where(Expr::col(Levels::Id).eq(id.as_i64()))
            .to_owned();
        exec(&tx, &delete_level).await?;
        tx.commit().await?;
        info!("{id} removed");
        Ok(())
    }

    async fn list_levels(&self) -> StrataResult<Vec<Level>> {
        let select = Query::select()
            .from(Levels::Table)
            .columns([Levels::Id, Levels::Active, Levels::CreatedAt])
            .order_by(Levels::Id, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(level_from_row)
            .collect()
    }

    async fn next_level_id(&self) -> StrataResult<LevelId> {
        let select = Query::select()
            .from(Levels::Table)
            .expr_as(Func::max(Expr::col(Levels::Id)), Levels::Id)
            .to_owned();
        let max: Option<i64> = match query_one(&self.conn, &select).await? {
            Some(row) => row.try_get("", "id")?,
            None => None,
        };
        Ok(LevelId(max.unwrap_or(0) + 1))
    }
}

#[async_trait]
impl EntityReadApi for EntityStore {
    async fn get_variables(&self, input: QueryInput) -> StrataResult<Vec<Entity>> {
        let input = self.clamp(input);
        let scope = Scope {
            struct_name: &input.struct_name,
            active: Some(input.active),
            level: input.level.unwrap_or_default(),
            filter: &input.filter,
            paging: input.paging,
            extra_paths: &[],
        };
        fetch_entities(&self.conn, &self.registry, &scope).await
    }

    async fn get_variable(&self, input: GetInput) -> StrataResult<Entity> {
        let filter = OrFilter::from(Filter::new().with_id(Predicate::eq(Value::Integer(input.id.0))));
        let scope = Scope {
            struct_name: &input.struct_name,
            active: Some(input.active),
            level: input.level.unwrap_or_default(),
            filter: &filter,
            paging: Paging {
                limit: Some(1),
                offset: None,
            },
            extra_paths: &input.requested_paths,
        };
        fetch_entities(&self.conn, &self.registry, &scope)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StrataError::not_found(format!("{} {}", input.struct_name, input.id))
            })
    }
}

#[async_trait]
impl StoreUtilityApi for EntityStore {
    async fn get_param(&self, name: &str) -> StrataResult<Option<String>> {
        let select = Query::select()
            .from(Params::Table)
            .column(Params::Value)
            .and_where(Expr::col(Params::Name).eq(name))
            .to_owned();
        match query_one(&self.conn, &select).await? {
            Some(row) => Ok(Some(row.try_get("", "value")?)),
            None => Ok(None),
        }
    }

    async fn replace_param(&self, name: &str, value: &str) -> StrataResult<()> {
        let _guard = self.write_lock.lock().await;
        let upsert = Query::insert()
            .into_table(Params::Table)
            .columns([Params::Name, Params::Value])
            .values_panic([name.into(), value.into()])
            .on_conflict(
                OnConflict::column(Params::Name)
                    .update_column(Params::Value)
                    .to_owned(),
            )
            .to_owned();
        exec(&self.conn, &upsert).await?;
        Ok(())
    }

    async fn get_struct_counter(&self, struct_name: &str) -> StrataResult<i64> {
        Ok(read_counter(&self.conn, struct_name).await?.unwrap_or(1))
    }

    async fn increment_struct_counter(&self, struct_name: &str) -> StrataResult<Id> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.begin().await?;
        let id = allocate_id(&tx, struct_name).await?;
        tx.commit().await?;
        Ok(id)
    }
}
