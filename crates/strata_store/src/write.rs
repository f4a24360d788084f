use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{DatabaseTransaction, TransactionTrait};

use strata_core::{
    ChangeSet, Entity, EntityRef, EntityWriteApi, Filter, FilterPath, Id, Image, LevelId,
    Operand, OrFilter, Paging, Path, Payload, Predicate, StrataError, StrataResult, StructDef,
    Timestamp, TriggerEvent, UniqueConstraint, Value,
};

use crate::db::*;
use crate::query::Scope;
use crate::store::{
    EntityStore, allocate_id, exec, fetch_entities, fetch_visible, require_level, reserve_id,
};
use crate::triggers::{self, Assignment};

type WriteFuture<'a> = Pin<Box<dyn Future<Output = StrataResult<WriteOutcome>> + Send + 'a>>;

#[derive(Clone, Copy, Debug)]
struct WriteOutcome {
    id: Id,
    /// Whether this entity or anything written through it changed.
    touched: bool,
}

/// Loaded references are kept in images as bare references.
fn as_stored(value: Value) -> Value {
    match value {
        Value::Other(entity) => match entity.entity_ref() {
            Some(reference) => Value::Ref(reference),
            None => Value::Other(entity),
        },
        other => other,
    }
}

impl EntityStore {
    /// Serializes one logical write, bounds it by the configured timeout and
    /// announces its merged change set after commit.
    async fn run_logical_write<F>(&self, work: F) -> StrataResult<ChangeSet>
    where
        F: Future<Output = StrataResult<ChangeSet>> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let changes = match self.limits.write_timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                StrataError::storage(format!("write exceeded {} ms", limit.as_millis()))
            })??,
            None => work.await?,
        };
        self.broker.announce(&changes);
        Ok(changes)
    }

    fn write_entity<'a>(
        &'a self,
        tx: &'a DatabaseTransaction,
        level: LevelId,
        entity: Entity,
        depth: usize,
        changes: &'a mut ChangeSet,
    ) -> WriteFuture<'a> {
        Box::pin(async move {
            if depth > self.limits.max_cascade_depth {
                return Err(StrataError::CascadeLimit {
                    depth: self.limits.max_cascade_depth,
                });
            }
            let registry = Arc::clone(&self.registry);
            let def = registry.get_struct(&entity.struct_name)?;
            let Entity {
                struct_name,
                id,
                active,
                values,
                ..
            } = entity;
            if let Some(id) = id {
                if id.0 <= 0 {
                    return Err(StrataError::invalid(format!("{struct_name} id must be positive")));
                }
            }

            let mut written: BTreeMap<String, Value> = BTreeMap::new();
            let mut nested_touched = false;
            for (field, value) in values {
                let field_def = def.field_def(&field).ok_or_else(|| {
                    StrataError::invalid(format!("{struct_name} has no field {field}"))
                })?;
                let value = match field_def.field_type.coerce(value)? {
                    Value::Other(nested) => {
                        let target = nested.struct_name.clone();
                        let outcome = self.write_entity(tx, level, *nested, depth, changes).await?;
                        nested_touched |= outcome.touched;
                        Value::Ref(EntityRef::new(target, outcome.id))
                    }
                    Value::Ref(reference) => {
                        let visible = fetch_visible(
                            tx,
                            &registry,
                            level,
                            &reference.struct_name,
                            reference.id,
                            &[],
                        )
                        .await?;
                        if visible.is_none() {
                            return Err(StrataError::not_found(format!(
                                "{}.{field} refers to missing {} {}",
                                struct_name, reference.struct_name, reference.id
                            )));
                        }
                        Value::Ref(reference)
                    }
                    other => other,
                };
                written.insert(field, value);
            }

            let paths = triggers::image_paths(&registry, def)?;
            let (id, pre) = match id {
                Some(id) => {
                    reserve_id(tx, &struct_name, id).await?;
                    let pre = fetch_visible(tx, &registry, level, &struct_name, id, &paths).await?;
                    (id, pre)
                }
                None => (allocate_id(tx, &struct_name).await?, None),
            };
            let exists = pre.is_some();
            if !exists {
                for (name, field) in &def.fields {
                    if let Some(default) = &field.default {
                        if !written.contains_key(name) {
                            written.insert(name.clone(), field.field_type.coerce(default.clone())?);
                        }
                    }
                }
            }

            let pre_image = self
                .project(tx, level, &struct_name, pre.as_ref(), &BTreeMap::new(), &paths)
                .await?;
            let mut post_image = self
                .project(tx, level, &struct_name, pre.as_ref(), &written, &paths)
                .await?;

            if exists {
                let fired =
                    triggers::fired_triggers(def, TriggerEvent::BeforeUpdate, &pre_image, &post_image);
                let assignments =
                    triggers::evaluate_effects(&registry, def, &fired, &post_image)?;
                for assignment in assignments {
                    match assignment.target.leaf() {
                        Some(leaf) if assignment.target.is_direct() => {
                            written.insert(leaf.to_string(), assignment.value.clone());
                            post_image.set(&assignment.target, Some(assignment.value));
                        }
                        _ => {
                            self.apply_remote(
                                tx,
                                level,
                                &struct_name,
                                id,
                                &post_image,
                                assignment,
                                depth + 1,
                                changes,
                            )
                            .await?;
                        }
                    }
                }
            }

            triggers::run_checks(def, &post_image)?;
            for constraint in &def.unique {
                self.ensure_unique(tx, level, &struct_name, id, constraint, &post_image)
                    .await?;
            }

            let mut changed: Vec<(String, Value)> = Vec::new();
            for (field, value) in &written {
                let payload = value.to_payload()?;
                let current = match pre.as_ref().and_then(|entity| entity.get(field)) {
                    Some(current) => Some(current.to_payload()?),
                    None => None,
                };
                if current.as_ref() != Some(&payload) {
                    changed.push((field.clone(), value.clone()));
                }
            }
            let active_changed = pre.as_ref().map_or(true, |entity| entity.active != active);
            let own_changed = !changed.is_empty() || active_changed;
            let touched = own_changed || nested_touched;

            if touched {
                self.persist(tx, level, def, id, active, pre.as_ref(), &changed, own_changed)
                    .await?;
                if !exists {
                    changes.record_created(&struct_name, id);
                } else if own_changed {
                    changes.record_updated(&struct_name, id);
                }
                debug!("{struct_name} {id} written at {level}, {} fields changed", changed.len());
            }

            if own_changed {
                let event = if exists {
                    TriggerEvent::AfterUpdate
                } else {
                    TriggerEvent::AfterCreation
                };
                let fired = triggers::fired_triggers(def, event, &pre_image, &post_image);
                if !fired.is_empty() {
                    let assignments =
                        triggers::evaluate_effects(&registry, def, &fired, &post_image)?;
                    self.apply_assignments(
                        tx,
                        level,
                        &struct_name,
                        id,
                        active,
                        &post_image,
                        assignments,
                        depth + 1,
                        changes,
                    )
                    .await?;
                }
            }

            Ok(WriteOutcome { id, touched })
        })
    }

    /// Image of `paths` as they would read after `written` is applied on top
    /// of `base`. A written reference redirects the paths that hop through it.
    async fn project(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        struct_name: &str,
        base: Option<&Entity>,
        written: &BTreeMap<String, Value>,
        paths: &[Path],
    ) -> StrataResult<Image> {
        let mut image = Image::new();
        for path in paths {
            let resolved = self.registry.resolve_path(struct_name, path)?;
            let first = path.first().unwrap_or_default();
            let value = match written.get(first) {
                Some(value) if path.is_direct() => Some(value.clone()),
                Some(value) => match (value.as_ref_target(), path.tail()) {
                    (Some(target), Some(tail)) => {
                        self.lookup_remote(tx, level, &target, &tail).await?
                    }
                    _ => None,
                },
                None => base.and_then(|entity| entity.lookup(path)).cloned(),
            };
            image.insert(path.clone(), resolved.field, value.map(as_stored));
        }
        Ok(image)
    }

    async fn lookup_remote(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        target: &EntityRef,
        tail: &Path,
    ) -> StrataResult<Option<Value>> {
        let entity = fetch_visible(
            tx,
            &self.registry,
            level,
            &target.struct_name,
            target.id,
            std::slice::from_ref(tail),
        )
        .await?;
        Ok(entity.and_then(|entity| entity.lookup(tail).cloned()))
    }

    async fn ensure_unique(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        struct_name: &str,
        id: Id,
        constraint: &UniqueConstraint,
        image: &Image,
    ) -> StrataResult<()> {
        let mut filter = Filter::new().with_id(Predicate::Ne(Operand::value(id.0)));
        for path in &constraint.paths {
            let Some(value) = image.get(path) else {
                return Ok(());
            };
            filter = filter
                .with_path(FilterPath::new(path.clone()).matching(Predicate::eq(value.clone())));
        }
        let filter = OrFilter::from(filter);
        let scope = Scope {
            struct_name,
            active: None,
            level,
            filter: &filter,
            paging: Paging {
                limit: Some(1),
                offset: None,
            },
            extra_paths: &[],
        };
        if fetch_entities(tx, &self.registry, &scope).await?.is_empty() {
            return Ok(());
        }
        Err(StrataError::uniqueness(
            struct_name,
            constraint.paths.iter().map(Path::flatten).collect(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        def: &StructDef,
        id: Id,
        active: bool,
        pre: Option<&Entity>,
        changed: &[(String, Value)],
        own_changed: bool,
    ) -> StrataResult<()> {
        let now = Timestamp::now();
        let meta = pre.and_then(|entity| entity.meta.as_ref());
        let created_at = meta.map_or(now, |meta| meta.created_at);
        let updated_at = match meta {
            Some(meta) if !own_changed => meta.updated_at,
            _ => now,
        };
        let upsert_var = Query::insert()
            .into_table(Vars::Table)
            .columns([
                Vars::Level,
                Vars::StructName,
                Vars::Id,
                Vars::Active,
                Vars::CreatedAt,
                Vars::UpdatedAt,
                Vars::RequestedAt,
            ])
            .values_panic([
                level.as_i64().into(),
                def.name.as_str().into(),
                id.0.into(),
                i16::from(active).into(),
                created_at.as_millis().into(),
                updated_at.as_millis().into(),
                now.as_millis().into(),
            ])
            .on_conflict(
                OnConflict::columns([Vars::Level, Vars::StructName, Vars::Id])
                    .update_columns([
                        Vars::Active,
                        Vars::CreatedAt,
                        Vars::UpdatedAt,
                        Vars::RequestedAt,
                    ])
                    .to_owned(),
            )
            .to_owned();
        exec(tx, &upsert_var).await?;

        for (field, value) in changed {
            let target = def
                .field_def(field)
                .and_then(|field_def| field_def.field_type.target())
                .map(str::to_string);
            let (text, integer, real) = match value.to_payload()? {
                Payload::Text(text) => (Some(text), None, None),
                Payload::Integer(v) => (None, Some(v), None),
                Payload::Real(v) => (None, None, Some(v)),
            };
            let upsert_val = Query::insert()
                .into_table(Vals::Table)
                .columns([
                    Vals::Level,
                    Vals::StructName,
                    Vals::VariableId,
                    Vals::FieldName,
                    Vals::FieldStructName,
                    Vals::ValueText,
                    Vals::ValueInteger,
                    Vals::ValueReal,
                ])
                .values_panic([
                    level.as_i64().into(),
                    def.name.as_str().into(),
                    id.0.into(),
                    field.as_str().into(),
                    target.into(),
                    text.into(),
                    integer.into(),
                    real.into(),
                ])
                .on_conflict(
                    OnConflict::columns([
                        Vals::Level,
                        Vals::StructName,
                        Vals::VariableId,
                        Vals::FieldName,
                    ])
                    .update_columns([
                        Vals::FieldStructName,
                        Vals::ValueText,
                        Vals::ValueInteger,
                        Vals::ValueReal,
                    ])
                    .to_owned(),
                )
                .to_owned();
            exec(tx, &upsert_val).await?;
        }

        let delete_tombstone = Query::delete()
            .from_table(RemovedVars::Table)
            .and_where(Expr::col(RemovedVars::Level).eq(level.as_i64()))
            .and_where(Expr::col(RemovedVars::StructName).eq(def.name.as_str()))
            .and_where(Expr::col(RemovedVars::Id).eq(id.0))
            .to_owned();
        exec(tx, &delete_tombstone).await?;
        Ok(())
    }

    /// Applies trigger results in order: local targets as one write to the
    /// entity itself, the others as writes to the entity their hop refers to.
    #[allow(clippy::too_many_arguments)]
    async fn apply_assignments(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        struct_name: &str,
        id: Id,
        active: bool,
        image: &Image,
        assignments: Vec<Assignment>,
        depth: usize,
        changes: &mut ChangeSet,
    ) -> StrataResult<()> {
        let mut local = Entity::new(struct_name).with_id(id).with_active(active);
        let mut remote = Vec::new();
        for assignment in assignments {
            match assignment.target.leaf() {
                Some(leaf) if assignment.target.is_direct() => {
                    local.insert(leaf, assignment.value);
                }
                _ => remote.push(assignment),
            }
        }
        if !local.values.is_empty() {
            self.write_entity(tx, level, local, depth, changes).await?;
        }
        for assignment in remote {
            self.apply_remote(tx, level, struct_name, id, image, assignment, depth, changes)
                .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_remote(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        struct_name: &str,
        id: Id,
        image: &Image,
        assignment: Assignment,
        depth: usize,
        changes: &mut ChangeSet,
    ) -> StrataResult<()> {
        let (Some(prefix), Some(leaf)) = (assignment.target.prefix(), assignment.target.leaf())
        else {
            return Ok(());
        };
        let Some(reference) = image.get(&prefix).and_then(Value::as_ref_target) else {
            warn!(
                "trigger {} on {struct_name} {id} skipped: {prefix} is not set",
                assignment.trigger
            );
            return Ok(());
        };
        let current = fetch_visible(
            tx,
            &self.registry,
            level,
            &reference.struct_name,
            reference.id,
            &[],
        )
        .await?;
        let Some(current) = current else {
            warn!(
                "trigger {} on {struct_name} {id} skipped: {} {} is not visible at {level}",
                assignment.trigger, reference.struct_name, reference.id
            );
            return Ok(());
        };
        let update = Entity::new(reference.struct_name)
            .with_id(reference.id)
            .with_active(current.active)
            .set(leaf, assignment.value);
        self.write_entity(tx, level, update, depth, changes).await?;
        Ok(())
    }

    async fn remove_entity(
        &self,
        tx: &DatabaseTransaction,
        level: LevelId,
        def: &StructDef,
        id: Id,
        changes: &mut ChangeSet,
    ) -> StrataResult<()> {
        let paths = triggers::image_paths(&self.registry, def)?;
        let Some(pre) = fetch_visible(tx, &self.registry, level, &def.name, id, &paths).await?
        else {
            debug!("{} {id} is not visible at {level}, nothing to remove", def.name);
            return Ok(());
        };
        let image = self
            .project(tx, level, &def.name, Some(&pre), &BTreeMap::new(), &paths)
            .await?;
        let fired = triggers::fired_triggers(def, TriggerEvent::BeforeDeletion, &image, &image);
        if !fired.is_empty() {
            let assignments = triggers::evaluate_effects(&self.registry, def, &fired, &image)?;
            for assignment in assignments {
                if assignment.target.is_direct() {
                    debug!(
                        "trigger {} targets {} {id} which is being removed",
                        assignment.trigger, def.name
                    );
                    continue;
                }
                self.apply_remote(tx, level, &def.name, id, &image, assignment, 1, changes)
                    .await?;
            }
        }

        let delete_vals = Query::delete()
            .from_table(Vals::Table)
            .and_where(Expr::col(Vals::StructName).eq(def.name.as_str()))
            .and_where(Expr::col(Vals::VariableId).eq(id.0))
            .and_where_option(
                (!level.is_base()).then(|| Expr::col(Vals::Level).eq(level.as_i64())),
            )
            .to_owned();
        exec(tx, &delete_vals).await?;
        let delete_vars = Query::delete()
            .from_table(Vars::Table)
            .and_where(Expr::col(Vars::StructName).eq(def.name.as_str()))
            .and_where(Expr::col(Vars::Id).eq(id.0))
            .and_where_option(
                (!level.is_base()).then(|| Expr::col(Vars::Level).eq(level.as_i64())),
            )
            .to_owned();
        exec(tx, &delete_vars).await?;

        if level.is_base() {
            let delete_tombstones = Query::delete()
                .from_table(RemovedVars::Table)
                .and_where(Expr::col(RemovedVars::StructName).eq(def.name.as_str()))
                .and_where(Expr::col(RemovedVars::Id).eq(id.0))
                .to_owned();
            exec(tx, &delete_tombstones).await?;
        } else {
            let tombstone = Query::insert()
                .into_table(RemovedVars::Table)
                .columns([RemovedVars::Level, RemovedVars::StructName, RemovedVars::Id])
                .values_panic([level.as_i64().into(), def.name.as_str().into(), id.0.into()])
                .on_conflict(
                    OnConflict::columns([
                        RemovedVars::Level,
                        RemovedVars::StructName,
                        RemovedVars::Id,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .to_owned();
            exec(tx, &tombstone).await?;
        }
        changes.record_removed(&def.name, id);
        Ok(())
    }
}

#[async_trait]
impl EntityWriteApi for EntityStore {
    async fn replace_variable(&self, level: LevelId, entity: Entity) -> StrataResult<ChangeSet> {
        self.run_logical_write(async {
            let tx = self.conn.begin().await?;
            require_level(&tx, level).await?;
            let mut changes = ChangeSet::new();
            self.write_entity(&tx, level, entity, 0, &mut changes).await?;
            tx.commit().await?;
            Ok(changes)
        })
        .await
    }

    async fn remove_variables(
        &self,
        level: LevelId,
        struct_name: &str,
        ids: &[Id],
    ) -> StrataResult<ChangeSet> {
        let def = self.registry.get_struct(struct_name)?;
        self.run_logical_write(async {
            let tx = self.conn.begin().await?;
            require_level(&tx, level).await?;
            let mut changes = ChangeSet::new();
            for id in ids {
                self.remove_entity(&tx, level, def, *id, &mut changes).await?;
            }
            tx.commit().await?;
            Ok(changes)
        })
        .await
    }
}
