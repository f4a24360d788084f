use std::collections::BTreeMap;

use sea_orm::QueryResult;

use strata_core::{
    Entity, EntityMeta, Id, LevelId, Path, Payload, StorageColumn, StrataError,
    StrataResult, Timestamp, Value,
};

use super::plan::{Decode, QueryPlan, VarColumn, hop_alias};

/// Reads an integer column whatever width the backend reports it in.
fn get_i64(row: &QueryResult, alias: &str) -> StrataResult<Option<i64>> {
    if let Ok(value) = row.try_get::<Option<i64>>("", alias) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i32>>("", alias) {
        return Ok(value.map(i64::from));
    }
    row.try_get::<Option<i16>>("", alias)
        .map(|value| value.map(i64::from))
        .map_err(|err| StrataError::storage(format!("read column {alias}: {err}")))
}

fn get_payload(
    row: &QueryResult,
    alias: &str,
    column: StorageColumn,
) -> StrataResult<Option<Payload>> {
    Ok(match column {
        StorageColumn::Text => row
            .try_get::<Option<String>>("", alias)?
            .map(Payload::Text),
        StorageColumn::Integer => get_i64(row, alias)?.map(Payload::Integer),
        StorageColumn::Real => row.try_get::<Option<f64>>("", alias)?.map(Payload::Real),
    })
}

fn meta_from(
    row: &QueryResult,
    alias: impl Fn(VarColumn) -> String,
) -> StrataResult<Option<EntityMeta>> {
    let level = get_i64(row, &alias(VarColumn::Level))?;
    let created_at = get_i64(row, &alias(VarColumn::CreatedAt))?;
    let updated_at = get_i64(row, &alias(VarColumn::UpdatedAt))?;
    let requested_at = get_i64(row, &alias(VarColumn::RequestedAt))?;
    Ok(match (level, created_at, updated_at, requested_at) {
        (Some(level), Some(created_at), Some(updated_at), Some(requested_at)) => Some(EntityMeta {
            level: LevelId(level),
            created_at: Timestamp(created_at),
            updated_at: Timestamp(updated_at),
            requested_at: Timestamp(requested_at),
        }),
        _ => None,
    })
}

/// Turns pivoted rows back into entity graphs, nesting every loaded hop as
/// an `Other` value in place of the bare reference.
pub fn materialize(plan: &QueryPlan, rows: &[QueryResult]) -> StrataResult<Vec<Entity>> {
    rows.iter().map(|row| materialize_row(plan, row)).collect()
}

fn materialize_row(plan: &QueryPlan, row: &QueryResult) -> StrataResult<Entity> {
    let id = get_i64(row, VarColumn::Id.marker())?
        .ok_or_else(|| StrataError::storage("query row without an id"))?;
    let mut root = Entity::new(plan.root_struct.clone()).with_id(Id(id));
    root.active = get_i64(row, VarColumn::Active.marker())?.unwrap_or(1) != 0;
    root.meta = meta_from(row, |column| column.marker().to_string())?;

    let mut shells: BTreeMap<Path, Entity> = BTreeMap::new();
    for column in &plan.columns {
        if let Decode::Hop {
            prefix,
            column: VarColumn::Id,
        } = &column.decode
        {
            let Some(hop_id) = get_i64(row, &column.alias)? else {
                continue;
            };
            let struct_name = row
                .try_get::<Option<String>>("", &hop_alias(prefix, VarColumn::StructName))?
                .unwrap_or_default();
            let mut shell = Entity::new(struct_name).with_id(Id(hop_id));
            shell.active = get_i64(row, &hop_alias(prefix, VarColumn::Active))?.unwrap_or(1) != 0;
            shell.meta = meta_from(row, |column| hop_alias(prefix, column))?;
            shells.insert(prefix.clone(), shell);
        }
    }

    for column in &plan.columns {
        let Decode::Field { path, field_type } = &column.decode else {
            continue;
        };
        let Some(payload) = get_payload(row, &column.alias, field_type.storage())? else {
            continue;
        };
        let value = field_type.decode(payload)?;
        let (owner, leaf) = match (path.prefix(), path.leaf()) {
            (Some(prefix), Some(leaf)) => match shells.get_mut(&prefix) {
                Some(shell) => (shell, leaf),
                None => continue,
            },
            (None, Some(leaf)) => (&mut root, leaf),
            _ => continue,
        };
        if !owner.values.contains_key(leaf) {
            owner.values.insert(leaf.to_string(), value);
        }
    }

    let mut prefixes: Vec<Path> = shells.keys().cloned().collect();
    prefixes.sort_by_key(|prefix| std::cmp::Reverse(prefix.len()));
    for prefix in prefixes {
        let Some(shell) = shells.remove(&prefix) else {
            continue;
        };
        let Some(leaf) = prefix.leaf().map(str::to_string) else {
            continue;
        };
        let parent = match prefix.prefix() {
            Some(parent_prefix) => match shells.get_mut(&parent_prefix) {
                Some(parent) => parent,
                None => continue,
            },
            None => &mut root,
        };
        parent.values.insert(leaf, Value::Other(Box::new(shell)));
    }
    Ok(root)
}
