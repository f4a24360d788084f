use std::collections::{BTreeMap, BTreeSet};

use sea_orm::sea_query::Value as SeaValue;

use strata_core::{
    Filter, FieldType, LevelId, Operand, OrFilter, Paging, Path, Payload, Predicate, QueryInput,
    SchemaRegistry, SortDirection, SortKey, StrataError, StrataResult, Value,
};

use super::plan::{
    Column, CompareOp, Condition, Decode, Join, OrderTerm, PatternKind, Pivot, PivotSource,
    QueryPlan, Scalar, Term, VarColumn, hop_alias,
};

/// Everything the compiler needs; public queries fill it from a
/// `QueryInput`, internal lookups may leave `active` open.
pub(crate) struct Scope<'a> {
    pub struct_name: &'a str,
    pub active: Option<bool>,
    pub level: LevelId,
    pub filter: &'a OrFilter,
    pub paging: Paging,
    pub extra_paths: &'a [Path],
}

pub fn compile(registry: &SchemaRegistry, input: &QueryInput) -> StrataResult<QueryPlan> {
    compile_scoped(
        registry,
        &Scope {
            struct_name: &input.struct_name,
            active: Some(input.active),
            level: input.level.unwrap_or_default(),
            filter: &input.filter,
            paging: input.paging,
            extra_paths: &[],
        },
    )
}

pub(crate) fn compile_scoped(registry: &SchemaRegistry, scope: &Scope<'_>) -> StrataResult<QueryPlan> {
    let def = registry.get_struct(scope.struct_name)?;

    let mut paths: BTreeMap<Path, FieldType> = BTreeMap::new();
    for (name, field) in &def.fields {
        paths.insert(Path::field(name.clone()), field.field_type.clone());
    }
    let mut requested: Vec<Path> = scope.extra_paths.to_vec();
    for filter_path in scope.filter.active_paths() {
        requested.push(filter_path.path.clone());
        if let Some(predicate) = &filter_path.predicate {
            for operand in predicate.operands() {
                if let Operand::Path(path) = operand {
                    requested.push(path.clone());
                }
            }
        }
    }
    for filter in &scope.filter.filters {
        for predicate in [&filter.id, &filter.created_at, &filter.updated_at]
            .into_iter()
            .flatten()
        {
            for operand in predicate.operands() {
                if let Operand::Path(path) = operand {
                    requested.push(path.clone());
                }
            }
        }
    }
    for path in requested {
        if !paths.contains_key(&path) {
            let resolved = registry.resolve_path(scope.struct_name, &path)?;
            paths.insert(path, resolved.field.field_type);
        }
    }

    let mut columns: Vec<Column> = VarColumn::ROOT_COLUMNS
        .iter()
        .map(|column| Column {
            alias: column.marker().to_string(),
            scalar: Scalar::Root(*column),
            decode: Decode::Root(*column),
        })
        .collect();

    let mut prefixes: BTreeSet<Path> = BTreeSet::new();
    for path in paths.keys() {
        prefixes.extend(path.hop_prefixes());
    }
    for prefix in &prefixes {
        for column in VarColumn::HOP_COLUMNS {
            columns.push(Column {
                alias: hop_alias(prefix, column),
                scalar: Scalar::Pivot(Pivot {
                    segments: prefix.segments().to_vec(),
                    source: PivotSource::HopVar(column),
                }),
                decode: Decode::Hop {
                    prefix: prefix.clone(),
                    column,
                },
            });
        }
    }
    for (path, field_type) in &paths {
        columns.push(Column {
            alias: path.flatten(),
            scalar: payload_pivot(path, field_type),
            decode: Decode::Field {
                path: path.clone(),
                field_type: field_type.clone(),
            },
        });
    }

    let depth = paths.keys().map(Path::len).max().unwrap_or(1).max(1);
    let joins = plan_joins(paths.keys(), depth);

    let having = compile_or(scope.filter, &paths)?;
    let order = compile_order(scope.filter, &paths);

    Ok(QueryPlan {
        root_struct: scope.struct_name.to_string(),
        level: scope.level,
        active: scope.active,
        joins,
        columns,
        having,
        order,
        limit: scope.paging.limit,
        offset: scope.paging.offset,
    })
}

fn payload_pivot(path: &Path, field_type: &FieldType) -> Scalar {
    Scalar::Pivot(Pivot {
        segments: path.segments().to_vec(),
        source: PivotSource::Payload(field_type.storage()),
    })
}

/// Alternating Val/Var joins. The first Val join is unrestricted so every
/// direct field lands in its pivot; deeper joins only carry the field rows
/// some path actually addresses.
fn plan_joins<'a>(paths: impl Iterator<Item = &'a Path> + Clone, depth: usize) -> Vec<Join> {
    let mut joins = vec![Join::Val {
        depth: 1,
        fields: None,
    }];
    for level in 1..depth {
        let via_fields: BTreeSet<String> = paths
            .clone()
            .filter(|path| path.len() > level)
            .map(|path| path.segments()[level - 1].clone())
            .collect();
        let fields: BTreeSet<String> = paths
            .clone()
            .filter(|path| path.len() > level)
            .map(|path| path.segments()[level].clone())
            .collect();
        joins.push(Join::Var {
            depth: level + 1,
            via_fields: via_fields.into_iter().collect(),
        });
        joins.push(Join::Val {
            depth: level + 1,
            fields: Some(fields.into_iter().collect()),
        });
    }
    joins
}

fn compile_or(
    filter: &OrFilter,
    paths: &BTreeMap<Path, FieldType>,
) -> StrataResult<Option<Condition>> {
    let mut branches = Vec::new();
    for branch in &filter.filters {
        match compile_and(branch, paths)? {
            Some(condition) => branches.push(condition),
            None => return Ok(None),
        }
    }
    Ok(match branches.len() {
        0 => None,
        1 => branches.pop(),
        _ => Some(Condition::Or(branches)),
    })
}

/// `None` when the branch places no restriction.
fn compile_and(
    filter: &Filter,
    paths: &BTreeMap<Path, FieldType>,
) -> StrataResult<Option<Condition>> {
    let mut conditions = Vec::new();
    if let Some(predicate) = &filter.id {
        conditions.push(compile_predicate(
            Scalar::Root(VarColumn::Id),
            &FieldType::I64,
            predicate,
            paths,
        )?);
    }
    if let Some(predicate) = &filter.created_at {
        conditions.push(compile_predicate(
            Scalar::Root(VarColumn::CreatedAt),
            &FieldType::Timestamp,
            predicate,
            paths,
        )?);
    }
    if let Some(predicate) = &filter.updated_at {
        conditions.push(compile_predicate(
            Scalar::Root(VarColumn::UpdatedAt),
            &FieldType::Timestamp,
            predicate,
            paths,
        )?);
    }
    for filter_path in filter.active_paths() {
        let Some(predicate) = &filter_path.predicate else {
            continue;
        };
        let field_type = paths.get(&filter_path.path).ok_or_else(|| {
            StrataError::invalid(format!("unknown path {}", filter_path.path))
        })?;
        conditions.push(compile_predicate(
            payload_pivot(&filter_path.path, field_type),
            field_type,
            predicate,
            paths,
        )?);
    }
    Ok(match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(Condition::And(conditions)),
    })
}

fn compile_predicate(
    lhs: Scalar,
    field_type: &FieldType,
    predicate: &Predicate,
    paths: &BTreeMap<Path, FieldType>,
) -> StrataResult<Condition> {
    let operator = predicate.operator();
    if !field_type.supports(operator) {
        return Err(StrataError::invalid(format!(
            "operator {operator:?} is not supported on {field_type:?} fields"
        )));
    }
    let term = |operand: &Operand| compile_operand(field_type, operand, paths);
    let condition = match predicate {
        Predicate::Eq(operand) => compare(lhs, CompareOp::Eq, term(operand)?),
        Predicate::Ne(operand) => compare(lhs, CompareOp::Ne, term(operand)?),
        Predicate::Gt(operand) => compare(lhs, CompareOp::Gt, term(operand)?),
        Predicate::Ge(operand) => compare(lhs, CompareOp::Ge, term(operand)?),
        Predicate::Lt(operand) => compare(lhs, CompareOp::Lt, term(operand)?),
        Predicate::Le(operand) => compare(lhs, CompareOp::Le, term(operand)?),
        Predicate::Like(search) => Condition::Pattern {
            lhs,
            kind: PatternKind::Like,
            search: search.clone(),
        },
        Predicate::Glob(search) => Condition::Pattern {
            lhs,
            kind: PatternKind::Glob,
            search: search.clone(),
        },
        Predicate::Between(low, high) => Condition::Between {
            lhs,
            low: term(low)?,
            high: term(high)?,
            negated: false,
        },
        Predicate::NotBetween(low, high) => Condition::Between {
            lhs,
            low: term(low)?,
            high: term(high)?,
            negated: true,
        },
    };
    Ok(condition)
}

fn compare(lhs: Scalar, op: CompareOp, rhs: Term) -> Condition {
    Condition::Compare { lhs, op, rhs }
}

fn compile_operand(
    field_type: &FieldType,
    operand: &Operand,
    paths: &BTreeMap<Path, FieldType>,
) -> StrataResult<Term> {
    match operand {
        Operand::Value(value) => Ok(Term::Bind(bind_value(field_type, value)?)),
        Operand::Path(path) => {
            let other_type = paths
                .get(path)
                .ok_or_else(|| StrataError::invalid(format!("unknown path {path}")))?;
            let compatible = match (field_type.kind(), other_type.kind()) {
                (Some(left), Some(right)) => left == right,
                (None, None) => field_type == other_type,
                _ => false,
            };
            if !compatible || field_type.storage() != other_type.storage() {
                return Err(StrataError::invalid(format!(
                    "cannot compare {field_type:?} with {path} of type {other_type:?}"
                )));
            }
            Ok(Term::Scalar(payload_pivot(path, other_type)))
        }
    }
}

/// Encodes a literal exactly as it is stored, so comparisons happen on the
/// stored representation.
fn bind_value(field_type: &FieldType, value: &Value) -> StrataResult<SeaValue> {
    let value = match (field_type, value) {
        (FieldType::Other(_), Value::Integer(id)) => Value::Integer(*id),
        _ => field_type.coerce(value.clone())?,
    };
    Ok(match value.to_payload()? {
        Payload::Text(text) => text.into(),
        Payload::Integer(v) => v.into(),
        Payload::Real(v) => v.into(),
    })
}

/// Declared sort keys by priority then path name, first occurrence wins.
fn compile_order(filter: &OrFilter, paths: &BTreeMap<Path, FieldType>) -> Vec<OrderTerm> {
    let mut keyed: BTreeMap<(i32, String), (Path, SortKey)> = BTreeMap::new();
    for filter_path in filter.active_paths() {
        if let Some(sort) = filter_path.sort {
            keyed
                .entry((sort.priority, filter_path.path.flatten()))
                .or_insert_with(|| (filter_path.path.clone(), sort));
        }
    }
    let mut order: Vec<OrderTerm> = keyed
        .into_values()
        .filter_map(|(path, sort)| {
            paths.get(&path).map(|field_type| OrderTerm {
                scalar: payload_pivot(&path, field_type),
                direction: sort.direction,
            })
        })
        .collect();
    for column in [VarColumn::RequestedAt, VarColumn::UpdatedAt, VarColumn::Id] {
        order.push(OrderTerm {
            scalar: Scalar::Root(column),
            direction: SortDirection::Desc,
        });
    }
    order
}
