use sea_orm::DatabaseBackend;
use sea_orm::sea_query::{Value as SeaValue, Values};

use strata_core::{SortDirection, StorageColumn, glob_pattern, like_pattern};

use super::plan::{
    CompareOp, Condition, Join, PatternKind, Pivot, PivotSource, QueryPlan, Scalar, Term,
    VarColumn,
};
use crate::db::names;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn from_backend(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::Postgres => Dialect::Postgres,
            _ => Dialect::Sqlite,
        }
    }
}

/// SQL text plus its positional binds.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub values: Values,
}

struct Writer {
    dialect: Dialect,
    sql: String,
    binds: Vec<SeaValue>,
}

impl Writer {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: SeaValue) {
        self.binds.push(value);
        match self.dialect {
            Dialect::Sqlite => self.sql.push('?'),
            Dialect::Postgres => {
                let placeholder = format!("${}", self.binds.len());
                self.sql.push_str(&placeholder);
            }
        }
    }

    fn level(&mut self, level: i64) {
        self.bind(level.into());
    }
}

fn var_alias(depth: usize) -> String {
    format!("v{depth}")
}

fn val_alias(depth: usize) -> String {
    format!("a{depth}")
}

fn var_column(column: VarColumn) -> &'static str {
    match column {
        VarColumn::Id => names::ID,
        VarColumn::StructName => names::STRUCT_NAME,
        VarColumn::Active => names::ACTIVE,
        VarColumn::Level => names::LEVEL,
        VarColumn::CreatedAt => names::CREATED_AT,
        VarColumn::UpdatedAt => names::UPDATED_AT,
        VarColumn::RequestedAt => names::REQUESTED_AT,
    }
}

fn payload_column(column: StorageColumn) -> &'static str {
    match column {
        StorageColumn::Text => names::VALUE_TEXT,
        StorageColumn::Integer => names::VALUE_INTEGER,
        StorageColumn::Real => names::VALUE_REAL,
    }
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_ident(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn name_list(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| quote_literal(field))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render(plan: &QueryPlan, dialect: Dialect) -> RenderedQuery {
    let mut w = Writer {
        dialect,
        sql: String::new(),
        binds: Vec::new(),
    };
    let level = plan.level.as_i64();

    w.push("SELECT ");
    for (index, column) in plan.columns.iter().enumerate() {
        if index > 0 {
            w.push(", ");
        }
        render_scalar(&mut w, &column.scalar);
        w.push(" AS ");
        w.push(&quote_ident(&column.alias));
    }

    w.push(&format!(" FROM {} v1", names::VARS));
    for join in &plan.joins {
        match join {
            Join::Val { depth, fields } => {
                let a = val_alias(*depth);
                let v = var_alias(*depth);
                w.push(&format!(
                    " LEFT JOIN {vals} {a} ON {a}.{sn} = {v}.{sn} AND {a}.{vid} = {v}.{id}",
                    vals = names::VALS,
                    sn = names::STRUCT_NAME,
                    vid = names::VARIABLE_ID,
                    id = names::ID,
                ));
                if let Some(fields) = fields {
                    w.push(&format!(
                        " AND {a}.{fname} IN ({})",
                        name_list(fields),
                        fname = names::FIELD_NAME
                    ));
                }
                w.push(&format!(" AND {a}.{} = ", names::LEVEL));
                render_val_visibility(&mut w, &a, level);
            }
            Join::Var { depth, via_fields } => {
                let v = var_alias(*depth);
                let a = val_alias(depth - 1);
                w.push(&format!(
                    " LEFT JOIN {vars} {v} ON {v}.{sn} = {a}.{fsn} AND {v}.{id} = {a}.{vi} \
                     AND {a}.{fname} IN ({}) AND {v}.{lvl} = ",
                    name_list(via_fields),
                    vars = names::VARS,
                    sn = names::STRUCT_NAME,
                    fsn = names::FIELD_STRUCT_NAME,
                    id = names::ID,
                    vi = names::VALUE_INTEGER,
                    fname = names::FIELD_NAME,
                    lvl = names::LEVEL,
                ));
                render_var_visibility(&mut w, &v, level);
            }
        }
    }

    w.push(&format!(" WHERE v1.{} = ", names::STRUCT_NAME));
    w.bind(plan.root_struct.clone().into());
    w.push(&format!(" AND v1.{} = ", names::LEVEL));
    render_var_visibility(&mut w, "v1", level);
    if let Some(active) = plan.active {
        w.push(&format!(" AND v1.{} = ", names::ACTIVE));
        w.bind(i64::from(active).into());
    }

    w.push(&format!(" GROUP BY v1.{}", names::ID));

    if let Some(having) = &plan.having {
        w.push(" HAVING ");
        render_condition(&mut w, having);
    }

    if !plan.order.is_empty() {
        w.push(" ORDER BY ");
        for (index, term) in plan.order.iter().enumerate() {
            if index > 0 {
                w.push(", ");
            }
            render_scalar(&mut w, &term.scalar);
            w.push(match term.direction {
                SortDirection::Asc => " ASC",
                SortDirection::Desc => " DESC",
            });
        }
    }

    match (plan.limit, plan.offset, dialect) {
        (Some(limit), offset, _) => {
            w.push(&format!(" LIMIT {limit}"));
            if let Some(offset) = offset {
                w.push(&format!(" OFFSET {offset}"));
            }
        }
        (None, Some(offset), Dialect::Sqlite) => w.push(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, Some(offset), Dialect::Postgres) => w.push(&format!(" OFFSET {offset}")),
        (None, None, _) => {}
    }

    RenderedQuery {
        sql: w.sql,
        values: Values(w.binds),
    }
}

/// Highest active level at or below the read level holding a Var row for
/// the same entity, ignoring rows shadowed by an active tombstone between
/// that row's level and the read level.
fn render_var_visibility(w: &mut Writer, alias: &str, level: i64) {
    w.push(&format!(
        "(SELECT MAX(x.{lvl}) FROM {vars} x JOIN {levels} lx ON lx.{id} = x.{lvl} \
         WHERE x.{sn} = {alias}.{sn} AND x.{id} = {alias}.{id} AND lx.{act} = 1 AND x.{lvl} <= ",
        vars = names::VARS,
        levels = names::LEVELS,
        lvl = names::LEVEL,
        id = names::ID,
        sn = names::STRUCT_NAME,
        act = names::ACTIVE,
    ));
    w.level(level);
    render_not_shadowed(w, "x", names::ID, level);
    w.push(")");
}

/// Same rule per field row.
fn render_val_visibility(w: &mut Writer, alias: &str, level: i64) {
    w.push(&format!(
        "(SELECT MAX(y.{lvl}) FROM {vals} y JOIN {levels} ly ON ly.{id} = y.{lvl} \
         WHERE y.{sn} = {alias}.{sn} AND y.{vid} = {alias}.{vid} AND y.{fname} = {alias}.{fname} \
         AND ly.{act} = 1 AND y.{lvl} <= ",
        vals = names::VALS,
        levels = names::LEVELS,
        lvl = names::LEVEL,
        id = names::ID,
        sn = names::STRUCT_NAME,
        vid = names::VARIABLE_ID,
        fname = names::FIELD_NAME,
        act = names::ACTIVE,
    ));
    w.level(level);
    render_not_shadowed(w, "y", names::VARIABLE_ID, level);
    w.push(")");
}

fn render_not_shadowed(w: &mut Writer, alias: &str, id_column: &str, level: i64) {
    w.push(&format!(
        " AND NOT EXISTS (SELECT 1 FROM {removed} r JOIN {levels} lr ON lr.{id} = r.{lvl} \
         WHERE r.{sn} = {alias}.{sn} AND r.{id} = {alias}.{id_column} AND lr.{act} = 1 \
         AND r.{lvl} >= {alias}.{lvl} AND r.{lvl} <= ",
        removed = names::REMOVED_VARS,
        levels = names::LEVELS,
        id = names::ID,
        lvl = names::LEVEL,
        sn = names::STRUCT_NAME,
        act = names::ACTIVE,
    ));
    w.level(level);
    w.push(")");
}

fn render_scalar(w: &mut Writer, scalar: &Scalar) {
    match scalar {
        Scalar::Root(VarColumn::Id) => w.push(&format!("v1.{}", names::ID)),
        Scalar::Root(column) => w.push(&format!("MAX(v1.{})", var_column(*column))),
        Scalar::Pivot(pivot) => render_pivot(w, pivot),
    }
}

/// `MAX(CASE WHEN a1.field_name || '.' || a2.field_name = 'x.y' THEN ... END)`
fn render_pivot(w: &mut Writer, pivot: &Pivot) {
    let names_expr = pivot
        .segments
        .iter()
        .enumerate()
        .map(|(index, _)| format!("{}.{}", val_alias(index + 1), names::FIELD_NAME))
        .collect::<Vec<_>>()
        .join(" || '.' || ");
    let value = match &pivot.source {
        PivotSource::Payload(column) => {
            format!("{}.{}", val_alias(pivot.segments.len()), payload_column(*column))
        }
        PivotSource::HopVar(column) => {
            format!("{}.{}", var_alias(pivot.segments.len() + 1), var_column(*column))
        }
    };
    w.push(&format!(
        "MAX(CASE WHEN {names_expr} = {} THEN {value} END)",
        quote_literal(&pivot.segments.join("."))
    ));
}

fn render_term(w: &mut Writer, term: &Term) {
    match term {
        Term::Scalar(scalar) => render_scalar(w, scalar),
        Term::Bind(value) => w.bind(value.clone()),
    }
}

fn render_condition(w: &mut Writer, condition: &Condition) {
    match condition {
        Condition::Compare { lhs, op, rhs } => {
            render_scalar(w, lhs);
            w.push(match (op, w.dialect) {
                (CompareOp::Eq, _) => " = ",
                (CompareOp::Ne, Dialect::Sqlite) => " IS NOT ",
                (CompareOp::Ne, Dialect::Postgres) => " IS DISTINCT FROM ",
                (CompareOp::Gt, _) => " > ",
                (CompareOp::Ge, _) => " >= ",
                (CompareOp::Lt, _) => " < ",
                (CompareOp::Le, _) => " <= ",
            });
            render_term(w, rhs);
        }
        Condition::Between {
            lhs,
            low,
            high,
            negated,
        } => {
            render_scalar(w, lhs);
            w.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
            render_term(w, low);
            w.push(" AND ");
            render_term(w, high);
        }
        Condition::Pattern { lhs, kind, search } => {
            render_scalar(w, lhs);
            let (operator, pattern) = match (kind, w.dialect) {
                (PatternKind::Like, Dialect::Sqlite) => (" LIKE ", like_pattern(search)),
                (PatternKind::Glob, Dialect::Sqlite) => (" GLOB ", glob_pattern(search)),
                (PatternKind::Like, Dialect::Postgres) => (" ILIKE ", like_pattern(search)),
                (PatternKind::Glob, Dialect::Postgres) => (" LIKE ", like_pattern(search)),
            };
            w.push(operator);
            w.bind(pattern.into());
        }
        Condition::And(items) | Condition::Or(items) => {
            let joiner = if matches!(condition, Condition::And(_)) {
                " AND "
            } else {
                " OR "
            };
            w.push("(");
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    w.push(joiner);
                }
                render_condition(w, item);
            }
            w.push(")");
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_core::{
        FieldType, Filter, FilterPath, LevelId, Operand, Paging, Predicate, QueryInput,
        SchemaRegistry, StructDef,
    };

    use super::{Dialect, render};
    use crate::query::compile;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new([
            StructDef::new("Alliance").field("name", FieldType::Str),
            StructDef::new("Test")
                .field("str", FieldType::Str)
                .field("u32", FieldType::U32)
                .field("alliance", FieldType::Other("Alliance".to_string())),
        ])
        .expect("registry")
    }

    #[test]
    fn renders_pivots_groups_and_fallback_order() {
        let plan = compile(&registry(), &QueryInput::new("Test")).expect("plan");
        let rendered = render(&plan, Dialect::Sqlite);
        assert!(rendered.sql.starts_with("SELECT v1.id AS \"$id\""));
        assert!(rendered.sql.contains(
            "MAX(CASE WHEN a1.field_name = 'str' THEN a1.value_text END) AS \"str\""
        ));
        assert!(rendered.sql.contains("FROM vars v1 LEFT JOIN vals a1"));
        assert!(rendered.sql.contains("GROUP BY v1.id"));
        assert!(rendered.sql.ends_with(
            "ORDER BY MAX(v1.requested_at) DESC, MAX(v1.updated_at) DESC, v1.id DESC"
        ));
        assert!(!rendered.sql.contains("HAVING"));
        let placeholders = rendered.sql.matches('?').count();
        assert_eq!(placeholders, rendered.values.0.len());
    }

    #[test]
    fn renders_nested_hops_with_concatenated_names() {
        let filter = Filter::new()
            .with_path(FilterPath::new("alliance.name").matching(Predicate::Like("a b".into())));
        let input = QueryInput::new("Test")
            .with_filter(filter)
            .at_level(LevelId(2));
        let plan = compile(&registry(), &input).expect("plan");
        let rendered = render(&plan, Dialect::Sqlite);
        assert!(rendered.sql.contains("LEFT JOIN vars v2 ON v2.struct_name = a1.field_struct_name"));
        assert!(rendered.sql.contains("a1.field_name IN ('alliance')"));
        assert!(rendered.sql.contains(
            "MAX(CASE WHEN a1.field_name || '.' || a2.field_name = 'alliance.name' THEN a2.value_text END)"
        ));
        assert!(rendered.sql.contains(" HAVING MAX(CASE WHEN"));
        assert!(rendered.sql.contains(" LIKE ?"));
        let last = rendered.values.0.last().cloned();
        assert_eq!(last, Some("%a%b%".into()));
    }

    #[test]
    fn postgres_uses_numbered_placeholders_and_null_safe_inequality() {
        let filter = Filter::new()
            .with_path(FilterPath::new("u32").matching(Predicate::Ne(Operand::value(4))))
            .with_path(FilterPath::new("str").matching(Predicate::Glob("x".into())));
        let input = QueryInput::new("Test")
            .with_filter(filter)
            .with_paging(Paging {
                limit: None,
                offset: Some(5),
            });
        let plan = compile(&registry(), &input).expect("plan");
        let pg = render(&plan, Dialect::Postgres);
        assert!(pg.sql.contains("IS DISTINCT FROM $"));
        assert!(pg.sql.contains(" LIKE $"));
        assert!(!pg.sql.contains('?'));
        assert!(pg.sql.ends_with(" OFFSET 5"));
        let count = pg.values.0.len();
        assert!(pg.sql.contains(&format!("${count}")));

        let sqlite = render(&plan, Dialect::Sqlite);
        assert!(sqlite.sql.contains(" IS NOT ?"));
        assert!(sqlite.sql.contains(" GLOB ?"));
        assert!(sqlite.sql.ends_with(" LIMIT -1 OFFSET 5"));
    }
}
