use sea_orm::sea_query::Value as SeaValue;

use strata_core::{FieldType, LevelId, Path, SortDirection, StorageColumn};

/// Columns of a Var row that can be projected or compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarColumn {
    Id,
    StructName,
    Active,
    Level,
    CreatedAt,
    UpdatedAt,
    RequestedAt,
}

impl VarColumn {
    pub const HOP_COLUMNS: [VarColumn; 7] = [
        VarColumn::Id,
        VarColumn::StructName,
        VarColumn::Active,
        VarColumn::Level,
        VarColumn::CreatedAt,
        VarColumn::UpdatedAt,
        VarColumn::RequestedAt,
    ];

    pub const ROOT_COLUMNS: [VarColumn; 6] = [
        VarColumn::Id,
        VarColumn::Active,
        VarColumn::Level,
        VarColumn::CreatedAt,
        VarColumn::UpdatedAt,
        VarColumn::RequestedAt,
    ];

    /// Suffix used in result column aliases, e.g. `$id`.
    pub fn marker(self) -> &'static str {
        match self {
            VarColumn::Id => "$id",
            VarColumn::StructName => "$struct",
            VarColumn::Active => "$active",
            VarColumn::Level => "$level",
            VarColumn::CreatedAt => "$created_at",
            VarColumn::UpdatedAt => "$updated_at",
            VarColumn::RequestedAt => "$requested_at",
        }
    }
}

/// Where a pivoted value comes from. `segments` address the Val rows of
/// each hop; the value is read from the last Val (payload) or from the Var
/// reached through it (hop metadata).
#[derive(Clone, Debug, PartialEq)]
pub enum PivotSource {
    Payload(StorageColumn),
    HopVar(VarColumn),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pivot {
    pub segments: Vec<String>,
    pub source: PivotSource,
}

/// A per-entity scalar: either a column of the root Var or an aggregate
/// pivot over the joined field rows.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Root(VarColumn),
    Pivot(Pivot),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decode {
    Root(VarColumn),
    Field { path: Path, field_type: FieldType },
    Hop { prefix: Path, column: VarColumn },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub alias: String,
    pub scalar: Scalar,
    pub decode: Decode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    Like,
    Glob,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Scalar(Scalar),
    Bind(SeaValue),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Compare {
        lhs: Scalar,
        op: CompareOp,
        rhs: Term,
    },
    Between {
        lhs: Scalar,
        low: Term,
        high: Term,
        negated: bool,
    },
    /// `search` is the raw whitespace-separated search text.
    Pattern {
        lhs: Scalar,
        kind: PatternKind,
        search: String,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Join {
    /// Field rows of the Var at `depth`, optionally restricted by name.
    Val {
        depth: usize,
        fields: Option<Vec<String>>,
    },
    /// Var at `depth` reached through the reference payloads of the Val at
    /// `depth - 1` whose field name is one of `via_fields`.
    Var { depth: usize, via_fields: Vec<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderTerm {
    pub scalar: Scalar,
    pub direction: SortDirection,
}

/// Structured form of one entity query, rendered to SQL as a last step.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    pub root_struct: String,
    pub level: LevelId,
    pub active: Option<bool>,
    pub joins: Vec<Join>,
    pub columns: Vec<Column>,
    pub having: Option<Condition>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryPlan {
    /// Number of Val self-joins, i.e. the deepest path length.
    pub fn join_count(&self) -> usize {
        self.joins
            .iter()
            .filter(|join| matches!(join, Join::Val { .. }))
            .count()
    }

    pub fn column(&self, alias: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.alias == alias)
    }
}

pub fn hop_alias(prefix: &Path, column: VarColumn) -> String {
    format!("{}.{}", prefix.flatten(), column.marker())
}
