use serde::{Deserialize, Serialize};

use crate::{Path, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    Glob,
    Between,
    NotBetween,
}

/// Right-hand side of a predicate: a literal or another path of the same
/// root entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(Value),
    Path(Path),
}

impl Operand {
    pub fn value(value: impl Into<Value>) -> Self {
        Operand::Value(value.into())
    }

    pub fn path(path: impl Into<Path>) -> Self {
        Operand::Path(path.into())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(Operand),
    Ne(Operand),
    Gt(Operand),
    Ge(Operand),
    Lt(Operand),
    Le(Operand),
    /// Whitespace-tokenized search text.
    Like(String),
    Glob(String),
    Between(Operand, Operand),
    NotBetween(Operand, Operand),
}

impl Predicate {
    pub fn operator(&self) -> Operator {
        match self {
            Predicate::Eq(_) => Operator::Eq,
            Predicate::Ne(_) => Operator::Ne,
            Predicate::Gt(_) => Operator::Gt,
            Predicate::Ge(_) => Operator::Ge,
            Predicate::Lt(_) => Operator::Lt,
            Predicate::Le(_) => Operator::Le,
            Predicate::Like(_) => Operator::Like,
            Predicate::Glob(_) => Operator::Glob,
            Predicate::Between(..) => Operator::Between,
            Predicate::NotBetween(..) => Operator::NotBetween,
        }
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Predicate::Eq(operand)
            | Predicate::Ne(operand)
            | Predicate::Gt(operand)
            | Predicate::Ge(operand)
            | Predicate::Lt(operand)
            | Predicate::Le(operand) => vec![operand],
            Predicate::Like(_) | Predicate::Glob(_) => Vec::new(),
            Predicate::Between(low, high) | Predicate::NotBetween(low, high) => vec![low, high],
        }
    }

    pub fn eq(value: impl Into<Value>) -> Self {
        Predicate::Eq(Operand::value(value))
    }

    pub fn between(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Predicate::Between(Operand::value(low), Operand::value(high))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub priority: i32,
    pub direction: SortDirection,
}

/// One typed predicate with optional ordering over a path. A path without a
/// predicate is still projected into the results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterPath {
    pub label: String,
    pub path: Path,
    #[serde(default)]
    pub predicate: Option<Predicate>,
    #[serde(default)]
    pub sort: Option<SortKey>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl FilterPath {
    pub fn new(path: impl Into<Path>) -> Self {
        let path = path.into();
        Self {
            label: path.flatten(),
            path,
            predicate: None,
            sort: None,
            active: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn matching(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn sorted(mut self, priority: i32, direction: SortDirection) -> Self {
        self.sort = Some(SortKey {
            priority,
            direction,
        });
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Conjunction of scalar predicates on the root entity and active paths.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub id: Option<Predicate>,
    #[serde(default)]
    pub created_at: Option<Predicate>,
    #[serde(default)]
    pub updated_at: Option<Predicate>,
    #[serde(default)]
    pub paths: Vec<FilterPath>,
}

pub type AndFilter = Filter;

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: FilterPath) -> Self {
        self.paths.push(path);
        self
    }

    pub fn with_id(mut self, predicate: Predicate) -> Self {
        self.id = Some(predicate);
        self
    }

    pub fn with_created_at(mut self, predicate: Predicate) -> Self {
        self.created_at = Some(predicate);
        self
    }

    pub fn with_updated_at(mut self, predicate: Predicate) -> Self {
        self.updated_at = Some(predicate);
        self
    }

    pub fn active_paths(&self) -> impl Iterator<Item = &FilterPath> {
        self.paths.iter().filter(|path| path.active)
    }
}

/// Disjunction of filters. No filters means no restriction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrFilter {
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl OrFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn any_of(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn or(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn active_paths(&self) -> impl Iterator<Item = &FilterPath> {
        self.filters.iter().flat_map(Filter::active_paths)
    }

    /// Self-joins needed to reach the deepest active path, counting the leaf.
    pub fn join_count(&self) -> usize {
        self.active_paths()
            .map(|path| path.path.len())
            .max()
            .unwrap_or(0)
    }
}

impl From<Filter> for OrFilter {
    fn from(filter: Filter) -> Self {
        Self {
            filters: vec![filter],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, FilterPath, OrFilter, Predicate, SortDirection};

    #[test]
    fn join_count_tracks_deepest_active_path() {
        let filter = OrFilter::from(
            Filter::new()
                .with_path(FilterPath::new("str").matching(Predicate::eq("a")))
                .with_path(FilterPath::new("alliance.owner.mobile").inactive()),
        )
        .or(Filter::new().with_path(FilterPath::new("alliance.name")));
        assert_eq!(filter.join_count(), 2);
        assert_eq!(OrFilter::all().join_count(), 0);
    }

    #[test]
    fn filter_path_defaults_label_to_path() {
        let path = FilterPath::new("alliance.name").sorted(1, SortDirection::Desc);
        assert_eq!(path.label, "alliance.name");
        assert!(path.active);
        assert_eq!(path.sort.map(|sort| sort.priority), Some(1));
    }

    #[test]
    fn decodes_filter_tree_from_json() {
        let filter: OrFilter = serde_json::from_str(
            r#"{"filters":[{"paths":[{"label":"s","path":"str","predicate":{"like":"STR STR"}}]}]}"#,
        )
        .expect("decode");
        let path = &filter.filters[0].paths[0];
        assert_eq!(path.predicate, Some(Predicate::Like("STR STR".to_string())));
        assert!(path.active);
    }
}
