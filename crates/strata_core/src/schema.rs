use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Expr, FieldType, Path, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            default: None,
        }
    }

    /// Value used when the field is unset: the declared default, else the
    /// zero value of its kind.
    pub fn fallback(&self) -> Option<Value> {
        self.default
            .clone()
            .or_else(|| self.field_type.zero_value())
    }
}

/// Composite key: the struct may hold at most one entity per combination of
/// values at these paths.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub paths: Vec<Path>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldAccess {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

/// Which relationship path owns read/write access to which fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub ownership: BTreeMap<Path, FieldAccess>,
    #[serde(default)]
    pub public: Vec<String>,
}

impl Permissions {
    pub fn readable_by(&self, owner: &Path) -> Vec<&str> {
        self.ownership
            .get(owner)
            .map(|access| access.read.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn writable_by(&self, owner: &Path) -> Vec<&str> {
        self.ownership
            .get(owner)
            .map(|access| access.write.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_public(&self, field: &str) -> bool {
        self.public.iter().any(|name| name == field)
    }

    pub fn can_read(&self, owner: &Path, field: &str) -> bool {
        self.is_public(field) || self.readable_by(owner).contains(&field)
    }

    pub fn can_write(&self, owner: &Path, field: &str) -> bool {
        self.writable_by(owner).contains(&field)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    AfterCreation,
    AfterUpdate,
    BeforeUpdate,
    BeforeDeletion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerEffect {
    pub target: Path,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerDef {
    pub events: Vec<TriggerEvent>,
    pub monitor: Vec<Path>,
    pub effects: Vec<TriggerEffect>,
}

impl TriggerDef {
    pub fn new(events: Vec<TriggerEvent>, monitor: Vec<Path>) -> Self {
        Self {
            events,
            monitor,
            effects: Vec::new(),
        }
    }

    pub fn effect(mut self, target: impl Into<Path>, expr: Expr) -> Self {
        self.effects.push(TriggerEffect {
            target: target.into(),
            expr,
        });
        self
    }

    pub fn fires_on(&self, event: TriggerEvent) -> bool {
        self.events.contains(&event)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckDef {
    pub field: String,
    pub message: String,
    pub expr: Expr,
}

/// Immutable metadata of one entity type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: BTreeMap<String, FieldDef>,
    #[serde(default)]
    pub unique: Vec<UniqueConstraint>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub triggers: BTreeMap<String, TriggerDef>,
    #[serde(default)]
    pub checks: BTreeMap<String, CheckDef>,
}

impl StructDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            unique: Vec::new(),
            permissions: Permissions::default(),
            triggers: BTreeMap::new(),
            checks: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), FieldDef::new(field_type));
        self
    }

    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        default: impl Into<Value>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldDef {
                field_type,
                default: Some(default.into()),
            },
        );
        self
    }

    pub fn unique(mut self, name: impl Into<String>, paths: Vec<Path>) -> Self {
        self.unique.push(UniqueConstraint {
            name: name.into(),
            paths,
        });
        self
    }

    pub fn trigger(mut self, name: impl Into<String>, trigger: TriggerDef) -> Self {
        self.triggers.insert(name.into(), trigger);
        self
    }

    pub fn check(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
        expr: Expr,
    ) -> Self {
        self.checks.insert(
            name.into(),
            CheckDef {
                field: field.into(),
                message: message.into(),
                expr,
            },
        );
        self
    }

    pub fn owned_by(mut self, owner: impl Into<Path>, access: FieldAccess) -> Self {
        self.permissions.ownership.insert(owner.into(), access);
        self
    }

    pub fn public(mut self, fields: &[&str]) -> Self {
        self.permissions
            .public
            .extend(fields.iter().map(|field| field.to_string()));
        self
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn reference_fields(&self) -> impl Iterator<Item = (&String, &str)> {
        self.fields
            .iter()
            .filter_map(|(name, def)| def.field_type.target().map(|target| (name, target)))
    }
}
