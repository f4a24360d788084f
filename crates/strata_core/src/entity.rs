use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EntityRef, Id, LevelId, Path, Timestamp, Value};

/// Bookkeeping columns of the effective Var row, filled in on reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub level: LevelId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub requested_at: Timestamp,
}

/// One entity instance. On writes `values` holds only the fields being
/// written; on reads it holds every stored field plus requested nested paths.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub struct_name: String,
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EntityMeta>,
}

fn default_active() -> bool {
    true
}

impl Entity {
    pub fn new(struct_name: impl Into<String>) -> Self {
        Self {
            struct_name: struct_name.into(),
            id: None,
            active: true,
            values: BTreeMap::new(),
            meta: None,
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    pub fn nested(&self, field: &str) -> Option<&Entity> {
        self.values.get(field).and_then(Value::as_entity)
    }

    /// Follows `path` through nested entities. Stops with `None` at the first
    /// hop that is unset or only a bare reference.
    pub fn lookup(&self, path: &Path) -> Option<&Value> {
        let segments = path.segments();
        let (leaf, hops) = segments.split_last()?;
        let mut current = self;
        for hop in hops {
            current = current.nested(hop)?;
        }
        current.values.get(leaf)
    }

    pub fn entity_ref(&self) -> Option<EntityRef> {
        self.id
            .map(|id| EntityRef::new(self.struct_name.clone(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::Entity;
    use crate::{EntityRef, Id, Path, Value};

    #[test]
    fn lookup_walks_nested_entities() {
        let owner = Entity::new("User").with_id(Id(4)).set("mobile", "555");
        let alliance = Entity::new("Alliance").set("owner", owner).set("name", "north");
        let product = Entity::new("Product").set("alliance", alliance);

        assert_eq!(
            product.lookup(&Path::parse("alliance.owner.mobile")),
            Some(&Value::Text("555".to_string()))
        );
        assert_eq!(
            product.lookup(&Path::parse("alliance.name")),
            Some(&Value::Text("north".to_string()))
        );
        assert_eq!(product.lookup(&Path::parse("alliance.missing.name")), None);
    }

    #[test]
    fn bare_references_stop_lookup() {
        let entity = Entity::new("Product").set("alliance", EntityRef::new("Alliance", Id(1)));
        assert_eq!(entity.lookup(&Path::parse("alliance.name")), None);
        assert!(entity.lookup(&Path::parse("alliance")).is_some());
    }

    #[test]
    fn deserializes_with_defaults() {
        let entity: Entity =
            serde_json::from_str(r#"{"struct_name":"Test","values":{"u32":{"integer":2}}}"#)
                .expect("decode");
        assert!(entity.active);
        assert_eq!(entity.id, None);
        assert_eq!(entity.get("u32"), Some(&Value::Integer(2)));
    }
}
