use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Id;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructChanges {
    pub created: BTreeSet<Id>,
    pub updated: BTreeSet<Id>,
    pub removed: BTreeSet<Id>,
}

impl StructChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Per entity type, the ids a logical write created, updated or removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, StructChanges>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An id created in this change set is never also reported as updated.
    pub fn record_created(&mut self, struct_name: &str, id: Id) {
        let entry = self.entry(struct_name);
        entry.updated.remove(&id);
        entry.created.insert(id);
    }

    pub fn record_updated(&mut self, struct_name: &str, id: Id) {
        let entry = self.entry(struct_name);
        if !entry.created.contains(&id) {
            entry.updated.insert(id);
        }
    }

    pub fn record_removed(&mut self, struct_name: &str, id: Id) {
        let entry = self.entry(struct_name);
        entry.created.remove(&id);
        entry.updated.remove(&id);
        entry.removed.insert(id);
    }

    pub fn merge(&mut self, other: ChangeSet) {
        for (struct_name, changes) in other.0 {
            for id in changes.created {
                self.record_created(&struct_name, id);
            }
            for id in changes.updated {
                self.record_updated(&struct_name, id);
            }
            for id in changes.removed {
                self.record_removed(&struct_name, id);
            }
        }
    }

    pub fn get(&self, struct_name: &str) -> Option<&StructChanges> {
        self.0.get(struct_name).filter(|changes| !changes.is_empty())
    }

    pub fn touches(&self, struct_name: &str) -> bool {
        self.get(struct_name).is_some()
    }

    pub fn structs(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, changes)| !changes.is_empty())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(StructChanges::is_empty)
    }

    fn entry(&mut self, struct_name: &str) -> &mut StructChanges {
        self.0.entry(struct_name.to_string()).or_default()
    }
}
