pub mod core {
    pub use strata_core::*;
}

pub mod store {
    pub use strata_store::*;
}

mod strata;

pub use strata::Strata;
pub use strata_core::{
    ChangeSet, Entity, EntityRef, Filter, FilterPath, Id, LevelId, OrFilter, Path, Predicate,
    SchemaRegistry, StrataError, StrataResult, SubscriptionId, Value,
};
