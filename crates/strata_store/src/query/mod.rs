mod compile;
mod materialize;
pub mod plan;
mod render;

pub use compile::compile;
pub(crate) use compile::{Scope, compile_scoped};
pub use materialize::materialize;
pub use plan::QueryPlan;
pub use render::{Dialect, RenderedQuery, render};
