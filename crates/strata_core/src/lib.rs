pub mod api;
pub mod broker;
pub mod change;
pub mod clock;
pub mod entity;
pub mod error;
pub mod expr;
pub mod filter;
pub mod ids;
pub mod image;
pub mod path;
pub mod registry;
pub mod schema;
pub mod value;

pub use api::*;
pub use broker::*;
pub use change::*;
pub use clock::*;
pub use entity::*;
pub use error::{StrataError, StrataResult};
pub use expr::*;
pub use filter::*;
pub use ids::*;
pub use image::*;
pub use path::*;
pub use registry::*;
pub use schema::*;
pub use value::*;
