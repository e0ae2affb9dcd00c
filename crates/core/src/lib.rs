pub mod category;
pub mod entity;
pub mod error;
pub mod ids;
pub mod image;
pub mod product;
pub mod query;

pub use category::Category;
pub use entity::{Entity, EntityBody, EntityKind, PersistState, Record};
pub use error::CoreError;
pub use ids::*;
pub use image::{ImageRef, ProductImages};
pub use product::{CategoryRef, Product};
pub use query::{ListParams, SortOrder};
