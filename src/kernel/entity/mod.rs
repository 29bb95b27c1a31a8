pub mod extractor;
pub mod gazetteer;
mod temporal;
pub mod types;

pub use extractor::EntityExtractor;
pub use gazetteer::{Gazetteer, GazetteerEntry};
pub use types::{Entity, EntityKind, EntitySource, EntityValue, TravelMode};
