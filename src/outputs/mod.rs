pub mod realizer;

pub use realizer::realize;
