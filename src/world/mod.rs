pub mod position;
pub mod registry;
pub mod universe;
