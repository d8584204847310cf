pub mod engine;
pub mod evalengine;
pub mod planner;
pub mod vschema;

mod builder;
mod jointab;
mod symtab;
#[cfg(test)]
mod tests;

pub use engine::Primitive;
pub use planner::Planner;
pub use vschema::{StaticVSchema, VSchema};
