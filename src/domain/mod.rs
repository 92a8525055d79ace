//! Domain layer types and invariants.

pub mod builder;
pub mod document;
pub mod error;
pub mod migrate;
pub mod params;
