//! HTTP handlers for resource reads and writes.

pub mod entity;
pub use entity::*;
