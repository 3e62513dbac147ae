//! Executors: PostgreSQL (safe SQL builder, identifiers from config only, values as parameters)
//! and an in-memory evaluator.

mod builder;
pub mod memory;
pub mod params;
pub mod pg;
pub use builder::*;
pub use memory::MemoryExecutor;
pub use params::*;
pub use pg::PgExecutor;
