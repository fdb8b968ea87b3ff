//! Database module for PostgreSQL persistence.

mod pool;
mod profiles;
mod records;

pub use pool::*;
pub use profiles::*;
pub use records::*;
