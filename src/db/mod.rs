//! Embedded SQLite storage for targets, check history and incidents.

mod models;
mod store;

pub use models::*;
pub use store::*;
