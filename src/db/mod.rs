//! Database module for StatusWatch.
//!
//! Provides SQLite storage for probe samples and incidents.

mod models;
mod store;

pub use models::*;
pub use store::*;
