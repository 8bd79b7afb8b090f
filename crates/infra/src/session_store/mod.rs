//! Session store adapters.
//!
//! Both implementations provide the per-entry compare-and-set the
//! `SessionStore` contract requires; neither takes a store-wide lock on the
//! request path.

mod in_memory;
mod postgres;

pub use in_memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
