//! Infrastructure layer
//!
//! Concrete implementations of the domain repository traits: SQLite for
//! the CLI and an in-memory store for tests and embedding.

pub mod conflict;
pub mod knowledge;
pub mod memory;
