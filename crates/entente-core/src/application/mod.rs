//! Application service layer
//!
//! Builds the domain services over the SQLite repositories and the
//! configured providers, giving front ends one entry point.

mod context;

pub use context::AppContext;
