//! Domain layer
//!
//! The knowledge graph model, conflict detection, resolution, merging and
//! quality scoring. Storage and model providers are reached only through
//! the traits defined here.

pub mod access;
pub mod conflict;
pub mod knowledge;
pub mod locking;
pub mod merge;
pub mod providers;
pub mod quality;
pub mod resolution;
pub mod similarity;
