//! Entity merging and graph mutation actions
//!
//! - [`properties`]: completeness scoring, primary selection, property merge
//! - [`transfer`]: idempotent relationship transfer with edge de-duplication
//! - [`merger`]: the [`EntityMerger`] actions (merge, keep, keep both, create new)
//! - `edits`: relationship deactivation and manual edits

mod edits;
pub mod merger;
pub mod properties;
pub mod transfer;

pub use merger::{ActionPayload, EntityMerger};
pub use properties::{
    DEFAULT_SOURCE_RELIABILITY, MergeStrategy, Primary, completeness_score, merge_properties,
    merged_entity, select_primary,
};
pub use transfer::{TransferSummary, transfer_relationships};
