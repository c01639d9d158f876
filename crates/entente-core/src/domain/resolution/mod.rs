//! Conflict resolution
//!
//! - [`engine`]: the [`ResolutionEngine`] lifecycle operations
//! - [`rules`]: deterministic resolutions that need no model
//! - [`prompt`]: suggestion prompts and tolerant response parsing
//! - [`suggestions`]: suggestion and outcome types

pub mod engine;
pub mod prompt;
pub mod rules;
pub mod suggestions;

pub use engine::{ManualResolution, ResolutionEngine};
pub use prompt::{MAX_SUGGESTIONS, PromptContext, build_user_prompt, parse_suggestions, system_prompt};
pub use rules::{RuleDecision, rule_based_resolution};
pub use suggestions::{
    ResolutionOutcome, ResolutionPath, ResolutionSuggestion, SuggestedMethod, SuggestionSource,
};
