//! Resolution suggestions and outcomes

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::conflict::{ConflictStatus, ResolutionMethod};

/// Method named by a suggestion
///
/// Suggestion providers may also recommend handing the conflict to a
/// person, which is not a resolution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SuggestedMethod {
    Resolve(ResolutionMethod),
    ManualReview,
}

impl SuggestedMethod {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolve(method) => method.as_str(),
            Self::ManualReview => "manual_review",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        if normalized == "manual_review" {
            return Some(Self::ManualReview);
        }
        ResolutionMethod::parse(&normalized).map(Self::Resolve)
    }

    /// Whether a suggestion with this method may be applied automatically
    pub fn is_auto_applicable(&self) -> bool {
        match self {
            Self::Resolve(method) => method.is_auto_applicable(),
            Self::ManualReview => false,
        }
    }

    /// The resolution method, if this is not a hand-off
    pub fn method(&self) -> Option<ResolutionMethod> {
        match self {
            Self::Resolve(method) => Some(*method),
            Self::ManualReview => None,
        }
    }
}

impl fmt::Display for SuggestedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<SuggestedMethod> for String {
    fn from(method: SuggestedMethod) -> Self {
        method.as_str().to_string()
    }
}

impl TryFrom<String> for SuggestedMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown resolution method '{}'", value))
    }
}

/// Where a suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Parsed from a well-formed JSON response
    Ai,
    /// Recovered from an unstructured response by pattern matching
    Extracted,
    /// A deterministic rule
    Rule,
    /// Synthesized because nothing usable came back
    Fallback,
}

/// A candidate resolution with its rationale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    pub resolution_method: SuggestedMethod,
    pub reasoning: String,
    pub confidence: f32,
    #[serde(default)]
    pub actions: Map<String, Value>,
    pub source: SuggestionSource,
}

impl ResolutionSuggestion {
    /// Hand-off suggestion used when nothing usable could be parsed
    pub fn manual_review(reasoning: impl Into<String>) -> Self {
        Self {
            resolution_method: SuggestedMethod::ManualReview,
            reasoning: reasoning.into(),
            confidence: 0.3,
            actions: Map::new(),
            source: SuggestionSource::Fallback,
        }
    }
}

/// How an automatic resolution attempt was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Ai,
    Rule,
    Manual,
    ExpertReview,
}

/// Result of a resolution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub conflict_id: String,
    pub success: bool,
    /// True when the conflict was handed to an expert instead
    #[serde(default)]
    pub assigned_for_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ResolutionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ResolutionPath>,
    pub status: ConflictStatus,
    /// Action payload on success
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
