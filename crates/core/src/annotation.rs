//! Annotation turns — the conversation recorded below the separator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Who produced an annotation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The person at the keyboard
    Human,
    /// The reasoning engine
    Collaborator,
    /// The runtime itself (failure reasons, reload notices)
    System,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Human => "human",
            Origin::Collaborator => "collaborator",
            Origin::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Origin::Human),
            "collaborator" => Some(Origin::Collaborator),
            "system" => Some(Origin::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only entry in the annotation region.
///
/// Fields are private: a turn is never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationTurn {
    origin: Origin,
    text: String,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

impl AnnotationTurn {
    pub fn new(origin: Origin, text: impl Into<String>) -> Self {
        Self {
            origin,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Origin::Human, text)
    }

    pub fn collaborator(text: impl Into<String>) -> Self {
        Self::new(Origin::Collaborator, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Origin::System, text)
    }

    /// A system turn explaining why a stage rejected a proposal.
    pub fn failure(kind: ErrorKind, reason: impl std::fmt::Display) -> Self {
        Self::system(format!("{kind}: {reason}"))
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_turn_carries_kind() {
        let turn = AnnotationTurn::failure(ErrorKind::AmbiguousEdit, "edit #0 ambiguous (2x)");
        assert_eq!(turn.origin(), Origin::System);
        assert!(turn.text().starts_with("AmbiguousEdit: "));
    }

    #[test]
    fn origin_roundtrip() {
        for origin in [Origin::Human, Origin::Collaborator, Origin::System] {
            assert_eq!(Origin::parse(origin.as_str()), Some(origin));
        }
        assert_eq!(Origin::parse("robot"), None);
    }
}
