//! Edits, batches, and collaborator proposals.
//!
//! An [`Edit`] is an exact-match find/replace instruction. An [`EditBatch`]
//! is the ordered set of edits one collaborator turn produces; it is applied
//! as a single transaction by the patch engine. A [`Proposal`] is the full
//! structured reply of a collaborator turn: the batch plus a message.

use serde::{Deserialize, Serialize};

/// A single exact-match replacement.
///
/// Against a given text state, `old` must occur exactly once, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edit {
    /// The text to find
    pub old: String,

    /// The replacement text
    pub new: String,
}

impl Edit {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// An ordered sequence of edits from one collaborator turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditBatch {
    edits: Vec<Edit>,
}

impl EditBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edit to the end of the batch.
    pub fn push(&mut self, edit: Edit) {
        self.edits.push(edit);
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Edit> {
        self.edits.iter()
    }
}

impl From<Vec<Edit>> for EditBatch {
    fn from(edits: Vec<Edit>) -> Self {
        Self { edits }
    }
}

impl FromIterator<Edit> for EditBatch {
    fn from_iter<I: IntoIterator<Item = Edit>>(iter: I) -> Self {
        Self {
            edits: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a EditBatch {
    type Item = &'a Edit;
    type IntoIter = std::slice::Iter<'a, Edit>;

    fn into_iter(self) -> Self::IntoIter {
        self.edits.iter()
    }
}

/// The structured reply of one collaborator turn.
///
/// Wire shape: `{ "edits": [ { "old": .., "new": .. } ], "message": .. }`.
/// Both fields are required and no others are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Proposal {
    pub edits: EditBatch,
    pub message: String,
}

impl Proposal {
    pub fn new(edits: impl Into<EditBatch>, message: impl Into<String>) -> Self {
        Self {
            edits: edits.into(),
            message: message.into(),
        }
    }

    /// A turn that only talks and proposes no edits.
    pub fn message_only(message: impl Into<String>) -> Self {
        Self::new(EditBatch::new(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_parses_wire_shape() {
        let proposal: Proposal = serde_json::from_str(
            r#"{"edits": [{"old": "return 1", "new": "return 2"}], "message": "bumped"}"#,
        )
        .unwrap();
        assert_eq!(proposal.edits.len(), 1);
        assert_eq!(proposal.edits.iter().next().unwrap().new, "return 2");
        assert_eq!(proposal.message, "bumped");
    }

    #[test]
    fn proposal_accepts_empty_edits() {
        let proposal: Proposal =
            serde_json::from_str(r#"{"edits": [], "message": "just saying hi"}"#).unwrap();
        assert!(proposal.edits.is_empty());
    }

    #[test]
    fn proposal_requires_both_fields() {
        assert!(serde_json::from_str::<Proposal>(r#"{"message": "no edits field"}"#).is_err());
        assert!(serde_json::from_str::<Proposal>(r#"{"edits": []}"#).is_err());
    }

    #[test]
    fn proposal_rejects_extra_fields() {
        let raw = r#"{"edits": [], "message": "m", "mood": "happy"}"#;
        assert!(serde_json::from_str::<Proposal>(raw).is_err());

        let raw = r#"{"edits": [{"old": "a", "new": "b", "line": 3}], "message": "m"}"#;
        assert!(serde_json::from_str::<Proposal>(raw).is_err());
    }

    #[test]
    fn batch_preserves_order() {
        let batch: EditBatch = vec![Edit::new("a", "b"), Edit::new("b", "c")].into();
        let olds: Vec<&str> = batch.iter().map(|e| e.old.as_str()).collect();
        assert_eq!(olds, vec!["a", "b"]);
    }
}
