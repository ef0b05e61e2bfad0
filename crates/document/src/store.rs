//! The committed document and the kernel/annotation split.

use std::sync::Arc;

use chrono::Utc;
use duet_core::error::StructureError;
use duet_core::{DomainEvent, EventBus};
use tracing::debug;

pub const DEFAULT_SEPARATOR: &str = "# === CONVERSATION ===";
pub const DEFAULT_COMMENT_PREFIX: &str = "#";

/// How a document is laid out: the separator line between kernel and
/// annotations, and the token every annotation line starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    pub separator: String,
    pub comment_prefix: String,
}

impl Default for DocumentLayout {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR, DEFAULT_COMMENT_PREFIX)
    }
}

impl DocumentLayout {
    pub fn new(separator: impl Into<String>, comment_prefix: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            comment_prefix: comment_prefix.into(),
        }
    }

    /// Split `text` around its separator line.
    ///
    /// The separator must occupy a whole line (a trailing `\r` is ignored)
    /// and appear exactly once. The kernel may be empty.
    pub fn split(&self, text: &str) -> Result<SourceDocument, StructureError> {
        let mut found: Vec<(usize, usize)> = Vec::new();
        let mut offset = 0;

        for raw in text.split_inclusive('\n') {
            let line = raw.strip_suffix('\n').unwrap_or(raw);
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line == self.separator {
                found.push((offset, offset + raw.len()));
            }
            offset += raw.len();
        }

        match found.as_slice() {
            [] => Err(StructureError::MissingSeparator),
            [(start, end)] => Ok(SourceDocument {
                text: text.to_string(),
                kernel_end: start.saturating_sub(1),
                separator_offset: *start,
                annotation_start: *end,
            }),
            many => Err(StructureError::DuplicateSeparator { count: many.len() }),
        }
    }

    /// Join a kernel and an annotation region into full document text.
    pub fn compose(&self, kernel: &str, annotation: &str) -> String {
        if kernel.is_empty() {
            format!("{}\n{annotation}", self.separator)
        } else {
            format!("{kernel}\n{}\n{annotation}", self.separator)
        }
    }

    /// A fresh document with an empty kernel and no annotations.
    pub fn blank(&self) -> String {
        self.compose("", "")
    }
}

/// A full document text known to contain exactly one separator line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    text: String,
    kernel_end: usize,
    separator_offset: usize,
    annotation_start: usize,
}

impl SourceDocument {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Everything before the separator line, minus the newline ending the
    /// last kernel line.
    pub fn kernel_text(&self) -> &str {
        &self.text[..self.kernel_end]
    }

    /// Everything after the separator line.
    pub fn annotation_text(&self) -> &str {
        &self.text[self.annotation_start..]
    }

    /// Byte offset where the separator line starts.
    pub fn separator_offset(&self) -> usize {
        self.separator_offset
    }

    /// Line number (1-based) of the separator.
    pub fn separator_line(&self) -> usize {
        self.text[..self.separator_offset].matches('\n').count() + 1
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// What a commit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    /// Whether the kernel region differs from the previous document
    pub kernel_changed: bool,
}

/// Holds the single authoritative document.
///
/// The store checks structure only. Callers validate content before
/// committing.
pub struct DocumentStore {
    layout: DocumentLayout,
    current: SourceDocument,
    events: Option<Arc<EventBus>>,
}

impl DocumentStore {
    pub fn open(layout: DocumentLayout, text: impl Into<String>) -> Result<Self, StructureError> {
        let current = layout.split(&text.into())?;
        Ok(Self {
            layout,
            current,
            events: None,
        })
    }

    /// Publish [`DomainEvent::DocumentCommitted`] on `bus` after each commit.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    pub fn document(&self) -> &SourceDocument {
        &self.current
    }

    pub fn text(&self) -> &str {
        self.current.text()
    }

    /// Replace the stored document. Either the whole text is stored or,
    /// on a structure error, nothing changes.
    pub fn commit(&mut self, text: impl Into<String>) -> Result<CommitSummary, StructureError> {
        let next = self.layout.split(&text.into())?;
        let kernel_changed = next.kernel_text() != self.current.kernel_text();
        self.current = next;

        debug!(kernel_changed, bytes = self.current.text().len(), "Document committed");
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::DocumentCommitted {
                text: self.current.text().to_string(),
                kernel_changed,
                timestamp: Utc::now(),
            });
        }
        Ok(CommitSummary { kernel_changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: &str = "# === SEP ===";

    fn layout() -> DocumentLayout {
        DocumentLayout::new(SEP, "#")
    }

    #[test]
    fn split_regions() {
        let doc = layout()
            .split("def f():\n    return 1\n# === SEP ===\n# hello\n")
            .unwrap();
        assert_eq!(doc.kernel_text(), "def f():\n    return 1");
        assert_eq!(doc.annotation_text(), "# hello\n");
        assert_eq!(doc.separator_line(), 3);
    }

    #[test]
    fn empty_kernel_is_allowed() {
        let doc = layout().split("# === SEP ===\n").unwrap();
        assert_eq!(doc.kernel_text(), "");
        assert_eq!(doc.annotation_text(), "");
        assert_eq!(doc.separator_offset(), 0);
    }

    #[test]
    fn separator_without_trailing_newline() {
        let doc = layout().split("x = 1\n# === SEP ===").unwrap();
        assert_eq!(doc.kernel_text(), "x = 1");
        assert_eq!(doc.annotation_text(), "");
    }

    #[test]
    fn crlf_separator_line_counts() {
        let doc = layout().split("x = 1\r\n# === SEP ===\r\n# note\r\n").unwrap();
        assert_eq!(doc.annotation_text(), "# note\r\n");
    }

    #[test]
    fn missing_separator() {
        assert_eq!(
            layout().split("x = 1\n").unwrap_err(),
            StructureError::MissingSeparator
        );
    }

    #[test]
    fn separator_must_be_whole_line() {
        let err = layout().split("x = 1  # === SEP ===\n").unwrap_err();
        assert_eq!(err, StructureError::MissingSeparator);
    }

    #[test]
    fn duplicate_separator() {
        let err = layout()
            .split("# === SEP ===\nx = 1\n# === SEP ===\n")
            .unwrap_err();
        assert_eq!(err, StructureError::DuplicateSeparator { count: 2 });
    }

    #[test]
    fn compose_inverts_split() {
        let layout = layout();
        let text = layout.compose("x = 1", "# [human] hi\n");
        let doc = layout.split(&text).unwrap();
        assert_eq!(doc.kernel_text(), "x = 1");
        assert_eq!(doc.annotation_text(), "# [human] hi\n");
        assert_eq!(layout.split(&layout.blank()).unwrap().kernel_text(), "");
    }

    #[test]
    fn commit_reports_kernel_change() {
        let mut store = DocumentStore::open(layout(), "x = 1\n# === SEP ===\n").unwrap();

        let summary = store.commit("x = 1\n# === SEP ===\n# note\n").unwrap();
        assert!(!summary.kernel_changed);

        let summary = store.commit("x = 2\n# === SEP ===\n# note\n").unwrap();
        assert!(summary.kernel_changed);
        assert_eq!(store.document().kernel_text(), "x = 2");
    }

    #[test]
    fn failed_commit_keeps_previous_document() {
        let mut store = DocumentStore::open(layout(), "x = 1\n# === SEP ===\n").unwrap();
        assert!(store.commit("x = 2\n").is_err());
        assert_eq!(store.text(), "x = 1\n# === SEP ===\n");
    }

    #[tokio::test]
    async fn commit_publishes_event() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let mut store = DocumentStore::open(layout(), "# === SEP ===\n")
            .unwrap()
            .with_events(Arc::clone(&bus));

        store.commit("y = 3\n# === SEP ===\n").unwrap();

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::DocumentCommitted { text, kernel_changed, .. } => {
                assert!(text.starts_with("y = 3"));
                assert!(*kernel_changed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
