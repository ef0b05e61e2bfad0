//! The read-only gate a candidate document must pass before commit.

use duet_core::ErrorKind;
use duet_core::error::{StructureError, ValidationError};

use crate::store::{DocumentLayout, SourceDocument};

/// Result of [`Validator::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub error: Option<ValidationError>,
}

impl ValidationOutcome {
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ValidationError::kind)
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Checks structure, then kernel syntax. Never mutates and never runs code.
#[derive(Debug, Clone)]
pub struct Validator {
    layout: DocumentLayout,
}

impl Validator {
    pub fn new(layout: DocumentLayout) -> Self {
        Self { layout }
    }

    pub fn check(&self, candidate: &str) -> ValidationOutcome {
        match self.validate(candidate) {
            Ok(_) => ValidationOutcome {
                ok: true,
                error: None,
            },
            Err(e) => ValidationOutcome {
                ok: false,
                error: Some(e),
            },
        }
    }

    /// Like [`check`](Self::check), but hands back the split document.
    pub fn validate(&self, candidate: &str) -> Result<SourceDocument, ValidationError> {
        let doc = self.layout.split(candidate)?;
        self.check_annotation_lines(&doc)?;
        duet_kernel::parse(doc.kernel_text()).map_err(ValidationError::Syntax)?;
        Ok(doc)
    }

    fn check_annotation_lines(&self, doc: &SourceDocument) -> Result<(), StructureError> {
        let first_line = doc.separator_line() + 1;
        for (i, line) in doc.annotation_text().lines().enumerate() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with(self.layout.comment_prefix.as_str()) {
                return Err(StructureError::UncommentedAnnotation {
                    line: first_line + i,
                });
            }
        }
        Ok(())
    }
}
