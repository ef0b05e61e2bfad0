//! Transactional exact-match patching.

use duet_core::EditBatch;
use duet_core::error::PatchError;
use tracing::debug;

const PREVIEW_CHARS: usize = 30;

/// Applies edit batches to text snapshots.
///
/// Each edit runs against the result of the previous one, so later edits
/// may target text earlier edits introduced. The base text is borrowed and
/// never modified: on failure the caller still holds it untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchEngine;

impl PatchEngine {
    pub fn apply(batch: &EditBatch, base: &str) -> Result<String, PatchError> {
        let mut text = base.to_string();

        for (index, edit) in batch.iter().enumerate() {
            // An empty needle matches everywhere and identifies nothing
            let count = if edit.old.is_empty() {
                0
            } else {
                text.matches(edit.old.as_str()).count()
            };

            match count {
                0 => {
                    debug!(index, "Edit target not found");
                    return Err(PatchError::NotFound {
                        index,
                        preview: preview(&edit.old),
                    });
                }
                1 => text = text.replacen(edit.old.as_str(), &edit.new, 1),
                count => {
                    debug!(index, count, "Edit target ambiguous");
                    return Err(PatchError::Ambiguous {
                        index,
                        count,
                        preview: preview(&edit.old),
                    });
                }
            }
        }

        Ok(text)
    }
}

fn preview(old: &str) -> String {
    let mut chars = old.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
