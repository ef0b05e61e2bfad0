//! The annotation log: turns below the separator, as data and as text.
//!
//! Rendered form, with `#` as the comment token:
//!
//! ```text
//! # [human] make f return 2
//! #
//! # [collaborator] Done. f now returns 2.
//! # It is reloaded already.
//! ```
//!
//! A bare token line separates turns. Inside a turn a bare token stands for
//! an empty line; the two are told apart by whether a header follows.

use duet_core::{AnnotationTurn, Origin};

use crate::store::DocumentLayout;

/// Ordered, append-only record of annotation turns.
///
/// The log remembers the annotation region as last committed and renders
/// turns appended since then after it, so hand-written text in the region
/// survives byte for byte.
#[derive(Debug, Clone)]
pub struct AnnotationLog {
    prefix: String,
    /// Line no rendered turn may reproduce
    separator: Option<String>,
    committed: String,
    turns: Vec<AnnotationTurn>,
    pending: usize,
}

impl AnnotationLog {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: None,
            committed: String::new(),
            turns: Vec::new(),
            pending: 0,
        }
    }

    /// Rebuild a log from an annotation region.
    pub fn from_region(prefix: impl Into<String>, region: &str) -> Self {
        let mut log = Self::new(prefix);
        log.resync(region);
        log
    }

    /// Rebuild a log for a document laid out as `layout`. Rendered turns
    /// never reproduce its separator line.
    pub fn for_layout(layout: &DocumentLayout, region: &str) -> Self {
        let mut log = Self::from_region(layout.comment_prefix.as_str(), region);
        log.separator = Some(layout.separator.clone());
        log
    }

    pub fn append(&mut self, turn: AnnotationTurn) {
        self.turns.push(turn);
        self.pending += 1;
    }

    pub fn turns(&self) -> &[AnnotationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns appended since the region was last committed.
    pub fn pending(&self) -> &[AnnotationTurn] {
        &self.turns[self.turns.len() - self.pending..]
    }

    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Annotation region text: the committed region plus pending turns.
    pub fn render(&self) -> String {
        if self.pending == 0 {
            return self.committed.clone();
        }

        let mut out = self.committed.trim_end().to_string();
        for turn in self.pending() {
            if !out.is_empty() {
                out.push('\n');
                out.push_str(&self.prefix);
                out.push('\n');
            }
            out.push_str(&render_turn_avoiding(turn, &self.prefix, self.separator.as_deref()));
        }
        out.push('\n');
        out
    }

    /// Adopt `region` as the committed annotation text. Pending turns are
    /// assumed to be part of it now.
    pub fn resync(&mut self, region: &str) {
        self.committed = region.to_string();
        self.turns = parse_turns(region, &self.prefix);
        self.pending = 0;
    }
}

/// Render one turn as comment lines (no trailing newline).
pub fn render_turn(turn: &AnnotationTurn, prefix: &str) -> String {
    render_turn_avoiding(turn, prefix, None)
}

/// Render a turn so that none of its lines equals `separator`. A line that
/// would is pushed one space further from the comment token, which keeps it
/// a comment and keeps it readable.
fn render_turn_avoiding(turn: &AnnotationTurn, prefix: &str, separator: Option<&str>) -> String {
    let origin = turn.origin();
    let mut lines = Vec::new();
    for (i, line) in turn.text().split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        let mut rendered = match (i, line.is_empty()) {
            (0, true) => format!("{prefix} [{origin}]"),
            (0, false) => format!("{prefix} [{origin}] {line}"),
            (_, true) => prefix.to_string(),
            (_, false) => format!("{prefix} {line}"),
        };
        if separator == Some(rendered.as_str()) {
            rendered = if i == 0 {
                format!("{prefix} [{origin}]  {line}")
            } else {
                format!("{prefix}  {line}")
            };
        }
        lines.push(rendered);
    }
    lines.join("\n")
}

/// Parse comment lines back into turns.
///
/// Header lines (`# [origin] text`) start turns. Comment text before any
/// header becomes a human turn. Lines not starting with the token are
/// skipped.
pub fn parse_turns(region: &str, prefix: &str) -> Vec<AnnotationTurn> {
    let mut turns = Vec::new();
    let mut current: Option<(Origin, Vec<String>)> = None;
    let mut blanks = 0usize;

    let mut finish = |current: &mut Option<(Origin, Vec<String>)>| {
        if let Some((origin, lines)) = current.take() {
            turns.push(AnnotationTurn::new(origin, lines.join("\n")));
        }
    };

    for raw in region.lines() {
        let Some(body) = raw.trim().strip_prefix(prefix) else {
            continue;
        };
        let body = body.strip_prefix(' ').unwrap_or(body).trim_end();

        if body.is_empty() {
            blanks += 1;
            continue;
        }

        if let Some((origin, text)) = parse_header(body) {
            finish(&mut current);
            current = Some((origin, vec![text.to_string()]));
        } else {
            match current.as_mut() {
                Some((_, lines)) => {
                    lines.extend(std::iter::repeat_n(String::new(), blanks));
                    lines.push(body.to_string());
                }
                None => current = Some((Origin::Human, vec![body.to_string()])),
            }
        }
        blanks = 0;
    }
    finish(&mut current);
    turns
}

fn parse_header(body: &str) -> Option<(Origin, &str)> {
    let rest = body.strip_prefix('[')?;
    let close = rest.find(']')?;
    let origin = Origin::parse(&rest[..close])?;
    let text = &rest[close + 1..];
    Some((origin, text.strip_prefix(' ').unwrap_or(text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_single_turn() {
        let turn = AnnotationTurn::collaborator("Done.\n\nf returns 2 now.");
        assert_eq!(
            render_turn(&turn, "#"),
            "# [collaborator] Done.\n#\n# f returns 2 now."
        );
    }

    #[test]
    fn message_lines_never_reproduce_the_separator() {
        let layout = DocumentLayout::default();
        let mut log = AnnotationLog::for_layout(&layout, "");
        log.append(AnnotationTurn::collaborator(
            "Moved things around.\n=== CONVERSATION ===\nAll done.",
        ));

        let region = log.render();
        assert!(region.lines().all(|line| line != layout.separator), "{region}");
        assert!(region.contains("#  === CONVERSATION ==="));

        let doc = layout.compose("x = 1", &region);
        assert!(layout.split(&doc).is_ok());
    }

    #[test]
    fn appended_turns_follow_committed_text() {
        let mut log = AnnotationLog::from_region("#", "# hand written\n");
        log.append(AnnotationTurn::human("hello"));
        log.append(AnnotationTurn::system("ReloadError: boom"));
        assert_eq!(
            log.render(),
            "# hand written\n#\n# [human] hello\n#\n# [system] ReloadError: boom\n"
        );
        assert_eq!(log.pending().len(), 2);
    }

    #[test]
    fn render_without_pending_is_verbatim() {
        let region = "#   odd   spacing\n\n# kept\n";
        let log = AnnotationLog::from_region("#", region);
        assert_eq!(log.render(), region);
        assert!(!log.has_pending());
    }

    #[test]
    fn empty_log_renders_turns_alone() {
        let mut log = AnnotationLog::new("#");
        log.append(AnnotationTurn::human("first"));
        assert_eq!(log.render(), "# [human] first\n");
    }

    #[test]
    fn parse_rebuilds_turns() {
        let mut log = AnnotationLog::new("#");
        log.append(AnnotationTurn::human("make f return 2"));
        log.append(AnnotationTurn::collaborator("Done.\n\nReloaded."));
        let rendered = log.render();

        let turns = parse_turns(&rendered, "#");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].origin(), Origin::Human);
        assert_eq!(turns[0].text(), "make f return 2");
        assert_eq!(turns[1].origin(), Origin::Collaborator);
        assert_eq!(turns[1].text(), "Done.\n\nReloaded.");
    }

    #[test]
    fn unheaded_comments_are_human() {
        let turns = parse_turns("# just a note\n# second line\n", "#");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].origin(), Origin::Human);
        assert_eq!(turns[0].text(), "just a note\nsecond line");
    }

    #[test]
    fn unknown_origin_is_plain_text() {
        let turns = parse_turns("# [robot] beep\n", "#");
        assert_eq!(turns[0].origin(), Origin::Human);
        assert_eq!(turns[0].text(), "[robot] beep");
    }

    #[test]
    fn resync_clears_pending() {
        let mut log = AnnotationLog::new("#");
        log.append(AnnotationTurn::human("a"));
        let region = log.render();
        log.resync(&region);
        assert!(!log.has_pending());
        assert_eq!(log.len(), 1);
        assert_eq!(log.render(), region);
    }

    #[test]
    fn custom_prefix() {
        let mut log = AnnotationLog::new("//");
        log.append(AnnotationTurn::human("x"));
        assert_eq!(log.render(), "// [human] x\n");
        assert_eq!(parse_turns(&log.render(), "//")[0].text(), "x");
    }
}
