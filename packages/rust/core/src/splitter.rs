//! Section splitter: partitions generated text by literal heading labels.
//!
//! Each heading is searched case-insensitively from the start of the text.
//! A found heading's content runs from the end of its match to the start of
//! the next found heading (or the end of the text), trimmed. Headings that
//! are not found produce no section; when none are found the whole text
//! becomes a single fallback section.

use regex::{Regex, RegexBuilder};
use specter_shared::{DraftSection, HeadingSpec};
use tracing::debug;

/// Where one heading label was found.
#[derive(Debug, Clone, Copy)]
struct Located<'h> {
    heading: &'h HeadingSpec,
    start: usize,
    end: usize,
}

/// Split `text` into one section per found heading, in heading order.
pub fn split(text: &str, headings: &[HeadingSpec]) -> Vec<DraftSection> {
    let found: Vec<Located<'_>> = headings
        .iter()
        .filter_map(|heading| {
            locate(text, &heading.label).map(|(start, end)| Located {
                heading,
                start,
                end,
            })
        })
        .collect();

    if found.is_empty() {
        debug!(headings = headings.len(), "no heading found, using fallback section");
        return vec![DraftSection::fallback(text)];
    }

    let sections: Vec<DraftSection> = found
        .iter()
        .enumerate()
        .map(|(i, located)| {
            let stop = found.get(i + 1).map_or(text.len(), |next| next.start);
            // A later heading matched earlier in the text: nothing lies between.
            let content = if stop >= located.end {
                text[located.end..stop].trim()
            } else {
                ""
            };
            DraftSection {
                id: located.heading.section_id.clone(),
                title: located.heading.label.clone(),
                content: content.to_string(),
                editable: located.heading.editable,
            }
        })
        .collect();

    debug!(
        headings = headings.len(),
        sections = sections.len(),
        "split generated text"
    );
    sections
}

/// Content for a single-heading regeneration: the text after the heading
/// when it appears, otherwise the whole text (trimmed).
pub fn single_section_content(text: &str, heading: &HeadingSpec) -> String {
    match locate(text, &heading.label) {
        Some((_, end)) => text[end..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Byte range of the first case-insensitive occurrence of `label`.
fn locate(text: &str, label: &str) -> Option<(usize, usize)> {
    if label.is_empty() {
        return None;
    }
    let pattern = label_pattern(label)?;
    pattern.find(text).map(|m| (m.start(), m.end()))
}

fn label_pattern(label: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(label))
        .case_insensitive(true)
        .build()
        .ok()
}
