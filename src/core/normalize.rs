use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::review::{Annotation, ContextNote, Finding, ReviewGroup};

/// Hard cap on merged findings across passes.
const MAX_FINDINGS: usize = 20;

static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]+`").unwrap());
static TRIVIAL_VOCAB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(line|lines|added|removed|inserted|deleted|renamed)\b").unwrap());
static INSIGHT_VOCAB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(because|impact|affect|invariant|contract|risk|compatibility|migration|performance|latency|security|behavior|edge case|regression|downstream|caller|api|protocol)\b",
    )
    .unwrap()
});

/// Validate engine-produced context notes against the known groups.
///
/// Hunk ids not present in any group are pruned; a note with no surviving
/// hunks is dropped. An unknown `group_id` is re-resolved to the first group
/// sharing a surviving hunk, else the note is dropped. Low-signal notes are
/// rejected, and the result is truncated to `max_notes` preserving input
/// order (the engine's priority).
pub fn normalize_notes(
    notes: Vec<ContextNote>,
    groups: &[ReviewGroup],
    max_notes: usize,
) -> Vec<ContextNote> {
    let group_index: HashMap<&str, &ReviewGroup> =
        groups.iter().map(|g| (g.id.as_str(), g)).collect();
    let valid_hunks: HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.hunk_ids.iter().map(String::as_str))
        .collect();

    let mut normalized = Vec::new();
    for mut note in notes {
        note.hunk_ids.retain(|id| valid_hunks.contains(id.as_str()));
        if note.hunk_ids.is_empty() {
            continue;
        }

        let assigned = group_index
            .get(note.group_id.as_str())
            .copied()
            .or_else(|| {
                groups
                    .iter()
                    .find(|g| note.hunk_ids.iter().any(|id| g.hunk_ids.contains(id)))
            });
        let Some(group) = assigned else {
            continue;
        };
        note.group_id = group.id.clone();

        if !is_high_signal(&note) {
            continue;
        }
        normalized.push(note);
    }

    normalized.truncate(max_notes);
    normalized
}

/// A note earns its place: long enough to carry reasoning, multi-paragraph,
/// anchored to at least one concrete identifier, and not a mechanical restating
/// of the diff.
fn is_high_signal(note: &ContextNote) -> bool {
    let text = note.body_markdown.trim();
    if text.is_empty() {
        return false;
    }

    let title = note.title.to_lowercase();
    if title.contains("change note") || title.contains("update") {
        return false;
    }

    let word_count = text.split_whitespace().count();
    if word_count < 60 {
        return false;
    }

    let paragraphs = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();
    if paragraphs < 2 {
        return false;
    }

    if !INLINE_CODE_RE.is_match(text) {
        return false;
    }

    if TRIVIAL_VOCAB_RE.is_match(text) && !INSIGHT_VOCAB_RE.is_match(text) {
        return false;
    }

    true
}

/// Merge findings from two passes, primary winning ties, capped at
/// [`MAX_FINDINGS`]. Identity is a composite signature so a second pass can
/// only contribute genuinely new findings.
pub fn merge_findings(primary: Vec<Finding>, secondary: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for finding in primary.into_iter().chain(secondary) {
        if seen.insert(finding_signature(&finding)) {
            merged.push(finding);
        }
    }

    merged.truncate(MAX_FINDINGS);
    merged
}

fn finding_signature(finding: &Finding) -> String {
    let first_file = finding
        .evidence
        .first()
        .map(|e| e.file_path.as_str())
        .unwrap_or("unknown");
    let mut evidence_sigs: Vec<String> = finding
        .evidence
        .iter()
        .map(|e| {
            let range = e
                .line_range
                .map(|(a, b)| format!("{a}-{b}"))
                .unwrap_or_default();
            let side = e
                .side
                .map(|s| format!("{s:?}").to_lowercase())
                .unwrap_or_default();
            [
                e.file_path.as_str(),
                side.as_str(),
                e.hunk_id.as_deref().unwrap_or(""),
                range.as_str(),
            ]
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(":")
        })
        .collect();
    evidence_sigs.sort();
    format!(
        "{:?}:{}:{}:{}",
        finding.kind,
        finding.title,
        first_file,
        evidence_sigs.join("|")
    )
}

/// Drop annotations whose anchor names a hunk that does not exist in the
/// diff. Anchors without a hunk id are kept; file/line anchors still render.
pub fn filter_annotations(
    annotations: Vec<Annotation>,
    known_hunks: &[String],
) -> Vec<Annotation> {
    let known: HashSet<&str> = known_hunks.iter().map(String::as_str).collect();
    annotations
        .into_iter()
        .filter(|a| {
            a.anchor
                .hunk_id
                .as_deref()
                .map_or(true, |id| known.contains(id))
        })
        .collect()
}
