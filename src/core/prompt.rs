use serde::Serialize;
use serde_json::json;

use crate::core::diff_parser::{DiffStats, ParsedDiff};
use crate::core::review::{ChangeUnit, ReviewGroup};

/// Note-count targets for a review pass, derived from diff size. The second
/// pass runs only when the first produces fewer than `min_notes`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTargets {
    pub min_notes: usize,
    pub max_notes: usize,
    pub files_changed: usize,
    pub hunk_count: usize,
    pub groups_count: usize,
    pub pass: u32,
}

/// Thresholds for [`compute_review_targets`], overridable from config.
#[derive(Debug, Clone, Copy)]
pub struct NoteThresholds {
    pub small_min: usize,
    pub medium_min: usize,
    pub large_min: usize,
    pub max_cap: usize,
}

impl Default for NoteThresholds {
    fn default() -> Self {
        Self {
            small_min: 2,
            medium_min: 4,
            large_min: 6,
            max_cap: 12,
        }
    }
}

pub fn compute_review_targets(
    stats: &DiffStats,
    units: &[ChangeUnit],
    groups: &[ReviewGroup],
    thresholds: NoteThresholds,
) -> ReviewTargets {
    let hunk_count: usize = units.iter().map(|u| u.hunk_ids.len()).sum();
    let min_notes = if stats.files_changed >= 6 || hunk_count >= 14 {
        thresholds.large_min
    } else if stats.files_changed >= 3 || hunk_count >= 7 {
        thresholds.medium_min
    } else {
        thresholds.small_min
    };
    let max_notes = thresholds
        .max_cap
        .min(min_notes.max(groups.len().saturating_mul(3).div_ceil(2)));

    ReviewTargets {
        min_notes,
        max_notes,
        files_changed: stats.files_changed,
        hunk_count,
        groups_count: groups.len(),
        pass: 1,
    }
}

impl ReviewTargets {
    /// Targets for the refinement pass: push the floor up, keep the cap.
    pub fn second_pass(&self) -> Self {
        Self {
            min_notes: self.max_notes.min(self.min_notes + 2),
            pass: 2,
            ..self.clone()
        }
    }
}

pub fn build_grouping_prompt(
    parsed: &ParsedDiff,
    units: &[ChangeUnit],
    fallback_groups: &[ReviewGroup],
    repo_context: Option<&str>,
) -> String {
    let payload = json!({
        "diff": parsed,
        "changeUnits": units,
        "fallbackGroups": fallback_groups,
        "repoContext": repo_context,
    });
    [
        "You are preparing a review story for a code diff.",
        "Group hunks into at most 12 ordered groups with titles, rationale, review focus, and risk.",
        "Aim for 4-10 groups for non-trivial diffs; avoid generic buckets unless truly uniform.",
        "Order groups to form a narrative flow a reviewer can follow.",
        "Titles must be specific and action-oriented.",
        "Rationale should explain intent and cross-file connections in 1-3 sentences.",
        "Review focus should be 1-3 short bullets of what to inspect closely.",
        "Provide group ids, titles, rationales, reviewFocus, risks, and ordered hunkIds.",
        "Return JSON matching this schema. No extra keys. No prose.",
        "---",
        &pretty(&payload),
    ]
    .join("\n")
}

pub fn build_review_prompt(
    parsed: &ParsedDiff,
    units: &[ChangeUnit],
    groups: &[ReviewGroup],
    targets: &ReviewTargets,
    repo_context: Option<&str>,
) -> String {
    let payload = json!({
        "diff": parsed,
        "changeUnits": units,
        "groups": groups,
        "targets": targets,
        "repoContext": repo_context,
    });
    let note_budget = format!(
        "Provide {}-{} notes for non-trivial diffs; fewer if low-signal; max {}.",
        targets.min_notes, targets.max_notes, targets.max_notes
    );
    let pass_hint = if targets.pass == 2 {
        "This is a second pass; push for deeper, more contextual notes."
    } else {
        "Prefer deeper notes over broad coverage."
    };
    [
        "You are a senior reviewer performing a deep code review.",
        "Take extra time to reason about intent, impact, and hidden risks.",
        "Review the diff and grouping context below.",
        "Return findings (bugs/flags) and contextNotes.",
        "Findings must include concrete evidence (filePath + lineRange or hunkId).",
        "Context notes must be non-obvious and high-signal; skip trivial changes.",
        "Each context note must be 2-3 paragraphs, 2-4 sentences per paragraph.",
        "Explain intent, impact, and cross-file relationships when relevant.",
        "Do not restate line edits or say 'added X at line Y'.",
        "Each context note must include at least one concrete identifier wrapped in backticks.",
        &note_budget,
        pass_hint,
        "Anchor each note to a groupId and 1-5 hunkIds from the diff.",
        "Return JSON matching this schema. No extra keys. No prose.",
        "---",
        &pretty(&payload),
    ]
    .join("\n")
}

pub fn build_annotations_prompt(parsed: &ParsedDiff, groups: &[ReviewGroup]) -> String {
    let payload = json!({ "diff": parsed, "groups": groups });
    [
        "You are generating inline review annotations for a diff.",
        "Produce line anchors that allow hover tooltips.",
        "Prioritize non-obvious behavior, risks, and cross-file connections.",
        "Keep it sparse: max 60 annotations.",
        "Return JSON matching this schema. No extra keys. No prose.",
        "---",
        &pretty(&payload),
    ]
    .join("\n")
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(files: usize) -> DiffStats {
        DiffStats {
            files_changed: files,
            insertions: 0,
            deletions: 0,
        }
    }

    fn unit_with_hunks(n: usize) -> ChangeUnit {
        ChangeUnit {
            id: "f".to_string(),
            file_path: "f".to_string(),
            hunk_ids: (0..n).map(|i| format!("h{i}")).collect(),
            tags: vec!["feature".to_string()],
        }
    }

    #[test]
    fn targets_scale_with_diff_size() {
        let small = compute_review_targets(
            &stats(1),
            &[unit_with_hunks(2)],
            &[],
            NoteThresholds::default(),
        );
        assert_eq!(small.min_notes, 2);

        let medium = compute_review_targets(
            &stats(4),
            &[unit_with_hunks(3)],
            &[],
            NoteThresholds::default(),
        );
        assert_eq!(medium.min_notes, 4);

        let large = compute_review_targets(
            &stats(2),
            &[unit_with_hunks(14)],
            &[],
            NoteThresholds::default(),
        );
        assert_eq!(large.min_notes, 6);
    }

    #[test]
    fn max_notes_never_exceeds_cap_or_drops_below_min() {
        let targets = compute_review_targets(
            &stats(10),
            &[unit_with_hunks(30)],
            &[],
            NoteThresholds::default(),
        );
        assert_eq!(targets.min_notes, 6);
        assert_eq!(targets.max_notes, 6);
        assert!(targets.max_notes <= 12);
    }

    #[test]
    fn second_pass_raises_floor_within_cap() {
        let first = compute_review_targets(
            &stats(6),
            &[unit_with_hunks(14)],
            &[],
            NoteThresholds::default(),
        );
        let second = first.second_pass();
        assert_eq!(second.pass, 2);
        assert!(second.min_notes >= first.min_notes);
        assert!(second.min_notes <= second.max_notes);
    }
}
