use crate::core::review::{ChangeUnit, ReviewGroup, RiskLevel};

/// Primary-tag priority: the first matching tag decides a unit's bucket, and
/// groups are emitted in this order so the narrative sequence never reorders
/// between identical inputs.
const TAG_ORDER: [&str; 8] = [
    "feature", "api", "ui", "data", "refactor", "tests", "docs", "config",
];

/// Deterministic fallback grouping. No external calls; used both as the
/// baseline seed for the engine grouping task and as the result when the
/// engine is unavailable or rejected.
pub fn heuristic_groups(units: &[ChangeUnit]) -> Vec<ReviewGroup> {
    let mut groups = Vec::new();

    for tag in TAG_ORDER {
        let bucket: Vec<&ChangeUnit> = units
            .iter()
            .filter(|u| primary_tag(&u.tags) == Some(tag))
            .collect();
        if bucket.is_empty() {
            continue;
        }
        let hunk_ids: Vec<String> = bucket
            .iter()
            .flat_map(|u| u.hunk_ids.iter().cloned())
            .collect();
        groups.push(ReviewGroup {
            id: format!("heuristic-{tag}"),
            title: humanize_tag(tag).to_string(),
            rationale: build_rationale(tag, &bucket),
            review_focus: Some(review_focus(tag)),
            risk: if tag == "feature" {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            },
            hunk_ids,
            suggested_tests: (tag == "tests")
                .then(|| vec!["Run updated tests".to_string()]),
        });
    }

    let leftover: Vec<&ChangeUnit> = units
        .iter()
        .filter(|u| primary_tag(&u.tags).is_none())
        .collect();
    if !leftover.is_empty() {
        groups.push(ReviewGroup {
            id: "heuristic-misc".to_string(),
            title: "Miscellaneous updates".to_string(),
            rationale: "Files that do not match common buckets.".to_string(),
            review_focus: Some(vec!["Scan for unexpected behavior changes.".to_string()]),
            risk: RiskLevel::Low,
            hunk_ids: leftover
                .iter()
                .flat_map(|u| u.hunk_ids.iter().cloned())
                .collect(),
            suggested_tests: None,
        });
    }

    groups
}

fn primary_tag(tags: &[String]) -> Option<&'static str> {
    TAG_ORDER
        .iter()
        .find(|tag| tags.iter().any(|t| t == **tag))
        .copied()
}

fn humanize_tag(tag: &str) -> &'static str {
    match tag {
        "feature" => "Feature work",
        "api" => "API changes",
        "ui" => "UI updates",
        "data" => "Data layer",
        "refactor" => "Refactors",
        "tests" => "Tests",
        "docs" => "Documentation",
        "config" => "Configuration",
        _ => "Related updates",
    }
}

fn build_rationale(tag: &str, units: &[&ChangeUnit]) -> String {
    let what = match tag {
        "feature" => "Product changes",
        "api" => "API-facing updates",
        "ui" => "UI-facing updates",
        "data" => "Data layer updates",
        "refactor" => "Refactor-focused updates",
        "tests" => "Test updates",
        "docs" => "Documentation or README updates",
        "config" => "Configuration or metadata updates",
        _ => "Related updates",
    };
    format!(
        "{what} in {} across {} file(s).",
        summarize_locations(units),
        units.len()
    )
}

fn review_focus(tag: &str) -> Vec<String> {
    let bullets: &[&str] = match tag {
        "feature" => &["New behavior and edge cases.", "Backward compatibility risks."],
        "api" => &["Request/response contracts.", "Auth and validation paths."],
        "ui" => &["User flow and state changes.", "Visual regressions."],
        "data" => &["Query correctness and migrations.", "Performance regressions."],
        "refactor" => &[
            "Behavior parity vs. prior logic.",
            "Potential hidden side effects.",
        ],
        "tests" => &["Coverage gaps vs. new behavior."],
        "docs" => &["Accuracy vs. code changes."],
        "config" => &["Runtime defaults and environment impact."],
        _ => &["Scan for unexpected behavior changes."],
    };
    bullets.iter().map(|b| b.to_string()).collect()
}

fn summarize_locations(units: &[&ChangeUnit]) -> String {
    let mut seen = Vec::new();
    for unit in units {
        let mut parts = unit.file_path.split('/');
        let prefix = match (parts.next(), parts.next()) {
            (Some(a), Some(b)) => format!("{a}/{b}"),
            (Some(a), None) if !a.is_empty() => a.to_string(),
            _ => continue,
        };
        if !seen.contains(&prefix) {
            seen.push(prefix);
        }
    }
    seen.truncate(3);
    match seen.len() {
        0 => "multiple areas".to_string(),
        1 => seen.remove(0),
        n => format!("{} and {}", seen[..n - 1].join(", "), seen[n - 1]),
    }
}
