use crate::core::diff_parser::ParsedDiff;
use crate::core::review::ChangeUnit;

/// Derive one change unit per file, tagged by path heuristics. Every unit
/// carries at least one tag so downstream grouping always partitions fully.
pub fn build_change_units(parsed: &ParsedDiff) -> Vec<ChangeUnit> {
    parsed
        .files
        .iter()
        .map(|file| ChangeUnit {
            id: file.file_path.clone(),
            file_path: file.file_path.clone(),
            hunk_ids: file.hunks.iter().map(|h| h.id.clone()).collect(),
            tags: derive_tags(&file.file_path),
        })
        .collect()
}

fn add_tag(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}

fn derive_tags(file_path: &str) -> Vec<String> {
    let lower = file_path.to_lowercase();
    let mut tags = Vec::new();

    let segments: Vec<&str> = lower.split('/').collect();
    let has_segment = |name: &str| segments.iter().any(|s| *s == name);
    let file_name = segments.last().copied().unwrap_or("");

    if has_segment("test")
        || has_segment("tests")
        || file_name.contains(".spec.")
        || file_name.contains(".test.")
        || file_name.ends_with("_test.rs")
        || file_name.ends_with("_test.go")
    {
        add_tag(&mut tags, "tests");
    }

    if lower.ends_with(".tsx")
        || lower.ends_with(".jsx")
        || lower.ends_with(".css")
        || lower.ends_with(".scss")
        || lower.ends_with(".sass")
        || has_segment("ui")
        || has_segment("frontend")
    {
        add_tag(&mut tags, "ui");
    }

    if has_segment("api") || has_segment("routes") || lower.contains("controller") {
        add_tag(&mut tags, "api");
    }

    if has_segment("db") || has_segment("data") || lower.contains("migration") {
        add_tag(&mut tags, "data");
    }

    if lower.ends_with(".md") || has_segment("docs") {
        add_tag(&mut tags, "docs");
    }

    if lower.ends_with(".json")
        || lower.ends_with(".yml")
        || lower.ends_with(".yaml")
        || lower.ends_with(".toml")
        || lower.ends_with(".ini")
        || lower.ends_with(".env")
        || lower.contains("config")
    {
        add_tag(&mut tags, "config");
    }

    if lower.contains("refactor") {
        add_tag(&mut tags, "refactor");
    }

    if tags.is_empty() {
        add_tag(&mut tags, "feature");
    }

    tags
}
