use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Root of the parsed diff tree. Built once per run, read-only afterward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDiff {
    pub files: Vec<DiffFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFile {
    /// Resolved path: `new_path` when present, else `old_path`.
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    pub hunks: Vec<DiffHunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffHunk {
    /// Deterministic composite key, `path:oldStart,oldLines:newStart,newLines`.
    /// The only cross-component foreign key for hunks.
    pub id: String,
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Add,
    Del,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

pub fn hunk_id(
    file_path: &str,
    old_start: usize,
    old_lines: usize,
    new_start: usize,
    new_lines: usize,
) -> String {
    format!("{file_path}:{old_start},{old_lines}:{new_start},{new_lines}")
}

static GIT_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^diff --git a/(.+) b/(.+)$").unwrap());
static HUNK_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@@\s+-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s+@@\s*(.*)$").unwrap());

/// Parse unified-diff text into an exact, line-addressable tree.
///
/// Never fails: malformed or partial input yields a best-effort tree and
/// unrecognized lines outside any file/hunk context are dropped. Line numbers
/// are reconstructed from each hunk header and advanced per line kind, since
/// diff bodies do not carry them.
pub fn parse(diff_text: &str) -> ParsedDiff {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut current_file: Option<DiffFile> = None;
    let mut current_hunk: Option<DiffHunk> = None;
    let mut old_line = 0usize;
    let mut new_line = 0usize;

    fn flush_hunk(file: &mut Option<DiffFile>, hunk: &mut Option<DiffHunk>) {
        if let (Some(file), Some(hunk)) = (file.as_mut(), hunk.take()) {
            file.hunks.push(hunk);
        }
    }

    fn flush_file(
        files: &mut Vec<DiffFile>,
        file: &mut Option<DiffFile>,
        hunk: &mut Option<DiffHunk>,
    ) {
        flush_hunk(file, hunk);
        if let Some(file) = file.take() {
            files.push(file);
        }
    }

    // `lines()` drops the final empty segment of newline-terminated text and
    // strips `\r`, so a trailing newline never becomes a phantom hunk line.
    for line in diff_text.lines() {
        if line.starts_with("diff --git ") {
            flush_file(&mut files, &mut current_file, &mut current_hunk);
            let (old_path, new_path) = match GIT_HEADER_RE.captures(line.trim()) {
                Some(caps) => (Some(caps[1].to_string()), Some(caps[2].to_string())),
                None => (None, None),
            };
            let file_path = new_path
                .clone()
                .or_else(|| old_path.clone())
                .unwrap_or_default();
            current_file = Some(DiffFile {
                file_path,
                old_path,
                new_path,
                hunks: Vec::new(),
            });
            continue;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            // Headerless diffs open a file here.
            let file = current_file.get_or_insert_with(|| DiffFile {
                file_path: String::new(),
                old_path: None,
                new_path: None,
                hunks: Vec::new(),
            });
            let path = rest.trim().trim_start_matches("a/");
            file.old_path = (path != "/dev/null").then(|| path.to_string());
            if file.file_path.is_empty() {
                if let Some(old) = &file.old_path {
                    file.file_path = old.clone();
                }
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(file) = current_file.as_mut() {
                let path = rest.trim().trim_start_matches("b/");
                file.new_path = (path != "/dev/null").then(|| path.to_string());
                if let Some(new) = &file.new_path {
                    file.file_path = new.clone();
                }
            }
            continue;
        }

        if line.starts_with("@@") {
            flush_hunk(&mut current_file, &mut current_hunk);
            let Some(file) = current_file.as_ref() else {
                continue;
            };
            let Some(caps) = HUNK_HEADER_RE.captures(line) else {
                continue;
            };
            let old_start: usize = caps[1].parse().unwrap_or(0);
            // Single-line hunks omit the length component.
            let old_lines: usize = caps.get(2).map_or(1, |m| m.as_str().parse().unwrap_or(1));
            let new_start: usize = caps[3].parse().unwrap_or(0);
            let new_lines: usize = caps.get(4).map_or(1, |m| m.as_str().parse().unwrap_or(1));
            old_line = old_start;
            new_line = new_start;
            let header = caps
                .get(5)
                .map(|m| m.as_str().trim())
                .filter(|h| !h.is_empty());
            current_hunk = Some(DiffHunk {
                id: hunk_id(&file.file_path, old_start, old_lines, new_start, new_lines),
                old_start,
                old_lines,
                new_start,
                new_lines,
                header: header.map(str::to_string),
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current_hunk.as_mut() else {
            continue;
        };

        if line.starts_with("\\ No newline at end of file") {
            continue;
        }

        let diff_line = if let Some(content) = line.strip_prefix('+') {
            let n = new_line;
            new_line += 1;
            DiffLine {
                kind: LineKind::Add,
                content: content.to_string(),
                old_line: None,
                new_line: Some(n),
            }
        } else if let Some(content) = line.strip_prefix('-') {
            let n = old_line;
            old_line += 1;
            DiffLine {
                kind: LineKind::Del,
                content: content.to_string(),
                old_line: Some(n),
                new_line: None,
            }
        } else if let Some(content) = line.strip_prefix(' ') {
            let (o, n) = (old_line, new_line);
            old_line += 1;
            new_line += 1;
            DiffLine {
                kind: LineKind::Context,
                content: content.to_string(),
                old_line: Some(o),
                new_line: Some(n),
            }
        } else {
            // Tolerate unmarked lines inside a hunk; some tools emit them.
            DiffLine {
                kind: LineKind::Context,
                content: line.to_string(),
                old_line: None,
                new_line: None,
            }
        };

        hunk.lines.push(diff_line);
    }

    flush_file(&mut files, &mut current_file, &mut current_hunk);
    ParsedDiff { files }
}

pub fn compute_stats(parsed: &ParsedDiff) -> DiffStats {
    let mut stats = DiffStats {
        files_changed: parsed.files.len(),
        ..Default::default()
    };
    for file in &parsed.files {
        for hunk in &file.hunks {
            for line in &hunk.lines {
                match line.kind {
                    LineKind::Add => stats.insertions += 1,
                    LineKind::Del => stats.deletions += 1,
                    LineKind::Context => {}
                }
            }
        }
    }
    stats
}

impl ParsedDiff {
    /// All hunk ids in the diff, in file order.
    pub fn hunk_ids(&self) -> Vec<String> {
        self.files
            .iter()
            .flat_map(|f| f.hunks.iter().map(|h| h.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -10,3 +10,4 @@ fn demo() {
 context one
-removed line
+added line
+second added
 context two
";

    #[test]
    fn parses_git_diff_with_line_numbers() {
        let parsed = parse(SAMPLE);
        assert_eq!(parsed.files.len(), 1);
        let file = &parsed.files[0];
        assert_eq!(file.file_path, "src/lib.rs");
        assert_eq!(file.old_path.as_deref(), Some("src/lib.rs"));

        let hunk = &file.hunks[0];
        assert_eq!(hunk.id, "src/lib.rs:10,3:10,4");
        assert_eq!(hunk.header.as_deref(), Some("fn demo() {"));

        let lines = &hunk.lines;
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].kind, LineKind::Context);
        assert_eq!(lines[0].old_line, Some(10));
        assert_eq!(lines[0].new_line, Some(10));
        assert_eq!(lines[1].kind, LineKind::Del);
        assert_eq!(lines[1].old_line, Some(11));
        assert_eq!(lines[1].new_line, None);
        assert_eq!(lines[2].kind, LineKind::Add);
        assert_eq!(lines[2].new_line, Some(11));
        assert_eq!(lines[3].new_line, Some(12));
        assert_eq!(lines[4].old_line, Some(12));
        assert_eq!(lines[4].new_line, Some(13));
    }

    #[test]
    fn declared_lengths_match_body_counts() {
        let parsed = parse(SAMPLE);
        let hunk = &parsed.files[0].hunks[0];
        let old_count = hunk.lines.iter().filter(|l| l.kind != LineKind::Add).count();
        let new_count = hunk.lines.iter().filter(|l| l.kind != LineKind::Del).count();
        assert_eq!(old_count, hunk.old_lines);
        assert_eq!(new_count, hunk.new_lines);
    }

    #[test]
    fn single_added_file_single_line() {
        let text = "\
diff --git a/new.txt b/new.txt
--- /dev/null
+++ b/new.txt
@@ -0,0 +1 @@
+hello
";
        let parsed = parse(text);
        assert_eq!(parsed.files.len(), 1);
        let file = &parsed.files[0];
        assert_eq!(file.old_path, None);
        assert_eq!(file.new_path.as_deref(), Some("new.txt"));

        assert_eq!(file.hunks.len(), 1);
        let hunk = &file.hunks[0];
        assert_eq!(
            (hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines),
            (0, 0, 1, 1)
        );
        assert_eq!(hunk.lines.len(), 1);
        assert_eq!(hunk.lines[0].kind, LineKind::Add);
        assert_eq!(hunk.lines[0].new_line, Some(1));
    }

    #[test]
    fn headerless_diff_takes_path_from_markers() {
        let text = "\
--- a/foo.txt
+++ b/foo.txt
@@ -1,1 +1,1 @@
-hello
+world
";
        let parsed = parse(text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].file_path, "foo.txt");
        assert_eq!(parsed.files[0].hunks.len(), 1);
    }

    #[test]
    fn line_numbers_strictly_increase_within_a_hunk() {
        let parsed = parse(SAMPLE);
        for file in &parsed.files {
            for hunk in &file.hunks {
                let olds: Vec<_> = hunk.lines.iter().filter_map(|l| l.old_line).collect();
                let news: Vec<_> = hunk.lines.iter().filter_map(|l| l.new_line).collect();
                assert!(olds.windows(2).all(|w| w[0] < w[1]));
                assert!(news.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn content_round_trips_without_marker() {
        let parsed = parse(SAMPLE);
        let hunk = &parsed.files[0].hunks[0];
        let rebuilt: Vec<String> = hunk
            .lines
            .iter()
            .map(|l| {
                let marker = match l.kind {
                    LineKind::Add => "+",
                    LineKind::Del => "-",
                    LineKind::Context => " ",
                };
                format!("{marker}{}", l.content)
            })
            .collect();
        let original: Vec<&str> = SAMPLE
            .lines()
            .filter(|l| {
                (l.starts_with('+') && !l.starts_with("+++"))
                    || (l.starts_with('-') && !l.starts_with("---"))
                    || l.starts_with(' ')
            })
            .collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn no_newline_marker_is_discarded() {
        let text = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-old
+new
\\ No newline at end of file
";
        let parsed = parse(text);
        assert_eq!(parsed.files[0].hunks[0].lines.len(), 2);
    }

    #[test]
    fn trailing_newline_adds_no_phantom_line() {
        let bare = "diff --git a/a.txt b/a.txt\n--- /dev/null\n+++ b/a.txt\n@@ -0,0 +1 @@\n+only";
        let terminated = format!("{bare}\n");
        let crlf = bare.replace('\n', "\r\n") + "\r\n";
        for text in [bare.to_string(), terminated, crlf] {
            let parsed = parse(&text);
            let hunk = &parsed.files[0].hunks[0];
            assert_eq!(hunk.lines.len(), hunk.new_lines);
            assert_eq!(hunk.lines[0].content, "only");
        }
    }

    #[test]
    fn garbage_input_never_panics() {
        for text in ["", "not a diff at all\njust text\n", "@@ malformed @@\n+x\n"] {
            let parsed = parse(text);
            assert!(parsed.files.is_empty());
        }
    }

    #[test]
    fn deleted_file_maps_dev_null_to_none() {
        let text = "\
diff --git a/gone.txt b/gone.txt
--- a/gone.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-one
-two
";
        let parsed = parse(text);
        let file = &parsed.files[0];
        assert_eq!(file.new_path, None);
        assert_eq!(file.old_path.as_deref(), Some("gone.txt"));
        let stats = compute_stats(&parsed);
        assert_eq!(stats.deletions, 2);
        assert_eq!(stats.insertions, 0);
    }
}
