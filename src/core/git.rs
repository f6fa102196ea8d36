use anyhow::{Context, Result};
use git2::{DiffFormat, DiffOptions, Repository};
use std::path::{Path, PathBuf};

use crate::core::review::{DiffSource, DiffSourceKind};

pub struct GitIntegration {
    repo: Repository,
}

impl GitIntegration {
    pub fn new(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::discover(repo_path).context("Failed to find git repository")?;
        Ok(Self { repo })
    }

    pub fn workdir(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    pub fn head_sha(&self) -> Result<String> {
        let head = self.repo.head()?.peel_to_commit()?;
        Ok(head.id().to_string())
    }

    pub fn branch_name(&self) -> Result<String> {
        let head = self.repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    pub fn is_dirty(&self) -> Result<bool> {
        let statuses = self.repo.statuses(None)?;
        Ok(statuses
            .iter()
            .any(|s| !s.status().is_ignored()))
    }

    /// Working tree (plus index) against HEAD.
    pub fn uncommitted_diff(&self) -> Result<String> {
        let mut diff_options = DiffOptions::new();
        diff_options.include_untracked(true);

        let head = self.repo.head()?.peel_to_tree()?;
        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&head), Some(&mut diff_options))?;
        render_patch(&diff)
    }

    /// Index against HEAD.
    pub fn staged_diff(&self) -> Result<String> {
        let head = self.repo.head()?.peel_to_tree()?;
        let mut index = self.repo.index()?;
        let oid = index.write_tree()?;
        let index_tree = self.repo.find_tree(oid)?;

        let diff = self
            .repo
            .diff_tree_to_tree(Some(&head), Some(&index_tree), None)?;
        render_patch(&diff)
    }

    /// `base..head` where either side is any revspec; `since` maps to
    /// `<ref>..HEAD`.
    pub fn range_diff(&self, base: &str, head: &str) -> Result<String> {
        let base_tree = self.repo.revparse_single(base)?.peel_to_commit()?.tree()?;
        let head_tree = self.repo.revparse_single(head)?.peel_to_commit()?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;
        render_patch(&diff)
    }

    /// One commit against its first parent (root commits diff against empty).
    pub fn commit_diff(&self, spec: &str) -> Result<String> {
        let commit = self.repo.revparse_single(spec)?.peel_to_commit()?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
        render_patch(&diff)
    }
}

fn render_patch(diff: &git2::Diff) -> Result<String> {
    let mut diff_text = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        match line.origin() {
            '+' | '-' | ' ' => diff_text.push(line.origin() as u8),
            _ => {}
        }
        diff_text.extend_from_slice(line.content());
        true
    })?;
    Ok(String::from_utf8_lossy(&diff_text).to_string())
}

/// Resolve the requested diff source to its text. Precedence mirrors the CLI:
/// explicit file or stdin first, then the git selectors, defaulting to the
/// uncommitted working-tree diff.
pub struct DiffRequest {
    pub staged: bool,
    pub uncommitted: bool,
    pub range: Option<String>,
    pub commit: Option<String>,
    pub since: Option<String>,
    pub diff_file: Option<PathBuf>,
    pub diff_stdin: bool,
}

pub fn resolve_diff(git: &GitIntegration, request: &DiffRequest) -> Result<(String, DiffSource)> {
    if let Some(path) = &request.diff_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read diff file {}", path.display()))?;
        return Ok((
            text,
            DiffSource {
                kind: DiffSourceKind::DiffFile,
                spec: path.display().to_string(),
            },
        ));
    }

    if request.diff_stdin {
        use std::io::Read;
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read diff from stdin")?;
        return Ok((
            text,
            DiffSource {
                kind: DiffSourceKind::DiffStdin,
                spec: "stdin".to_string(),
            },
        ));
    }

    if request.staged {
        return Ok((
            git.staged_diff()?,
            DiffSource {
                kind: DiffSourceKind::Staged,
                spec: "--staged".to_string(),
            },
        ));
    }

    if let Some(range) = &request.range {
        let (base, head) = range
            .split_once("..")
            .map(|(b, h)| (b.to_string(), h.trim_start_matches('.').to_string()))
            .unwrap_or_else(|| (range.clone(), "HEAD".to_string()));
        return Ok((
            git.range_diff(&base, &head)?,
            DiffSource {
                kind: DiffSourceKind::Range,
                spec: range.clone(),
            },
        ));
    }

    if let Some(commit) = &request.commit {
        return Ok((
            git.commit_diff(commit)?,
            DiffSource {
                kind: DiffSourceKind::Commit,
                spec: commit.clone(),
            },
        ));
    }

    if let Some(since) = &request.since {
        return Ok((
            git.range_diff(since, "HEAD")?,
            DiffSource {
                kind: DiffSourceKind::Since,
                spec: since.clone(),
            },
        ));
    }

    // --uncommitted and the no-selector default are the same source.
    let spec = if request.uncommitted {
        "--uncommitted"
    } else {
        "default"
    };
    Ok((
        git.uncommitted_diff()?,
        DiffSource {
            kind: DiffSourceKind::Uncommitted,
            spec: spec.to_string(),
        },
    ))
}
