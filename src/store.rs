use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;
use ulid::Ulid;

use crate::core::review::{ReviewDocument, RunMeta};

/// Append-only on-disk run store: one exclusively-owned directory per run
/// under `.diffstory/runs/`, identified by a time-sortable ULID. No locking;
/// ids are unique and never reused.
pub struct RunStore {
    runs_root: PathBuf,
}

/// Paths inside one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub meta_path: PathBuf,
    pub diff_path: PathBuf,
    pub review_path: PathBuf,
    pub engine_dir: PathBuf,
}

impl RunStore {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            runs_root: repo_root.as_ref().join(".diffstory").join("runs"),
        }
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    pub async fn create_run(&self) -> Result<(String, RunPaths)> {
        let run_id = Ulid::new().to_string();
        let paths = self.paths_for(&run_id);
        tokio::fs::create_dir_all(&paths.engine_dir)
            .await
            .with_context(|| format!("failed to create run dir {}", paths.run_dir.display()))?;
        Ok((run_id, paths))
    }

    pub fn paths_for(&self, run_id: &str) -> RunPaths {
        let run_dir = self.runs_root.join(run_id);
        RunPaths {
            meta_path: run_dir.join("meta.json"),
            diff_path: run_dir.join("diff.patch"),
            review_path: run_dir.join("review.json"),
            engine_dir: run_dir.join("engine"),
            run_dir,
        }
    }

    pub async fn write_review(
        &self,
        paths: &RunPaths,
        review: &ReviewDocument,
        diff_text: &str,
    ) -> Result<()> {
        let json = serde_json::to_string_pretty(review)?;
        tokio::fs::write(&paths.review_path, json)
            .await
            .with_context(|| format!("failed to write {}", paths.review_path.display()))?;
        tokio::fs::write(&paths.diff_path, diff_text)
            .await
            .with_context(|| format!("failed to write {}", paths.diff_path.display()))?;
        Ok(())
    }

    pub async fn write_meta(&self, paths: &RunPaths, meta: &RunMeta) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(&paths.meta_path, json)
            .await
            .with_context(|| format!("failed to write {}", paths.meta_path.display()))
    }

    pub async fn read_run(&self, run_id: &str) -> Result<(ReviewDocument, String)> {
        let paths = self.paths_for(run_id);
        let review_raw = tokio::fs::read_to_string(&paths.review_path)
            .await
            .with_context(|| format!("run {run_id} has no review.json"))?;
        let diff_raw = tokio::fs::read_to_string(&paths.diff_path)
            .await
            .with_context(|| format!("run {run_id} has no diff.patch"))?;
        let review = serde_json::from_str(&review_raw)
            .with_context(|| format!("run {run_id}: review.json is corrupt"))?;
        Ok((review, diff_raw))
    }

    /// All runs with a readable meta.json, newest first. Unreadable entries
    /// are skipped, not fatal.
    pub async fn list_runs(&self) -> Result<Vec<RunMeta>> {
        let mut metas = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.runs_root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(metas),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let meta_path = entry.path().join("meta.json");
            let raw = match tokio::fs::read_to_string(&meta_path).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match serde_json::from_str::<RunMeta>(&raw) {
                Ok(meta) => metas.push(meta),
                Err(e) => {
                    warn!(path = %meta_path.display(), error = %e, "skipping unreadable run meta");
                }
            }
        }

        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::review::*;

    fn sample_document(run_id: &str, created_at: &str) -> ReviewDocument {
        ReviewDocument {
            version: REVIEW_DOCUMENT_VERSION.to_string(),
            run_id: run_id.to_string(),
            created_at: created_at.to_string(),
            engine: EngineProvenance {
                used_engine: false,
                model: "m".to_string(),
                reasoning_effort: "high".to_string(),
                fallback_reason: Some("engine unavailable".to_string()),
            },
            repo: RepoInfo {
                root: "/repo".to_string(),
                head_sha: "abc".to_string(),
                branch: "main".to_string(),
                dirty: false,
            },
            diff_source: DiffSource {
                kind: DiffSourceKind::Uncommitted,
                spec: "--uncommitted".to_string(),
            },
            stats: Default::default(),
            diff: Default::default(),
            groups: Vec::new(),
            context_notes: Vec::new(),
            annotations: Vec::new(),
            findings: Vec::new(),
        }
    }

    fn meta_for(doc: &ReviewDocument) -> RunMeta {
        RunMeta {
            run_id: doc.run_id.clone(),
            created_at: doc.created_at.clone(),
            repo_root: doc.repo.root.clone(),
            branch: doc.repo.branch.clone(),
            head_sha: doc.repo.head_sha.clone(),
            dirty: doc.repo.dirty,
            diff_source: doc.diff_source.clone(),
            stats: doc.stats,
            groups_count: 0,
            findings_count: 0,
            flags_count: 0,
        }
    }

    #[tokio::test]
    async fn round_trips_a_review_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let (run_id, paths) = store.create_run().await.unwrap();

        let doc = sample_document(&run_id, "2025-01-01T00:00:00Z");
        store
            .write_review(&paths, &doc, "diff --git a/x b/x\n")
            .await
            .unwrap();
        store.write_meta(&paths, &meta_for(&doc)).await.unwrap();

        let (read, diff) = store.read_run(&run_id).await.unwrap();
        assert_eq!(read.run_id, run_id);
        assert_eq!(diff, "diff --git a/x b/x\n");
        assert_eq!(read.engine.fallback_reason.as_deref(), Some("engine unavailable"));
    }

    #[tokio::test]
    async fn lists_runs_newest_first_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());

        for (run_id, created_at) in [("a", "2025-01-01T00:00:00Z"), ("b", "2025-06-01T00:00:00Z")] {
            let paths = store.paths_for(run_id);
            tokio::fs::create_dir_all(&paths.engine_dir).await.unwrap();
            let doc = sample_document(run_id, created_at);
            store.write_review(&paths, &doc, "").await.unwrap();
            store.write_meta(&paths, &meta_for(&doc)).await.unwrap();
        }
        // A run directory without meta.json must not break listing.
        tokio::fs::create_dir_all(store.runs_root().join("broken"))
            .await
            .unwrap();

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "b");
        assert_eq!(runs[1].run_id, "a");
    }

    #[tokio::test]
    async fn listing_with_no_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_ids_are_unique_and_time_sortable() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let (a, _) = store.create_run().await.unwrap();
        let (b, _) = store.create_run().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }
}
