use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::core::change_units::build_change_units;
use crate::core::diff_parser::{self, DiffStats, ParsedDiff};
use crate::core::grouping::heuristic_groups;
use crate::core::normalize::{filter_annotations, merge_findings, normalize_notes};
use crate::core::prompt::{
    build_annotations_prompt, build_grouping_prompt, build_review_prompt, compute_review_targets,
    NoteThresholds,
};
use crate::core::review::{Annotation, ChangeUnit, ContextNote, Finding, ReviewGroup};
use crate::engine::codex::{is_engine_available, EngineOptions};
use crate::engine::exec::CommandExecutor;
use crate::engine::schema::{AnnotationsPayload, GroupingPayload, ReviewPayload};
use crate::engine::task::{run_task, run_task_named, TaskContext};

/// Everything one pipeline run needs beyond the diff text itself.
pub struct PipelineOptions<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub engine: &'a EngineOptions,
    pub thresholds: NoteThresholds,
    /// Run-scoped directory where each task's audit trail lands.
    pub engine_dir: &'a Path,
    pub repo_context: Option<&'a str>,
    /// `false` skips the engine entirely (heuristic-only review).
    pub use_engine: bool,
}

/// The analyzed review, ready to be wrapped into a persisted document.
pub struct PipelineOutput {
    pub diff: ParsedDiff,
    pub stats: DiffStats,
    pub change_units: Vec<ChangeUnit>,
    pub groups: Vec<ReviewGroup>,
    pub context_notes: Vec<ContextNote>,
    pub findings: Vec<Finding>,
    pub annotations: Vec<Annotation>,
    pub used_engine: bool,
    pub fallback_reason: Option<String>,
}

/// Run the full analysis over one diff.
///
/// The heuristic baseline always exists; each engine stage (grouping, review,
/// annotations) upgrades it when it succeeds and degrades gracefully when it
/// does not. A stage failure is recorded, never fatal: the run always produces
/// a complete document.
pub async fn run_pipeline(diff_text: &str, opts: &PipelineOptions<'_>) -> PipelineOutput {
    let diff = diff_parser::parse(diff_text);
    let stats = diff_parser::compute_stats(&diff);
    let change_units = build_change_units(&diff);
    let mut groups = heuristic_groups(&change_units);
    let known_hunks = diff.hunk_ids();

    info!(
        files = stats.files_changed,
        hunks = known_hunks.len(),
        groups = groups.len(),
        "built heuristic baseline"
    );

    let mut output = PipelineOutput {
        diff,
        stats,
        change_units,
        groups: Vec::new(),
        context_notes: Vec::new(),
        findings: Vec::new(),
        annotations: Vec::new(),
        used_engine: false,
        fallback_reason: None,
    };

    let mut reasons: Vec<String> = Vec::new();

    if !opts.use_engine {
        reasons.push("engine disabled; used heuristic grouping".to_string());
    } else if !is_engine_available(opts.executor, opts.engine).await {
        reasons.push("engine is not available; used heuristic grouping".to_string());
    } else {
        let ctx = TaskContext {
            executor: opts.executor,
            options: opts.engine,
            task_dir: opts.engine_dir,
        };

        // Grouping: the engine proposes a narrative ordering; anything it
        // fabricates is pruned against the real diff before we trust it.
        let grouping_prompt = build_grouping_prompt(
            &output.diff,
            &output.change_units,
            &groups,
            opts.repo_context,
        );
        match run_task::<GroupingPayload>(&ctx, &grouping_prompt).await {
            Ok(payload) => {
                let sanitized = sanitize_groups(payload.groups, &known_hunks);
                if sanitized.is_empty() {
                    warn!("engine grouping had no usable groups, keeping heuristic");
                    reasons.push("engine grouping was unusable; kept heuristic groups".to_string());
                } else {
                    groups = sanitized;
                    output.used_engine = true;
                }
            }
            Err(e) => {
                warn!(error = %e, "engine grouping failed, keeping heuristic");
                reasons.push(format!("grouping failed: {e}"));
            }
        }

        // Review: notes and findings, with one refinement pass when the
        // first comes back under target.
        let targets =
            compute_review_targets(&output.stats, &output.change_units, &groups, opts.thresholds);
        let review_prompt = build_review_prompt(
            &output.diff,
            &output.change_units,
            &groups,
            &targets,
            opts.repo_context,
        );
        match run_task::<ReviewPayload>(&ctx, &review_prompt).await {
            Ok(payload) => {
                output.used_engine = true;
                let mut notes = normalize_notes(payload.context_notes, &groups, targets.max_notes);
                let mut findings = payload.findings;

                if notes.len() < targets.min_notes {
                    debug!(
                        got = notes.len(),
                        min = targets.min_notes,
                        "notes under target, running refinement pass"
                    );
                    let second = targets.second_pass();
                    let prompt = build_review_prompt(
                        &output.diff,
                        &output.change_units,
                        &groups,
                        &second,
                        opts.repo_context,
                    );
                    // Its own task name so the audit files from the first
                    // pass survive alongside it.
                    match run_task_named::<ReviewPayload>(&ctx, "review-refine", &prompt).await {
                        Ok(refined) => {
                            let refined_notes =
                                normalize_notes(refined.context_notes, &groups, second.max_notes);
                            if refined_notes.len() >= notes.len() {
                                notes = refined_notes;
                            }
                            findings = merge_findings(findings, refined.findings);
                        }
                        Err(e) => {
                            warn!(error = %e, "refinement pass failed, keeping first-pass results");
                            reasons.push(format!("refinement pass failed: {e}"));
                        }
                    }
                }

                output.context_notes = notes;
                output.findings = merge_findings(findings, Vec::new());
            }
            Err(e) => {
                warn!(error = %e, "engine review failed, no notes or findings");
                reasons.push(format!("review failed: {e}"));
            }
        }

        // Annotations: inline anchors, best effort.
        let annotations_prompt = build_annotations_prompt(&output.diff, &groups);
        match run_task::<AnnotationsPayload>(&ctx, &annotations_prompt).await {
            Ok(payload) => {
                output.used_engine = true;
                output.annotations = filter_annotations(payload.annotations, &known_hunks);
            }
            Err(e) => {
                warn!(error = %e, "engine annotations failed, none recorded");
                reasons.push(format!("annotations failed: {e}"));
            }
        }
    }

    output.groups = groups;
    output.fallback_reason = if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    };
    output
}

/// Keep only hunk ids that exist in the diff; drop groups left empty.
fn sanitize_groups(groups: Vec<ReviewGroup>, known_hunks: &[String]) -> Vec<ReviewGroup> {
    let known: HashSet<&str> = known_hunks.iter().map(String::as_str).collect();
    groups
        .into_iter()
        .filter_map(|mut group| {
            group.hunk_ids.retain(|id| known.contains(id.as_str()));
            if group.hunk_ids.is_empty() {
                None
            } else {
                Some(group)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::exec::ExecOutput;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DIFF: &str = "diff --git a/a.rs b/a.rs\n\
                        --- a/a.rs\n\
                        +++ b/a.rs\n\
                        @@ -1,1 +1,2 @@\n \
                        fn main() {}\n\
                        +// new\n";

    /// Pops one scripted response per engine invocation after answering the
    /// `--version` probe; writes `Ok` responses to the declared output path.
    struct ScriptedEngine {
        responses: Mutex<Vec<Result<String, i32>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedEngine {
        fn new(responses: Vec<Result<String, i32>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedEngine {
        async fn execute(&self, _command: &str, args: &[String], _stdin: &str) -> Result<ExecOutput> {
            *self.calls.lock().unwrap() += 1;
            if args.len() == 1 && args[0] == "--version" {
                return Ok(ExecOutput {
                    exit_code: 0,
                    stdout: "codex 1.0".to_string(),
                    stderr: String::new(),
                });
            }
            let output_path = args
                .iter()
                .position(|a| a == "--output-last-message")
                .map(|i| args[i + 1].clone())
                .expect("output path declared");
            match self.responses.lock().unwrap().remove(0) {
                Ok(text) => {
                    std::fs::write(&output_path, text)?;
                    Ok(ExecOutput {
                        exit_code: 0,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                }
                Err(code) => Ok(ExecOutput {
                    exit_code: code,
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                }),
            }
        }
    }

    struct OfflineEngine;

    #[async_trait]
    impl CommandExecutor for OfflineEngine {
        async fn execute(
            &self,
            _command: &str,
            _args: &[String],
            _stdin: &str,
        ) -> Result<ExecOutput> {
            Ok(ExecOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: "command not found".to_string(),
            })
        }
    }

    fn grouping_json() -> String {
        r#"{
            "groups": [{
                "id": "g1",
                "title": "Extend main",
                "rationale": "One cohesive edit.",
                "risk": "low",
                "hunkIds": ["a.rs:1,1:1,2", "fabricated:9,9:9,9"]
            }]
        }"#
        .to_string()
    }

    fn review_json(finding_id: &str) -> String {
        format!(
            r#"{{
                "findings": [{{
                    "id": "{finding_id}",
                    "kind": "flag",
                    "flagClass": "investigate",
                    "confidence": 0.7,
                    "title": "Check {finding_id}",
                    "detailMarkdown": "Look closer.",
                    "evidence": [{{"filePath": "a.rs", "hunkId": "a.rs:1,1:1,2"}}],
                    "status": "open"
                }}],
                "contextNotes": []
            }}"#
        )
    }

    fn annotations_json() -> String {
        r#"{
            "annotations": [
                {
                    "id": "a1",
                    "kind": "explain",
                    "confidence": 0.6,
                    "title": "New comment",
                    "bodyMarkdown": "Marks future work.",
                    "anchor": {"filePath": "a.rs", "side": "new", "line": 2, "hunkId": "a.rs:1,1:1,2"}
                },
                {
                    "id": "a2",
                    "kind": "risk",
                    "confidence": 0.6,
                    "title": "Phantom",
                    "bodyMarkdown": "Anchored nowhere real.",
                    "anchor": {"filePath": "a.rs", "side": "new", "line": 9, "hunkId": "nope:1,1:1,1"}
                }
            ]
        }"#
        .to_string()
    }

    fn pipeline_opts<'a>(
        executor: &'a dyn CommandExecutor,
        engine: &'a EngineOptions,
        dir: &'a Path,
    ) -> PipelineOptions<'a> {
        PipelineOptions {
            executor,
            engine,
            thresholds: NoteThresholds::default(),
            engine_dir: dir,
            repo_context: None,
            use_engine: true,
        }
    }

    #[tokio::test]
    async fn unavailable_engine_falls_back_to_heuristics() {
        let dir = tempfile::tempdir().unwrap();
        let engine = OfflineEngine;
        let options = EngineOptions::default();
        let out = run_pipeline(DIFF, &pipeline_opts(&engine, &options, dir.path())).await;

        assert!(!out.used_engine);
        assert_eq!(out.groups.len(), 1);
        assert!(out.groups[0].id.starts_with("heuristic-"));
        assert!(out
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("not available"));
        assert!(out.findings.is_empty());
    }

    #[tokio::test]
    async fn disabled_engine_never_spawns_a_process() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new(vec![]);
        let options = EngineOptions::default();
        let mut opts = pipeline_opts(&engine, &options, dir.path());
        opts.use_engine = false;

        let out = run_pipeline(DIFF, &opts).await;
        assert!(!out.used_engine);
        assert_eq!(*engine.calls.lock().unwrap(), 0);
        assert!(out.fallback_reason.as_deref().unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn full_engine_path_runs_refinement_when_under_target() {
        let dir = tempfile::tempdir().unwrap();
        // Grouping, review pass 1 (zero notes, under min target of 2), review
        // pass 2, annotations.
        let engine = ScriptedEngine::new(vec![
            Ok(grouping_json()),
            Ok(review_json("f1")),
            Ok(review_json("f2")),
            Ok(annotations_json()),
        ]);
        let options = EngineOptions::default();
        let out = run_pipeline(DIFF, &pipeline_opts(&engine, &options, dir.path())).await;

        assert!(out.used_engine);
        assert!(out.fallback_reason.is_none());

        // Fabricated hunk pruned from the engine grouping.
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].id, "g1");
        assert_eq!(out.groups[0].hunk_ids, vec!["a.rs:1,1:1,2".to_string()]);

        // Both passes contributed findings; phantom annotation dropped.
        let ids: Vec<&str> = out.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);
        assert_eq!(out.annotations.len(), 1);
        assert_eq!(out.annotations[0].id, "a1");

        // Each pass keeps its own audit trail.
        let first = std::fs::read_to_string(dir.path().join("review.output.json")).unwrap();
        assert!(first.contains("f1"));
        assert!(!first.contains("f2"));
        let second =
            std::fs::read_to_string(dir.path().join("review-refine.output.json")).unwrap();
        assert!(second.contains("f2"));
        let refine_prompt =
            std::fs::read_to_string(dir.path().join("review-refine.prompt.txt")).unwrap();
        assert!(refine_prompt.contains("second pass"));
    }

    #[tokio::test]
    async fn grouping_failure_degrades_to_heuristics_but_review_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        // Grouping fails outright; review pass 1 and 2 succeed; annotations fail.
        let engine = ScriptedEngine::new(vec![
            Err(1),
            Ok(review_json("f1")),
            Ok(review_json("f1")),
            Err(1),
        ]);
        let options = EngineOptions::default();
        let out = run_pipeline(DIFF, &pipeline_opts(&engine, &options, dir.path())).await;

        assert!(out.used_engine);
        assert!(out.groups[0].id.starts_with("heuristic-"));
        // Identical second-pass finding deduplicated.
        assert_eq!(out.findings.len(), 1);
        let reason = out.fallback_reason.unwrap();
        assert!(reason.contains("grouping failed"));
        assert!(reason.contains("annotations failed"));
    }
}
