use serde::{Deserialize, Serialize};

use crate::core::diff_parser::{DiffStats, ParsedDiff};

pub const REVIEW_DOCUMENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One file's aggregated hunks plus derived category tags; the unit of
/// grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeUnit {
    pub id: String,
    pub file_path: String,
    pub hunk_ids: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewGroup {
    pub id: String,
    pub title: String,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_focus: Option<Vec<String>>,
    pub risk: RiskLevel,
    pub hunk_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_tests: Option<Vec<String>>,
}

/// Higher-level explanatory annotation tied to a group, not a single line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextNote {
    pub id: String,
    pub title: String,
    pub body_markdown: String,
    pub confidence: f64,
    pub group_id: String,
    pub hunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Bug,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Severe,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagClass {
    Investigate,
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    Open,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSide {
    Old,
    New,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<DiffSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(usize, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// A concrete bug or flagged risk tied to specific diff evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub kind: FindingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_class: Option<FlagClass>,
    pub confidence: f64,
    pub title: String,
    pub detail_markdown: String,
    pub evidence: Vec<Evidence>,
    pub status: FindingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Explain,
    Risk,
    Question,
    Test,
    Nit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationAnchor {
    pub file_path: String,
    pub side: DiffSide,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunk_id: Option<String>,
}

/// Inline annotation anchored to a single diff line, for hover tooltips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub kind: AnnotationKind,
    pub confidence: f64,
    pub title: String,
    pub body_markdown: String,
    pub anchor: AnnotationAnchor,
}

/// How the diff text was obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSource {
    pub kind: DiffSourceKind,
    pub spec: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffSourceKind {
    Staged,
    Uncommitted,
    Range,
    Commit,
    Since,
    DiffFile,
    DiffStdin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub root: String,
    pub head_sha: String,
    pub branch: String,
    pub dirty: bool,
}

/// Records whether the external engine produced the review, and why it fell
/// back if not. Downstream consumers treat heuristic-only results as valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineProvenance {
    pub used_engine: bool,
    pub model: String,
    pub reasoning_effort: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// The unit of persistence: one fully self-describing review per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDocument {
    pub version: String,
    pub run_id: String,
    pub created_at: String,
    pub engine: EngineProvenance,
    pub repo: RepoInfo,
    pub diff_source: DiffSource,
    pub stats: DiffStats,
    pub diff: ParsedDiff,
    pub groups: Vec<ReviewGroup>,
    pub context_notes: Vec<ContextNote>,
    pub annotations: Vec<Annotation>,
    pub findings: Vec<Finding>,
}

/// Listing record for one persisted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_id: String,
    pub created_at: String,
    pub repo_root: String,
    pub branch: String,
    pub head_sha: String,
    pub dirty: bool,
    pub diff_source: DiffSource,
    pub stats: DiffStats,
    pub groups_count: usize,
    pub findings_count: usize,
    pub flags_count: usize,
}
