use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::review::{Annotation, ContextNote, Finding, ReviewGroup};

/// Why a raw engine output was rejected. `Json` means the text was not a JSON
/// document at all; `Schema` means it parsed but did not match the declared
/// shape.
#[derive(Debug, Clone)]
pub enum ValidationFailure {
    Json { message: String },
    Schema { issues: Vec<String> },
}

/// One engine task's expected output shape: a JSON schema document shipped to
/// the engine, plus typed deserialization and semantic checks on the way back.
pub trait TaskPayload: DeserializeOwned + Serialize {
    /// Task name used for audit file names and log lines.
    fn task_name() -> &'static str;

    /// JSON-schema document written next to the run for the engine to target.
    fn schema_json() -> Value;

    /// Semantic checks serde cannot express. Returns human-readable issues.
    fn check(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Validate raw engine output: JSON parse, typed deserialize, semantic checks.
/// Never returns partially-valid data.
pub fn validate<T: TaskPayload>(raw: &str) -> Result<T, ValidationFailure> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ValidationFailure::Json {
        message: e.to_string(),
    })?;
    let payload: T = serde_json::from_value(value).map_err(|e| ValidationFailure::Schema {
        issues: vec![e.to_string()],
    })?;
    let issues = payload.check();
    if !issues.is_empty() {
        return Err(ValidationFailure::Schema { issues });
    }
    Ok(payload)
}

fn check_confidence(issues: &mut Vec<String>, what: &str, id: &str, confidence: f64) {
    if !(0.0..=1.0).contains(&confidence) {
        issues.push(format!(
            "{what} `{id}`: confidence {confidence} outside [0, 1]"
        ));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingPayload {
    pub groups: Vec<ReviewGroup>,
}

impl TaskPayload for GroupingPayload {
    fn task_name() -> &'static str {
        "grouping"
    }

    fn schema_json() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["groups"],
            "additionalProperties": false,
            "properties": {
                "groups": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "title", "rationale", "risk", "hunkIds"],
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "rationale": { "type": "string" },
                            "reviewFocus": { "type": ["array", "null"], "items": { "type": "string" } },
                            "risk": { "enum": ["low", "medium", "high"] },
                            "hunkIds": { "type": "array", "items": { "type": "string" } },
                            "suggestedTests": { "type": ["array", "null"], "items": { "type": "string" } }
                        }
                    }
                }
            }
        })
    }

    fn check(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for group in &self.groups {
            if group.hunk_ids.is_empty() {
                issues.push(format!("group `{}`: empty hunkIds", group.id));
            }
        }
        issues
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPayload {
    pub findings: Vec<Finding>,
    pub context_notes: Vec<ContextNote>,
}

impl TaskPayload for ReviewPayload {
    fn task_name() -> &'static str {
        "review"
    }

    fn schema_json() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["findings", "contextNotes"],
            "additionalProperties": false,
            "properties": {
                "findings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "kind", "confidence", "title", "detailMarkdown", "evidence", "status"],
                        "properties": {
                            "id": { "type": "string" },
                            "kind": { "enum": ["bug", "flag"] },
                            "severity": { "enum": ["severe", "normal", null] },
                            "flagClass": { "enum": ["investigate", "informational", null] },
                            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                            "title": { "type": "string" },
                            "detailMarkdown": { "type": "string" },
                            "evidence": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "required": ["filePath"],
                                    "properties": {
                                        "filePath": { "type": "string" },
                                        "side": { "enum": ["old", "new", null] },
                                        "lineRange": {
                                            "type": ["array", "null"],
                                            "items": { "type": "integer", "minimum": 1 },
                                            "minItems": 2,
                                            "maxItems": 2
                                        },
                                        "hunkId": { "type": ["string", "null"] },
                                        "excerpt": { "type": ["string", "null"] }
                                    }
                                }
                            },
                            "status": { "enum": ["open", "resolved", "dismissed"] }
                        }
                    }
                },
                "contextNotes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "title", "bodyMarkdown", "confidence", "groupId", "hunkIds"],
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "bodyMarkdown": { "type": "string" },
                            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                            "groupId": { "type": "string" },
                            "hunkIds": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                }
            }
        })
    }

    fn check(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for finding in &self.findings {
            check_confidence(&mut issues, "finding", &finding.id, finding.confidence);
            if finding.evidence.is_empty() {
                issues.push(format!("finding `{}`: no evidence", finding.id));
            }
        }
        for note in &self.context_notes {
            check_confidence(&mut issues, "context note", &note.id, note.confidence);
        }
        issues
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationsPayload {
    pub annotations: Vec<Annotation>,
}

impl TaskPayload for AnnotationsPayload {
    fn task_name() -> &'static str {
        "annotations"
    }

    fn schema_json() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["annotations"],
            "additionalProperties": false,
            "properties": {
                "annotations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "kind", "confidence", "title", "bodyMarkdown", "anchor"],
                        "properties": {
                            "id": { "type": "string" },
                            "kind": { "enum": ["explain", "risk", "question", "test", "nit"] },
                            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                            "title": { "type": "string" },
                            "bodyMarkdown": { "type": "string" },
                            "anchor": {
                                "type": "object",
                                "required": ["filePath", "side", "line"],
                                "properties": {
                                    "filePath": { "type": "string" },
                                    "side": { "enum": ["old", "new"] },
                                    "line": { "type": "integer", "minimum": 1 },
                                    "hunkId": { "type": ["string", "null"] }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    fn check(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for annotation in &self.annotations {
            check_confidence(&mut issues, "annotation", &annotation.id, annotation.confidence);
            if annotation.anchor.line == 0 {
                issues.push(format!("annotation `{}`: line must be positive", annotation.id));
            }
        }
        issues
    }
}
