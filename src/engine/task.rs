use std::path::{Path, PathBuf};

use anyhow::Context;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::codex::EngineOptions;
use crate::engine::exec::CommandExecutor;
use crate::engine::schema::{validate, TaskPayload, ValidationFailure};

/// Terminal failure of one engine task. Execution failures are never retried;
/// parse/validation failures get exactly one repair attempt before landing
/// here with full diagnostics.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("engine task `{task}` failed to execute: {detail}")]
    Execution { task: String, detail: String },

    #[error("engine task `{task}` produced invalid JSON ({message}); raw output kept at {output_path}")]
    Json {
        task: String,
        message: String,
        output_path: PathBuf,
    },

    #[error("engine task `{task}` failed schema validation ({}); raw output kept at {output_path}", issues.join("; "))]
    Schema {
        task: String,
        issues: Vec<String>,
        output_path: PathBuf,
    },
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Everything one task invocation needs: the subprocess seam, engine
/// settings, and the run-scoped directory where the audit trail lands.
pub struct TaskContext<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub options: &'a EngineOptions,
    pub task_dir: &'a Path,
}

/// Drive the external engine through one schema-validated task.
///
/// Protocol: persist prompt and schema, invoke the engine with the prompt on
/// stdin and the output location declared, then read and validate the output.
/// A JSON or schema failure earns exactly one repair attempt (schema + raw
/// invalid output + fix instruction through the same protocol); a second
/// failure is surfaced with the diagnostics and the raw output location.
/// Subprocess failures are fatal to the task immediately.
pub async fn run_task<T: TaskPayload>(ctx: &TaskContext<'_>, prompt: &str) -> TaskResult<T> {
    run_task_named(ctx, T::task_name(), prompt).await
}

/// [`run_task`] with an explicit task name, for running the same payload
/// shape more than once per run without the audit files colliding.
pub async fn run_task_named<T: TaskPayload>(
    ctx: &TaskContext<'_>,
    task: &str,
    prompt: &str,
) -> TaskResult<T> {
    let schema = T::schema_json();
    let schema_text = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| schema.to_string());

    let prompt_path = ctx.task_dir.join(format!("{task}.prompt.txt"));
    let schema_path = ctx.task_dir.join(format!("{task}.schema.json"));
    let output_path = ctx.task_dir.join(format!("{task}.result.json"));
    let parsed_path = ctx.task_dir.join(format!("{task}.output.json"));

    prepare_dir(ctx.task_dir, task).await?;
    write_audit(&prompt_path, prompt, task).await?;
    write_audit(&schema_path, &schema_text, task).await?;

    info!(task, "running engine task");
    execute_once(ctx, task, &schema_path, &output_path, prompt).await?;
    let raw = read_output(task, &output_path).await?;

    if let Ok(payload) = validate::<T>(&raw) {
        persist_parsed(&parsed_path, &payload, task).await?;
        return Ok(payload);
    }

    warn!(task, "engine output rejected, attempting one repair");
    // Keep the rejected output around; the retry will overwrite output_path.
    let invalid_path = ctx.task_dir.join(format!("{task}.invalid.json"));
    write_audit(&invalid_path, &raw, task).await?;

    let repair_prompt = build_repair_prompt(&schema_text, &raw);
    let repair_path = ctx.task_dir.join(format!("{task}.repair.prompt.txt"));
    write_audit(&repair_path, &repair_prompt, task).await?;

    execute_once(ctx, task, &schema_path, &output_path, &repair_prompt).await?;
    let raw = read_output(task, &output_path).await?;

    match validate::<T>(&raw) {
        Ok(payload) => {
            persist_parsed(&parsed_path, &payload, task).await?;
            Ok(payload)
        }
        // No second repair: surface whichever failure the repair produced.
        // The first attempt's rejected output stays at `invalid_path`.
        Err(ValidationFailure::Json { message }) => Err(TaskError::Json {
            task: task.to_string(),
            message,
            output_path,
        }),
        Err(ValidationFailure::Schema { issues }) => Err(TaskError::Schema {
            task: task.to_string(),
            issues,
            output_path,
        }),
    }
}

async fn execute_once(
    ctx: &TaskContext<'_>,
    task: &str,
    schema_path: &Path,
    output_path: &Path,
    prompt: &str,
) -> Result<(), TaskError> {
    let args = ctx.options.exec_args(schema_path, output_path);
    let output = ctx
        .executor
        .execute(&ctx.options.command, &args, prompt)
        .await
        .map_err(|e| TaskError::Execution {
            task: task.to_string(),
            detail: format!("{e:#}"),
        })?;

    if !output.success() {
        return Err(TaskError::Execution {
            task: task.to_string(),
            detail: format!(
                "`{}` exited with code {}: {}",
                ctx.options.command,
                output.exit_code,
                truncate(&output.stderr, 500)
            ),
        });
    }
    Ok(())
}

async fn read_output(task: &str, output_path: &Path) -> Result<String, TaskError> {
    tokio::fs::read_to_string(output_path)
        .await
        .map_err(|e| TaskError::Execution {
            task: task.to_string(),
            detail: format!("no output produced at {}: {e}", output_path.display()),
        })
}

fn build_repair_prompt(schema_text: &str, raw: &str) -> String {
    [
        "You returned invalid JSON for the schema.",
        "Fix the JSON to match the schema exactly. Return JSON only.",
        "---",
        "Schema:",
        schema_text,
        "---",
        "Invalid JSON:",
        raw,
    ]
    .join("\n")
}

async fn prepare_dir(dir: &Path, task: &str) -> Result<(), TaskError> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create task dir {}", dir.display()))
        .map_err(|e| TaskError::Execution {
            task: task.to_string(),
            detail: format!("{e:#}"),
        })
}

async fn write_audit(path: &Path, contents: &str, task: &str) -> Result<(), TaskError> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
        .map_err(|e| TaskError::Execution {
            task: task.to_string(),
            detail: format!("{e:#}"),
        })
}

async fn persist_parsed<T: TaskPayload>(
    path: &Path,
    payload: &T,
    task: &str,
) -> Result<(), TaskError> {
    let text = serde_json::to_string_pretty(payload).map_err(|e| TaskError::Execution {
        task: task.to_string(),
        detail: format!("failed to serialize parsed output: {e}"),
    })?;
    write_audit(path, &text, task).await
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
