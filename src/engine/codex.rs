use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::exec::CommandExecutor;

pub const DEFAULT_ENGINE_COMMAND: &str = "codex";
pub const DEFAULT_ENGINE_MODEL: &str = "gpt-5.2-codex";
pub const DEFAULT_REASONING_EFFORT: &str = "xhigh";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Invocation settings for the external reasoning engine subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    pub command: String,
    pub model: String,
    pub reasoning_effort: String,
    pub profile: Option<String>,
    pub workdir: Option<String>,
    pub timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            model: DEFAULT_ENGINE_MODEL.to_string(),
            reasoning_effort: DEFAULT_REASONING_EFFORT.to_string(),
            profile: None,
            workdir: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl EngineOptions {
    /// Argument vector for one `exec` run: read-only sandbox, declared output
    /// schema, single JSON document written to `output_path`, prompt on stdin.
    pub fn exec_args(&self, schema_path: &Path, output_path: &Path) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            "read-only".to_string(),
            "--output-schema".to_string(),
            schema_path.display().to_string(),
            "--output-last-message".to_string(),
            output_path.display().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--config".to_string(),
            format!("model_reasoning_effort={}", self.reasoning_effort),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        if let Some(workdir) = &self.workdir {
            args.push("--cd".to_string());
            args.push(workdir.clone());
        }
        args.push("-".to_string());
        args
    }
}

/// Probe whether the engine binary responds at all.
pub async fn is_engine_available(executor: &dyn CommandExecutor, options: &EngineOptions) -> bool {
    matches!(
        executor
            .execute(&options.command, &["--version".to_string()], "")
            .await,
        Ok(out) if out.success()
    )
}
