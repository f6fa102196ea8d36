mod config;
mod core;
mod engine;
mod store;

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::core::git::{resolve_diff, DiffRequest, GitIntegration};
use crate::core::pipeline::{run_pipeline, PipelineOptions};
use crate::core::review::{
    DiffSource, DiffSourceKind, EngineProvenance, FindingKind, RepoInfo, ReviewDocument, RunMeta,
    REVIEW_DOCUMENT_VERSION,
};
use crate::engine::codex::is_engine_available;
use crate::engine::exec::ProcessExecutor;
use crate::store::RunStore;

/// Repo context file injected into engine prompts, truncated to this many
/// characters.
const CONTEXT_FILE: &str = ".diffstory/context.md";
const MAX_CONTEXT_CHARS: usize = 4000;
const CONTEXT_TRUNCATION_MARKER: &str = "[Truncated repo context]";

#[derive(Parser)]
#[command(name = "diffstory")]
#[command(about = "Turn a diff into a reviewable story: groups, notes, findings, annotations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true)]
    reasoning_effort: Option<String>,

    #[arg(long, global = true)]
    profile: Option<String>,

    #[arg(long, global = true, help = "Engine subprocess timeout in seconds")]
    timeout_secs: Option<u64>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Analyze a diff and persist the review as a new run")]
    Review {
        #[arg(long, help = "Review the staged (index) changes")]
        staged: bool,

        #[arg(long, help = "Review uncommitted working-tree changes (default)")]
        uncommitted: bool,

        #[arg(long, help = "Review a revision range, e.g. main..feature")]
        range: Option<String>,

        #[arg(long, help = "Review a single commit against its first parent")]
        commit: Option<String>,

        #[arg(long, help = "Review everything since a ref, i.e. <ref>..HEAD")]
        since: Option<String>,

        #[arg(long, value_name = "FILE", help = "Read the diff from a file")]
        diff_file: Option<PathBuf>,

        #[arg(long, help = "Read the diff from stdin")]
        diff_stdin: bool,

        #[arg(long, help = "Skip the engine, heuristic grouping only")]
        no_engine: bool,

        #[arg(long, help = "Print the full review document as JSON")]
        json: bool,
    },
    #[command(about = "List persisted runs, newest first")]
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
    #[command(about = "Export a run's review document")]
    Export {
        run_id: String,

        #[arg(long, default_value = "json")]
        format: ExportFormat,

        #[arg(short, long, help = "Output file path (prints to stdout if not provided)")]
        out: Option<PathBuf>,
    },
    #[command(about = "Check git, config, engine, and run store health")]
    Doctor,
    #[command(about = "Print the effective configuration")]
    Config,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ExportFormat {
    Json,
    Md,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::Config::load().unwrap_or_default();
    config.merge_with_cli(
        cli.model.clone(),
        cli.reasoning_effort.clone(),
        cli.profile.clone(),
        cli.timeout_secs,
    );

    match cli.command {
        Commands::Review {
            staged,
            uncommitted,
            range,
            commit,
            since,
            diff_file,
            diff_stdin,
            no_engine,
            json,
        } => {
            let request = DiffRequest {
                staged,
                uncommitted,
                range,
                commit,
                since,
                diff_file,
                diff_stdin,
            };
            review_command(config, request, no_engine, json).await?;
        }
        Commands::List { limit, json } => {
            list_command(limit, json).await?;
        }
        Commands::Export {
            run_id,
            format,
            out,
        } => {
            export_command(&run_id, format, out).await?;
        }
        Commands::Doctor => {
            doctor_command(config).await?;
        }
        Commands::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}

async fn review_command(
    config: config::Config,
    request: DiffRequest,
    no_engine: bool,
    json: bool,
) -> Result<()> {
    let git = GitIntegration::new(".").ok();

    let (diff_text, diff_source) = match &git {
        Some(git) => resolve_diff(git, &request)?,
        None => resolve_diff_without_repo(&request)?,
    };
    if diff_text.trim().is_empty() {
        println!("No changes found");
        return Ok(());
    }

    let repo = repo_info(git.as_ref())?;
    let repo_root = PathBuf::from(&repo.root);
    let repo_context = load_repo_context(&repo_root).await;

    let store = RunStore::new(&repo_root);
    let (run_id, paths) = store.create_run().await?;
    info!(%run_id, "starting review run");

    let engine_options = config.engine_options(Some(repo.root.clone()));
    let executor = ProcessExecutor::new(engine_options.timeout);
    let opts = PipelineOptions {
        executor: &executor,
        engine: &engine_options,
        thresholds: config.note_thresholds(),
        engine_dir: &paths.engine_dir,
        repo_context: repo_context.as_deref(),
        use_engine: !no_engine,
    };

    let output = run_pipeline(&diff_text, &opts).await;

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let flags_count = output
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::Flag)
        .count();

    let document = ReviewDocument {
        version: REVIEW_DOCUMENT_VERSION.to_string(),
        run_id: run_id.clone(),
        created_at: created_at.clone(),
        engine: EngineProvenance {
            used_engine: output.used_engine,
            model: engine_options.model.clone(),
            reasoning_effort: engine_options.reasoning_effort.clone(),
            fallback_reason: output.fallback_reason,
        },
        repo: repo.clone(),
        diff_source: diff_source.clone(),
        stats: output.stats,
        diff: output.diff,
        groups: output.groups,
        context_notes: output.context_notes,
        annotations: output.annotations,
        findings: output.findings,
    };
    let meta = RunMeta {
        run_id: run_id.clone(),
        created_at,
        repo_root: repo.root,
        branch: repo.branch,
        head_sha: repo.head_sha,
        dirty: repo.dirty,
        diff_source,
        stats: document.stats,
        groups_count: document.groups.len(),
        findings_count: document.findings.len(),
        flags_count,
    };

    store.write_review(&paths, &document, &diff_text).await?;
    store.write_meta(&paths, &meta).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print_review_summary(&document);
    }
    Ok(())
}

fn resolve_diff_without_repo(request: &DiffRequest) -> Result<(String, DiffSource)> {
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
    bail!("not in a git repository; pass --diff-file or --diff-stdin")
}

fn repo_info(git: Option<&GitIntegration>) -> Result<RepoInfo> {
    let Some(git) = git else {
        return Ok(RepoInfo {
            root: ".".to_string(),
            head_sha: String::new(),
            branch: String::new(),
            dirty: false,
        });
    };
    let root = git
        .workdir()
        .unwrap_or_else(|| PathBuf::from("."))
        .display()
        .to_string();
    Ok(RepoInfo {
        root,
        head_sha: git.head_sha().unwrap_or_default(),
        branch: git.branch_name().unwrap_or_default(),
        dirty: git.is_dirty()?,
    })
}

async fn load_repo_context(repo_root: &std::path::Path) -> Option<String> {
    let text = tokio::fs::read_to_string(repo_root.join(CONTEXT_FILE))
        .await
        .ok()?;
    let mut text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    if text.len() > MAX_CONTEXT_CHARS {
        let cut = text
            .char_indices()
            .nth(MAX_CONTEXT_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        text.truncate(cut);
        // Tell the engine the context is partial.
        text.push_str("\n\n");
        text.push_str(CONTEXT_TRUNCATION_MARKER);
    }
    Some(text)
}

fn print_review_summary(document: &ReviewDocument) {
    println!("Run {}", document.run_id);
    println!(
        "{} files, +{} -{}",
        document.stats.files_changed, document.stats.insertions, document.stats.deletions
    );
    if let Some(reason) = &document.engine.fallback_reason {
        println!("Engine: {}", reason);
    }
    println!();
    for group in &document.groups {
        println!("[{:?}] {}", group.risk, group.title);
    }
    if !document.findings.is_empty() {
        println!();
        for finding in &document.findings {
            println!("{:?}: {}", finding.kind, finding.title);
        }
    }
    println!();
    println!(
        "{} groups, {} notes, {} findings, {} annotations",
        document.groups.len(),
        document.context_notes.len(),
        document.findings.len(),
        document.annotations.len()
    );
    println!("Export with: diffstory export {}", document.run_id);
}

async fn list_command(limit: usize, json: bool) -> Result<()> {
    let store = run_store()?;
    let mut runs = store.list_runs().await?;
    runs.truncate(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }
    for meta in &runs {
        println!(
            "{}  {}  {}  {} files  {} groups  {} findings",
            meta.run_id,
            meta.created_at,
            meta.branch,
            meta.stats.files_changed,
            meta.groups_count,
            meta.findings_count
        );
    }
    Ok(())
}

async fn export_command(run_id: &str, format: ExportFormat, out: Option<PathBuf>) -> Result<()> {
    let store = run_store()?;
    let (document, _diff) = store.read_run(run_id).await?;

    let rendered = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&document)?,
        ExportFormat::Md => render_markdown(&document),
    };

    if let Some(path) = out {
        tokio::fs::write(&path, rendered)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    } else {
        println!("{}", rendered);
    }
    Ok(())
}

fn render_markdown(document: &ReviewDocument) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Review {}\n\n", document.run_id));
    out.push_str(&format!(
        "Branch `{}` at `{}` ({})\n\n",
        document.repo.branch, document.repo.head_sha, document.created_at
    ));
    out.push_str(&format!(
        "{} files changed, +{} -{}\n\n",
        document.stats.files_changed, document.stats.insertions, document.stats.deletions
    ));
    if let Some(reason) = &document.engine.fallback_reason {
        out.push_str(&format!("_{}_\n\n", reason));
    }

    out.push_str("## Groups\n\n");
    for group in &document.groups {
        out.push_str(&format!(
            "### {} (risk: {:?})\n\n{}\n\n",
            group.title, group.risk, group.rationale
        ));
        if let Some(focus) = &group.review_focus {
            for item in focus {
                out.push_str(&format!("- {}\n", item));
            }
            out.push('\n');
        }
        let notes: Vec<_> = document
            .context_notes
            .iter()
            .filter(|n| n.group_id == group.id)
            .collect();
        for note in notes {
            out.push_str(&format!("**{}**\n\n{}\n\n", note.title, note.body_markdown));
        }
    }

    if !document.findings.is_empty() {
        out.push_str("## Findings\n\n");
        for finding in &document.findings {
            out.push_str(&format!(
                "### {:?}: {} (confidence {:.0}%)\n\n{}\n\n",
                finding.kind,
                finding.title,
                finding.confidence * 100.0,
                finding.detail_markdown
            ));
            for evidence in &finding.evidence {
                let range = evidence
                    .line_range
                    .map(|(a, b)| format!(":{a}-{b}"))
                    .unwrap_or_default();
                out.push_str(&format!("- `{}{}`\n", evidence.file_path, range));
            }
            out.push('\n');
        }
    }

    if !document.annotations.is_empty() {
        out.push_str("## Annotations\n\n");
        for annotation in &document.annotations {
            out.push_str(&format!(
                "- `{}:{}` ({:?}) {} — {}\n",
                annotation.anchor.file_path,
                annotation.anchor.line,
                annotation.kind,
                annotation.title,
                annotation.body_markdown
            ));
        }
        out.push('\n');
    }

    out
}

async fn doctor_command(config: config::Config) -> Result<()> {
    let git = GitIntegration::new(".").ok();
    match &git {
        Some(git) => {
            let branch = git.branch_name().unwrap_or_default();
            println!("git: ok (branch {})", branch);
        }
        None => println!("git: not a repository"),
    }

    let engine_options = config.engine_options(None);
    let executor = ProcessExecutor::new(engine_options.timeout);
    if is_engine_available(&executor, &engine_options).await {
        println!(
            "engine: ok ({} / {})",
            engine_options.command, engine_options.model
        );
    } else {
        println!("engine: `{}` not available", engine_options.command);
    }

    match run_store() {
        Ok(store) => {
            let runs = store.list_runs().await?;
            println!("store: {} ({} runs)", store.runs_root().display(), runs.len());
        }
        Err(e) => println!("store: unavailable ({e})"),
    }
    Ok(())
}

fn run_store() -> Result<RunStore> {
    let root = GitIntegration::new(".")
        .ok()
        .and_then(|git| git.workdir())
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(RunStore::new(root))
}
