//! pyrefly-autotype - Supervised type-annotation refinement for Python
//!
//! Command-line front end for the refinement engine, the project context
//! aggregator, and the line-delimited JSON tool server.

use anyhow::Context as _;
use autotype::backup::restore_from;
use autotype::config::AutotypeConfig;
use autotype::diagnostics::Diagnostic;
use autotype::error::{AutotypeError, InvocationFailure};
use autotype::invoker::{AnnotationMode, CancelToken, InvokerConfig, PyreflyInvoker, TypeTool};
use autotype::project::prioritize;
use autotype::refine::{
    BatchEntry, RefineOptions, RefinementController, RefinementSession, TaskStatus,
};
use autotype::tools::{self, AnalyzeArgs, ProjectContextArgs, ToolServer};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pyrefly-autotype")]
#[command(version)]
#[command(about = "Supervised type-annotation refinement for Python files using Pyrefly", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate files and re-check them until they pass or the round cap is hit
    AddTypes {
        /// Python files to refine
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Do not snapshot files before mutating them
        #[arg(long)]
        no_backup: bool,

        /// Delete the snapshot of files that passed
        #[arg(long, conflicts_with = "no_backup")]
        discard_backup: bool,

        /// Annotation mode (defaults to the configured mode)
        #[arg(long, value_enum)]
        mode: Option<AnnotationMode>,

        /// Maximum annotate/check rounds per file (1-10)
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Type-check a file once
    Check {
        file: PathBuf,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Report missing annotations without modifying the file
    Analyze {
        file: PathBuf,

        /// Include per-item locations and the checker's diagnostics
        #[arg(long)]
        detailed: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Summarize annotation coverage across the project
    Context {
        /// Also run the checker on every file and the whole project
        #[arg(long)]
        eager: bool,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore a file from its backup artifact
    Restore {
        /// Path to a `.autotype.bak` file
        backup: PathBuf,
    },

    /// List available tools and their input schemas
    Tools {
        /// Output JSON descriptors
        #[arg(long)]
        json: bool,
    },

    /// Serve tool calls as line-delimited JSON over stdin/stdout
    Serve,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "autotype=debug,pyrefly_autotype=debug,info"
    } else {
        "autotype=info,pyrefly_autotype=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            e.downcast_ref::<AutotypeError>()
                .map_or(1, AutotypeError::exit_code)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let project = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project.is_dir() {
        return Err(AutotypeError::FileNotFound { path: project }.into());
    }

    match cli.command {
        Commands::AddTypes {
            files,
            no_backup,
            discard_backup,
            mode,
            max_rounds,
            json,
        } => {
            let mut config = load_config(&project)?;
            if no_backup {
                config = config.with_backup(false);
            }
            if let Some(mode) = mode {
                config = config.with_mode(mode);
            }
            if let Some(rounds) = max_rounds {
                config = config.with_max_rounds(rounds);
            }
            config.validate()?;
            add_types(&config, files, discard_backup, json).await
        }

        Commands::Check { file, json } => {
            let config = load_config(&project)?;
            config.validate()?;
            let invoker = PyreflyInvoker::new(InvokerConfig::resolve(&config));
            let cancel = cancel_on_ctrl_c();
            let result = invoker.run_check(&absolute(&file)?, &cancel).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.diagnostics.is_empty() {
                println!("{} {} passed", "✓".green().bold(), file.display());
            } else {
                print_diagnostics(&result.diagnostics);
                println!(
                    "\n{} {} error(s), {} warning(s)",
                    if result.passed() { "✓".green().bold() } else { "✗".red().bold() },
                    result.error_count(),
                    result.diagnostics.len() - result.error_count()
                );
            }
            Ok(if result.passed() { 0 } else { 1 })
        }

        Commands::Analyze {
            file,
            detailed,
            json,
        } => {
            let server = ToolServer::for_project(&project)?;
            let output = server
                .analyze_python_file(AnalyzeArgs {
                    file_path: absolute(&file)?,
                    detailed,
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(0);
            }

            println!("{} {}", "Analysis:".cyan().bold(), file.display());
            println!(
                "   Functions needing types: {}",
                output.functions_needing_types.len()
            );
            for name in &output.functions_needing_types {
                println!("     - {name}");
            }
            println!(
                "   Variables needing types: {}",
                output.variables_needing_types.len()
            );
            for name in &output.variables_needing_types {
                println!("     - {name}");
            }
            println!("   Missing annotations: {}", output.missing_annotations);

            if let Some(detail) = &output.detail {
                println!("\n{}", "Missing:".yellow().bold());
                for item in &detail.items {
                    println!("   {item}");
                }
                match (&detail.diagnostics, &detail.check_error) {
                    (Some(diagnostics), _) if !diagnostics.is_empty() => {
                        println!("\n{}", "Checker:".yellow().bold());
                        print_diagnostics(diagnostics);
                    }
                    (Some(_), _) => println!("\n{} no diagnostics", "Checker:".green().bold()),
                    (None, Some(err)) => {
                        println!("\n{} {}", "Checker unavailable:".yellow().bold(), err);
                    }
                    (None, None) => {}
                }
            }
            Ok(0)
        }

        Commands::Context { eager, json } => {
            let server = ToolServer::for_project(&project)?.with_cancel_token(cancel_on_ctrl_c());
            let output = server
                .get_project_context(ProjectContextArgs {
                    project_path: project.clone(),
                    eager,
                })
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(0);
            }

            let summary = &output.summary;
            println!("{} {}", "Project:".cyan().bold(), project.display());
            println!("   Python files:      {}", summary.file_count);
            println!("   Lines:             {}", summary.total_lines);
            println!(
                "   Functions:         {} ({} fully annotated)",
                summary.total_functions, summary.annotated_functions
            );
            println!("   Coverage:          {:.1}%", summary.coverage * 100.0);
            println!("   Missing:           {}", summary.missing_annotations);
            if let Some(diagnostics) = &summary.diagnostics {
                println!(
                    "   Diagnostics:       {} error(s), {} warning(s)",
                    diagnostics.errors, diagnostics.warnings
                );
            }
            if let Some(compatible) = output.pyrefly_compatible {
                let label = if compatible {
                    "yes".green()
                } else {
                    "no".red()
                };
                println!("   Pyrefly clean:     {label}");
            }

            let ranked: Vec<_> = prioritize(&output.files)
                .into_iter()
                .filter(|f| f.missing_annotations > 0)
                .take(20)
                .collect();
            if !ranked.is_empty() {
                println!("\n{}", "Most missing annotations:".yellow().bold());
                for file in ranked {
                    println!(
                        "   {:>4}  {}",
                        file.missing_annotations,
                        file.relative.display()
                    );
                }
            }
            Ok(0)
        }

        Commands::Restore { backup } => {
            let restored = restore_from(&backup)?;
            println!(
                "{} Restored {} from {}",
                "✓".green().bold(),
                restored.display(),
                backup.display()
            );
            Ok(0)
        }

        Commands::Tools { json } => {
            let descriptors = tools::list_tools();
            if json {
                println!("{}", serde_json::to_string_pretty(&descriptors)?);
            } else {
                println!("{}", "Tools:".cyan().bold());
                for tool in &descriptors {
                    println!("   {:<22} {}", tool.name.bold(), tool.description);
                }
                println!("\n{}", "Prompts:".cyan().bold());
                for prompt in tools::prompts::list_prompts() {
                    println!("   {:<22} {}", prompt.name.bold(), prompt.description);
                }
                println!("\n{}", "Resources:".cyan().bold());
                for resource in tools::list_resources() {
                    println!("   {:<22} {}", resource.uri.bold(), resource.description);
                }
            }
            Ok(0)
        }

        Commands::Serve => {
            let server = ToolServer::for_project(&project)?;
            serve(&server).await?;
            Ok(0)
        }
    }
}

fn load_config(project: &Path) -> anyhow::Result<AutotypeConfig> {
    let config = AutotypeConfig::load(project)?.apply_env()?;
    Ok(config)
}

/// Resolve `path` against the working directory.
fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    Ok(cwd.join(path))
}

/// A token that is cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running invocations");
            handle.cancel();
        }
    });
    cancel
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let line = diagnostic.format();
        if diagnostic.is_error() {
            println!("   {}", line.red());
        } else {
            println!("   {}", line.yellow());
        }
    }
}

async fn add_types(
    config: &AutotypeConfig,
    files: Vec<PathBuf>,
    discard_backup: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let invoker = PyreflyInvoker::new(InvokerConfig::resolve(config));
    if !invoker.config().is_available() {
        warn!(
            "Checker not available: {}",
            invoker.config().location.display()
        );
    }

    let paths = files
        .iter()
        .map(|f| absolute(f))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let controller = RefinementController::new(invoker, RefineOptions::from_config(config))
        .with_cancel_token(cancel_on_ctrl_c())
        .with_max_concurrent_files(config.tool.max_concurrent_processes);

    let bar = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(paths.len() as u64)
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("█▓░"),
    );
    bar.set_prefix("Refining");

    let entries = controller
        .refine_batch_with(&paths, |entry| {
            bar.inc(1);
            bar.set_message(entry.path.display().to_string());
        })
        .await;
    bar.finish_and_clear();

    if discard_backup {
        for session in entries.iter().filter_map(|e| e.result.as_ref().ok()) {
            if session.status() == TaskStatus::Passed {
                if let Some(handle) = &session.task.backup {
                    handle.discard()?;
                }
            }
        }
    }

    if json {
        let report: Vec<_> = entries.iter().map(entry_json).collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &entries {
            print_entry(entry, discard_backup);
        }
    }

    let code = entries.iter().map(entry_exit_code).max().unwrap_or(0);
    info!("Refined {} file(s), exit code {}", entries.len(), code);
    Ok(code)
}

fn entry_json(entry: &BatchEntry) -> serde_json::Value {
    match &entry.result {
        Ok(session) => serde_json::json!({
            "file_path": entry.path,
            "status": session.status(),
            "modified": session.modified(),
            "rounds": session.task.rounds,
            "diagnostics": session.final_diagnostics(),
            "backup_path": session.backup_path(),
            "failure": session.failure,
            "history": session.history,
        }),
        Err(e) => serde_json::json!({
            "file_path": entry.path,
            "error": e.to_string(),
        }),
    }
}

fn print_entry(entry: &BatchEntry, discarded: bool) {
    let session: &RefinementSession = match &entry.result {
        Ok(session) => session,
        Err(e) => {
            println!("{} {}: {}", "✗".red().bold(), entry.path.display(), e);
            return;
        }
    };

    let status = session.status();
    let label = match status {
        TaskStatus::Passed => status.to_string().green().bold(),
        TaskStatus::Deferred => status.to_string().yellow().bold(),
        _ => status.to_string().red().bold(),
    };
    println!(
        "{} {} ({} round(s){})",
        label,
        entry.path.display(),
        session.task.rounds,
        if session.modified() { ", modified" } else { "" }
    );

    if let Some(failure) = &session.failure {
        println!("   {}", failure.message.red());
    }
    for delta in session.deltas() {
        println!(
            "   round {}: {} resolved, {} introduced, {} persisted",
            delta.round,
            delta.resolved.len(),
            delta.introduced.len(),
            delta.persisted.len()
        );
    }
    if status == TaskStatus::Deferred {
        print_diagnostics(session.final_diagnostics());
    }
    if let Some(backup) = session.backup_path() {
        if !(discarded && status == TaskStatus::Passed) {
            println!("   backup: {}", backup.display());
        }
    }
}

fn entry_exit_code(entry: &BatchEntry) -> i32 {
    match &entry.result {
        Err(e) => e.exit_code(),
        Ok(session) => match session.status() {
            TaskStatus::Passed => 0,
            TaskStatus::Deferred => 1,
            _ => match session.failure.as_ref().and_then(|f| f.reason) {
                Some(InvocationFailure::NotFound) => 6,
                Some(_) => 4,
                None => 5,
            },
        },
    }
}

async fn serve<T: TypeTool>(server: &ToolServer<T>) -> anyhow::Result<()> {
    info!("Serving tool calls on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = server.handle_line(&line).await;
        let mut encoded = serde_json::to_string(&reply)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
