//! SoulMacro command line

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use macro_engine::expression;
use macro_engine::{DataSource, ExecutionResult, MacroScript, RunOptions, RunState};
use serde::Serialize;
use soulmacro_cli::{build_engine, load_csv, AppConfig, DryRunBridge, MacroSession, STATUS_OK};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

/// SoulMacro - replay recorded browser macros
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Output format
    #[arg(short, long, default_value = "human", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Yaml,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum BridgeKind {
    /// Log browser actions without a browser
    DryRun,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a macro file
    Play(PlayArgs),

    /// Parse a macro file and report malformed lines
    Check(CheckArgs),

    /// Evaluate an EVAL expression
    Eval(EvalArgs),

    /// Show build information
    Info,
}

#[derive(Args)]
struct PlayArgs {
    /// Macro file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Number of loops (overrides engine.max_loops)
    #[arg(long)]
    loops: Option<u32>,

    /// Variable assignment applied before the run
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    vars: Vec<(String, String)>,

    /// Write a profiler CSV next to the macro name
    #[arg(long)]
    profile: bool,

    /// Browser bridge implementation
    #[arg(long, default_value = "dry-run")]
    bridge: BridgeKind,

    /// CSV rows fed to !COL1, !COL2, ... one row per loop
    #[arg(long, value_name = "CSV")]
    datasource: Option<PathBuf>,

    /// Datasource field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct EvalArgs {
    /// Expression, e.g. "(1 + 2) * 3"
    expression: String,
}

fn parse_assignment(text: &str) -> std::result::Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", text)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, cli.debug, cli.log_format)?;

    let result = match cli.command {
        Commands::Play(args) => cmd_play(args, &config, cli.output).await,
        Commands::Check(args) => cmd_check(args, cli.output).await,
        Commands::Eval(args) => cmd_eval(args, cli.output),
        Commands::Info => cmd_info(&config, cli.output),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(level: &str, debug: bool, format: LogFormat) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    // stdout carries command output only
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}

fn emit<T: Serialize>(output: OutputFormat, value: &T, human: impl FnOnce()) -> Result<()> {
    match output {
        OutputFormat::Human => human(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

async fn read_script(path: &Path) -> Result<MacroScript> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read macro {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "macro".to_string());
    Ok(MacroScript::parse(name, &text))
}

#[derive(Serialize)]
struct PlayReport<'a> {
    status: i32,
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

async fn cmd_play(args: PlayArgs, config: &AppConfig, output: OutputFormat) -> Result<()> {
    let script = read_script(&args.file).await?;

    let datasource = match &args.datasource {
        Some(path) => {
            let delimiter = u8::try_from(args.delimiter)
                .context("Datasource delimiter must be a single-byte character")?;
            let rows = load_csv(path, delimiter)?;
            info!(rows = rows.len(), path = %path.display(), "datasource loaded");
            Some(Arc::new(rows) as Arc<dyn DataSource>)
        }
        None => None,
    };

    let bridge = match args.bridge {
        BridgeKind::DryRun => Arc::new(DryRunBridge::new()),
    };
    let engine = Arc::new(build_engine(config, bridge, datasource));
    let session = Arc::new(MacroSession::new(engine));

    for (name, value) in &args.vars {
        session
            .set_variable(name, value.as_str())
            .with_context(|| format!("Cannot set {}", name))?;
    }
    if args.profile {
        session.set_variable("!FILE_PROFILER", "YES")?;
    }

    let stopper = session.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping macro");
            stopper.stop();
        }
    });

    let options = RunOptions {
        max_loops: args.loops,
    };
    let status = session.play_script(&script, options).await;
    ctrl_c.abort();

    let result = session
        .last_result()
        .context("Macro run produced no result")?;
    let report = PlayReport {
        status,
        result: &result,
    };
    emit(output, &report, || print_run_human(&result))?;

    if status != STATUS_OK {
        match result.state {
            RunState::Stopped => bail!("Macro stopped"),
            _ => bail!(
                "Macro failed with {}: {}",
                result.error_code,
                result.error_message.as_deref().unwrap_or("")
            ),
        }
    }
    Ok(())
}

fn print_run_human(result: &ExecutionResult) {
    println!("Macro:    {}", result.macro_name);
    println!("Run:      {}", result.run_id);
    println!("State:    {:?}", result.state);
    println!("Status:   {}", result.error_code);
    if let Some(message) = &result.error_message {
        match result.failed_line {
            Some(line) => println!("Error:    line {}: {}", line, message),
            None => println!("Error:    {}", message),
        }
    }
    println!("Loops:    {}", result.loops_completed);
    println!("Duration: {} ms", result.duration_ms);
    if !result.extract_data.is_empty() {
        println!("Extract:  {}", result.extract_string());
    }
}

#[derive(Serialize)]
struct CheckReport {
    macro_name: String,
    commands: usize,
    malformed: Vec<MalformedLine>,
}

#[derive(Serialize)]
struct MalformedLine {
    line: usize,
    text: String,
    reason: String,
}

async fn cmd_check(args: CheckArgs, output: OutputFormat) -> Result<()> {
    let script = read_script(&args.file).await?;
    let report = CheckReport {
        macro_name: script.name.clone(),
        commands: script.commands.len(),
        malformed: script
            .malformed()
            .map(|command| MalformedLine {
                line: command.line,
                text: command.raw.clone(),
                reason: command.malformed.clone().unwrap_or_default(),
            })
            .collect(),
    };

    emit(output, &report, || {
        for command in &script.commands {
            let marker = if command.malformed.is_some() { "!" } else { " " };
            println!("{}{:>4}  {}", marker, command.line, command.raw);
        }
        println!("{} command(s), {} malformed", report.commands, report.malformed.len());
    })?;

    if !report.malformed.is_empty() {
        bail!("{} malformed line(s)", report.malformed.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct EvalReport {
    expression: String,
    value: macro_engine::Value,
    text: String,
}

fn cmd_eval(args: EvalArgs, output: OutputFormat) -> Result<()> {
    let value = expression::try_evaluate(&args.expression)
        .with_context(|| format!("Cannot evaluate '{}'", args.expression))?;
    let report = EvalReport {
        expression: args.expression,
        text: value.to_string(),
        value,
    };
    emit(output, &report, || println!("{}", report.text))
}

#[derive(Serialize)]
struct BuildInfo {
    version: &'static str,
    git_hash: &'static str,
    build_date: &'static str,
    max_loops: u32,
    retry_interval_ms: u64,
}

fn cmd_info(config: &AppConfig, output: OutputFormat) -> Result<()> {
    let info = BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        build_date: env!("BUILD_DATE"),
        max_loops: config.engine.max_loops,
        retry_interval_ms: config.engine.retry_interval_ms,
    };
    emit(output, &info, || {
        println!("SoulMacro v{}", info.version);
        println!("Git hash:   {}", info.git_hash);
        println!("Build date: {}", info.build_date);
        println!("Max loops:  {}", info.max_loops);
    })
}
