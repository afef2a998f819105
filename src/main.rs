use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use splice::apply::ElementFallback;
use splice::config::{self, Config, RunOverrides};
use splice::index::SymbolIndex;
use splice::llm::EngineClient;
use splice::pipeline::{Pipeline, PipelineEvent, PipelineSettings, TaskReport};
use splice::workspace::FsWorkspace;
use splice::{CancelToken, SpliceError};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "splice",
    about = "Apply a natural-language task to a Python workspace, one declaration at a time",
    version
)]
struct Args {
    /// What should change (read from stdin when omitted)
    task: Option<String>,

    /// Path to the workspace (defaults to current directory)
    #[arg(short = 'C', long, default_value = ".")]
    path: PathBuf,

    /// Store an API key in the system keychain and exit
    #[arg(long)]
    setup: bool,

    /// Print the symbol index and exit
    #[arg(long)]
    index: bool,

    /// Model to use for this run
    #[arg(long)]
    model: Option<String>,

    /// Cap, in characters, for the index and the assembled context
    #[arg(long, value_name = "CHARS")]
    max_context: Option<usize>,

    /// Extra directory name to skip while indexing (repeatable)
    #[arg(long = "exclude", value_name = "DIR")]
    exclude: Vec<String>,

    /// What update_element does when no declaration matches
    #[arg(long, value_enum)]
    element_fallback: Option<ElementFallback>,

    /// Verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if args.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();
}

fn read_task(args: &Args) -> Result<String> {
    if let Some(task) = &args.task {
        return Ok(task.clone());
    }
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("  Task: ");
    }
    let mut task = String::new();
    stdin.read_to_string(&mut task).context("Failed to read task from stdin")?;
    Ok(task)
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::IndexBuilt(stats) => eprintln!(
            "  + Indexed {} files, {} declarations{}",
            stats.file_count,
            stats.symbol_count,
            if stats.truncated { " (truncated at cap)" } else { "" }
        ),
        PipelineEvent::SymbolsSelected(symbols) => {
            eprintln!("  + Selected {} relevant declarations", symbols.len());
            for symbol in symbols {
                eprintln!("      {} {} ({})", symbol.kind.label(), symbol.name, symbol.file);
            }
        }
        PipelineEvent::ContextAssembled {
            blocks, unresolved, ..
        } => {
            if *unresolved > 0 {
                eprintln!("  + Context: {} blocks, {} could not be resolved", blocks, unresolved);
            } else {
                eprintln!("  + Context: {} blocks", blocks);
            }
        }
        PipelineEvent::EditsGenerated(edits) => eprintln!("  + {} edits proposed", edits.len()),
        PipelineEvent::EditApplied(applied) => {
            eprintln!("  + {} ({})", applied.path.display(), applied.outcome);
            if !applied.user_message.trim().is_empty() {
                eprintln!("      {}", applied.user_message.trim());
            }
        }
        PipelineEvent::EditFailed { target, error } => eprintln!("  ! {}: {}", target, error),
    }
}

fn print_summary(report: &TaskReport) {
    eprintln!();
    eprintln!(
        "  Task {}: {} applied, {} failed{}",
        report.task_id,
        report.applied.len(),
        report.failed.len(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    if let Some(usage) = report.usage {
        eprintln!(
            "  Tokens: {} in / {} out",
            usage.input_tokens, usage.output_tokens
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if args.setup {
        return config::setup_api_key_interactive();
    }

    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("Workspace {} not found", args.path.display()))?;

    // Flags only shape this run; `stored` is what key migration may write back.
    let mut stored = Config::load();
    let config = stored.with_overrides(&RunOverrides {
        model: args.model.clone(),
        max_context_length: args.max_context,
        excluded_dirs: args.exclude.clone(),
        element_fallback: args.element_fallback,
    });
    config.validate()?;

    if args.index {
        let index = SymbolIndex::build(&root, &config.index_options());
        print!("{}", index.render());
        return Ok(());
    }

    let task = read_task(&args)?;
    if task.trim().is_empty() {
        return Err(SpliceError::EmptyTask.into());
    }
    let api_key = stored.get_api_key().ok_or(SpliceError::MissingApiKey)?;
    let engine = EngineClient::new(config.engine_settings(api_key))?;
    let pipeline = Pipeline::new(engine, FsWorkspace::new(&root), PipelineSettings::from(&config));

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  Cancelling...");
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    eprintln!("  Working in {}", root.display());
    let result = pipeline.run(&task, &cancel, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    let report = result?;
    print_summary(&report);
    if !report.failed.is_empty() {
        anyhow::bail!("{} of {} edits failed", report.failed.len(), report.failed.len() + report.applied.len());
    }
    Ok(())
}
