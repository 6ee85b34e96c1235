//! CLI entrypoint and command routing for companion.
//!
//! With no subcommand the interactive chat loop starts; the remaining
//! commands inspect or reset the files the loop maintains.

mod annotate;
mod completion;
mod config;
mod dataset;
mod memory;
mod session;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use crossterm::style::Stylize;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::debug;

use crate::annotate::Annotator;
use crate::completion::Responder;
use crate::config::{CompanionConfig, Overrides};
use crate::dataset::DatasetLog;
use crate::session::Session;

#[derive(Parser)]
/// Top-level CLI arguments parsed by clap.
#[command(name = "companion", about = "Conversational AI companion with sentiment-aware memory")]
struct Cli {
    /// Path to a TOML config file (defaults to ./companion.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Args)]
/// Flags for the interactive chat loop.
struct ChatArgs {
    /// Model to use (e.g. llama-3.3-70b-versatile)
    #[arg(short, long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Maximum tokens per reply
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Conversation memory file
    #[arg(long)]
    memory_file: Option<PathBuf>,

    /// Dataset log file
    #[arg(long)]
    dataset_file: Option<PathBuf>,

    /// Skip sentiment and emotion analysis
    #[arg(long)]
    no_classifiers: bool,
}

#[derive(Subcommand)]
/// First-level CLI commands.
enum Commands {
    /// Start an interactive chat (the default)
    Chat(ChatArgs),

    /// Inspect or reset conversation memory
    #[command(subcommand)]
    Memory(MemoryAction),

    /// Inspect the training dataset log
    #[command(subcommand)]
    Dataset(DatasetAction),
}

#[derive(Subcommand)]
/// companion memory subcommands.
enum MemoryAction {
    /// Show the remembered conversation
    Show,
    /// Forget the remembered conversation
    Clear,
}

#[derive(Subcommand)]
/// companion dataset subcommands.
enum DatasetAction {
    /// Show how many records have been logged
    Stats,
}

impl From<ChatArgs> for Overrides {
    fn from(args: ChatArgs) -> Self {
        Self {
            model: args.model,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            memory_path: args.memory_file,
            dataset_path: args.dataset_file,
            no_classifiers: args.no_classifiers,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        debug!("loaded environment from {}", path.display());
    }

    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_default();
    let base = CompanionConfig::load(&cwd, cli.config.as_deref())?;

    match cli.command {
        None => chat(base.with_overrides(cli.chat.into())).await?,
        Some(Commands::Chat(args)) => chat(base.with_overrides(args.into())).await?,

        Some(Commands::Memory(action)) => match action {
            MemoryAction::Show => {
                let doc = memory::load(&base.memory_path);
                print!("{}", doc.display());
            }
            MemoryAction::Clear => {
                let mut doc = memory::MemoryDocument::default();
                memory::save(&base.memory_path, &mut doc)?;
                println!("Memory cleared ({}).", base.memory_path.display());
            }
        },

        Some(Commands::Dataset(DatasetAction::Stats)) => {
            let log = DatasetLog::new(base.dataset_path.clone());
            let records = log.read_all()?;
            let with_input = records.iter().filter(|r| !r.input.is_empty()).count();
            println!("Dataset: {}", log.path().display());
            println!("  Records:    {}", records.len());
            println!("  With input: {with_input}");
        }
    }

    Ok(())
}

/// Run the interactive loop on stdin/stdout.
async fn chat(config: CompanionConfig) -> Result<()> {
    println!("\n{}", "=== Advanced AI Assistant ===".cyan().bold());
    println!("{}", "Initializing AI models... Please wait...".yellow());

    let annotator = Annotator::initialize(&config.classifiers);
    if !annotator.is_available() {
        println!("{}", "Sentiment analysis is unavailable for this session.".red());
    }
    let responder = Responder::from_config(&config);
    debug!(model = responder.model(), "responder ready");

    let mut session = Session::new(config, annotator, responder, std::io::stdout());
    debug!(
        turns = session.memory().conversation_history.len(),
        "memory loaded"
    );
    session.run(BufReader::new(tokio::io::stdin())).await
}
