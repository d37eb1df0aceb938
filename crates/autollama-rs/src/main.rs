//! Summarize documents, split them into chunks, or chat with an agent whose
//! context is kept inside the model's window.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Summarize a file with the default model
//! autollama summarize --file report.md
//!
//! # Summarize stdin with a question in mind
//! cat notes.txt | autollama summarize --question "What went wrong?"
//!
//! # Inspect how a document would be chunked (no API key needed)
//! autollama split --file report.md --max-tokens 500
//!
//! # Interactive agent; every stdin line is one turn
//! autollama chat --system "You are a meticulous research agent." -v
//! ```

use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use autollama_rs::agent::{Agent, AssistantReply};
use autollama_rs::config::{API_KEY_ENV, AgentConfig, FileConfig};
use autollama_rs::context::splitter::TextSplitter;
use autollama_rs::context::tokens::default_counter;
use autollama_rs::memory::InMemoryStore;
use autollama_rs::OpenRouterClient;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Autonomous LLM agent with token-budgeted context.
#[derive(Parser)]
#[command(name = "autollama", version)]
struct Cli {
    // ── Global options ─────────────────────────────────────────
    /// Model to use (overrides the config file)
    #[arg(long, global = true)]
    model: Option<String>,

    /// JSON config file with overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a document read from a file or stdin
    Summarize {
        /// Read the document from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,

        /// Extra instruction for the chunk summaries
        #[arg(long, conflicts_with = "question")]
        instruction: Option<String>,

        /// Keep whatever helps answer this question
        #[arg(long)]
        question: Option<String>,

        /// Chunk budget in tokens (default: derived from the model)
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Chat with the agent; each stdin line is one turn
    Chat {
        /// System prompt
        #[arg(long, default_value = "You are a helpful autonomous agent.")]
        system: String,
    },

    /// Show how a document would be chunked
    Split {
        /// Read the document from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,

        /// Maximum tokens per chunk
        #[arg(long)]
        max_tokens: usize,

        /// Do not repeat the previous chunk's tail
        #[arg(long)]
        no_overlap: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_input(file: Option<&Path>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {e}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn load_config(cli: &Cli) -> Result<AgentConfig, String> {
    let mut config = AgentConfig::default();
    if let Some(ref path) = cli.config {
        config = config.apply_file(FileConfig::load(path).map_err(|e| e.to_string())?);
    }
    if let Some(ref model) = cli.model {
        config.model = model.clone();
    }
    Ok(config)
}

fn build_agent(config: AgentConfig) -> Result<Agent, String> {
    let api_key = std::env::var(API_KEY_ENV)
        .map_err(|_| format!("{API_KEY_ENV} environment variable is not set"))?;
    let client = OpenRouterClient::new(api_key).map_err(|e| e.to_string())?;
    Agent::new(config, Arc::new(client)).map_err(|e| e.to_string())
}

// ── Subcommands ────────────────────────────────────────────────────

async fn summarize(
    config: AgentConfig,
    file: Option<&Path>,
    instruction: Option<&str>,
    question: Option<&str>,
    budget: Option<usize>,
) -> Result<(), String> {
    let text = read_input(file)?;
    let agent = build_agent(config)?.with_memory(Arc::new(InMemoryStore::new()));

    let summary = match budget {
        Some(budget) => {
            agent
                .summarizer()
                .summarize(&text, budget, instruction, question)
                .await
        }
        None => agent.summarize(&text, instruction, question).await,
    }
    .map_err(|e| e.to_string())?;

    if summary.chunk_count() > 0 {
        eprintln!("  [summarized {} chunk(s)]", summary.chunk_count());
    }
    println!("{}", summary.text);
    Ok(())
}

async fn chat(config: AgentConfig, system: &str) -> Result<(), String> {
    let mut agent = build_agent(config)?.with_system_prompt(system);

    for line in io::stdin().lock().lines() {
        let line = line.map_err(|e| format!("failed to read stdin: {e}"))?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let reply = agent.step(input).await.map_err(|e| e.to_string())?;
        match AssistantReply::parse(&reply) {
            Some(parsed) => {
                println!("{}", parsed.thoughts.speak);
                eprintln!("  [command] {}", parsed.command.name);
            }
            None => println!("{reply}"),
        }
        eprintln!(
            "  [turn {}] history={} folded={}",
            agent.cycle_count(),
            agent.history().len(),
            agent.history().last_trimmed_index()
        );
    }
    Ok(())
}

fn split(file: Option<&Path>, max_tokens: usize, overlap: bool) -> Result<(), String> {
    let text = read_input(file)?;
    let splitter = TextSplitter::new(default_counter(), Default::default());
    let chunks = splitter
        .split(&text, max_tokens, overlap)
        .map_err(|e| e.to_string())?;

    for (i, chunk) in chunks.iter().enumerate() {
        let preview: String = chunk.body().chars().take(60).collect();
        println!(
            "#{:<3} tokens={:<5} overlap_bytes={:<5} {:?}",
            i + 1,
            chunk.token_length,
            chunk.overlap_len,
            preview
        );
    }
    eprintln!("  {} chunk(s)", chunks.len());
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Summarize {
            ref file,
            ref instruction,
            ref question,
            budget,
        } => {
            summarize(
                config,
                file.as_deref(),
                instruction.as_deref(),
                question.as_deref(),
                budget,
            )
            .await
        }
        Command::Chat { ref system } => chat(config, system).await,
        Command::Split {
            ref file,
            max_tokens,
            no_overlap,
        } => split(file.as_deref(), max_tokens, !no_overlap),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
