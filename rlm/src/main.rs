//! Recursive language model runner.
//!
//! `rlm ask` answers a query over a context that only the model's snippets
//! can see. Configuration lives in `rlm.toml`; the model service is reached
//! through the bridge command configured there.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rlm::Rlm;
use rlm::core::protocol::parse_reply;
use rlm::core::types::SessionOutcome;
use rlm::exit_codes;
use rlm::io::config::{DEFAULT_CONFIG_PATH, RlmConfig, load_config, require_credential, write_config};
use rlm::io::model::CommandModel;
use rlm::io::transcript::write_transcript;
use rlm::logging;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "rlm",
    version,
    about = "Answer queries over large contexts with a recursive language model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `rlm.toml` if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run one top-level session and print the answer.
    Ask(AskArgs),
    /// Print what the reply parser extracts from a model reply (file or stdin).
    Parse {
        path: Option<PathBuf>,
    },
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("source").required(true).args(["context_file", "context"]))]
struct AskArgs {
    query: String,
    /// Read the context from a file.
    #[arg(long)]
    context_file: Option<PathBuf>,
    /// Pass the context inline.
    #[arg(long)]
    context: Option<String>,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override `root_model`.
    #[arg(long)]
    model: Option<String>,
    /// Override `sub_model`.
    #[arg(long)]
    sub_model: Option<String>,
    #[arg(long)]
    max_depth: Option<u32>,
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Write the session record tree as JSON.
    #[arg(long)]
    transcript: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Ask(args) => cmd_ask(args),
        Command::Parse { path } => cmd_parse(path.as_deref()),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        info!(path = %path.display(), "config exists; leaving it untouched");
        return Ok(exit_codes::OK);
    }
    write_config(path, &RlmConfig::default())?;
    Ok(exit_codes::OK)
}

fn cmd_ask(args: AskArgs) -> Result<i32> {
    let mut cfg = load_config(&args.config)?;
    apply_overrides(&mut cfg, &args);
    cfg.validate()?;
    require_credential(&cfg.model.api_key_env)?;

    let context = match (&args.context_file, &args.context) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("read context {}", path.display()))?,
        (None, Some(text)) => text.clone(),
        (None, None) => bail!("either --context-file or --context is required"),
    };

    let model = CommandModel::from_config(&cfg.model)?;
    let rlm = Rlm::new(Rc::new(model), cfg.session_config());
    let record = rlm.completion(&args.query, &context)?;
    info!(
        model_calls = record.total_model_calls(),
        max_depth_reached = record.max_depth_reached(),
        duration_ms = record.duration_ms,
        "session finished"
    );

    if let Some(path) = &args.transcript {
        write_transcript(path, &record)?;
    }
    println!("{}", record.outcome.text());
    Ok(match record.outcome {
        SessionOutcome::Answered { .. } => exit_codes::OK,
        SessionOutcome::IterationsExhausted => exit_codes::ITERATIONS_EXHAUSTED,
        SessionOutcome::DepthExhausted => exit_codes::DEPTH_EXHAUSTED,
    })
}

fn apply_overrides(cfg: &mut RlmConfig, args: &AskArgs) {
    if let Some(model) = &args.model {
        cfg.root_model = model.clone();
    }
    if let Some(model) = &args.sub_model {
        cfg.sub_model = model.clone();
    }
    if let Some(depth) = args.max_depth {
        cfg.max_depth = depth;
    }
    if let Some(iterations) = args.max_iterations {
        cfg.max_iterations = iterations;
    }
}

fn cmd_parse(path: Option<&Path>) -> Result<i32> {
    let reply = match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read reply from stdin")?;
            buf
        }
    };
    let parsed = parse_reply(&reply);
    println!(
        "{}",
        serde_json::to_string_pretty(&parsed).context("serialize parsed reply")?
    );
    Ok(exit_codes::OK)
}
