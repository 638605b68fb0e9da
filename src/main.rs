//! Chorus - ask several LLM agents at once
//!
//! Sends one question to every configured agent concurrently, prints the
//! merged stream as it arrives and finishes with the synthesized answer.
//! Every run is bounded by the time and token ceilings from the config file
//! or the command line.

use anyhow::{bail, Context, Result};
use chorus_core::{
    load_config, load_from_file, sample_config, AgentSettings, BackendSettings, ChatMessage,
    ChorusConfig, ChunkKind, DoneStatus, Orchestrator, StreamChunk, TimeoutOverrides,
};
use futures::StreamExt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: chorus [OPTIONS] QUESTION

Options:
  -c, --config PATH              Config file (default: .chorus.toml, then ~/.config/chorus/config.toml)
  -m, --model MODEL              Ask a single agent using MODEL instead of the configured agents
      --agent-timeout SECONDS    Wall-clock limit per agent
      --agent-max-tokens N       Token limit per agent
      --orchestrator-timeout SECONDS
                                 Wall-clock limit for the whole run
      --orchestrator-max-tokens N
                                 Token limit for the whole run
      --no-timeout-fallback      Fail instead of answering with partial output when a limit is hit
      --sample-config            Print an example config file and exit
  -h, --help                     Show this help";

/// Command-line arguments
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Explicit config file
    config: Option<PathBuf>,
    /// Budget flags
    overrides: TimeoutOverrides,
    /// Ad-hoc single agent model
    model: Option<String>,
    sample_config: bool,
    help: bool,
    /// Remaining words joined with spaces
    question: Option<String>,
}

impl Args {
    /// Parse command-line arguments
    fn parse() -> Result<Self> {
        Self::parse_from(std::env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut parsed = Self::default();
        let mut words = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => parsed.config = Some(PathBuf::from(value(&mut args, &arg)?)),
                "--model" | "-m" => parsed.model = Some(value(&mut args, &arg)?),
                "--agent-timeout" => {
                    parsed.overrides.agent_timeout_seconds = Some(number(&mut args, &arg)?);
                }
                "--agent-max-tokens" => {
                    parsed.overrides.agent_max_tokens = Some(number(&mut args, &arg)?);
                }
                "--orchestrator-timeout" => {
                    parsed.overrides.orchestrator_timeout_seconds = Some(number(&mut args, &arg)?);
                }
                "--orchestrator-max-tokens" => {
                    parsed.overrides.orchestrator_max_tokens = Some(number(&mut args, &arg)?);
                }
                "--no-timeout-fallback" => parsed.overrides.disable_fallback = true,
                "--sample-config" => parsed.sample_config = true,
                "--help" | "-h" => parsed.help = true,
                _ if !arg.starts_with('-') => words.push(arg),
                _ => bail!("unknown option '{}'", arg),
            }
        }

        if !words.is_empty() {
            parsed.question = Some(words.join(" "));
        }
        Ok(parsed)
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("{} requires a value", flag))
}

fn number(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<u64> {
    let raw = value(args, flag)?;
    raw.parse()
        .with_context(|| format!("{} expects a positive integer, got '{}'", flag, raw))
}

/// Initialize tracing on stderr so stdout carries only the answer stream
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chorus=info,chorus_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Load configuration and apply command-line flags
fn load(args: &Args) -> Result<ChorusConfig> {
    let mut config = match &args.config {
        Some(path) => load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => load_config(&std::env::current_dir()?)?,
    };

    if let Some(model) = &args.model {
        let backend = BackendSettings {
            model: model.clone(),
            ..Default::default()
        };
        config.agents = vec![AgentSettings::new(model, backend)];
    }

    config.timeout_settings = config.timeout_settings.with_overrides(&args.overrides);
    // Flags beat per-agent values; unset agent values inherit the shared ones
    for agent in &mut config.agents {
        agent.timeout_settings = agent
            .timeout_settings
            .map(|t| t.with_overrides(&args.overrides));
    }

    config.validate().map_err(anyhow::Error::msg)?;
    tracing::debug!(agents = config.agents.len(), timeouts = ?config.timeout_settings, "configuration ready");
    Ok(config)
}

/// Prints chunks, labelling output whenever the speaking agent changes
#[derive(Default)]
struct Printer {
    speaker: Option<String>,
}

impl Printer {
    fn print(&mut self, chunk: &StreamChunk) -> io::Result<()> {
        let mut out = io::stdout().lock();
        match chunk.kind {
            ChunkKind::Content => {
                if self.speaker.as_deref() != Some(chunk.source()) {
                    self.speaker = Some(chunk.source().to_string());
                    write!(out, "\n[{}] ", chunk.source())?;
                }
                write!(out, "{}", chunk.text())?;
                out.flush()
            }
            ChunkKind::ToolCalls => {
                eprintln!("\n[{}] tool call: {}", chunk.source(), chunk.text());
                Ok(())
            }
            ChunkKind::Error => {
                eprintln!("\n[{}] error: {}", chunk.source(), chunk.error.as_deref().unwrap_or(""));
                Ok(())
            }
            ChunkKind::Done => {
                let status = chunk.status.unwrap_or(DoneStatus::Failed);
                writeln!(out, "\n\n=== {} ===", status)?;
                if let Some(answer) = chunk.content.as_deref() {
                    writeln!(out, "{}", answer)?;
                }
                out.flush()
            }
        }
    }
}

/// Process exit status for a run's terminal status
fn exit_status(status: DoneStatus) -> u8 {
    match status {
        DoneStatus::Completed | DoneStatus::Degraded | DoneStatus::TimedOut => 0,
        DoneStatus::Cancelled => 130,
        DoneStatus::Failed | DoneStatus::Aborted => 1,
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let Some(question) = args.question.clone() else {
        eprintln!("{}", USAGE);
        return Ok(ExitCode::from(2));
    };

    let config = load(&args)?;
    let orchestrator = Orchestrator::from_config(&config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut stream = orchestrator.chat_with_cancellation(vec![ChatMessage::user(question)], None, cancel);
    let mut printer = Printer::default();
    let mut status = DoneStatus::Failed;
    while let Some(chunk) = stream.next().await {
        if let (ChunkKind::Done, Some(s)) = (chunk.kind, chunk.status) {
            status = s;
        }
        printer.print(&chunk)?;
    }

    for agent in orchestrator.agent_statuses() {
        let usage = &agent.backend.token_usage;
        eprintln!(
            "{} ({}/{}): {} tokens, ${:.4}",
            agent.id,
            agent.backend.provider,
            agent.backend.model,
            usage.total_tokens(),
            usage.estimated_cost()
        );
    }

    Ok(ExitCode::from(exit_status(status)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {:#}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    if args.help {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }
    if args.sample_config {
        print!("{}", sample_config());
        return ExitCode::SUCCESS;
    }

    init_tracing();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
