//! One-shot Gemini prompt runner
//!
//! Opens a session in a directory, sends a single prompt with `@path`
//! references extracted from the prompt text, streams output to stdout,
//! and exits with the child's status.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use gemini_agent::{
    FileReference, GeminiAgentOptions, InvocationOutcome, SessionManager, Settings,
};

#[derive(Debug, Parser)]
#[command(name = "gemini-agent", about = "Run one Gemini prompt in a directory", version, long_about = None)]
struct Cli {
    /// Working directory for the session (defaults to the current directory).
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Gemini command to launch (path or bare name).
    #[arg(long)]
    command: Option<PathBuf>,

    /// Path to a JSON settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Prompt text; `@path` and `@path#Lstart-end` tags become references.
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    init_logging(settings.log_level.as_deref());

    let mut options = GeminiAgentOptions::default().with_settings(&settings);
    if let Some(command) = args.command {
        options.gemini_command = Some(command);
    }

    let prompt = args.prompt.join(" ");
    let references = FileReference::extract(&prompt);

    let manager = SessionManager::with_options(options);
    let session = manager.open_session(args.cwd).await?;

    let mut output = manager
        .send(&session, &prompt, &references)
        .await
        .context("failed to launch gemini")?;

    loop {
        tokio::select! {
            chunk = output.next_chunk() => match chunk {
                Some(chunk) => println!("{chunk}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupt received, cancelling invocation");
                manager.cancel(&session).await?;
            }
        }
    }

    let outcome = output.outcome();
    manager.close_session(&session).await?;

    Ok(match outcome {
        Some(InvocationOutcome::Exited { code: Some(code) }) => ExitCode::from((code & 0xff) as u8),
        Some(InvocationOutcome::Exited { code: None } | InvocationOutcome::Cancelled) => {
            ExitCode::from(130)
        }
        Some(InvocationOutcome::Failed { reason }) => {
            log::error!("invocation failed: {reason}");
            ExitCode::FAILURE
        }
        None => ExitCode::FAILURE,
    })
}

fn init_logging(level: Option<&str>) {
    let default_filter = level.unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}
