//! Command-line surface for exercising the orchestration engine directly,
//! without the HTTP/WebSocket adapter (which is out of core scope, spec
//! §6). Grounded on the teacher's `cli::Cli`/`Commands` derive style.

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::Mode;
use crate::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "reqflow", about = "Multi-agent requirements clarification engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Starts a new clarification session for a requirement description.
    Start {
        requirement_text: String,
        #[arg(long, value_enum, default_value = "standard")]
        mode: CliMode,
        #[arg(long)]
        project_context: Option<String>,
    },
    /// Submits an answer to the current clarification round.
    Clarify {
        session_id: Uuid,
        /// `question_id=answer` pairs.
        #[arg(long = "answer", value_parser = parse_answer)]
        answers: Vec<(Uuid, String)>,
    },
    /// Prints the current snapshot of a session.
    Status { session_id: Uuid },
    /// Cancels an in-progress session.
    Cancel { session_id: Uuid },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum CliMode {
    Quick,
    Standard,
    Deep,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Quick => Mode::Quick,
            CliMode::Standard => Mode::Standard,
            CliMode::Deep => Mode::Deep,
        }
    }
}

fn parse_answer(raw: &str) -> Result<(Uuid, String), String> {
    let (id, answer) = raw.split_once('=').ok_or_else(|| "expected question_id=answer".to_string())?;
    let id = Uuid::parse_str(id).map_err(|e| e.to_string())?;
    Ok((id, answer.to_string()))
}

/// Exit codes per spec §6.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG_ERROR: i32 = 64;
    pub const UNAVAILABLE: i32 = 69;
    pub const INTERNAL: i32 = 70;
}

pub fn exit_code_for(err: &CoreError) -> i32 {
    match err {
        CoreError::InvalidInput(_) => exit_code::CONFIG_ERROR,
        CoreError::LlmUnavailable(_) => exit_code::UNAVAILABLE,
        _ => exit_code::INTERNAL,
    }
}

pub async fn run(orchestrator: &Orchestrator, command: Command) -> Result<(), CoreError> {
    match command {
        Command::Start { requirement_text, mode, project_context } => {
            let id = orchestrator.start(requirement_text, mode.into(), project_context).await?;
            println!("{id}");
        }
        Command::Clarify { session_id, answers } => {
            let map: HashMap<Uuid, String> = answers.into_iter().collect();
            orchestrator.submit_answer(session_id, map).await?;
            println!("ok");
        }
        Command::Status { session_id } => {
            let snapshot = orchestrator.get_session(session_id).await?;
            println!(
                "phase={:?} progress={:.2} artifacts={}",
                snapshot.session.phase,
                snapshot.progress,
                snapshot.artifacts.len()
            );
        }
        Command::Cancel { session_id } => {
            orchestrator.cancel(session_id).await?;
            println!("ok");
        }
    }
    Ok(())
}
