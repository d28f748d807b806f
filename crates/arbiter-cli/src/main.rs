//! arbiter - run the demo pipeline, answer a remote run, inspect answer files.
//!
//! # 設定の優先順位
//! 1. CLI 引数
//! 2. 環境変数（`ARBITER_*`）
//! 3. `--config` で指定した TOML
//! 4. 既定値

mod pipeline;
mod remote;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use arbiter_core::frontend::{ConsoleFrontend, NoopFrontend, RemoteFrontend};
use arbiter_core::handler::{FrontendSource, ScriptedAnswers};
use arbiter_core::ports::{AnswerSource, Frontend};
use arbiter_core::store::{AnswerFile, StoreError};
use arbiter_core::{
    ArbiterConfig, ConfigError, DecisionError, DecisionHandler, DecisionRegistry, FrontendKind,
    logging,
};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info};

use crate::pipeline::{HvacPipeline, Summary};

#[derive(Parser, Debug)]
#[command(name = "arbiter", version, about)]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "ARBITER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo pipeline
    Run {
        /// console, remote or debug
        #[arg(short, long)]
        frontend: Option<FrontendKind>,

        /// Answer file to load before and save after the run
        #[arg(long)]
        answer_file: Option<PathBuf>,

        /// Debug answers in order, as JSON (`true`, `"HVAC-Distributor"`, `null`)
        #[arg(short, long = "answer", value_name = "JSON")]
        answers: Vec<String>,

        /// Debug mode: reuse the answers found in the answer file
        #[arg(long)]
        reuse: bool,
    },

    /// Answer the pending decisions of a remote run from this terminal
    Answer {
        /// Service address, defaults to `remote.bind`
        #[arg(long)]
        addr: Option<String>,
    },

    /// Print the contents of an answer file
    Inspect { path: PathBuf },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] arbiter_core::frontend::remote::ProtocolError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match ArbiterConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("arbiter: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log_level);

    let result = match cli.command {
        Command::Run {
            frontend,
            answer_file,
            answers,
            reuse,
        } => {
            let mut config = config;
            if let Some(frontend) = frontend {
                config.frontend = frontend;
            }
            if answer_file.is_some() {
                config.answer_file = answer_file;
            }
            run(&config, &answers, reuse)
        }
        Command::Answer { addr } => {
            let addr = addr.unwrap_or_else(|| config.remote.bind.clone());
            remote::answer_interactively(&addr)
        }
        Command::Inspect { path } => inspect(&path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Decision(e)) if e.is_cancelled() => {
            eprintln!("arbiter: cancelled");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "arbiter failed");
            eprintln!("arbiter: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Debug answers are JSON; anything that does not parse is taken as a string.
fn parse_answer(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn run(config: &ArbiterConfig, answers: &[String], reuse: bool) -> Result<(), CliError> {
    let mut registry = DecisionRegistry::new();
    let answer_file = config.answer_file.as_deref();

    let summary = match config.frontend {
        FrontendKind::Debug => {
            if let Some(path) = answer_file {
                registry.enable_debug([json!(reuse)]);
                load_previous(&mut registry, path, &mut NoopFrontend)?;
                registry.disable_debug();
            }
            let source = ScriptedAnswers::new(answers.iter().map(|a| parse_answer(a)));
            drive(&mut registry, source)?
        }
        FrontendKind::Console => {
            let mut console =
                ConsoleFrontend::stdio().with_max_attempts(config.console.max_attempts);
            if let Some(path) = answer_file {
                load_previous(&mut registry, path, &mut console)?;
            }
            drive(&mut registry, FrontendSource::new(console))?
        }
        FrontendKind::Remote => {
            let mut remote = RemoteFrontend::start(&config.remote)?;
            info!(addr = %remote.local_addr(), "decision service listening");
            eprintln!("answer with: arbiter answer --addr {}", remote.local_addr());
            let loaded = match answer_file {
                Some(path) => load_previous(&mut registry, path, &mut remote),
                None => Ok(0),
            };
            let mut handler = DecisionHandler::new(FrontendSource::new(remote));
            let outcome =
                loaded.and_then(|_| handler.drive(&mut registry, &mut HvacPipeline::new()));
            // subscribers learn how the run ended before the service goes away
            handler.into_source().into_inner().shutdown(outcome.is_ok());
            outcome?
        }
    };

    if let Some(path) = answer_file {
        registry.save(path)?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(StoreError::from)?
    );
    Ok(())
}

fn load_previous(
    registry: &mut DecisionRegistry,
    path: &Path,
    frontend: &mut dyn Frontend,
) -> Result<usize, DecisionError> {
    if !path.exists() {
        return Ok(0);
    }
    registry.load(path, frontend)
}

fn drive(registry: &mut DecisionRegistry, source: impl AnswerSource) -> Result<Summary, CliError> {
    let mut handler = DecisionHandler::new(source);
    Ok(handler.drive(registry, &mut HvacPipeline::new())?)
}

fn inspect(path: &Path) -> Result<(), CliError> {
    let file = AnswerFile::read(path)?;
    println!("version: {}", file.version);
    if let Some(checksum) = &file.checksum_ifc {
        println!("checksum: {checksum}");
    }
    println!("{} decisions", file.len());
    for (key, stored) in &file.decisions {
        match &stored.checksum {
            Some(checksum) => println!("  {key} = {} [{checksum}]", stored.value),
            None => println!("  {key} = {}", stored.value),
        }
    }
    Ok(())
}
