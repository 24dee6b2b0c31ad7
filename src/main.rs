use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

use commands::{push, remotes};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "shipmate")]
#[command(version = VERSION)]
#[command(about = "Push-to-deploy orchestration for a fleet of service repositories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit, push and deploy a service to a chosen remote
    Push(push::PushArgs),
    /// List the push remotes resolvable from the environment
    Remotes(remotes::RemotesArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Push(args) => push::run(&args),
        Commands::Remotes(args) => remotes::run(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {}", err.code.as_str(), err.message);
            if let Some(details) = non_empty_details(&err.details) {
                eprintln!("  {}", details);
            }
            for hint in &err.hints {
                eprintln!("hint: {}", hint.message);
            }
            ExitCode::from(exit_code_to_u8(err.code.exit_code()))
        }
    }
}

fn non_empty_details(details: &serde_json::Value) -> Option<String> {
    match details {
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) if map.is_empty() => None,
        other => serde_json::to_string(other).ok(),
    }
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
