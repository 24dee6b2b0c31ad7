use clap::Args;
use std::path::PathBuf;

use shipmate::flags::FLAG_DESCRIPTIONS;
use shipmate::git::Repo;
use shipmate::pipeline::Pipeline;
use shipmate::prompt::TerminalPrompt;
use shipmate::remotes::RemoteConfig;
use shipmate::Error;

fn flag_help() -> String {
    let mut help = String::from("Flags:\n");
    for (ch, description) in FLAG_DESCRIPTIONS {
        help.push_str(&format!("  {}  {}\n", ch, description));
    }
    help
}

#[derive(Args, Debug)]
#[command(after_help = flag_help())]
pub struct PushArgs {
    /// Packed deploy flags, one character each (see the legend below)
    #[arg(default_value = "")]
    pub flags: String,

    /// Working tree to push (defaults to the current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

pub fn run(args: &PushArgs) -> shipmate::Result<()> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()
            .map_err(|e| Error::internal_io(e.to_string(), Some("resolve working directory".to_string())))?,
    };

    let mut repo = Repo::open(path);
    let config = RemoteConfig::from_env();
    let mut prompt = TerminalPrompt::new();

    let outcome = Pipeline::new(&mut repo, config, &mut prompt).push(&args.flags)?;

    // Clean aborts leave the fleet untouched but still exit non-zero so
    // calling scripts can tell them from a completed deploy.
    if let Some(reason) = outcome.aborted {
        return Err(Error::declined(reason));
    }

    println!(
        "pushed {} to {}{}",
        outcome.branch.as_deref().unwrap_or("HEAD"),
        outcome.remote,
        match (outcome.deployed, outcome.migrations_ran) {
            (true, true) => " (deployed, migrations ran)",
            (true, false) => " (deployed)",
            (false, _) => "",
        }
    );
    Ok(())
}
