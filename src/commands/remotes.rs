use clap::Args;
use std::path::PathBuf;

use shipmate::git::Repo;
use shipmate::remotes::{RemoteConfig, RemoteRole};
use shipmate::Error;

#[derive(Args, Debug)]
pub struct RemotesArgs {
    /// Working tree to inspect (defaults to the current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// List every push remote the environment can resolve into a target.
pub fn run(args: &RemotesArgs) -> shipmate::Result<()> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()
            .map_err(|e| Error::internal_io(e.to_string(), Some("resolve working directory".to_string())))?,
    };

    let repo = Repo::open(path);
    let config = RemoteConfig::from_env();
    let targets = config.resolve_all(&repo.remotes()?)?;

    if targets.is_empty() {
        println!("no usable push remotes configured");
        return Ok(());
    }

    let width = targets.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for target in targets {
        let role = match target.role {
            RemoteRole::Origin => "origin",
            RemoteRole::Build => "build",
            RemoteRole::Server => "server",
        };
        let detail = if target.is_deployable() {
            format!("{}@{}  {}", target.ssh_user, target.host, target.work_tree)
        } else {
            target.url.clone()
        };
        println!("{:<width$}  {:<6}  {}", target.name, role, detail);
    }

    Ok(())
}
