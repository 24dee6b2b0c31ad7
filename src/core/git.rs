//! Local repository handle.
//!
//! Git invocations are composed as one mutable command string plus
//! flag-insertion helpers, because several operations must interleave
//! `--git-dir`/`--work-tree`/`-f`/`--amend` and deploy-key-exporting shell
//! prefixes at specific lexical positions of a not-yet-executed command
//! rather than appending them as extra arguments.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::utils::shell;

/// Which SSH key export to prefix a git command with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployKeyKind {
    /// Key for pushing to a live application server.
    Server,
    /// Key for pushing to the CI build remote.
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFlag {
    Force,
    Amend,
    Tags,
    GitDir,
    WorkTree,
}

/// A git command string under construction.
#[derive(Debug, Clone)]
pub struct GitCommand {
    command: String,
    git_dir: Option<String>,
    work_tree: Option<String>,
}

impl GitCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            git_dir: None,
            work_tree: None,
        }
    }

    pub fn with_dirs(
        command: impl Into<String>,
        git_dir: Option<String>,
        work_tree: Option<String>,
    ) -> Self {
        Self {
            command: command.into(),
            git_dir,
            work_tree,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }

    /// Insert a flag at its lexical position in the command string.
    ///
    /// `-f` lands immediately after the `git <verb>` token and is idempotent;
    /// `--amend`/`--tags` are appended; `--git-dir`/`--work-tree` land right
    /// after `git` and require the corresponding directory to be set.
    pub fn add_flag(&mut self, flag: GitFlag) -> Result<()> {
        let (lookup, insert) = match flag {
            GitFlag::Force => {
                (r"git\s+\w+", " -f".to_string())
            }
            GitFlag::Amend => (r"$", " --amend".to_string()),
            GitFlag::Tags => (r"$", " --tags".to_string()),
            GitFlag::GitDir => {
                let dir = self.git_dir.as_ref().ok_or_else(|| {
                    Error::config_invalid_value("--git-dir", "no git directory set on this command")
                })?;
                (r"git", format!(" --git-dir={}", dir))
            }
            GitFlag::WorkTree => {
                let dir = self.work_tree.as_ref().ok_or_else(|| {
                    Error::config_invalid_value("--work-tree", "no work tree set on this command")
                })?;
                (r"git", format!(" --work-tree={}", dir))
            }
        };

        self.insert_after(lookup, &insert);
        Ok(())
    }

    /// Prefix the command with the SSH key export appropriate to the target.
    /// Idempotent: a command already carrying a key export is left alone.
    pub fn add_deploy_key(&mut self, kind: DeployKeyKind, key: &str) {
        if self.command.contains("export GIT_SSH=") {
            return;
        }

        let prefix = match kind {
            DeployKeyKind::Server => {
                format!("export GIT_SSH=~/bin/ssh-git && PKEY={} && ", key)
            }
            DeployKeyKind::Build => {
                format!("export GIT_SSH=~/bin/ssh-git-build && PKEY={} && ", key)
            }
        };

        self.command.insert_str(0, &prefix);
    }

    fn insert_after(&mut self, lookup: &str, insert: &str) {
        // Idempotent in effect: never duplicate a flag already present at
        // its insertion site.
        let re = Regex::new(lookup).expect("static flag lookup pattern");
        let end = match re.find(&self.command) {
            Some(m) => m.end(),
            None => self.command.len(),
        };

        if self.command[end..].starts_with(insert) {
            return;
        }

        self.command.insert_str(end, insert);
    }
}

/// Pending/commit/remote state for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RepositoryState {
    pub current_branch: Option<String>,
    pub status_lines: Vec<String>,
    pub last_commit: Vec<String>,
    pub current_remote: Option<String>,
    pub amend_requested: bool,
}

/// Raw result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub lines: Vec<String>,
    pub success: bool,
    pub exit_code: i32,
}

/// Handle over one local working tree.
pub struct Repo {
    path: PathBuf,
    git_dir: Option<String>,
    work_tree: Option<String>,
    pub state: RepositoryState,
}

impl Repo {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            git_dir: None,
            work_tree: None,
            state: RepositoryState::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_git_dir(&mut self, dir: impl Into<String>) {
        self.git_dir = Some(dir.into());
    }

    pub fn set_work_tree(&mut self, dir: impl Into<String>) {
        self.work_tree = Some(dir.into());
    }

    pub fn command(&self, command: impl Into<String>) -> GitCommand {
        GitCommand::with_dirs(command, self.git_dir.clone(), self.work_tree.clone())
    }

    /// Run a composed command through the shell in the working tree.
    /// Non-zero exits surface in the returned `GitOutput`, not as `Err`;
    /// only spawn failures are errors.
    pub fn exec(&self, cmd: &mut GitCommand) -> Result<GitOutput> {
        if self.git_dir.is_some() {
            cmd.add_flag(GitFlag::GitDir)?;
        }
        if self.work_tree.is_some() {
            cmd.add_flag(GitFlag::WorkTree)?;
        }

        let output = Command::new("sh")
            .args(["-c", cmd.as_str()])
            .current_dir(&self.path)
            .output()
            .map_err(|e| Error::git_command_failed(format!("Failed to run git: {}", e)))?;

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(|l| l.to_string()),
        );

        Ok(GitOutput {
            lines,
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn exec_expect(&self, mut cmd: GitCommand, what: &str) -> Result<GitOutput> {
        let output = self.exec(&mut cmd)?;
        if !output.success {
            return Err(Error::git_command_failed(format!(
                "{} failed (exit {}): {}",
                what,
                output.exit_code,
                output.lines.join("\n")
            )));
        }
        Ok(output)
    }

    /// Porcelain status lines; also cached on `state`.
    pub fn status(&mut self) -> Result<Vec<String>> {
        let output = self.exec_expect(self.command("git status --porcelain"), "git status")?;
        self.state.status_lines = output.lines.clone();
        Ok(output.lines)
    }

    pub fn current_branch(&mut self) -> Result<String> {
        let output = self.exec_expect(
            self.command("git rev-parse --abbrev-ref HEAD"),
            "git rev-parse --abbrev-ref",
        )?;
        let branch = output
            .lines
            .first()
            .cloned()
            .ok_or_else(|| Error::git_command_failed("No current branch reported"))?;
        self.state.current_branch = Some(branch.clone());
        Ok(branch)
    }

    /// Raw `git remote -v` lines.
    pub fn remotes(&self) -> Result<Vec<String>> {
        Ok(self
            .exec_expect(self.command("git remote -v"), "git remote")?
            .lines)
    }

    pub fn last_commit(&mut self) -> Result<Vec<String>> {
        let output = self.exec_expect(self.command("git show --name-status"), "git show")?;
        self.state.last_commit = output.lines.clone();
        Ok(output.lines)
    }

    pub fn current_commit_hash(&self) -> Result<String> {
        let output = self.exec_expect(
            self.command("git rev-parse --verify HEAD"),
            "git rev-parse --verify HEAD",
        )?;
        output
            .lines
            .first()
            .cloned()
            .ok_or_else(|| Error::git_command_failed("No HEAD hash reported"))
    }

    pub fn add_all(&self) -> Result<()> {
        self.exec_expect(self.command("git add --all"), "git add")?;
        Ok(())
    }

    pub fn commit(&mut self, message: &str, amend: bool) -> Result<()> {
        let mut cmd = if amend {
            self.state.amend_requested = true;
            let mut c = self.command("git commit --no-edit -a");
            c.add_flag(GitFlag::Amend)?;
            c
        } else {
            self.command(format!("git commit -am {}", shell::quote_arg(message)))
        };

        let output = self.exec(&mut cmd)?;
        if !output.success {
            return Err(Error::git_command_failed(format!(
                "git commit failed: {}",
                output.lines.join("\n")
            )));
        }
        Ok(())
    }

    /// Build the push command for the currently selected remote and branch.
    /// Both must be set on `state` before a push can be composed.
    pub fn push_command(&self) -> Result<GitCommand> {
        let remote = self.state.current_remote.as_deref().ok_or_else(|| {
            Error::config_invalid_value("remote", "both remote and branch must be set to push")
        })?;
        let branch = self.state.current_branch.as_deref().ok_or_else(|| {
            Error::config_invalid_value("branch", "both remote and branch must be set to push")
        })?;

        Ok(self.command(format!("git push {} {}", remote, branch)))
    }

    pub fn push(&mut self, mut cmd: GitCommand) -> Result<GitOutput> {
        let output = self.exec(&mut cmd)?;
        if !output.success {
            return Err(Error::git_command_failed(format!(
                "git push failed (exit {}): {}",
                output.exit_code,
                output.lines.join("\n")
            )));
        }
        Ok(output)
    }

    pub fn tag(&self, name: &str) -> Result<()> {
        self.exec_expect(
            self.command(format!("git tag {}", shell::quote_arg(name))),
            "git tag",
        )?;
        Ok(())
    }

    /// Move an existing tag to HEAD: delete it on the current remote, then
    /// force-retag locally.
    pub fn update_tag(&self, name: &str, deploy_key: Option<(DeployKeyKind, &str)>) -> Result<()> {
        let remote = self.state.current_remote.as_deref().ok_or_else(|| {
            Error::config_invalid_value("remote", "a remote must be set to update a tag")
        })?;

        let mut delete = self.command(format!("git push {} :refs/tags/{}", remote, name));
        if let Some((kind, key)) = deploy_key {
            delete.add_deploy_key(kind, key);
        }
        self.exec_expect(delete, "git push :refs/tags")?;

        self.exec_expect(
            self.command(format!("git tag -f {}", shell::quote_arg(name))),
            "git tag -f",
        )?;
        Ok(())
    }
}

/// Compose the `git --git-dir=… --work-tree=…` prefix used for every git
/// invocation on a remote server.
pub fn remote_git_prefix(git_dir: &str, work_tree: &str) -> String {
    let mut cmd = GitCommand::with_dirs(
        "git",
        Some(git_dir.to_string()),
        Some(work_tree.to_string()),
    );
    // Both directories are set above, so these cannot fail.
    let _ = cmd.add_flag(GitFlag::GitDir);
    let _ = cmd.add_flag(GitFlag::WorkTree);
    cmd.as_str().to_string()
}
