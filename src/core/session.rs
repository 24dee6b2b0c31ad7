//! Command sessions: run an ordered list of shell commands against a target.
//!
//! Two interchangeable implementations share one contract: `LocalSession`
//! spawns a single local shell, `SshSession` drives one persistent SSH
//! connection to a resolved remote target. Output ordering matches command
//! order, the final exit status distinguishes "no output" from "failed", and
//! a session call is single-use per batch — there is no implicit retry.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::remotes::RemoteTarget;

pub trait CommandSession {
    /// Run the commands in order, streaming each output line to `on_line`,
    /// and return the final exit status. Commands are chained so that a
    /// failing command short-circuits the rest of the batch.
    fn run(&self, commands: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32>;

    /// Human-readable target label for log and error messages.
    fn label(&self) -> &str;

    /// Run a batch and collect its output instead of streaming it.
    fn run_capture(&self, commands: &[String]) -> Result<SessionOutput> {
        let mut lines = Vec::new();
        let exit_code = self.run(commands, &mut |line| lines.push(line.to_string()))?;
        Ok(SessionOutput { lines, exit_code })
    }
}

impl<T: CommandSession + ?Sized> CommandSession for std::rc::Rc<T> {
    fn run(&self, commands: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        (**self).run(commands, on_line)
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

/// Collected result of one session batch.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutput {
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl SessionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

fn stream_child(mut cmd: Command, on_line: &mut dyn FnMut(&str)) -> Result<i32> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::internal_io(e.to_string(), Some("spawn session shell".to_string())))?;

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = line
                .map_err(|e| Error::internal_io(e.to_string(), Some("read session output".to_string())))?;
            on_line(&line);
        }
    }

    // Blocks until process exit; remote maintenance operations may run for a
    // long time, so there is deliberately no timeout here.
    let status = child
        .wait()
        .map_err(|e| Error::internal_io(e.to_string(), Some("wait for session shell".to_string())))?;

    Ok(status.code().unwrap_or(-1))
}

/// Joins the batch with a short-circuiting separator and routes stderr into
/// the ordered stream.
fn batch_script(commands: &[String]) -> String {
    format!("{{ {}; }} 2>&1", commands.join(" && "))
}

/// Runs command batches in a local shell.
pub struct LocalSession {
    dir: Option<PathBuf>,
    label: String,
}

impl LocalSession {
    pub fn new() -> Self {
        Self {
            dir: None,
            label: "local".to_string(),
        }
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            label: "local".to_string(),
        }
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSession for LocalSession {
    fn run(&self, commands: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", batch_script(commands).as_str()]);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        stream_child(cmd, on_line)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Runs command batches over one persistent SSH connection.
///
/// The connection is multiplexed via ControlMaster and reused for every
/// batch in a deploy run; it is opened once and closed on drop.
pub struct SshSession {
    host: String,
    user: String,
    identity_file: Option<String>,
    control_path: String,
    label: String,
}

impl SshSession {
    pub fn connect(target: &RemoteTarget) -> Result<Self> {
        let identity_file = match &target.private_key {
            key if !key.is_empty() => {
                let expanded = shellexpand::tilde(key).to_string();
                if !std::path::Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        let control_path = format!(
            "/tmp/shipmate-ssh-{}-{}.sock",
            target.name,
            std::process::id()
        );

        let session = Self {
            host: target.host.clone(),
            user: target.ssh_user.clone(),
            identity_file,
            control_path,
            label: target.name.clone(),
        };

        log_status!("ssh", "Opening session to {}@{}", session.user, session.host);
        Ok(session)
    }

    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        // One multiplexed connection per run; batches reuse it.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
        ]);

        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        args
    }
}

impl CommandSession for SshSession {
    fn run(&self, commands: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(&batch_script(commands)));
        stream_child(cmd, on_line)
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        // Best-effort teardown of the multiplexed connection.
        let _ = Command::new("ssh")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path))
            .arg("-O")
            .arg("exit")
            .arg(format!("{}@{}", self.user, self.host))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Open a session for a target: local hosts get a `LocalSession`, everything
/// else an `SshSession`.
pub fn open(target: &RemoteTarget) -> Result<Box<dyn CommandSession>> {
    if is_local_host(&target.host) {
        log_status!(
            "ssh",
            "Remote '{}' is localhost, using local execution",
            target.name
        );
        return Ok(Box::new(LocalSession::in_dir(&target.work_tree)));
    }
    Ok(Box::new(SshSession::connect(target)?))
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_script_short_circuits_and_merges_stderr() {
        let script = batch_script(&["cd /srv".to_string(), "ls".to_string()]);
        assert_eq!(script, "{ cd /srv && ls; } 2>&1");
    }

    #[test]
    fn local_session_streams_in_command_order() {
        let session = LocalSession::new();
        let output = session
            .run_capture(&["echo first".to_string(), "echo second".to_string()])
            .unwrap();
        assert_eq!(output.lines, vec!["first", "second"]);
        assert!(output.success());
    }

    #[test]
    fn local_session_reports_failure_via_exit_status() {
        let session = LocalSession::new();
        let output = session.run_capture(&["false".to_string()]).unwrap();
        assert!(!output.success());
        assert!(output.lines.is_empty());
    }

    #[test]
    fn failing_command_short_circuits_the_batch() {
        let session = LocalSession::new();
        let output = session
            .run_capture(&["false".to_string(), "echo never".to_string()])
            .unwrap();
        assert!(!output.success());
        assert!(!output.contains("never"));
    }

    #[test]
    fn localhost_addresses_are_detected() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(!is_local_host("10.0.0.5"));
    }
}
