//! Scripted doubles for the session and prompt seams.
//!
//! Deploy scenarios are exercised end to end without a real terminal or SSH
//! connection by scripting every answer and every remote command result.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::prompt::Prompt;
use crate::session::CommandSession;

/// Prompt whose answers are consumed in order. Asking more questions than
/// were scripted is an error, which keeps scenarios honest about every
/// interaction they trigger.
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    pub transcript: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            transcript: Vec::new(),
        }
    }

    fn next(&mut self, question: &str) -> Result<String> {
        self.transcript.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| Error::internal_unexpected(format!("unscripted prompt: {}", question)))
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.next(question)?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.next(question)
    }

    fn select(&mut self, question: &str, options: &[String]) -> Result<Option<String>> {
        let answer = self.next(question)?;
        if answer == "abort" {
            return Ok(None);
        }
        options
            .iter()
            .find(|o| **o == answer)
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                Error::internal_unexpected(format!("scripted answer not offered: {}", answer))
            })
    }
}

enum ReplyLines {
    Static(Vec<String>),
    /// Resolved when the reply is consumed: the HEAD hash of a local git
    /// repository. Lets a scenario assert hash verification against commits
    /// it creates mid-run.
    HeadOf(std::path::PathBuf),
}

/// One scripted session batch result.
pub struct ScriptedReply {
    /// Substring the joined batch must contain, as a guard against replies
    /// being consumed by the wrong command.
    pub expect: &'static str,
    lines: ReplyLines,
    pub exit_code: i32,
}

impl ScriptedReply {
    pub fn ok(expect: &'static str, lines: &[&str]) -> Self {
        Self {
            expect,
            lines: ReplyLines::Static(lines.iter().map(|l| l.to_string()).collect()),
            exit_code: 0,
        }
    }

    pub fn failed(expect: &'static str, lines: &[&str], exit_code: i32) -> Self {
        Self {
            expect,
            lines: ReplyLines::Static(lines.iter().map(|l| l.to_string()).collect()),
            exit_code,
        }
    }

    pub fn head_of(expect: &'static str, repo: impl Into<std::path::PathBuf>) -> Self {
        Self {
            expect,
            lines: ReplyLines::HeadOf(repo.into()),
            exit_code: 0,
        }
    }
}

/// Session whose batch results are consumed in order.
pub struct ScriptedSession {
    replies: RefCell<VecDeque<ScriptedReply>>,
    pub batches: RefCell<Vec<String>>,
    label: String,
}

impl ScriptedSession {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            batches: RefCell::new(Vec::new()),
            label: "scripted".to_string(),
        }
    }

    /// Batches the session actually ran, joined per call.
    pub fn ran(&self) -> Vec<String> {
        self.batches.borrow().clone()
    }

    pub fn exhausted(&self) -> bool {
        self.replies.borrow().is_empty()
    }
}

impl CommandSession for ScriptedSession {
    fn run(&self, commands: &[String], on_line: &mut dyn FnMut(&str)) -> Result<i32> {
        let batch = commands.join(" && ");
        self.batches.borrow_mut().push(batch.clone());

        let reply = self.replies.borrow_mut().pop_front().ok_or_else(|| {
            Error::internal_unexpected(format!("unscripted session batch: {}", batch))
        })?;

        if !batch.contains(reply.expect) {
            return Err(Error::internal_unexpected(format!(
                "scripted reply for '{}' consumed by batch: {}",
                reply.expect, batch
            )));
        }

        let lines = match &reply.lines {
            ReplyLines::Static(lines) => lines.clone(),
            ReplyLines::HeadOf(repo) => {
                let output = std::process::Command::new("git")
                    .args(["rev-parse", "--verify", "HEAD"])
                    .current_dir(repo)
                    .output()
                    .map_err(|e| Error::internal_unexpected(e.to_string()))?;
                vec![String::from_utf8_lossy(&output.stdout).trim().to_string()]
            }
        };

        for line in &lines {
            on_line(line);
        }
        Ok(reply.exit_code)
    }

    fn label(&self) -> &str {
        &self.label
    }
}
