//! Interactive prompts.
//!
//! The pipeline talks to an abstract `Prompt` so deploy scenarios can be
//! driven by scripted answers in tests. `TerminalPrompt` is the real one:
//! questions go to stderr, answers come from stdin.

use std::io::{BufRead, Write};

use crate::error::{Error, Result};

pub trait Prompt {
    /// Yes/no question. Only an explicit `y`/`yes` counts as yes.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Free-form answer, trimmed.
    fn ask(&mut self, question: &str) -> Result<String>;

    /// Pick one of `options`, or abort. `None` means the operator chose to
    /// abort the selection.
    fn select(&mut self, question: &str, options: &[String]) -> Result<Option<String>>;
}

pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }

    fn read_line(&self) -> Result<String> {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| Error::internal_io(e.to_string(), Some("read prompt answer".to_string())))?;
        Ok(line.trim().to_string())
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for TerminalPrompt {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        eprint!("{} [y/N] ", question);
        let _ = std::io::stderr().flush();
        let answer = self.read_line()?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        eprint!("{}: ", question);
        let _ = std::io::stderr().flush();
        self.read_line()
    }

    fn select(&mut self, question: &str, options: &[String]) -> Result<Option<String>> {
        loop {
            eprintln!("{}", question);
            for (i, option) in options.iter().enumerate() {
                eprintln!("  {}) {}", i + 1, option);
            }
            eprintln!("  0) abort");
            eprint!("> ");
            let _ = std::io::stderr().flush();

            let answer = self.read_line()?;
            if answer == "0" || answer == "abort" {
                return Ok(None);
            }
            if let Ok(index) = answer.parse::<usize>() {
                if index >= 1 && index <= options.len() {
                    return Ok(Some(options[index - 1].clone()));
                }
            }
            if let Some(name) = options.iter().find(|o| **o == answer) {
                return Ok(Some(name.clone()));
            }
            eprintln!("Unrecognized choice: {}", answer);
        }
    }
}
