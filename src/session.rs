//! Interactive chat loop tying annotation, replies, memory, and the dataset
//! log together.

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::error;

use crate::annotate::Annotator;
use crate::completion::Responder;
use crate::config::CompanionConfig;
use crate::dataset::DatasetLog;
use crate::memory::{self, MemoryDocument};

/// Where the loop stands after handling a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingInput,
    Terminated,
}

pub struct Session<W: Write> {
    config: CompanionConfig,
    memory: MemoryDocument,
    annotator: Annotator,
    responder: Responder,
    dataset: DatasetLog,
    out: W,
}

impl<W: Write> Session<W> {
    /// Start a session, loading memory from the configured path.
    pub fn new(config: CompanionConfig, annotator: Annotator, responder: Responder, out: W) -> Self {
        let memory = memory::load(&config.memory_path);
        let dataset = DatasetLog::new(config.dataset_path.clone());
        Self {
            config,
            memory,
            annotator,
            responder,
            dataset,
            out,
        }
    }

    pub fn memory(&self) -> &MemoryDocument {
        &self.memory
    }

    /// Read lines from `input` until the exit keyword or end of input.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        writeln!(self.out, "\n{}", "Ready! You can start chatting.".yellow())?;
        writeln!(self.out, "Type '{}' to exit", self.config.exit_keyword)?;
        self.separator()?;

        let mut input = input;
        let mut buf = Vec::new();
        loop {
            write!(self.out, "\n{}", "You: ".green().bold())?;
            self.out.flush()?;

            buf.clear();
            let read = input
                .read_until(b'\n', &mut buf)
                .await
                .context("reading input")?;
            let state = if read == 0 {
                writeln!(self.out)?;
                LoopState::Terminated
            } else {
                // Stray non-UTF-8 bytes become U+FFFD instead of ending the loop.
                let line = String::from_utf8_lossy(&buf);
                self.handle_line(&line).await?
            };
            if state == LoopState::Terminated {
                return Ok(());
            }
        }
    }

    /// Process one line of input.
    pub async fn handle_line(&mut self, line: &str) -> Result<LoopState> {
        let user_input = line.trim();
        if user_input.is_empty() {
            return Ok(LoopState::AwaitingInput);
        }
        if user_input.eq_ignore_ascii_case(&self.config.exit_keyword) {
            writeln!(self.out, "\n{}", "Goodbye!".yellow())?;
            return Ok(LoopState::Terminated);
        }

        let analysis = self.annotator.analyze(user_input).await;
        writeln!(self.out, "Message analysis: {}", analysis.to_string().magenta())?;

        write!(self.out, "{}\r", "Thinking...".cyan())?;
        self.out.flush()?;
        let reply = self.responder.respond(user_input, &self.memory).await;
        write!(self.out, "{:20}\r", "")?;

        let merged = std::mem::take(&mut self.memory);
        self.memory = memory::consolidate(merged, user_input, &reply, &self.config.identity_prefix);
        if let Err(e) = memory::save(&self.config.memory_path, &mut self.memory) {
            error!("error saving memory: {e:#}");
        }
        if let Err(e) = self.dataset.append(user_input, &reply, "") {
            error!("error appending to dataset: {e:#}");
        }

        writeln!(self.out, "\n{}", format!("Assistant: {reply}").white().bold())?;
        self.separator()?;
        Ok(LoopState::AwaitingInput)
    }

    fn separator(&mut self) -> Result<()> {
        writeln!(self.out, "{}", "─".repeat(50).yellow())?;
        Ok(())
    }
}
