//! Append-only instruction/input/output log used as fine-tuning data.
//!
//! One JSON object per line. The chat loop only ever appends; nothing is
//! deduplicated, rotated, or truncated.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// The user's message.
    pub instruction: String,
    /// Extra context; always empty in the chat loop.
    pub input: String,
    /// The assistant's reply.
    pub output: String,
}

/// Handle for appending to a dataset file.
pub struct DatasetLog {
    path: PathBuf,
}

impl DatasetLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single record, creating the file if needed.
    pub fn append(&self, user: &str, assistant: &str, input: &str) -> Result<()> {
        let record = DatasetRecord {
            instruction: user.to_string(),
            input: input.to_string(),
            output: assistant.to_string(),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let line = serde_json::to_string(&record).with_context(|| "serializing dataset record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{line}").with_context(|| "writing dataset record")?;
        Ok(())
    }

    /// Read every record back, skipping blank lines.
    pub fn read_all(&self) -> Result<Vec<DatasetRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| "reading dataset line")?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .with_context(|| format!("parsing dataset line {}", idx + 1))?;
            records.push(record);
        }
        Ok(records)
    }
}
