//! Consolidated conversation memory stored as a single JSON document.
//!
//! The document keeps at most one turn. Each new exchange is folded into that
//! turn instead of being appended, and the whole file is rewritten after
//! every turn.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

/// Persistent memory stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// Holds zero or one consolidated turn.
    #[serde(default)]
    pub conversation_history: Vec<Turn>,
    #[serde(default = "now_stamp")]
    pub last_updated: String,
    /// Fields written by other tools, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Every user message so far, joined with `", "`.
    pub user: String,
    /// Identity prefix plus the most recent reply.
    pub assistant: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self {
            conversation_history: Vec::new(),
            last_updated: now_stamp(),
            extra: Map::new(),
        }
    }
}

impl MemoryDocument {
    /// The retained turn, if any.
    pub fn turn(&self) -> Option<&Turn> {
        self.conversation_history.first()
    }

    /// Format memory for display.
    pub fn display(&self) -> String {
        let mut out = String::new();
        match self.turn() {
            None => out.push_str("No conversation memory.\n"),
            Some(turn) => {
                out.push_str(&format!("## Memory (updated {})\n", turn.timestamp));
                out.push_str(&format!("  user:      {}\n", truncate(&turn.user, 200)));
                out.push_str(&format!("  assistant: {}\n", truncate(&turn.assistant, 200)));
            }
        }
        out.push_str(&format!("Last saved: {}\n", self.last_updated));
        out
    }
}

/// Current local time as `YYYY-MM-DD HH:MM:SS.ffffff`.
///
/// Fixed width, so lexical order matches chronological order.
pub fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Load memory from `path`, falling back to an empty document when the file
/// is missing or unreadable.
pub fn load(path: &Path) -> MemoryDocument {
    if !path.exists() {
        return MemoryDocument::default();
    }
    match read(path) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("error loading memory from {}: {e:#}", path.display());
            MemoryDocument::default()
        }
    }
}

fn read(path: &Path) -> Result<MemoryDocument> {
    let contents = std::fs::read_to_string(path).with_context(|| "reading memory file")?;
    serde_json::from_str(&contents).with_context(|| "parsing memory JSON")
}

/// Stamp `last_updated` and persist the whole document.
///
/// Writes to a sibling temp file and renames it into place, so a failure
/// leaves the previous file intact.
pub fn save(path: &Path, doc: &mut MemoryDocument) -> Result<()> {
    doc.last_updated = now_stamp();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(doc).with_context(|| "serializing memory")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        std::fs::remove_file(&tmp).ok();
        return Err(e).with_context(|| format!("replacing {}", path.display()));
    }
    Ok(())
}

/// Fold a new exchange into the single retained turn.
pub fn consolidate(
    mut doc: MemoryDocument,
    new_user: &str,
    new_assistant: &str,
    identity_prefix: &str,
) -> MemoryDocument {
    let now = now_stamp();
    doc.conversation_history.truncate(1);
    match doc.conversation_history.first_mut() {
        None => doc.conversation_history.push(Turn {
            user: new_user.to_string(),
            assistant: new_assistant.to_string(),
            timestamp: now,
            extra: Map::new(),
        }),
        Some(turn) => {
            turn.user.push_str(", ");
            turn.user.push_str(new_user);
            turn.assistant = format!("{identity_prefix}{new_assistant}");
            turn.timestamp = now;
        }
    }
    doc
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "I am Jarvis4H. ";

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = load(&dir.path().join("ai_memory.json"));
        assert!(doc.conversation_history.is_empty());
        assert!(!doc.last_updated.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_memory.json");
        std::fs::write(&path, "{ not json").unwrap();
        let doc = load(&path);
        assert!(doc.conversation_history.is_empty());
    }

    #[test]
    fn reads_file_written_by_earlier_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_memory.json");
        std::fs::write(
            &path,
            r#"{
  "conversation_history": [
    {"user": "hi", "assistant": "hello there", "timestamp": "2024-03-01 09:15:02.123456"}
  ],
  "last_updated": "2024-03-01 09:15:02.200000"
}"#,
        )
        .unwrap();
        let doc = load(&path);
        let turn = doc.turn().unwrap();
        assert_eq!(turn.user, "hi");
        assert_eq!(turn.assistant, "hello there");
        assert_eq!(doc.last_updated, "2024-03-01 09:15:02.200000");
    }

    #[test]
    fn unknown_fields_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_memory.json");
        std::fs::write(
            &path,
            r#"{
  "conversation_history": [
    {"user": "hi", "assistant": "hey", "mood": "cheerful"}
  ],
  "last_updated": "2024-03-01 09:15:02.200000",
  "owner": "sam"
}"#,
        )
        .unwrap();

        let mut doc = load(&path);
        let turn = doc.turn().unwrap();
        assert_eq!(turn.user, "hi");
        assert_eq!(turn.timestamp, "");

        doc = consolidate(doc, "again", "back", PREFIX);
        save(&path, &mut doc).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["owner"], "sam");
        assert_eq!(raw["conversation_history"][0]["mood"], "cheerful");
        assert_eq!(raw["conversation_history"][0]["user"], "hi, again");
        assert!(!raw["conversation_history"][0]["timestamp"].as_str().unwrap().is_empty());
    }

    #[test]
    fn save_advances_last_updated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ai_memory.json");
        let mut doc = MemoryDocument {
            conversation_history: Vec::new(),
            last_updated: "2000-01-01 00:00:00.000000".into(),
            extra: Map::new(),
        };
        let before = doc.last_updated.clone();
        save(&path, &mut doc).unwrap();
        assert!(doc.last_updated >= before);

        let reloaded = load(&path);
        assert_eq!(reloaded, doc);
    }

    #[test]
    fn failed_save_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ai_memory.json");
        let mut doc = consolidate(MemoryDocument::default(), "a", "b", PREFIX);
        save(&path, &mut doc).unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();

        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(dir.path().join("ai_memory.json.tmp")).unwrap();
        let mut changed = consolidate(doc.clone(), "c", "d", PREFIX);
        assert!(save(&path, &mut changed).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), on_disk);
    }

    #[test]
    fn consolidate_into_empty_creates_one_turn() {
        let doc = consolidate(MemoryDocument::default(), "Hello", "Hi!", PREFIX);
        assert_eq!(doc.conversation_history.len(), 1);
        let turn = doc.turn().unwrap();
        assert_eq!(turn.user, "Hello");
        assert_eq!(turn.assistant, "Hi!");
    }

    #[test]
    fn consolidate_merges_into_existing_turn() {
        let doc = consolidate(MemoryDocument::default(), "Hello", "Hi!", PREFIX);
        let first_stamp = doc.turn().unwrap().timestamp.clone();
        let doc = consolidate(doc, "How are you", "Great, thanks.", PREFIX);

        assert_eq!(doc.conversation_history.len(), 1);
        let turn = doc.turn().unwrap();
        assert_eq!(turn.user, "Hello, How are you");
        assert!(turn.assistant.starts_with(PREFIX));
        assert!(turn.assistant.ends_with("Great, thanks."));
        assert!(turn.timestamp >= first_stamp);
    }

    #[test]
    fn consolidate_drops_extra_turns() {
        let extra = Turn {
            user: "x".into(),
            assistant: "y".into(),
            timestamp: now_stamp(),
            extra: Map::new(),
        };
        let doc = MemoryDocument {
            conversation_history: vec![extra.clone(), extra],
            last_updated: now_stamp(),
            extra: Map::new(),
        };
        let doc = consolidate(doc, "z", "w", PREFIX);
        assert_eq!(doc.conversation_history.len(), 1);
        assert_eq!(doc.turn().unwrap().user, "x, z");
    }

    #[test]
    fn display_mentions_empty_memory() {
        assert!(MemoryDocument::default().display().contains("No conversation memory"));
    }
}
