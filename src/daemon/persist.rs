// clipkeeper - Daemon Persistence
// JSON files for history and snippets, flushed when the stores are dirty

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::DaemonState;
use crate::model::{ClipItem, SnippetFolder};
use crate::store::{ClipboardStore, HistoryLimits, SnippetStore};

const HISTORY_FILE: &str = "history.json";
const SNIPPETS_FILE: &str = "snippets.json";

#[derive(Serialize, Deserialize, Default)]
struct HistoryFile {
    items: Vec<ClipItem>,
}

#[derive(Serialize, Deserialize, Default)]
struct SnippetsFile {
    folders: Vec<SnippetFolder>,
}

/// Location of the daemon's data files
#[derive(Clone, Debug)]
pub struct Persistence {
    dir: PathBuf,
}

impl Persistence {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_history(&self, limits: HistoryLimits) -> anyhow::Result<ClipboardStore> {
        let file: HistoryFile = read_json(&self.dir.join(HISTORY_FILE))?;
        Ok(ClipboardStore::from_items(file.items, limits))
    }

    pub fn load_snippets(&self) -> anyhow::Result<SnippetStore> {
        let file: SnippetsFile = read_json(&self.dir.join(SNIPPETS_FILE))?;
        Ok(SnippetStore::from_folders(file.folders))
    }

    pub fn save_history(&self, items: Vec<ClipItem>) -> anyhow::Result<()> {
        write_json(&self.dir.join(HISTORY_FILE), &HistoryFile { items })
    }

    pub fn save_snippets(&self, folders: Vec<SnippetFolder>) -> anyhow::Result<()> {
        write_json(&self.dir.join(SNIPPETS_FILE), &SnippetsFile { folders })
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("corrupt data file {}", path.display()))
}

/// Write to a sibling temp file, then rename over the target
fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Write whichever stores are dirty.
///
/// A store is marked clean before its snapshot is written and marked dirty
/// again if the write fails, so a mutation that lands mid-write is not lost.
pub async fn flush(state: &DaemonState, persistence: &Persistence) -> anyhow::Result<()> {
    let history = {
        let mut history = state.history.write().await;
        history.is_dirty().then(|| {
            history.mark_clean();
            history.items().to_vec()
        })
    };
    if let Some(items) = history {
        if let Err(e) = persistence.save_history(items) {
            state.history.write().await.mark_dirty();
            return Err(e);
        }
        tracing::debug!("history flushed");
    }

    let snippets = {
        let mut snippets = state.snippets.write().await;
        snippets.is_dirty().then(|| {
            snippets.mark_clean();
            snippets.folders().to_vec()
        })
    };
    if let Some(folders) = snippets {
        if let Err(e) = persistence.save_snippets(folders) {
            state.snippets.write().await.mark_dirty();
            return Err(e);
        }
        tracing::debug!("snippets flushed");
    }
    Ok(())
}
