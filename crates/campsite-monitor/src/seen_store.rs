use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::scan_types::{AvailableCampsite, MatchKey};

/// Lifecycle of a stored match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Admitted and persisted, notification not yet confirmed
    Admitted,
    /// At least one channel delivered the notification
    Notified,
}

/// One record in a seen-store log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeenEntry {
    /// Match identity
    pub key: MatchKey,
    /// Lifecycle state
    pub state: EntryState,
    /// Snapshot of the site, kept on admission so it can be re-notified after a restart
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub campsite: Option<AvailableCampsite>,
}

impl SeenEntry {
    /// Entry recording a freshly admitted match
    pub fn admitted(key: MatchKey, campsite: AvailableCampsite) -> Self {
        Self {
            key,
            state: EntryState::Admitted,
            campsite: Some(campsite),
        }
    }

    /// Entry confirming a match was delivered
    pub fn notified(key: MatchKey) -> Self {
        Self {
            key,
            state: EntryState::Notified,
            campsite: None,
        }
    }
}

/// Durable record of the matches a search has already reported
///
/// The store is an append-only log keyed by [`MatchKey`]. `load` returns
/// every entry appended so far, in order; `append` must be durable when it
/// returns, because notifications are dispatched right after it.
#[async_trait::async_trait]
pub trait SeenStore: Send + Sync {
    /// Every entry appended so far
    async fn load(&self) -> Result<Vec<SeenEntry>, StoreError>;

    /// Record new entries
    async fn append(&self, entries: &[SeenEntry]) -> Result<(), StoreError>;
}

/// In-process store; clones share the same contents
#[derive(Debug, Clone, Default)]
pub struct MemorySeenStore {
    entries: Arc<Mutex<Vec<SeenEntry>>>,
}

impl MemorySeenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries recorded
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing has been recorded
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SeenStore for MemorySeenStore {
    async fn load(&self) -> Result<Vec<SeenEntry>, StoreError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn append(&self, entries: &[SeenEntry]) -> Result<(), StoreError> {
        self.entries.lock().await.extend_from_slice(entries);
        Ok(())
    }
}

/// File store holding one JSON-encoded entry per line
#[derive(Debug)]
pub struct JsonLinesSeenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSeenStore {
    /// Open the store at `path`, creating the file and its directory if missing
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        debug!("Opened seen-store at {}", path.display());

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the file ends on a line boundary before appending
    ///
    /// A complete entry missing its newline gets one; a partial entry left
    /// by an interrupted append is cut off so the next line starts clean.
    async fn repair_tail(&self) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;

        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(());
        }

        file.seek(SeekFrom::End(-1)).await?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).await?;
        if last[0] == b'\n' {
            return Ok(());
        }

        let contents = fs::read(&self.path).await?;
        let line_start = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        let tail = &contents[line_start..];

        if serde_json::from_slice::<SeenEntry>(tail).is_ok() {
            file.seek(SeekFrom::End(0)).await?;
            file.write_all(b"\n").await?;
        } else {
            warn!(
                "Dropping {} bytes of truncated entry at the end of {}",
                tail.len(),
                self.path.display()
            );
            file.set_len(line_start as u64).await?;
        }
        file.sync_data().await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SeenStore for JsonLinesSeenStore {
    async fn load(&self) -> Result<Vec<SeenEntry>, StoreError> {
        let contents = fs::read_to_string(&self.path).await?;
        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut entries = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<SeenEntry>(line) {
                Ok(entry) => entries.push(entry),
                // a crash mid-append can leave a partial final line
                Err(e) if index + 1 == lines.len() => {
                    warn!(
                        "Ignoring truncated last line of {}: {}",
                        self.path.display(),
                        e
                    );
                }
                Err(e) => return Err(StoreError::Serialization(e)),
            }
        }

        Ok(entries)
    }

    async fn append(&self, entries: &[SeenEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        self.repair_tail().await?;

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(buffer.as_bytes()).await?;
        file.sync_data().await?;

        Ok(())
    }
}
