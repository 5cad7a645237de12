//! Failed-request ledger
//!
//! Keeps requests whose retries were exhausted or that a handler rejected,
//! for operator inspection. Optionally backed by a JSON-lines file so the
//! CLI can read it from another process.

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sluice_core::types::{OperationRequest, RequestId};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Default number of entries kept in memory
pub const DEFAULT_LEDGER_CAPACITY: usize = 1024;

/// Failed request record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRequest {
    pub request: OperationRequest,
    pub reason: String,
    /// Handler invocations, including the first.
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Ledger of terminally failed requests
pub struct FailedRequestLog {
    entries: RwLock<VecDeque<FailedRequest>>,
    capacity: usize,
    file: Option<(PathBuf, parking_lot::Mutex<File>)>,
}

impl FailedRequestLog {
    /// In-memory ledger holding at most `capacity` entries
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            file: None,
        }
    }

    /// Ledger appended to the JSON-lines file at `path`.
    ///
    /// Existing entries are loaded; only the newest `capacity` stay in memory.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = Self::in_memory(capacity);
        for entry in read_entries(&path)? {
            log.push(entry);
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Some((path, parking_lot::Mutex::new(file))),
            ..log
        })
    }

    /// Read a ledger file without opening it for writing
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<FailedRequest>> {
        read_entries(path.as_ref())
    }

    /// Record a failure
    pub fn record(&self, entry: FailedRequest) -> Result<()> {
        if let Some((_, file)) = &self.file {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            let mut file = file.lock();
            file.write_all(&line)?;
            file.flush()?;
        }
        self.push(entry);
        Ok(())
    }

    fn push(&self, entry: FailedRequest) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// All entries, oldest first
    pub fn list(&self) -> Vec<FailedRequest> {
        self.entries.read().iter().cloned().collect()
    }

    /// Most recent failure of a request
    pub fn get(&self, request_id: &RequestId) -> Option<FailedRequest> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| &e.request.request_id == request_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }
}

impl Default for FailedRequestLog {
    fn default() -> Self {
        Self::in_memory(DEFAULT_LEDGER_CAPACITY)
    }
}

impl std::fmt::Debug for FailedRequestLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailedRequestLog")
            .field("entries", &self.len())
            .field("path", &self.path())
            .finish()
    }
}

fn read_entries(path: &Path) -> Result<Vec<FailedRequest>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            // A crash can leave a partial last line.
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping bad ledger line"),
        }
    }
    Ok(entries)
}
