use crate::config::FileQueueConfig;
use crate::error::{QueueError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sluice_core::notify::ChangeNotifier;
use sluice_core::traits::{QueueOffset, QueuedRequest, RequestQueue, APPEND_WAKE_KEY};
use sluice_core::types::OperationRequest;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_FILE: &str = "requests.log";
const META_FILE: &str = "meta.json";
const FRAME_HEADER_LEN: u64 = 8 + 4;

/// Cursor stored in meta.json
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
struct QueueMeta {
    /// First offset not yet acknowledged
    acknowledged: QueueOffset,

    /// Lower bound for the next offset; survives compaction of an empty log
    next_offset: QueueOffset,
}

/// Writer-side state, held across file I/O
struct LogWriter {
    file: File,
    meta: QueueMeta,
    next_offset: QueueOffset,
}

/// Reader-side view, only locked briefly
struct LogIndex {
    acknowledged: QueueOffset,
    tail: QueueOffset,
    pending: BTreeMap<QueueOffset, OperationRequest>,
    log_bytes: u64,
}

/// Summary of a queue directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub acknowledged: QueueOffset,
    pub tail: QueueOffset,
    pub pending: usize,
    pub log_bytes: u64,
}

/// File-backed request queue.
///
/// Every request is one frame in `requests.log`:
/// `[offset: u64 BE][len: u32 BE][json: len bytes]`. The acknowledged offset
/// lives in `meta.json`, replaced atomically on every acknowledgement.
/// Unacknowledged requests are also held in memory so reads never touch the
/// disk.
///
/// Appends and acknowledgements write and fsync on the blocking pool; reads
/// only take the in-memory index and never wait behind a disk write.
///
/// On open the log is scanned; a torn final frame left by a crash mid-append
/// is truncated away. Any other malformed frame is reported as
/// [`QueueError::Corrupt`].
pub struct FileRequestQueue {
    log: Arc<RequestLog>,
    notifier: ChangeNotifier,
}

struct RequestLog {
    config: FileQueueConfig,
    writer: Mutex<LogWriter>,
    index: RwLock<LogIndex>,
}

impl FileRequestQueue {
    /// Open or create a queue in `config.base_dir`
    pub fn open(config: FileQueueConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir)?;

        let meta = load_meta(&config.base_dir)?;
        let log_path = config.base_dir.join(LOG_FILE);
        let scan = scan_log(&log_path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&log_path)?;
        let on_disk = file.metadata()?.len();
        if scan.valid_bytes < on_disk {
            tracing::warn!(
                path = %log_path.display(),
                valid_bytes = scan.valid_bytes,
                on_disk,
                "Truncating torn frame at end of request log"
            );
            file.set_len(scan.valid_bytes)?;
            file.sync_all()?;
        }
        seek_end(&mut file)?;

        let next_offset = scan
            .last_offset
            .map(|o| o + 1)
            .unwrap_or(0)
            .max(meta.next_offset)
            .max(meta.acknowledged);
        let pending: BTreeMap<_, _> = scan
            .entries
            .into_iter()
            .filter(|(offset, _)| *offset >= meta.acknowledged)
            .collect();

        tracing::info!(
            path = %config.base_dir.display(),
            acknowledged = meta.acknowledged,
            next_offset,
            pending = pending.len(),
            "Opened request queue"
        );

        let index = LogIndex {
            acknowledged: meta.acknowledged,
            tail: next_offset,
            pending,
            log_bytes: scan.valid_bytes,
        };
        Ok(Self {
            log: Arc::new(RequestLog {
                config,
                writer: Mutex::new(LogWriter {
                    file,
                    meta,
                    next_offset,
                }),
                index: RwLock::new(index),
            }),
            notifier: ChangeNotifier::new(),
        })
    }

    pub fn config(&self) -> &FileQueueConfig {
        &self.log.config
    }

    pub fn stats(&self) -> QueueStats {
        let index = self.log.index.read();
        QueueStats {
            acknowledged: index.acknowledged,
            tail: index.tail,
            pending: index.pending.len(),
            log_bytes: index.log_bytes,
        }
    }

    /// Unacknowledged requests in offset order
    pub fn pending_requests(&self) -> Vec<QueuedRequest> {
        self.log.read_from(0, usize::MAX)
    }

    /// Rewrite the log so it only holds unacknowledged requests.
    ///
    /// Blocks on file I/O; from async code use [`FileRequestQueue::compact_async`].
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.log.writer.lock();
        self.log.compact_locked(&mut writer)
    }

    pub async fn compact_async(&self) -> Result<()> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || {
            let mut writer = log.writer.lock();
            log.compact_locked(&mut writer)
        })
        .await?
    }
}

impl RequestLog {
    fn read_from(&self, from: QueueOffset, max: usize) -> Vec<QueuedRequest> {
        self.index
            .read()
            .pending
            .range(from..)
            .take(max)
            .map(|(offset, request)| QueuedRequest {
                offset: *offset,
                request: request.clone(),
            })
            .collect()
    }

    fn compact_locked(&self, writer: &mut LogWriter) -> Result<()> {
        let log_path = self.config.base_dir.join(LOG_FILE);
        let tmp_path = self.config.base_dir.join(format!("{LOG_FILE}.compact"));

        // Pending only shrinks through acknowledge, which needs the writer.
        let snapshot: Vec<_> = self
            .index
            .read()
            .pending
            .iter()
            .map(|(offset, request)| (*offset, request.clone()))
            .collect();
        let mut buffer = Vec::new();
        for (offset, request) in &snapshot {
            let bytes = serde_json::to_vec(request)?;
            encode_frame(&mut buffer, *offset, &bytes);
        }
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buffer)?;
            tmp.sync_all()?;
        }

        // The cursor must cover the offsets being dropped before the old
        // log disappears.
        writer.meta.next_offset = writer.next_offset;
        save_meta(&self.config.base_dir, &writer.meta)?;
        std::fs::rename(&tmp_path, &log_path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&log_path)?;
        seek_end(&mut file)?;
        writer.file = file;

        let before = {
            let mut index = self.index.write();
            std::mem::replace(&mut index.log_bytes, buffer.len() as u64)
        };
        tracing::info!(
            before_bytes = before,
            after_bytes = buffer.len(),
            pending = snapshot.len(),
            "Compacted request log"
        );
        Ok(())
    }

    fn append(&self, request: &OperationRequest) -> Result<QueueOffset> {
        let bytes = serde_json::to_vec(request)?;
        if bytes.len() > self.config.max_request_size || bytes.len() > u32::MAX as usize {
            return Err(QueueError::RequestTooLarge {
                size: bytes.len(),
                max: self.config.max_request_size,
            });
        }

        let mut writer = self.writer.lock();
        let offset = writer.next_offset;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + bytes.len());
        encode_frame(&mut frame, offset, &bytes);

        let written = writer.file.write_all(&frame).and_then(|_| {
            if self.config.sync_on_append {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Drop any partial frame so later appends stay aligned.
            let keep = self.index.read().log_bytes;
            if let Err(truncate_err) = writer
                .file
                .set_len(keep)
                .and_then(|_| seek_end(&mut writer.file))
            {
                tracing::error!(error = %truncate_err, "Failed to discard partial frame");
            }
            return Err(e.into());
        }

        writer.next_offset = offset + 1;
        // Published while the writer is held so readers see offsets in order.
        let mut index = self.index.write();
        index.log_bytes += frame.len() as u64;
        index.tail = offset + 1;
        index.pending.insert(offset, request.clone());
        Ok(offset)
    }

    fn acknowledge(&self, next: QueueOffset) -> Result<()> {
        let mut writer = self.writer.lock();
        if next <= writer.meta.acknowledged {
            return Ok(());
        }
        if next > writer.next_offset {
            return Err(QueueError::InvalidAcknowledge {
                requested: next,
                tail: writer.next_offset,
            });
        }

        let mut meta = writer.meta;
        meta.acknowledged = next;
        meta.next_offset = writer.next_offset;
        save_meta(&self.config.base_dir, &meta)?;
        writer.meta = meta;

        let log_bytes = {
            let mut index = self.index.write();
            index.acknowledged = next;
            index.pending = index.pending.split_off(&next);
            index.log_bytes
        };
        if log_bytes >= self.config.compact_threshold_bytes {
            self.compact_locked(&mut writer)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RequestQueue for FileRequestQueue {
    async fn append(&self, request: &OperationRequest) -> sluice_core::Result<QueueOffset> {
        let log = self.log.clone();
        let owned = request.clone();
        let offset = tokio::task::spawn_blocking(move || log.append(&owned))
            .await
            .map_err(QueueError::from)??;
        tracing::debug!(
            offset,
            request_id = %request.request_id,
            stream = %request.stream,
            kind = %request.kind(),
            "Appended request"
        );
        self.notifier.notify(APPEND_WAKE_KEY);
        Ok(offset)
    }

    async fn read_from(
        &self,
        from: QueueOffset,
        max: usize,
    ) -> sluice_core::Result<Vec<QueuedRequest>> {
        Ok(self.log.read_from(from, max))
    }

    async fn acknowledge(&self, next: QueueOffset) -> sluice_core::Result<()> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || log.acknowledge(next))
            .await
            .map_err(QueueError::from)??;
        Ok(())
    }

    async fn acknowledged(&self) -> sluice_core::Result<QueueOffset> {
        Ok(self.log.index.read().acknowledged)
    }

    async fn tail(&self) -> sluice_core::Result<QueueOffset> {
        Ok(self.log.index.read().tail)
    }

    fn append_notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }
}

impl std::fmt::Debug for FileRequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRequestQueue")
            .field("base_dir", &self.log.config.base_dir)
            .field("stats", &self.stats())
            .finish()
    }
}

fn encode_frame(buffer: &mut Vec<u8>, offset: QueueOffset, bytes: &[u8]) {
    buffer.extend_from_slice(&offset.to_be_bytes());
    buffer.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buffer.extend_from_slice(bytes);
}

fn seek_end(file: &mut File) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::End(0)).map(|_| ())
}

fn meta_path(base_dir: &Path) -> PathBuf {
    base_dir.join(META_FILE)
}

fn load_meta(base_dir: &Path) -> Result<QueueMeta> {
    let path = meta_path(base_dir);
    if !path.exists() {
        return Ok(QueueMeta::default());
    }
    let data = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Write-then-rename so a crash never leaves a half-written cursor
fn save_meta(base_dir: &Path, meta: &QueueMeta) -> Result<()> {
    let path = meta_path(base_dir);
    let tmp = base_dir.join(format!("{META_FILE}.tmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec(meta)?)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

struct LogScan {
    entries: Vec<(QueueOffset, OperationRequest)>,
    last_offset: Option<QueueOffset>,
    valid_bytes: u64,
}

fn scan_log(path: &Path) -> Result<LogScan> {
    let mut scan = LogScan {
        entries: Vec::new(),
        last_offset: None,
        valid_bytes: 0,
    };
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(scan),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    loop {
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&header[..8]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[8..]);
        let offset = u64::from_be_bytes(offset_bytes);
        let len = u32::from_be_bytes(len_bytes) as usize;

        let mut data = vec![0u8; len];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        if let Some(last) = scan.last_offset {
            if offset <= last {
                return Err(QueueError::Corrupt {
                    position: scan.valid_bytes,
                    reason: format!("offset {offset} follows {last}"),
                });
            }
        }
        let request: OperationRequest =
            serde_json::from_slice(&data).map_err(|e| QueueError::Corrupt {
                position: scan.valid_bytes,
                reason: e.to_string(),
            })?;

        scan.entries.push((offset, request));
        scan.last_offset = Some(offset);
        scan.valid_bytes += FRAME_HEADER_LEN + len as u64;
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::types::{OperationPayload, StreamId};
    use tempfile::TempDir;

    fn setup() -> (FileRequestQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let queue = FileRequestQueue::open(FileQueueConfig::new(dir.path())).unwrap();
        (queue, dir)
    }

    fn seal(name: &str) -> OperationRequest {
        OperationRequest::new(StreamId::new("scope", name), OperationPayload::Seal)
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_offsets() {
        let (queue, _dir) = setup();
        assert_eq!(queue.append(&seal("a")).await.unwrap(), 0);
        assert_eq!(queue.append(&seal("b")).await.unwrap(), 1);
        assert_eq!(queue.tail().await.unwrap(), 2);

        let read = queue.read_from(1, 10).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].offset, 1);
        assert_eq!(read[0].request.stream.name, "b");
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let dir = TempDir::new().unwrap();
        let queue =
            FileRequestQueue::open(FileQueueConfig::new(dir.path()).with_max_request_size(16))
                .unwrap();
        let err = queue.append(&seal("a")).await.unwrap_err();
        assert!(err.to_string().contains("max_request_size"));
        assert_eq!(queue.tail().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_beyond_tail_rejected() {
        let (queue, _dir) = setup();
        queue.append(&seal("a")).await.unwrap();
        assert!(queue.acknowledge(5).await.is_err());
        queue.acknowledge(1).await.unwrap();
        // Going backwards is a no-op.
        queue.acknowledge(0).await.unwrap();
        assert_eq!(queue.acknowledged().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_compact_keeps_pending_and_offsets() {
        let (queue, dir) = setup();
        for name in ["a", "b", "c"] {
            queue.append(&seal(name)).await.unwrap();
        }
        queue.acknowledge(2).await.unwrap();
        let before = queue.stats().log_bytes;
        queue.compact().unwrap();
        assert!(queue.stats().log_bytes < before);

        assert_eq!(queue.append(&seal("d")).await.unwrap(), 3);
        drop(queue);

        let reopened = FileRequestQueue::open(FileQueueConfig::new(dir.path())).unwrap();
        let offsets: Vec<_> = reopened
            .pending_requests()
            .iter()
            .map(|q| q.offset)
            .collect();
        assert_eq!(offsets, vec![2, 3]);
        assert_eq!(reopened.tail().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_compact_of_fully_acknowledged_log_preserves_tail() {
        let (queue, dir) = setup();
        queue.append(&seal("a")).await.unwrap();
        queue.append(&seal("b")).await.unwrap();
        queue.acknowledge(2).await.unwrap();
        queue.compact().unwrap();
        assert_eq!(queue.stats().log_bytes, 0);
        drop(queue);

        let reopened = FileRequestQueue::open(FileQueueConfig::new(dir.path())).unwrap();
        assert_eq!(reopened.tail().await.unwrap(), 2);
        assert_eq!(reopened.append(&seal("c")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_the_writer() {
        let (queue, _dir) = setup();
        queue.append(&seal("a")).await.unwrap();

        // A write in progress holds the writer; readers use the index.
        let writer = queue.log.writer.lock();
        assert_eq!(queue.read_from(0, 10).await.unwrap().len(), 1);
        assert_eq!(queue.tail().await.unwrap(), 1);
        assert_eq!(queue.acknowledged().await.unwrap(), 0);
        drop(writer);

        queue.acknowledge(1).await.unwrap();
        queue.compact_async().await.unwrap();
        assert_eq!(
            queue.stats(),
            QueueStats {
                acknowledged: 1,
                tail: 1,
                pending: 0,
                log_bytes: 0,
            }
        );
    }
}
