//! Ingest buffer: per-key rotating NDJSON files on local disk.
//!
//! Every `(destination_id, table)` key owns at most one open file under
//! `<scratch>/<destination_id>/<table>/<id>.ndjson`. Writers for a key are
//! serialized by that key's mutex; different keys proceed independently.
//! The key map itself (a sharded `DashMap`) is only locked briefly to look a
//! key up or insert a new one.
//!
//! A file is rotated (closed and announced as a [`ClosedFile`]) when the next
//! row would push it past `max_file_size_bytes`, when it holds `max_rows`
//! rows, when it is older than `max_file_age`, or at shutdown. Age-based
//! rotation without further writes is done by a background sweep that only
//! `try_lock`s each key: a busy key is skipped until the next tick, so the
//! sweep never stalls ingestion.
//!
//! Closed files are never deleted here. They are handed to the producer over
//! a bounded channel; when the channel is full or gone the file is parked and
//! retried by the sweep, and anything still parked at exit is picked up by
//! [`recover_scratch_dir`] on the next start.

mod file;
mod key;
mod recovery;

pub use drift_core::disk::{DiskSpace, StaticDiskSpace, SysinfoDiskSpace};
pub use key::IngestKey;
pub use recovery::recover_scratch_dir;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BufferConfig;
use crate::emit;
use crate::error::BufferError;
use crate::metrics::events::{
    FileRotated, OpenFiles, ParkedFiles, RejectReason, RotationFailed, RowBuffered, SweepSkipped,
    WriteRejected,
};
use file::BufferFile;

/// A rotated, non-empty buffer file ready for handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedFile {
    pub key: IngestKey,
    pub path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
}

/// Why a file was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    Size,
    Rows,
    Age,
    Shutdown,
}

impl RotationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::Size => "size",
            RotationReason::Rows => "rows",
            RotationReason::Age => "age",
            RotationReason::Shutdown => "shutdown",
        }
    }
}

/// How a closed file is offered to the handoff channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Park the file if the channel is full.
    Try,
    /// Wait for channel capacity.
    Wait,
}

#[derive(Debug, Default)]
struct Slot {
    file: Option<BufferFile>,
}

/// Per-key rotating file buffer.
pub struct IngestBuffer {
    config: BufferConfig,
    disk: Arc<dyn DiskSpace>,
    slots: DashMap<IngestKey, Arc<Mutex<Slot>>>,
    closed_tx: RwLock<Option<mpsc::Sender<ClosedFile>>>,
    parked: Mutex<Vec<ClosedFile>>,
    accepting: AtomicBool,
    open_files: AtomicUsize,
    sweep_shutdown: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IngestBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestBuffer")
            .field("scratch_dir", &self.config.scratch_dir)
            .field("keys", &self.slots.len())
            .finish()
    }
}

impl IngestBuffer {
    /// Create the buffer and start its sweep.
    ///
    /// `recovered` files (see [`recover_scratch_dir`]) are announced on the
    /// returned channel ahead of anything new.
    pub fn start(
        config: BufferConfig,
        disk: Arc<dyn DiskSpace>,
        recovered: Vec<ClosedFile>,
    ) -> (Arc<Self>, mpsc::Receiver<ClosedFile>) {
        let (tx, rx) = mpsc::channel(config.handoff_channel_capacity);
        let sweep_interval = config.sweep_interval();

        let buffer = Arc::new(Self {
            config,
            disk,
            slots: DashMap::new(),
            closed_tx: RwLock::new(Some(tx)),
            parked: Mutex::new(recovered),
            accepting: AtomicBool::new(true),
            open_files: AtomicUsize::new(0),
            sweep_shutdown: CancellationToken::new(),
            sweep_handle: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_sweep(buffer.clone(), sweep_interval));
        if let Ok(mut slot) = buffer.sweep_handle.try_lock() {
            *slot = Some(handle);
        }

        (buffer, rx)
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Append one serialized row (without trailing newline) to the key's open file.
    ///
    /// Fails with [`BufferError::DiskFull`] before touching any state when free
    /// space would drop below `min_free_disk_bytes`.
    pub async fn write(&self, key: &IngestKey, row: &[u8]) -> Result<(), BufferError> {
        let result = match self.admit([row]) {
            Ok(()) => self.append(key, row).await,
            Err(e) => Err(e),
        };
        record_rejection(&result);
        result
    }

    /// Append a group of rows that must be admitted together.
    ///
    /// Shutdown, row size and free space are checked once for the whole group
    /// before any row is written, so a rejected group leaves no rows behind.
    pub async fn write_all(&self, rows: &[(IngestKey, Vec<u8>)]) -> Result<(), BufferError> {
        let result = self.write_all_inner(rows).await;
        record_rejection(&result);
        result
    }

    async fn write_all_inner(&self, rows: &[(IngestKey, Vec<u8>)]) -> Result<(), BufferError> {
        self.admit(rows.iter().map(|(_, row)| row.as_slice()))?;
        for (key, row) in rows {
            self.append(key, row).await?;
        }
        Ok(())
    }

    fn admit<'a>(&self, rows: impl IntoIterator<Item = &'a [u8]>) -> Result<(), BufferError> {
        if !self.is_accepting() {
            return Err(BufferError::ShuttingDown);
        }

        let mut incoming = 0u64;
        for row in rows {
            let line_len = row.len() as u64 + 1;
            if line_len > self.config.max_file_size_bytes {
                return Err(BufferError::RowTooLarge {
                    size: line_len,
                    limit: self.config.max_file_size_bytes,
                });
            }
            incoming = incoming.saturating_add(line_len);
        }

        self.check_disk(incoming)
    }

    async fn append(&self, key: &IngestKey, row: &[u8]) -> Result<(), BufferError> {
        let line_len = row.len() as u64 + 1;
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::default())))
            .clone();
        let mut slot = slot.lock().await;

        // Shutdown may have rotated this key while we waited for the lock.
        if !self.is_accepting() {
            return Err(BufferError::ShuttingDown);
        }

        if let Some(reason) = slot
            .file
            .as_ref()
            .and_then(|file| self.rotation_due(file, line_len))
        {
            self.rotate_locked(key, &mut slot, reason, Delivery::Try)
                .await;
        }

        if slot.file.is_none() {
            let file = BufferFile::create(&key.dir_in(&self.config.scratch_dir)).await?;
            debug!(target_key = %key, path = %file.path().display(), "Opened buffer file");
            slot.file = Some(file);
            let count = self.open_files.fetch_add(1, Ordering::Relaxed) + 1;
            emit!(OpenFiles { count });
        }

        if let Some(file) = slot.file.as_mut() {
            file.append_line(row).await?;
        }
        emit!(RowBuffered {
            key,
            bytes: line_len,
        });
        Ok(())
    }

    fn check_disk(&self, incoming: u64) -> Result<(), BufferError> {
        if self.config.min_free_disk_bytes == 0 {
            return Ok(());
        }
        let Some(available) = self.disk.available_bytes() else {
            return Ok(());
        };
        let required = self.config.min_free_disk_bytes.saturating_add(incoming);
        if available < required {
            return Err(BufferError::DiskFull {
                path: self.config.scratch_dir.clone(),
                available_bytes: available,
                required_bytes: required,
            });
        }
        Ok(())
    }

    /// Whether `file` must be rotated before a line of `incoming` bytes is appended.
    fn rotation_due(&self, file: &BufferFile, incoming: u64) -> Option<RotationReason> {
        if file.rows() == 0 {
            return None;
        }
        if file.rows() >= self.config.max_rows {
            Some(RotationReason::Rows)
        } else if file.bytes() + incoming > self.config.max_file_size_bytes {
            Some(RotationReason::Size)
        } else if file.age() >= self.config.max_file_age() {
            Some(RotationReason::Age)
        } else {
            None
        }
    }

    /// Close the slot's file and announce it. Caller holds the slot lock.
    async fn rotate_locked(
        &self,
        key: &IngestKey,
        slot: &mut Slot,
        reason: RotationReason,
        delivery: Delivery,
    ) {
        let Some(file) = slot.file.take() else {
            return;
        };
        let count = self.open_files.fetch_sub(1, Ordering::Relaxed) - 1;
        emit!(OpenFiles { count });

        let (path, rows, bytes, synced) = file.close().await;

        if rows == 0 {
            match tokio::fs::remove_file(&path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Failed to remove empty buffer file: {e}");
                }
                _ => {}
            }
            return;
        }

        if let Err(e) = synced {
            // The rows are still in the file; hand it off regardless.
            emit!(RotationFailed);
            error!(target_key = %key, path = %path.display(), "Failed to sync buffer file on rotation: {e}");
        }

        info!(
            target_key = %key,
            path = %path.display(),
            reason = reason.as_str(),
            rows,
            bytes,
            "Rotated buffer file"
        );
        emit!(FileRotated {
            key,
            reason,
            rows,
            bytes,
        });

        self.hand_off(
            ClosedFile {
                key: key.clone(),
                path,
                rows,
                bytes,
            },
            delivery,
        )
        .await;
    }

    /// Offer a closed file to the producer, parking it on failure.
    async fn hand_off(&self, closed: ClosedFile, delivery: Delivery) {
        let sender = self.closed_tx.read().await.clone();
        let result = match (sender, delivery) {
            (Some(tx), Delivery::Try) => tx.try_send(closed).map_err(|e| e.into_inner()),
            (Some(tx), Delivery::Wait) => tx.send(closed).await.map_err(|e| e.0),
            (None, _) => Err(closed),
        };

        if let Err(closed) = result {
            debug!(path = %closed.path.display(), "Handoff channel unavailable, parking closed file");
            let mut parked = self.parked.lock().await;
            parked.push(closed);
            emit!(ParkedFiles {
                count: parked.len(),
            });
        }
    }

    /// Re-offer parked files; whatever still does not fit stays parked.
    async fn flush_parked(&self, delivery: Delivery) {
        let pending = std::mem::take(&mut *self.parked.lock().await);
        if pending.is_empty() {
            return;
        }
        for closed in pending {
            self.hand_off(closed, delivery).await;
        }
        emit!(ParkedFiles {
            count: self.parked.lock().await.len(),
        });
    }

    /// Files handed off neither to the producer nor the channel yet.
    pub async fn parked_files(&self) -> Vec<ClosedFile> {
        self.parked.lock().await.clone()
    }

    /// Number of buffer files currently open for writing.
    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<(IngestKey, Arc<Mutex<Slot>>)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// One sweep pass: retry parked files, rotate aged files, drop idle keys.
    pub async fn sweep(&self) {
        self.flush_parked(Delivery::Try).await;

        let max_age = self.config.max_file_age();
        for (key, slot) in self.snapshot() {
            let Ok(mut guard) = slot.try_lock() else {
                emit!(SweepSkipped);
                continue;
            };
            let aged = guard
                .file
                .as_ref()
                .is_some_and(|file| file.rows() > 0 && file.age() >= max_age);
            if aged {
                self.rotate_locked(&key, &mut guard, RotationReason::Age, Delivery::Try)
                    .await;
            }
        }

        // Only slots nobody else references and that hold no file are removed.
        self.slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot
                    .try_lock()
                    .map(|guard| guard.file.is_some())
                    .unwrap_or(true)
        });
    }

    async fn run_sweep(buffer: Arc<Self>, interval: std::time::Duration) {
        let shutdown = buffer.sweep_shutdown.clone();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => buffer.sweep().await,
            }
        }
        debug!("Sweep stopped");
    }

    /// Rotate every open file now, whatever its size or age.
    pub async fn rotate_all(&self, reason: RotationReason) {
        for (key, slot) in self.snapshot() {
            let mut guard = slot.lock().await;
            self.rotate_locked(&key, &mut guard, reason, Delivery::Wait)
                .await;
        }
    }

    /// Stop accepting writes, stop the sweep, rotate every key and close the
    /// handoff channel.
    ///
    /// Waits for channel capacity while handing files off, so the producer
    /// must keep draining. Files it no longer takes stay on disk.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Ingest buffer shutting down");

        self.sweep_shutdown.cancel();
        let sweep = self.sweep_handle.lock().await.take();
        if let Some(handle) = sweep {
            if let Err(e) = handle.await {
                warn!("Sweep task ended abnormally: {e}");
            }
        }

        self.rotate_all(RotationReason::Shutdown).await;
        self.flush_parked(Delivery::Wait).await;

        self.closed_tx.write().await.take();

        let parked = self.parked.lock().await.len();
        if parked > 0 {
            warn!(
                parked,
                "Closed files left on disk; they will be recovered on next start"
            );
        }
        info!("Ingest buffer stopped");
    }
}

fn record_rejection(result: &Result<(), BufferError>) {
    if let Err(e) = result {
        let reason = match e {
            BufferError::DiskFull { .. } => RejectReason::DiskFull,
            BufferError::RowTooLarge { .. } => RejectReason::RowTooLarge,
            BufferError::ShuttingDown => RejectReason::ShuttingDown,
            _ => RejectReason::Io,
        };
        emit!(WriteRejected { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> BufferConfig {
        BufferConfig {
            sweep_interval_ms: 60_000,
            ..BufferConfig::new(dir.path())
        }
    }

    fn start(config: BufferConfig) -> (Arc<IngestBuffer>, mpsc::Receiver<ClosedFile>) {
        IngestBuffer::start(config, Arc::new(StaticDiskSpace::unlimited()), Vec::new())
    }

    fn key() -> IngestKey {
        IngestKey::new("acme", "events").unwrap()
    }

    fn read_lines(path: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_writes_land_in_key_directory() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(config(&dir));

        buffer.write(&key(), br#"{"a":1}"#).await.unwrap();
        buffer.write(&key(), br#"{"a":2}"#).await.unwrap();
        buffer.shutdown().await;

        let closed = rx.recv().await.unwrap();
        assert_eq!(closed.key, key());
        assert_eq!(closed.rows, 2);
        assert_eq!(closed.bytes, 16);
        assert!(closed.path.starts_with(dir.path().join("acme/events")));
        assert_eq!(read_lines(&closed.path), vec![r#"{"a":1}"#, r#"{"a":2}"#]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rotation_by_size_happens_before_offending_row() {
        let dir = TempDir::new().unwrap();
        // Each row is 10 bytes including the newline.
        let (buffer, mut rx) = start(BufferConfig {
            max_file_size_bytes: 25,
            ..config(&dir)
        });

        buffer.write(&key(), b"row-00001").await.unwrap();
        buffer.write(&key(), b"row-00002").await.unwrap();
        assert!(rx.try_recv().is_err(), "20 bytes fit, no rotation yet");

        buffer.write(&key(), b"row-00003").await.unwrap();
        let first = rx.try_recv().unwrap();
        assert_eq!(first.rows, 2);
        assert_eq!(read_lines(&first.path), vec!["row-00001", "row-00002"]);
        assert!(rx.try_recv().is_err(), "exactly one rotation");

        buffer.shutdown().await;
        let second = rx.recv().await.unwrap();
        assert_eq!(read_lines(&second.path), vec!["row-00003"]);
        assert_ne!(first.path, second.path);
    }

    #[tokio::test]
    async fn test_rotation_by_rows() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(BufferConfig {
            max_rows: 3,
            ..config(&dir)
        });

        for i in 0..7 {
            buffer
                .write(&key(), format!("{{\"i\":{i}}}").as_bytes())
                .await
                .unwrap();
        }
        buffer.shutdown().await;

        let mut rows = Vec::new();
        while let Some(closed) = rx.recv().await {
            rows.push(closed.rows);
        }
        assert_eq!(rows, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_rotation_by_age_via_sweep() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(BufferConfig {
            max_file_age_ms: 50,
            sweep_interval_ms: 10,
            ..config(&dir)
        });

        buffer.write(&key(), b"{}").await.unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("sweep should rotate the aged file")
            .unwrap();
        assert_eq!(closed.rows, 1);

        buffer.shutdown().await;
        assert!(rx.recv().await.is_none(), "nothing left to rotate");
    }

    #[tokio::test]
    async fn test_sweep_skips_busy_key() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(BufferConfig {
            max_file_age_ms: 1,
            ..config(&dir)
        });
        buffer.write(&key(), b"{}").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let slot = buffer.slots.get(&key()).unwrap().value().clone();
        let guard = slot.lock().await;
        buffer.sweep().await;
        assert!(rx.try_recv().is_err(), "busy key must be skipped");
        drop(guard);

        buffer.sweep().await;
        assert_eq!(rx.try_recv().unwrap().rows, 1);
    }

    #[tokio::test]
    async fn test_disk_full_rejects_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(StaticDiskSpace::new(1_000));
        let (buffer, mut rx) = IngestBuffer::start(
            BufferConfig {
                min_free_disk_bytes: 10_000,
                ..config(&dir)
            },
            disk.clone(),
            Vec::new(),
        );

        let err = buffer.write(&key(), b"{}").await.unwrap_err();
        assert!(matches!(err, BufferError::DiskFull { .. }));
        assert!(err.is_backpressure());
        assert!(buffer.slots.is_empty());
        assert!(!dir.path().join("acme").exists());

        disk.set(1_000_000);
        buffer.write(&key(), b"{}").await.unwrap();
        buffer.shutdown().await;
        assert_eq!(rx.recv().await.unwrap().rows, 1);
    }

    #[tokio::test]
    async fn test_oversized_row_rejected() {
        let dir = TempDir::new().unwrap();
        let (buffer, _rx) = start(BufferConfig {
            max_file_size_bytes: 8,
            ..config(&dir)
        });
        let err = buffer.write(&key(), b"0123456789").await.unwrap_err();
        assert!(matches!(err, BufferError::RowTooLarge { size: 11, limit: 8 }));
    }

    #[tokio::test]
    async fn test_writes_after_shutdown_rejected() {
        let dir = TempDir::new().unwrap();
        let (buffer, _rx) = start(config(&dir));
        buffer.shutdown().await;
        assert!(matches!(
            buffer.write(&key(), b"{}").await,
            Err(BufferError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_full_channel_parks_then_sweep_delivers() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(BufferConfig {
            max_rows: 1,
            handoff_channel_capacity: 1,
            ..config(&dir)
        });

        for _ in 0..3 {
            buffer.write(&key(), b"{}").await.unwrap();
        }
        // Two rotations: one fits the channel, one is parked.
        assert_eq!(buffer.parked_files().await.len(), 1);

        rx.recv().await.unwrap();
        buffer.sweep().await;
        assert!(buffer.parked_files().await.is_empty());
        rx.recv().await.unwrap();

        let drain = tokio::spawn(async move {
            let mut n = 0;
            while rx.recv().await.is_some() {
                n += 1;
            }
            n
        });
        buffer.shutdown().await;
        assert_eq!(drain.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_independent_keys_get_independent_files() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(config(&dir));

        let other = IngestKey::new("globex", "events").unwrap();
        buffer.write(&key(), b"{\"k\":1}").await.unwrap();
        buffer.write(&other, b"{\"k\":2}").await.unwrap();
        buffer.shutdown().await;

        let mut keys = Vec::new();
        while let Some(closed) = rx.recv().await {
            keys.push(closed.key.to_string());
        }
        keys.sort();
        assert_eq!(keys, vec!["acme/events", "globex/events"]);
    }

    #[tokio::test]
    async fn test_idle_slots_are_evicted() {
        let dir = TempDir::new().unwrap();
        let (buffer, mut rx) = start(BufferConfig {
            max_file_age_ms: 1,
            ..config(&dir)
        });
        buffer.write(&key(), b"{}").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        buffer.sweep().await;
        rx.recv().await.unwrap();
        assert!(buffer.slots.is_empty());
    }
}
