use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{EventSender, RotationEngine, RotationEvent, RotationOptions};
use crate::naming::MAX_FILENAME_LEN;
use crate::observability::TransportMetrics;

struct LiveFile {
    path: PathBuf,
    file: File,
    size: u64,
    opened_at: Instant,
    /// Already renamed to a rotated name that no event has announced yet
    orphaned: bool,
}

struct State {
    live: Option<LiveFile>,
    events: Option<EventSender>,
    ended: bool,
}

/// Size- and interval-triggered file rotation
///
/// In the default mode lines go to `dir/base.log`, which is renamed to a
/// timestamped name on rotation. In immutable mode every file is written
/// under its timestamped name from the start.
pub struct FileRotator {
    options: RotationOptions,
    metrics: Arc<TransportMetrics>,
    state: Mutex<State>,
    live_path: std::sync::Mutex<Option<PathBuf>>,
}

impl FileRotator {
    /// Create the output directory and open the first live file
    pub async fn open(
        options: RotationOptions,
        events: Option<EventSender>,
        metrics: Arc<TransportMetrics>,
    ) -> io::Result<Self> {
        fs::create_dir_all(options.naming.dir()).await?;

        let rotator = Self {
            options,
            metrics,
            state: Mutex::new(State {
                live: None,
                events,
                ended: false,
            }),
            live_path: std::sync::Mutex::new(None),
        };

        let live = rotator.open_live().await?;
        info!(path = %live.path.display(), immutable = rotator.options.immutable, "Opened log file");
        rotator.set_live_path(Some(live.path.clone()));
        rotator.state.lock().await.live = Some(live);

        Ok(rotator)
    }

    /// Path currently being written, if the engine has not ended
    pub async fn current_path(&self) -> Option<PathBuf> {
        self.state.lock().await.live.as_ref().map(|live| live.path.clone())
    }

    fn set_live_path(&self, path: Option<PathBuf>) {
        *self.live_path.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    async fn open_live(&self) -> io::Result<LiveFile> {
        let path = if self.options.immutable {
            unique_path(self.options.naming.rotated_path(Utc::now())).await?
        } else {
            self.options.naming.live_path()
        };

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let size = file.metadata().await?.len();

        Ok(LiveFile {
            path,
            file,
            size,
            opened_at: Instant::now(),
            orphaned: false,
        })
    }

    fn should_rotate(&self, live: &LiveFile, incoming: usize) -> bool {
        if live.size == 0 {
            return false;
        }
        live.size + incoming as u64 > self.options.size_threshold_bytes
            || live.opened_at.elapsed() >= self.options.interval
    }

    /// Close the live file under its final name and open a fresh one
    async fn rotate(&self, state: &mut State) -> io::Result<()> {
        let Some(live) = state.live.as_mut() else {
            return Ok(());
        };
        live.file.flush().await?;

        let closed = if self.options.immutable {
            live.path.clone()
        } else {
            let target = unique_path(self.options.naming.rotated_path(Utc::now())).await?;
            fs::rename(&live.path, &target).await?;
            target
        };

        // The old handle stays valid until the replacement is open
        let fresh = match self.open_live().await {
            Ok(fresh) => fresh,
            Err(e) if !self.options.immutable => {
                restore_live_name(live, closed).await;
                self.set_live_path(Some(live.path.clone()));
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.set_live_path(Some(fresh.path.clone()));
        state.live = Some(fresh);

        self.metrics.rotated();
        debug!(path = %closed.display(), "Rotated log file");

        if let Some(events) = &state.events {
            if events.send(RotationEvent { path: closed }).is_err() {
                debug!("Rotation subscriber is gone, event dropped");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RotationEngine for FileRotator {
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if state.ended {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "rotation engine has ended"));
        }

        let due = state
            .live
            .as_ref()
            .is_some_and(|live| self.should_rotate(live, buf.len()));

        // A failed rotation must not lose the line; write first, report after
        let rotation = if due { self.rotate(&mut state).await } else { Ok(()) };

        let live = state
            .live
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no live log file"))?;
        live.file.write_all(buf).await?;
        live.file.flush().await?;
        live.size += buf.len() as u64;

        rotation
    }

    async fn end(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if state.ended {
            return Ok(());
        }
        state.ended = true;

        self.set_live_path(None);
        let events = state.events.take();
        if let Some(mut live) = state.live.take() {
            live.file.flush().await?;
            live.file.sync_all().await?;
            info!(path = %live.path.display(), "Closed log file");

            if live.orphaned {
                if let Some(events) = &events {
                    let _ = events.send(RotationEvent { path: live.path });
                }
            }
        }
        Ok(())
    }

    fn live_path(&self) -> Option<PathBuf> {
        self.live_path.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Undo a rename whose replacement file could not be opened.
///
/// Writing continues through the same handle. When the old name cannot be
/// restored the file keeps its rotated name and is announced once it is
/// closed.
async fn restore_live_name(live: &mut LiveFile, closed: PathBuf) {
    match fs::rename(&closed, &live.path).await {
        Ok(()) => {
            debug!(path = %live.path.display(), "Restored live file name after failed reopen");
        }
        Err(e) => {
            debug!(path = %closed.display(), error = %e, "Live file keeps its rotated name");
            live.path = closed;
            live.size = 0;
            live.opened_at = Instant::now();
            live.orphaned = true;
        }
    }
}

/// Append `.N` before the `.log` suffix until the name is free
async fn unique_path(path: PathBuf) -> io::Result<PathBuf> {
    if !fs::try_exists(&path).await? {
        return Ok(path);
    }

    for n in 1u32.. {
        let candidate = numbered_path(&path, n);
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free rotation name for {}", path.display()),
    ))
}

/// `dir/stem.log` becomes `dir/stem.N.log`, with the stem clipped so the
/// file name stays within [`MAX_FILENAME_LEN`] characters
fn numbered_path(path: &Path, n: u32) -> PathBuf {
    let name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    let stem = name.strip_suffix(".log").unwrap_or(name.as_ref());
    let suffix = format!(".{}.log", n);

    let room = MAX_FILENAME_LEN.saturating_sub(suffix.chars().count());
    let stem: String = stem.chars().take(room).collect();

    path.with_file_name(format!("{}{}", stem, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{NamingStrategy, TimestampFormat};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn options(dir: &Path, size: u64, immutable: bool) -> RotationOptions {
        RotationOptions {
            size_threshold_bytes: size,
            interval: Duration::from_secs(86400),
            immutable,
            naming: NamingStrategy::new(dir, "app", TimestampFormat::Unix),
        }
    }

    async fn log_files(dir: &Path) -> Vec<PathBuf> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.path());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_writes_go_to_live_file() {
        let temp_dir = TempDir::new().unwrap();
        let rotator = FileRotator::open(
            options(temp_dir.path(), 1024, false),
            None,
            Arc::new(TransportMetrics::new()),
        )
        .await
        .unwrap();

        rotator.write(b"hello\n").await.unwrap();
        rotator.write(b"world\n").await.unwrap();
        rotator.end().await.unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join("app.log")).unwrap();
        assert_eq!(content, "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_size_rotation_emits_event() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(TransportMetrics::new());
        let rotator = FileRotator::open(options(temp_dir.path(), 100, false), Some(tx), Arc::clone(&metrics))
            .await
            .unwrap();

        let line = [b'x'; 39];
        for _ in 0..3 {
            rotator.write(&line).await.unwrap();
        }
        rotator.end().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(event.path.exists());
        assert_eq!(std::fs::metadata(&event.path).unwrap().len(), 78);
        assert_eq!(std::fs::metadata(temp_dir.path().join("app.log")).unwrap().len(), 39);
        assert_eq!(metrics.snapshot().rotations, 1);
    }

    #[tokio::test]
    async fn test_interval_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut opts = options(temp_dir.path(), 1024 * 1024, false);
        opts.interval = Duration::from_millis(50);
        let rotator = FileRotator::open(opts, Some(tx), Arc::new(TransportMetrics::new()))
            .await
            .unwrap();

        rotator.write(b"before\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        rotator.write(b"after\n").await.unwrap();
        rotator.end().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(std::fs::read_to_string(&event.path).unwrap(), "before\n");
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("app.log")).unwrap(),
            "after\n"
        );
    }

    #[tokio::test]
    async fn test_immutable_never_renames() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rotator = FileRotator::open(
            options(temp_dir.path(), 10, true),
            Some(tx),
            Arc::new(TransportMetrics::new()),
        )
        .await
        .unwrap();

        let first = rotator.current_path().await.unwrap();
        rotator.write(b"0123456789").await.unwrap();
        rotator.write(b"abc").await.unwrap();
        let second = rotator.current_path().await.unwrap();
        rotator.end().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(rx.recv().await.unwrap().path, first);
        assert!(!temp_dir.path().join("app.log").exists());
        assert_eq!(log_files(temp_dir.path()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_colliding_names_are_disambiguated() {
        let temp_dir = TempDir::new().unwrap();
        let taken = temp_dir.path().join("app-1.log");
        std::fs::write(&taken, "x").unwrap();

        let free = unique_path(taken.clone()).await.unwrap();
        assert_eq!(free, temp_dir.path().join("app-1.1.log"));
    }

    #[tokio::test]
    async fn test_numbered_names_stay_within_limit() {
        let temp_dir = TempDir::new().unwrap();
        let long_name = format!("{}.log", "a".repeat(MAX_FILENAME_LEN - 4));
        let taken = temp_dir.path().join(&long_name);
        std::fs::write(&taken, "x").unwrap();

        let free = unique_path(taken.clone()).await.unwrap();
        let name = free.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(name.chars().count(), MAX_FILENAME_LEN);
        assert!(name.ends_with(".1.log"));
        assert_eq!(free.parent(), taken.parent());
    }

    #[tokio::test]
    async fn test_failed_reopen_restores_live_name() {
        let temp_dir = TempDir::new().unwrap();
        let rotator = FileRotator::open(
            options(temp_dir.path(), 1024, false),
            None,
            Arc::new(TransportMetrics::new()),
        )
        .await
        .unwrap();
        rotator.write(b"kept\n").await.unwrap();

        let live_path = temp_dir.path().join("app.log");
        let closed = temp_dir.path().join("app-1.log");
        std::fs::rename(&live_path, &closed).unwrap();
        {
            let mut state = rotator.state.lock().await;
            restore_live_name(state.live.as_mut().unwrap(), closed.clone()).await;
            assert!(!state.live.as_ref().unwrap().orphaned);
        }

        rotator.write(b"more\n").await.unwrap();
        rotator.end().await.unwrap();
        assert!(!closed.exists());
        assert_eq!(std::fs::read_to_string(&live_path).unwrap(), "kept\nmore\n");
    }

    #[tokio::test]
    async fn test_orphaned_file_is_announced_on_end() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rotator = FileRotator::open(
            options(temp_dir.path(), 1024, false),
            Some(tx),
            Arc::new(TransportMetrics::new()),
        )
        .await
        .unwrap();
        rotator.write(b"stranded\n").await.unwrap();

        // The rotated name is taken and the live name is occupied by a
        // directory, so the rename cannot be undone
        let closed = temp_dir.path().join("app-1.log");
        std::fs::rename(temp_dir.path().join("app.log"), &closed).unwrap();
        std::fs::create_dir(temp_dir.path().join("app.log")).unwrap();
        std::fs::write(temp_dir.path().join("app.log").join("occupied"), "x").unwrap();
        {
            let mut state = rotator.state.lock().await;
            restore_live_name(state.live.as_mut().unwrap(), closed.clone()).await;
            assert!(state.live.as_ref().unwrap().orphaned);
        }

        rotator.end().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().path, closed);
        assert!(rx.recv().await.is_none());
        assert_eq!(std::fs::read_to_string(&closed).unwrap(), "stranded\n");
    }

    #[tokio::test]
    async fn test_live_path_tracks_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let rotator = FileRotator::open(
            options(temp_dir.path(), 10, true),
            None,
            Arc::new(TransportMetrics::new()),
        )
        .await
        .unwrap();

        let first = rotator.live_path().unwrap();
        rotator.write(b"0123456789").await.unwrap();
        rotator.write(b"abc").await.unwrap();
        let second = rotator.live_path().unwrap();

        assert_ne!(first, second);
        assert_eq!(Some(second), rotator.current_path().await);
        rotator.end().await.unwrap();
        assert!(rotator.live_path().is_none());
    }

    #[tokio::test]
    async fn test_write_after_end_fails() {
        let temp_dir = TempDir::new().unwrap();
        let rotator = FileRotator::open(
            options(temp_dir.path(), 1024, false),
            None,
            Arc::new(TransportMetrics::new()),
        )
        .await
        .unwrap();

        rotator.end().await.unwrap();
        rotator.end().await.unwrap();
        assert!(rotator.write(b"late\n").await.is_err());
        assert!(rotator.current_path().await.is_none());
    }
}
