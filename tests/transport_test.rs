//! Integration tests for the transport pipeline
//!
//! Each test runs the full pipeline against a temporary directory: rotation,
//! compression of the closed files, retention and the error log.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use logsink::config::{TransportSettings, ValidationError};
use logsink::rotation::{EventSender, RotationEngine, RotationEvent, RotationOptions};
use logsink::{Transport, TransportError};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

fn settings(temp_dir: &TempDir) -> TransportSettings {
    let mut settings = TransportSettings::new(temp_dir.path().join("logs"));
    settings.error_log_file = Some(temp_dir.path().join("diagnostics.txt"));
    settings
}

fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(suffix))
        .collect();
    files.sort();
    files
}

fn rotated_logs(dir: &Path) -> Vec<PathBuf> {
    files_with_suffix(dir, ".log")
        .into_iter()
        .filter(|path| path.file_name().is_some_and(|name| name != "app.log"))
        .collect()
}

fn gunzip(path: &Path) -> Vec<u8> {
    let mut decoded = Vec::new();
    GzDecoder::new(fs::File::open(path).unwrap())
        .read_to_end(&mut decoded)
        .unwrap();
    decoded
}

fn line(i: usize) -> Vec<u8> {
    // 100 bytes including the newline
    let mut line = format!("{{\"seq\":{:05},\"msg\":\"", i).into_bytes();
    line.resize(99, b'x');
    line.push(b'\n');
    line
}

#[tokio::test]
async fn test_rotated_file_is_compressed() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = settings(&temp_dir);
    settings.size = "10K".to_string();
    settings.interval = "1d".to_string();
    settings.compress = true;
    settings.retention_days = 1;

    let transport = Transport::from_settings(&settings).await.unwrap();
    assert!(transport.is_enabled());

    let mut written = Vec::new();
    for i in 0..150 {
        let line = line(i);
        transport.write(&line).await.unwrap();
        written.extend_from_slice(&line);
    }
    transport.close().await.unwrap();

    let dir = temp_dir.path().join("logs");
    let archives = files_with_suffix(&dir, ".log.gz");
    assert_eq!(archives.len(), 1, "expected one archive, found {:?}", archives);
    assert!(rotated_logs(&dir).is_empty());

    let mut restored = gunzip(&archives[0]);
    assert!(restored.len() <= 10 * 1024);
    restored.extend(fs::read(dir.join("app.log")).unwrap());
    assert_eq!(restored, written);

    let metrics = transport.metrics();
    assert_eq!(metrics.lines_written, 150);
    assert_eq!(metrics.rotations, 1);
    assert_eq!(metrics.compressions, 1);
    assert_eq!(metrics.write_failures, 0);
}

#[tokio::test]
async fn test_compression_off_keeps_rotated_logs() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = settings(&temp_dir);
    settings.size = "1K".to_string();
    settings.compress = false;
    settings.timestamp_format = "unix".to_string();

    let transport = Transport::from_settings(&settings).await.unwrap();
    for i in 0..15 {
        transport.write(&line(i)).await.unwrap();
    }
    transport.close().await.unwrap();

    let dir = temp_dir.path().join("logs");
    assert_eq!(rotated_logs(&dir).len(), 1);
    assert!(files_with_suffix(&dir, ".gz").is_empty());
    assert_eq!(transport.metrics().compressions, 0);
}

#[tokio::test]
async fn test_retention_sweeps_old_files_at_startup() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("logs");
    fs::create_dir_all(&dir).unwrap();

    let stale = dir.join("app-20200101000000.log.gz");
    let foreign = dir.join("other-20200101000000.log.gz");
    for path in [&stale, &foreign] {
        fs::write(path, b"old").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(10 * 86400))
            .unwrap();
    }

    let mut settings = settings(&temp_dir);
    settings.retention_days = 1;
    let transport = Transport::from_settings(&settings).await.unwrap();

    let mut swept = false;
    for _ in 0..100 {
        if transport.metrics().retention_deletions == 1 {
            swept = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    transport.close().await.unwrap();

    assert!(swept, "startup sweep did not run");
    assert!(!stale.exists());
    assert!(foreign.exists());
    assert!(dir.join("app.log").exists());

    let diagnostics = fs::read_to_string(temp_dir.path().join("diagnostics.txt")).unwrap();
    assert!(diagnostics.contains("Deleted expired log file"));
}

#[tokio::test]
async fn test_stale_live_file_survives_startup_sweep() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("logs");
    fs::create_dir_all(&dir).unwrap();

    let live = dir.join("app.log");
    let stale_rotated = dir.join("app-20200101000000.log");
    for path in [&live, &stale_rotated] {
        fs::write(path, b"before restart\n").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(3 * 86400))
            .unwrap();
    }

    let mut settings = settings(&temp_dir);
    settings.retention_days = 1;
    let transport = Transport::from_settings(&settings).await.unwrap();

    for _ in 0..100 {
        if transport.metrics().retention_deletions == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    transport.write(b"after restart\n").await.unwrap();
    transport.close().await.unwrap();

    assert_eq!(transport.metrics().retention_deletions, 1);
    assert!(!stale_rotated.exists());
    assert_eq!(
        fs::read_to_string(&live).unwrap(),
        "before restart\nafter restart\n"
    );
}

/// Engine that announces every closed file twice
struct DoubleNotifyEngine {
    dir: PathBuf,
    events: Mutex<Option<EventSender>>,
    count: Mutex<usize>,
}

#[async_trait]
impl RotationEngine for DoubleNotifyEngine {
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        let n = {
            let mut count = self.count.lock().unwrap();
            *count += 1;
            *count
        };
        let path = self.dir.join(format!("app-{}.log", n));
        std::fs::write(&path, buf)?;

        if let Some(events) = self.events.lock().unwrap().as_ref() {
            for _ in 0..2 {
                let _ = events.send(RotationEvent { path: path.clone() });
            }
        }
        Ok(())
    }

    async fn end(&self) -> io::Result<()> {
        self.events.lock().unwrap().take();
        Ok(())
    }
}

#[tokio::test]
async fn test_duplicate_rotation_events_compress_once() {
    let temp_dir = TempDir::new().unwrap();
    let settings = settings(&temp_dir);
    let config = settings.validate().unwrap();
    let dir = config.dir.clone();

    let transport = Transport::open_with_engine(config, |options: RotationOptions, events, _metrics| async move {
        std::fs::create_dir_all(options.naming.dir())?;
        Ok::<_, io::Error>(DoubleNotifyEngine {
            dir: options.naming.dir().to_path_buf(),
            events: Mutex::new(events),
            count: Mutex::new(0),
        })
    })
    .await
    .unwrap();

    transport.write(b"first\n").await.unwrap();
    transport.write(b"second\n").await.unwrap();
    transport.close().await.unwrap();

    assert_eq!(gunzip(&dir.join("app-1.log.gz")), b"first\n");
    assert_eq!(gunzip(&dir.join("app-2.log.gz")), b"second\n");
    assert!(rotated_logs(&dir).is_empty());
    assert_eq!(transport.metrics().compressions, 2);
    assert!(!temp_dir.path().join("diagnostics.txt").exists());
}

#[tokio::test]
async fn test_format_failure_still_writes_line() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = settings(&temp_dir);
    settings.skip_pretty = false;
    settings.retention_days = 0;

    let transport = Transport::from_settings(&settings).await.unwrap();
    transport.write(b"not json\n").await.unwrap();
    transport
        .write(b"{\"level\":30,\"msg\":\"ready\",\"pid\":1}\n")
        .await
        .unwrap();
    transport.close().await.unwrap();

    let written = fs::read_to_string(temp_dir.path().join("logs").join("app.log")).unwrap();
    assert_eq!(written, "not json\nINFO: ready\n");
    assert_eq!(transport.metrics().format_failures, 1);

    let diagnostics = fs::read_to_string(temp_dir.path().join("diagnostics.txt")).unwrap();
    assert!(diagnostics.contains("FormatFault"));
}

#[tokio::test]
async fn test_write_after_close_fails() {
    let temp_dir = TempDir::new().unwrap();
    let transport = Transport::from_settings(&settings(&temp_dir)).await.unwrap();

    transport.write(b"before\n").await.unwrap();
    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert!(matches!(transport.write(b"after\n").await, Err(TransportError::Closed)));
    let written = fs::read_to_string(temp_dir.path().join("logs").join("app.log")).unwrap();
    assert_eq!(written, "before\n");
}

#[tokio::test]
async fn test_disabled_transport_forwards_unchanged() {
    let (client, mut server) = tokio::io::duplex(1024);
    let transport = Transport::disabled(Box::new(client));
    assert!(!transport.is_enabled());

    transport.write(b"{\"msg\":\"one\"}\n").await.unwrap();
    transport.write(b"two\n").await.unwrap();
    transport.close().await.unwrap();
    assert!(matches!(transport.write(b"late\n").await, Err(TransportError::Closed)));
    drop(transport);

    let mut forwarded = String::new();
    server.read_to_string(&mut forwarded).await.unwrap();
    assert_eq!(forwarded, "{\"msg\":\"one\"}\ntwo\n");
}

#[tokio::test]
async fn test_disabled_config_touches_no_files() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = settings(&temp_dir);
    settings.enabled = false;

    let transport = Transport::from_settings(&settings).await.unwrap();
    assert!(!transport.is_enabled());
    transport.close().await.unwrap();

    assert!(!temp_dir.path().join("logs").exists());
    assert!(!temp_dir.path().join("diagnostics.txt").exists());
}

#[tokio::test]
async fn test_invalid_settings_fail_before_touching_disk() {
    let temp_dir = TempDir::new().unwrap();

    let mut bad_size = settings(&temp_dir);
    bad_size.size = "10X".to_string();
    let err = Transport::from_settings(&bad_size).await.err().unwrap();
    assert!(matches!(
        err,
        TransportError::Config(ValidationError::InvalidConfig { field: "size", .. })
    ));

    let mut no_dir = settings(&temp_dir);
    no_dir.dir = None;
    let err = Transport::from_settings(&no_dir).await.err().unwrap();
    assert!(matches!(err, TransportError::Config(ValidationError::MissingDirectory)));

    assert!(!temp_dir.path().join("logs").exists());
}

#[tokio::test]
async fn test_unusable_directory_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("logs");
    fs::write(&blocker, b"not a directory").unwrap();

    let err = Transport::from_settings(&settings(&temp_dir)).await.err().unwrap();
    assert!(matches!(err, TransportError::Open { .. }));

    let diagnostics = fs::read_to_string(temp_dir.path().join("diagnostics.txt")).unwrap();
    assert!(diagnostics.contains("Failed to open log destination"));
}
