//! # Upload Pipeline
//!
//! Mirrors local files into the storage service.
//!
//! ## Flow
//!
//! ```text
//! upload(file)
//!   ├─ already in flight? ──────────────> return
//!   ├─ mark in flight
//!   ├─ shared lock ── failed ───────────> log, return
//!   ├─ remote hash query (failure = unknown)
//!   ├─ local digest (streamed in chunks)
//!   ├─ unknown or different ── multipart upload streamed from disk
//!   ├─ release lock
//!   └─ clear in-flight marker
//! ```
//!
//! Every failure after the in-flight check is logged and swallowed. The lock
//! and the in-flight marker are released on every exit path.

use bridge_traits::http::MultipartPart;
use bridge_traits::lock::FileLocker;
use core_runtime::config::{EngineConfig, HashAlgorithm};
use core_runtime::events::{EventBus, SyncEvent};
use md5::Md5;
use provider_vault::types::{FileRequest, ScopeRequest};
use provider_vault::{log_failure, RemoteApiClient, Service, StorageOp};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::publish;

/// Relative path of `file` below `root`, `/`-separated with a leading `/`.
///
/// ```
/// use core_sync::upload::relative_path;
/// use std::path::Path;
///
/// let relative = relative_path(Path::new("/site/out"), Path::new("/site/out/storage/a.png"));
/// assert_eq!(relative.unwrap(), "/storage/a.png");
/// ```
pub fn relative_path(root: &Path, file: &Path) -> Result<String> {
    let rest = file
        .strip_prefix(root)
        .map_err(|_| SyncError::OutsideRoot {
            path: file.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let segments: Vec<String> = rest
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    Ok(format!("/{}", segments.join("/")))
}

/// Whether the first segment of `relative` is the storage directory.
pub fn is_storage_path(relative: &str, storage_dir: &str) -> bool {
    let storage_dir = storage_dir.trim_matches('/');
    relative
        .trim_start_matches('/')
        .split('/')
        .next()
        .is_some_and(|first| first == storage_dir)
}

const READ_CHUNK: usize = 64 * 1024;

enum ContentHasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl ContentHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => ContentHasher::Md5(Md5::new()),
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Md5(hasher) => hasher.update(data),
            ContentHasher::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            ContentHasher::Md5(hasher) => hex::encode(hasher.finalize()),
            ContentHasher::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Hex digest of `contents`.
pub fn content_hash(algorithm: HashAlgorithm, contents: &[u8]) -> String {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(contents);
    hasher.finish()
}

/// Hex digest and size of `file`, read in fixed-size chunks.
pub async fn file_hash(algorithm: HashAlgorithm, file: &Path) -> std::io::Result<(String, u64)> {
    let mut reader = tokio::fs::File::open(file).await?;
    let mut hasher = ContentHasher::new(algorithm);
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut length = 0u64;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        length += read as u64;
    }

    Ok((hasher.finish(), length))
}

/// Paths with an upload attempt in progress.
#[derive(Default)]
struct InFlight(Mutex<HashSet<PathBuf>>);

/// Marker for one in-flight upload; cleared on drop.
struct InFlightGuard<'a> {
    set: &'a InFlight,
    path: PathBuf,
}

impl InFlight {
    /// Atomically check and insert. `None` when `path` is already in flight.
    fn try_claim(&self, path: &Path) -> Option<InFlightGuard<'_>> {
        let mut paths = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlightGuard {
            set: self,
            path: path.to_path_buf(),
        })
    }

    fn contains(&self, path: &Path) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// Hash-deduplicated, lock-guarded uploads to the storage service.
pub struct UploadPipeline {
    client: Arc<RemoteApiClient>,
    locker: Arc<dyn FileLocker>,
    config: Arc<EngineConfig>,
    context: Option<String>,
    events: EventBus,
    in_flight: InFlight,
}

impl UploadPipeline {
    pub fn new(
        client: Arc<RemoteApiClient>,
        locker: Arc<dyn FileLocker>,
        config: Arc<EngineConfig>,
        context: Option<String>,
        events: EventBus,
    ) -> Self {
        Self {
            client,
            locker,
            config,
            context,
            events,
            in_flight: InFlight::default(),
        }
    }

    pub fn is_in_flight(&self, file: &Path) -> bool {
        self.in_flight.contains(file)
    }

    fn file_request(&self, relative: &str) -> FileRequest {
        FileRequest {
            file: relative.to_string(),
            context: self.context.clone(),
        }
    }

    /// Upload `file` under `relative` unless the stored copy is identical.
    #[instrument(skip(self, file))]
    pub async fn upload(&self, file: &Path, relative: &str) {
        let Some(_claim) = self.in_flight.try_claim(file) else {
            debug!("Upload already in flight");
            return;
        };

        let lock = match self.locker.lock_shared(file).await {
            Ok(lock) => lock,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Lock failed");
                publish(
                    &self.events,
                    SyncEvent::Failed {
                        operation: "lock".to_string(),
                        target: relative.to_string(),
                        message: e.to_string(),
                    },
                );
                return;
            }
        };

        let outcome = self.transfer(file, relative).await;

        if let Err(e) = lock.release() {
            warn!(path = %file.display(), error = %e, "Failed to release lock");
        }

        if let Err(e) = outcome {
            warn!(error = %e, "Upload failed");
            publish(
                &self.events,
                SyncEvent::Failed {
                    operation: "upload".to_string(),
                    target: relative.to_string(),
                    message: e.to_string(),
                },
            );
        }
    }

    async fn transfer(&self, file: &Path, relative: &str) -> Result<()> {
        let hash_path = self.client.storage_path(StorageOp::Hash);
        let remote_hash = match self
            .client
            .call(Service::Storage, &hash_path, &self.file_request(relative))
            .await
        {
            Ok(envelope) => envelope.hash().map(str::to_string),
            Err(e) => {
                debug!(error = %e, "Remote hash unknown, uploading");
                None
            }
        };

        let (local_hash, length) = file_hash(self.config.hash_algorithm, file)
            .await
            .map_err(|e| SyncError::file_system(file, e))?;

        if remote_hash
            .as_deref()
            .is_some_and(|remote| remote.eq_ignore_ascii_case(&local_hash))
        {
            debug!(hash = %local_hash, "Stored copy is current");
            return Ok(());
        }

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative.to_string());
        let parts = vec![MultipartPart::file(relative, file_name, file, length)];

        let mut headers = Vec::new();
        if let Some(expire) = self.config.effective_expire() {
            headers.push(("expire", expire));
        }
        if let Some(context) = self.context.as_deref() {
            headers.push(("context", context));
        }

        let manifest = self.client.upload(parts, &headers).await?;

        if manifest.files.is_empty() {
            info!(file = %relative, "Uploaded");
            publish(
                &self.events,
                SyncEvent::Uploaded {
                    file: relative.to_string(),
                    link: None,
                },
            );
        } else {
            for (path, link) in manifest.files {
                info!(file = %path, link = %link, "Uploaded");
                publish(
                    &self.events,
                    SyncEvent::Uploaded {
                        file: path,
                        link: Some(link),
                    },
                );
            }
        }

        Ok(())
    }

    /// Delete the stored copy of `relative` and the mirrored file in the
    /// output folder.
    #[instrument(skip(self))]
    pub async fn unlink(&self, relative: &str) {
        let path = self.client.storage_path(StorageOp::Unlink);
        if self
            .client
            .call_or_skip(Service::Storage, &path, &self.file_request(relative))
            .await
            .is_some()
        {
            info!(file = %relative, "Deleted");
            publish(
                &self.events,
                SyncEvent::Unlinked {
                    file: relative.to_string(),
                },
            );
        }

        let mirrored = self
            .config
            .output_folder
            .join(relative.trim_start_matches('/'));
        if let Err(e) = tokio::fs::remove_file(&mirrored).await {
            debug!(path = %mirrored.display(), error = %e, "Mirrored copy not removed");
        }
    }

    /// Public URL of a stored file.
    pub async fn link(&self, relative: &str) -> Option<String> {
        let path = self.client.storage_path(StorageOp::Link);
        self.client
            .call_or_skip(Service::Storage, &path, &self.file_request(relative))
            .await
            .and_then(|envelope| envelope.link().map(str::to_string))
    }

    /// Wipe the store (machine-scoped unless global).
    pub async fn clear_storage(&self) -> bool {
        let path = self.client.storage_path(StorageOp::Clear);
        let request = ScopeRequest {
            context: self.context.clone(),
        };
        match self.client.call(Service::Storage, &path, &request).await {
            Ok(_) => true,
            Err(e) => {
                log_failure(&e, Service::Storage, &self.client.loggable_path(&path));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, PartSource};
    use bridge_traits::lock::{LockRelease, ScopedFileLock};
    use core_runtime::events::EventStream;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    struct CountingRelease(Arc<AtomicUsize>);

    impl LockRelease for CountingRelease {
        fn release(self: Box<Self>) -> BridgeResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestLocker {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl FileLocker for TestLocker {
        async fn lock_shared(&self, path: &Path) -> BridgeResult<ScopedFileLock> {
            if self.fail {
                return Err(BridgeError::LockFailed {
                    path: path.display().to_string(),
                    message: "busy".to_string(),
                });
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(ScopedFileLock::new(
                path,
                Box::new(CountingRelease(Arc::clone(&self.released))),
            ))
        }
    }

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    fn config(output: &Path) -> Arc<EngineConfig> {
        Arc::new(
            EngineConfig::builder()
                .feed("https://feed.example.com", "feed-token")
                .storage("https://storage.example.com", "storage-token")
                .output_folder(output)
                .expire("10d")
                .build()
                .unwrap(),
        )
    }

    fn build_pipeline(
        http: MockHttpClient,
        locker: Arc<TestLocker>,
        output: &Path,
        bus: &EventBus,
    ) -> UploadPipeline {
        let config = config(output);
        let client = Arc::new(RemoteApiClient::from_config(Arc::new(http), &config));
        UploadPipeline::new(client, locker, config, Some("ci@builder:m-1".to_string()), bus.clone())
    }

    fn write_asset(dir: &Path) -> PathBuf {
        let storage = dir.join("storage");
        std::fs::create_dir_all(&storage).unwrap();
        let file = storage.join("hello.txt");
        std::fs::write(&file, "hello").unwrap();
        file
    }

    #[test]
    fn test_relative_path_and_storage_check() {
        let root = Path::new("/site/out");
        assert_eq!(
            relative_path(root, Path::new("/site/out/storage/img/a.png")).unwrap(),
            "/storage/img/a.png"
        );
        assert!(matches!(
            relative_path(root, Path::new("/elsewhere/a.png")),
            Err(SyncError::OutsideRoot { .. })
        ));

        assert!(is_storage_path("/storage/img/a.png", "storage"));
        assert!(is_storage_path("/storage", "storage"));
        assert!(!is_storage_path("/blog/storage/a.png", "storage"));
        assert!(!is_storage_path("/storage-old/a.png", "storage"));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(content_hash(HashAlgorithm::Md5, b"hello"), HELLO_MD5);
        assert_eq!(
            content_hash(HashAlgorithm::Sha256, b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_file_hash_reads_past_one_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("large.bin");
        let contents: Vec<u8> = (0..READ_CHUNK * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file, &contents).unwrap();

        for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Sha256] {
            let (hash, length) = file_hash(algorithm, &file).await.unwrap();
            assert_eq!(hash, content_hash(algorithm, &contents));
            assert_eq!(length, contents.len() as u64);
        }

        assert!(file_hash(HashAlgorithm::Md5, &dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn test_in_flight_claim_is_exclusive() {
        let set = InFlight::default();
        let path = Path::new("/out/storage/a.png");

        let claim = set.try_claim(path);
        assert!(claim.is_some());
        assert!(set.try_claim(path).is_none());
        assert!(set.contains(path));

        drop(claim);
        assert!(!set.contains(path));
        assert!(set.try_claim(path).is_some());
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_transferred() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_asset(dir.path());

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| req.url.contains("/storage-token/hash"))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    format!(r#"{{"success":true,"hash":"{}"}}"#, HELLO_MD5),
                ))
            });

        let locker = Arc::new(TestLocker::default());
        let bus = EventBus::default();
        let pipeline = build_pipeline(http, Arc::clone(&locker), dir.path(), &bus);

        pipeline.upload(&file, "/storage/hello.txt").await;

        assert_eq!(locker.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(locker.released.load(Ordering::SeqCst), 1);
        assert!(!pipeline.is_in_flight(&file));
    }

    #[tokio::test]
    async fn test_hash_failure_uploads_with_tags() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_asset(dir.path());

        let streamed = PartSource::File {
            path: file.clone(),
            length: 5,
        };

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| req.url.contains("/hash"))
            .times(1)
            .returning(|_| Err(BridgeError::Timeout("hash".into())));
        http.expect_execute()
            .withf(move |req| {
                req.url.starts_with("https://storage.example.com/upload?v=")
                    && req.header_value("expire") == Some("10d")
                    && req.header_value("context") == Some("ci@builder:m-1")
                    && req.multipart.as_ref().is_some_and(|parts| {
                        parts.len() == 1
                            && parts[0].name == "/storage/hello.txt"
                            && parts[0].file_name == "hello.txt"
                            && parts[0].source == streamed
                    })
            })
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"success":true,"files":{"/storage/hello.txt":"https://cdn.example.com/hello.txt"}}"#,
                ))
            });

        let locker = Arc::new(TestLocker::default());
        let bus = EventBus::default();
        let mut events = EventStream::new(bus.subscribe());
        let pipeline = build_pipeline(http, Arc::clone(&locker), dir.path(), &bus);

        pipeline.upload(&file, "/storage/hello.txt").await;

        assert_eq!(locker.released.load(Ordering::SeqCst), 1);
        match events.try_recv() {
            Some(Ok(SyncEvent::Uploaded { file, link })) => {
                assert_eq!(file, "/storage/hello.txt");
                assert_eq!(link.as_deref(), Some("https://cdn.example.com/hello.txt"));
            }
            other => panic!("Expected upload event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lock_failure_aborts_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_asset(dir.path());

        let mut http = MockHttpClient::new();
        http.expect_execute().times(0);

        let locker = Arc::new(TestLocker {
            fail: true,
            ..Default::default()
        });
        let bus = EventBus::default();
        let pipeline = build_pipeline(http, locker, dir.path(), &bus);

        pipeline.upload(&file, "/storage/hello.txt").await;
        assert!(!pipeline.is_in_flight(&file));
    }

    #[tokio::test]
    async fn test_failed_upload_still_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_asset(dir.path());

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| req.url.contains("/hash"))
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":true,"hash":"stale"}"#)));
        http.expect_execute()
            .withf(|req| req.url.contains("/upload"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(500, "boom")));

        let locker = Arc::new(TestLocker::default());
        let bus = EventBus::default();
        let mut events = EventStream::new(bus.subscribe());
        let pipeline = build_pipeline(http, Arc::clone(&locker), dir.path(), &bus);

        pipeline.upload(&file, "/storage/hello.txt").await;

        assert_eq!(locker.released.load(Ordering::SeqCst), 1);
        assert!(!pipeline.is_in_flight(&file));
        assert!(matches!(
            events.try_recv(),
            Some(Ok(SyncEvent::Failed { ref operation, .. })) if operation == "upload"
        ));
    }

    #[tokio::test]
    async fn test_unlink_removes_mirrored_copy() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_asset(dir.path());

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| {
                req.url.contains("/storage-token/unlink")
                    && req.body.as_deref().is_some_and(|body| {
                        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
                        value["file"] == "/storage/hello.txt" && value["context"] == "ci@builder:m-1"
                    })
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":true}"#)));

        let bus = EventBus::default();
        let pipeline = build_pipeline(http, Arc::new(TestLocker::default()), dir.path(), &bus);

        pipeline.unlink("/storage/hello.txt").await;
        assert!(!file.exists());

        // Removing a copy that is already gone is not an error.
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, r#"{"success":true}"#)));
        let pipeline = build_pipeline(http, Arc::new(TestLocker::default()), dir.path(), &bus);
        pipeline.unlink("/storage/hello.txt").await;
    }

    #[tokio::test]
    async fn test_link_resolves_public_url() {
        let dir = tempfile::tempdir().unwrap();

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| req.url.contains("/storage-token/link"))
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"success":true,"link":"https://cdn.example.com/a.png"}"#,
                ))
            });

        let bus = EventBus::default();
        let pipeline = build_pipeline(http, Arc::new(TestLocker::default()), dir.path(), &bus);

        assert_eq!(
            pipeline.link("/storage/a.png").await.as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }
}
