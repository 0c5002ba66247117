//! Flat file store rooted at one directory

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::object::{compose_stored_name, parse_stored_name, StoredObject};
use super::sanitize::{PathSanitizer, SafeName};
use crate::error::{Error, Result};

/// How many successive millisecond prefixes a put tries before giving up
pub const MAX_NAME_ATTEMPTS: usize = 64;

/// Open handle to a stored object, ready to stream
#[derive(Debug)]
pub struct ObjectReader {
    pub name: SafeName,
    pub size_bytes: u64,
    pub file: File,
}

/// Custody store over a single flat directory.
///
/// No lock is shared between requests. Concurrent operations on the same
/// name are ordered only by the filesystem.
pub struct FileStore {
    root: PathBuf,
    sanitizer: PathSanitizer,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Open the store at `root` using the wall clock
    pub async fn open(root: &Path) -> Result<Self> {
        Self::with_clock(root, Arc::new(SystemClock)).await
    }

    /// Open the store at `root` with an explicit clock
    pub async fn with_clock(root: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = fs::canonicalize(root).await.map_err(Error::StoreUnavailable)?;
        let metadata = fs::metadata(&root).await.map_err(Error::StoreUnavailable)?;
        if !metadata.is_dir() {
            return Err(Error::StoreUnavailable(std::io::Error::new(
                ErrorKind::Other,
                format!("{} is not a directory", root.display()),
            )));
        }

        info!("File store opened at {}", root.display());
        Ok(Self {
            sanitizer: PathSanitizer::new(root.clone()),
            root,
            clock,
        })
    }

    /// Canonical store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitizer bound to this store's root
    pub fn sanitizer(&self) -> &PathSanitizer {
        &self.sanitizer
    }

    /// Write `reader` to a new object named after `original_name`.
    ///
    /// The file is created exclusively. When the composed name is taken, the
    /// millisecond prefix is advanced until a free name is found, so an
    /// existing object is never overwritten. The partial file is removed on
    /// any I/O failure and when this future is dropped before completion.
    pub async fn put<R>(&self, mut reader: R, original_name: &SafeName) -> Result<StoredObject>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut millis = self.clock.now_millis();
        let mut created = None;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let stored_name = compose_stored_name(millis, original_name.as_str());
            let path = self.root.join(&stored_name);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    created = Some((file, stored_name, path));
                    break;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Stored name {} taken, advancing prefix", stored_name);
                    millis += 1;
                }
                Err(e) => {
                    return Err(Error::WriteFailed {
                        name: stored_name,
                        source: e,
                    })
                }
            }
        }

        let (file, stored_name, path) = created.ok_or_else(|| Error::WriteFailed {
            name: original_name.to_string(),
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("no free stored name after {} attempts", MAX_NAME_ATTEMPTS),
            ),
        })?;

        // Bound after the guard so the handle is closed before any removal,
        // whether the copy fails or this future is dropped mid-copy.
        let guard = PartialUpload::new(path);
        let mut file = file;

        let written = async {
            let size = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(size)
        }
        .await;
        drop(file);

        match written {
            Ok(size_bytes) => {
                guard.keep();
                info!("Stored {} ({} bytes)", stored_name, size_bytes);
                Ok(StoredObject {
                    stored_name,
                    original_name: original_name.to_string(),
                    created_at_millis: millis,
                    size_bytes,
                })
            }
            Err(e) => Err(Error::WriteFailed {
                name: stored_name,
                source: e,
            }),
        }
    }

    /// Every entry directly under the root, oldest stored name first
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(Error::StoreUnavailable)?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::StoreUnavailable)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        names.sort_by(|a, b| {
            let key_a = parse_stored_name(a).map(|(millis, _)| millis);
            let key_b = parse_stored_name(b).map(|(millis, _)| millis);
            key_a.cmp(&key_b).then_with(|| a.cmp(b))
        });
        Ok(names)
    }

    /// Open a stored object for reading
    pub async fn get(&self, name: &SafeName) -> Result<ObjectReader> {
        let path = self.root.join(name.as_str());

        let metadata = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(Error::NotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => return Err(Error::Internal(format!("stat {}: {}", name, e))),
        };

        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => return Err(Error::Internal(format!("open {}: {}", name, e))),
        };

        debug!("Opened {} for reading ({} bytes)", name, metadata.len());
        Ok(ObjectReader {
            name: name.clone(),
            size_bytes: metadata.len(),
            file,
        })
    }

    /// Remove a stored object.
    ///
    /// A file that vanishes between the existence check and the removal is
    /// reported as DeleteFailed, not NotFound.
    pub async fn delete(&self, name: &SafeName) -> Result<()> {
        let path = self.root.join(name.as_str());

        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return Err(Error::NotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => {
                return Err(Error::DeleteFailed {
                    name: name.to_string(),
                    source: e,
                })
            }
        }

        fs::remove_file(&path).await.map_err(|e| Error::DeleteFailed {
            name: name.to_string(),
            source: e,
        })?;

        info!("Deleted {}", name);
        Ok(())
    }
}

/// Removes an exclusively created object unless the upload completed
struct PartialUpload {
    path: PathBuf,
    complete: bool,
}

impl PartialUpload {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            complete: false,
        }
    }

    fn keep(mut self) {
        self.complete = true;
    }
}

impl Drop for PartialUpload {
    fn drop(&mut self) {
        if self.complete {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial upload {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial upload {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FixedClock;
    use std::collections::HashSet;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, ReadBuf};

    const T0: i64 = 1_700_000_000_000;

    async fn store_at(dir: &Path, clock: Arc<FixedClock>) -> FileStore {
        FileStore::with_clock(dir, clock).await.unwrap()
    }

    fn name(raw: &str) -> SafeName {
        SafeName::composed(raw.to_string())
    }

    /// Yields one chunk then fails, like a client dropping mid-upload
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(std::io::Error::new(
                    ErrorKind::ConnectionReset,
                    "client went away",
                )))
            } else {
                self.sent = true;
                buf.put_slice(b"partial");
                Poll::Ready(Ok(()))
            }
        }
    }

    /// Never yields data or end of stream
    struct StalledReader;

    impl AsyncRead for StalledReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_put_names_by_timestamp() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;

        let object = store.put(&b"0123456789"[..], &name("report.txt")).await.unwrap();
        assert_eq!(object.stored_name, "1700000000000-report.txt");
        assert_eq!(object.original_name, "report.txt");
        assert_eq!(object.created_at_millis, T0);
        assert_eq!(object.size_bytes, 10);

        let on_disk = std::fs::read(dir.path().join("1700000000000-report.txt")).unwrap();
        assert_eq!(on_disk, b"0123456789");
    }

    #[tokio::test]
    async fn test_same_millisecond_collision_advances_prefix() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;

        let first = store.put(&b"one"[..], &name("report.txt")).await.unwrap();
        let second = store.put(&b"two"[..], &name("report.txt")).await.unwrap();

        assert_eq!(first.stored_name, "1700000000000-report.txt");
        assert_eq!(second.stored_name, "1700000000001-report.txt");
        assert_eq!(second.created_at_millis, T0 + 1);

        // Nothing was overwritten
        assert_eq!(std::fs::read(dir.path().join(&first.stored_name)).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join(&second.stored_name)).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_stored_names_pairwise_distinct() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(T0));
        let store = store_at(dir.path(), clock.clone()).await;

        let mut seen = HashSet::new();
        for i in 0..20 {
            clock.set(T0 + (i % 4));
            let original = format!("file-{}.bin", i % 3);
            let object = store.put(&b"x"[..], &name(&original)).await.unwrap();
            assert!(seen.insert(object.stored_name), "duplicate stored name");
        }
        assert_eq!(store.list().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_file() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;

        let result = store.put(FailingReader { sent: false }, &name("big.iso")).await;
        match result {
            Err(Error::WriteFailed { name, .. }) => assert_eq!(name, "1700000000000-big.iso"),
            other => panic!("expected WriteFailed, got {:?}", other),
        }
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_longest_upload_name_fits_on_disk() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;

        let original = store
            .sanitizer()
            .upload_name(&"n".repeat(crate::store::MAX_ORIGINAL_NAME_BYTES))
            .unwrap();
        let object = store.put(&b"x"[..], &original).await.unwrap();
        assert!(dir.path().join(&object.stored_name).is_file());
    }

    #[tokio::test]
    async fn test_dropped_put_removes_partial_file() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;

        let stalled = tokio::io::AsyncReadExt::chain(&b"first chunk"[..], StalledReader);
        let file_name = name("a.txt");
        let put = store.put(stalled, &file_name);
        let result = tokio::time::timeout(std::time::Duration::from_millis(100), put).await;
        assert!(result.is_err());

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_contains_put_once() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(T0 + 5));
        let store = store_at(dir.path(), clock.clone()).await;

        let later = store.put(&b"b"[..], &name("b.txt")).await.unwrap();
        clock.set(T0);
        let earlier = store.put(&b"a"[..], &name("a.txt")).await.unwrap();

        let names = store.list().await.unwrap();
        assert_eq!(names, vec![earlier.stored_name.clone(), later.stored_name.clone()]);
        assert_eq!(names.iter().filter(|n| **n == later.stored_name).count(), 1);
    }

    #[tokio::test]
    async fn test_list_unavailable_when_root_removed() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("files");
        std::fs::create_dir(&root).unwrap();
        let store = store_at(&root, Arc::new(FixedClock::new(T0))).await;

        std::fs::remove_dir(&root).unwrap();
        assert!(matches!(store.list().await, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_open_missing_root_fails() {
        let dir = tempdir().unwrap();
        let result = FileStore::open(&dir.path().join("absent")).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_get_streams_contents() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;
        let object = store.put(&b"hello vault"[..], &name("greeting.txt")).await.unwrap();

        let mut reader = store.get(&name(&object.stored_name)).await.unwrap();
        assert_eq!(reader.size_bytes, 11);
        let mut contents = String::new();
        reader.file.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "hello vault");
    }

    #[tokio::test]
    async fn test_get_missing_and_directory_not_found() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;

        assert!(matches!(store.get(&name("nope.txt")).await, Err(Error::NotFound(_))));
        assert!(matches!(store.get(&name("subdir")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_then_get_not_found() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path(), Arc::new(FixedClock::new(T0))).await;
        let object = store.put(&b"bye"[..], &name("old.txt")).await.unwrap();
        let stored = name(&object.stored_name);

        store.delete(&stored).await.unwrap();
        assert!(matches!(store.get(&stored).await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete(&stored).await, Err(Error::NotFound(_))));
        assert!(!store.list().await.unwrap().contains(&object.stored_name));
    }
}
