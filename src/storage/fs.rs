//! Filesystem storage engine: objects, atomic writes, multipart sessions.
//!
//! Storage layout:
//! ```text
//! {root}/{bucket}/{key}                                    # objects
//! {root}/.multipart/{bucket}/{sha256(key)}/{uploadId}/{n}  # part files
//! ```
//!
//! The `.multipart` tree sits beside the buckets, so scratch data never
//! shows up in a listing and cannot collide with an object key (bucket
//! names may not start with a dot). Within it each session owns a
//! directory named by its upload id; completion and abort touch only
//! that directory, which is what keeps concurrent sessions on the same
//! key isolated from each other.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stored attributes of an object
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// One entry of a bucket listing
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Async-safe directory check
async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Atomically write data to a file using write-to-temp + fsync + rename.
///
/// The temp file lives in the destination's parent directory so the
/// rename stays within one filesystem. `NamedTempFile` unlinks it on
/// every failure path. The parent directory must already exist — a
/// missing parent surfaces as the io error, which lets multipart writes
/// treat a vanished session directory as "no such upload" instead of
/// silently resurrecting it.
async fn atomic_write(path: &Path, data: Bytes) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| {
            StorageError::Io(std::io::Error::other(
                "cannot atomic-write to a path with no parent",
            ))
        })?
        .to_path_buf();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Io(std::io::Error::other(format!("join failed: {e}"))))?
}

/// Filesystem storage engine rooted at the data directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create the engine, ensuring the root directory exists.
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Map `(bucket, key)` to its filesystem path. Keys are validated
    /// upstream (no NUL, no `.`/`..` segments), so pushing each segment
    /// cannot escape the bucket directory.
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_dir(bucket);
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    /// Scratch namespace for a key: its SHA-256, or `_root` for the
    /// empty key.
    fn key_namespace(key: &str) -> String {
        if key.is_empty() {
            "_root".to_string()
        } else {
            hex::encode(Sha256::digest(key.as_bytes()))
        }
    }

    fn namespace_dir(&self, bucket: &str, key: &str) -> PathBuf {
        self.root
            .join(".multipart")
            .join(bucket)
            .join(Self::key_namespace(key))
    }

    /// Session directory for an upload id, after checking the id shape.
    ///
    /// Upload ids are always 32 lowercase hex characters; anything else
    /// is an unknown session (and must never reach a filesystem path).
    fn session_dir(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<PathBuf, StorageError> {
        let well_formed = upload_id.len() == 32
            && upload_id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(StorageError::NotFound(format!("upload {upload_id}")));
        }
        Ok(self.namespace_dir(bucket, key).join(upload_id))
    }

    // === Buckets ===

    /// Ensure a bucket directory exists. Buckets are implicit; this only
    /// backs the PUT-bucket compatibility surface.
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.bucket_dir(bucket)).await?;
        Ok(())
    }

    /// Opportunistically remove a bucket directory. Absent or non-empty
    /// buckets are not errors — the operation is best-effort by design.
    pub async fn delete_bucket(&self, bucket: &str) {
        if fs::remove_dir(self.bucket_dir(bucket)).await.is_ok() {
            debug!("Removed empty bucket directory {}", bucket);
        }
    }

    // === Objects ===

    /// Store an object atomically, returning the MD5 hex ETag.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let etag = hex::encode(Md5::digest(&data));
        atomic_write(&path, data).await?;
        debug!("Wrote object {}/{}", bucket, key);
        Ok(etag)
    }

    /// Create a zero-byte directory marker (key ending in `/`). S3 GUIs
    /// use these to model folders.
    pub async fn put_directory_marker(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(self.object_path(bucket, key)).await?;
        Ok(())
    }

    /// Open an object for streaming.
    pub async fn open_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(fs::File, ObjectMeta), StorageError> {
        let path = self.object_path(bucket, key);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| self.map_open_error(e, bucket, key))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(format!("{bucket}/{key}")));
        }
        Ok((
            file,
            ObjectMeta {
                size: meta.len(),
                modified: meta.modified()?.into(),
            },
        ))
    }

    /// Stat an object without opening it.
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        let path = self.object_path(bucket, key);
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| self.map_open_error(e, bucket, key))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(format!("{bucket}/{key}")));
        }
        Ok(ObjectMeta {
            size: meta.len(),
            modified: meta.modified()?.into(),
        })
    }

    fn map_open_error(&self, e: std::io::Error, bucket: &str, key: &str) -> StorageError {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(format!("{bucket}/{key}")),
            _ => StorageError::Io(e),
        }
    }

    /// Unlink an object. Deleting an absent key succeeds (S3 semantics).
    /// Empty directories left behind by nested keys are pruned up to the
    /// bucket directory.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted object {}/{}", bucket, key);
                prune_empty_dirs(path.parent(), &self.bucket_dir(bucket)).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // === Listing ===

    /// List every object in a bucket whose key starts with `prefix`,
    /// sorted by key ascending. Dot-prefixed filenames are skipped, so
    /// nothing internal can ever leak into a listing.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ListedObject>, StorageError> {
        let bucket_dir = self.bucket_dir(bucket);
        let mut objects = Vec::new();
        if is_dir(&bucket_dir).await {
            Self::walk(&bucket_dir, &bucket_dir, &mut objects).await?;
        }
        objects.retain(|o| o.key.starts_with(prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    /// Recursive directory walk collecting regular files as objects.
    fn walk<'a>(
        base: &'a Path,
        dir: &'a Path,
        out: &'a mut Vec<ListedObject>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StorageError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with('.') {
                    continue;
                }
                let ft = entry.file_type().await?;
                let path = entry.path();
                if ft.is_dir() {
                    Self::walk(base, &path, out).await?;
                } else if ft.is_file() {
                    let meta = entry.metadata().await?;
                    let key = path
                        .strip_prefix(base)
                        .unwrap_or(&path)
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(ListedObject {
                        key,
                        size: meta.len(),
                        modified: meta.modified()?.into(),
                    });
                }
            }
            Ok(())
        })
    }

    // === Multipart ===

    /// Open a new multipart session: 16 random bytes rendered as 32
    /// lowercase hex. Two initiations on the same key yield two
    /// independent sessions.
    pub async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, StorageError> {
        let mut raw = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let upload_id = hex::encode(raw);

        let session = self.namespace_dir(bucket, key).join(&upload_id);
        fs::create_dir_all(&session).await?;
        debug!("Initiated multipart session {} for {}/{}", upload_id, bucket, key);
        Ok(upload_id)
    }

    /// Write one part atomically, returning its MD5 hex ETag. Writing a
    /// part number again replaces the previous content.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let session = self.session_dir(bucket, key, upload_id)?;
        if !is_dir(&session).await {
            return Err(StorageError::NotFound(format!("upload {upload_id}")));
        }

        let etag = hex::encode(Md5::digest(&data));
        // No mkdir here: if the session vanished between the check and the
        // write, the temp-file creation fails instead of recreating it.
        atomic_write(&session.join(part_number.to_string()), data)
            .await
            .map_err(|e| match e {
                StorageError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    StorageError::NotFound(format!("upload {upload_id}"))
                }
                other => other,
            })?;
        Ok(etag)
    }

    /// Assemble the listed parts into the final object, then tear down
    /// the session.
    ///
    /// Part numbers are deduplicated and sorted ascending. Every failure
    /// before the final rename unlinks the temp file and leaves the
    /// session fully intact for a retry; after the rename, cleanup
    /// removes only this session's directory plus any parents that are
    /// already empty.
    pub async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<(), StorageError> {
        let session = self.session_dir(bucket, key, upload_id)?;
        if !is_dir(&session).await {
            return Err(StorageError::NotFound(format!("upload {upload_id}")));
        }

        let parts: BTreeSet<u32> = part_numbers.iter().copied().collect();
        if parts.is_empty() {
            return Err(StorageError::InvalidPart(
                "you must specify at least one part".to_string(),
            ));
        }
        if parts.contains(&0) {
            return Err(StorageError::InvalidPart(
                "part numbers must be positive".to_string(),
            ));
        }

        let dest = self.object_path(bucket, key);
        let session_for_copy = session.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let parent = dest.parent().ok_or_else(|| {
                StorageError::Io(std::io::Error::other("object path has no parent"))
            })?;
            std::fs::create_dir_all(parent)?;

            let mut tmp = NamedTempFile::new_in(parent)?;
            for n in &parts {
                let part_path = session_for_copy.join(n.to_string());
                let mut part_file = std::fs::File::open(&part_path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        StorageError::InvalidPart(format!("part {n} has not been uploaded"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                std::io::copy(&mut part_file, tmp.as_file_mut())?;
            }
            tmp.as_file().sync_all()?;
            tmp.persist(&dest).map_err(|e| StorageError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("join failed: {e}"))))??;

        // The object is live; cleanup failures must not fail the request.
        if let Err(e) = fs::remove_dir_all(&session).await {
            warn!("Failed to remove completed session {:?}: {}", session, e);
        }
        self.prune_multipart_tree(bucket, key).await;
        debug!("Completed multipart session {} for {}/{}", upload_id, bucket, key);
        Ok(())
    }

    /// Discard a session and all its parts.
    pub async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let session = self.session_dir(bucket, key, upload_id)?;
        if !is_dir(&session).await {
            return Err(StorageError::NotFound(format!("upload {upload_id}")));
        }
        fs::remove_dir_all(&session).await?;
        self.prune_multipart_tree(bucket, key).await;
        debug!("Aborted multipart session {} for {}/{}", upload_id, bucket, key);
        Ok(())
    }

    /// Remove the key-namespace, bucket, and `.multipart` directories,
    /// each only if already empty. `remove_dir` refuses non-empty
    /// directories, which is exactly the guard: sibling sessions keep
    /// their parents alive.
    async fn prune_multipart_tree(&self, bucket: &str, key: &str) {
        let namespace = self.namespace_dir(bucket, key);
        let _ = fs::remove_dir(&namespace).await;
        let _ = fs::remove_dir(self.root.join(".multipart").join(bucket)).await;
        let _ = fs::remove_dir(self.root.join(".multipart")).await;
    }
}

/// Remove empty directories from `from` upward, stopping at (and never
/// removing) `stop`.
async fn prune_empty_dirs(from: Option<&Path>, stop: &Path) {
    let mut current = from;
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        current = dir.parent();
    }
}
