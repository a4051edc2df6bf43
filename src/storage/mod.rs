//! Filesystem-backed object storage engine

mod fs;

pub use fs::{FsStore, ListedObject, ObjectMeta, StorageError};
