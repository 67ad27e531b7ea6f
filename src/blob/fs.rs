//-
// Copyright (c) 2026, The Patchbox Authors
//
// This file is part of Patchbox.
//
// Patchbox is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Patchbox is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along
// with Patchbox. If not, see <http://www.gnu.org/licenses/>.

//! A filesystem-backed blob store.
//!
//! # Layout
//!
//! The store owns a root directory with two children:
//!
//! - `stage/` holds blobs that are still being written. Each is a
//!   `tempfile::NamedTempFile`, so a blob that is dropped without being
//!   finalised or discarded is unlinked when the handle is dropped. Files
//!   left behind by a crashed process are reclaimed by `sweep_stale()`.
//!
//! - `blobs/XX/NNNNNNNNNNNNNNNN` holds finalised blobs. `N…` is 16 lowercase
//!   hex characters drawn from the system RNG and `XX` is its first two
//!   characters, giving one fan-out level so no single directory grows
//!   unboundedly. The hex name is the blob's handle.
//!
//! # Semantics
//!
//! `finalize` syncs the staged file, drops the write permission bits, and
//! moves it into `blobs/` with a non-overwriting rename, retrying under a
//! fresh name on collision. The rename is the visibility point: a blob is
//! either fully present under its final name or still anonymous in `stage/`.
//!
//! `release` unlinks the blob file. Streams already open keep working, as
//! POSIX keeps the data reachable through open descriptors; unlinking a name
//! that is already gone is treated as success.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use log::{info, warn};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};

use super::{BlobHandle, BlobStore, WritableBlob};
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};

/// Tuning knobs for `FsBlobStore`.
///
/// This is embedded into whatever configuration file the hosting server
/// maintains; every field has a default so an empty table is valid.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FsStoreConfig {
    /// Age, in hours, past which a file in `stage/` is considered abandoned
    /// and eligible for `sweep_stale()`.
    pub stale_stage_hours: u32,
}

impl Default for FsStoreConfig {
    fn default() -> Self {
        FsStoreConfig {
            stale_stage_hours: 24,
        }
    }
}

/// A blob store backed by a directory tree.
pub struct FsBlobStore {
    log_prefix: String,
    stage: PathBuf,
    blobs: PathBuf,
    config: FsStoreConfig,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating the directory structure if
    /// it does not exist yet.
    pub fn new(
        log_prefix: String,
        root: PathBuf,
        config: FsStoreConfig,
    ) -> Result<Self, Error> {
        let stage = root.join("stage");
        let blobs = root.join("blobs");
        for dir in &[&root, &stage, &blobs] {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o770)
                .create(dir)
                .ignore_already_exists()?;
        }

        Ok(FsBlobStore {
            log_prefix,
            stage,
            blobs,
            config,
        })
    }

    /// Remove abandoned staging files older than the configured threshold.
    ///
    /// This reclaims blobs leaked by processes that crashed mid-upload. It
    /// must be driven by the hosting server (e.g. from a periodic
    /// maintenance task); the store never sweeps on its own.
    ///
    /// Returns the number of files removed.
    pub fn sweep_stale(&self) -> Result<usize, Error> {
        let threshold =
            Duration::from_secs(u64::from(self.config.stale_stage_hours) * 3600);
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.stage)? {
            let entry = entry?;
            let age = entry
                .metadata()
                .and_then(|md| md.modified())
                .map(|mtime| {
                    now.duration_since(mtime).unwrap_or(Duration::from_secs(0))
                });
            match age {
                Ok(age) if age >= threshold => {
                    match fs::remove_file(entry.path()) {
                        Ok(()) => removed += 1,
                        // A concurrent sweep got there first; it is not
                        // counted as reclaimed by this one.
                        Err(e) if io::ErrorKind::NotFound == e.kind() => (),
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(_) => (),
                // The file may have been finalised or swept concurrently
                // between the directory read and the stat.
                Err(e) if io::ErrorKind::NotFound == e.kind() => (),
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            info!(
                "{} Swept {} stale staging blob(s)",
                self.log_prefix, removed
            );
        }
        Ok(removed)
    }

    fn path_for_handle(&self, handle: &BlobHandle) -> Option<PathBuf> {
        let name = handle.name();
        // Only handles this store issued are meaningful here.
        if 16 != name.len()
            || !name.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return None;
        }
        Some(self.blobs.join(&name[..2]).join(name))
    }
}

impl BlobStore for FsBlobStore {
    fn allocate(&self) -> Result<Box<dyn WritableBlob>, Error> {
        let file = tempfile::NamedTempFile::new_in(&self.stage)?;
        Ok(Box::new(FsWritableBlob {
            file,
            blobs: self.blobs.clone(),
        }))
    }

    fn open(
        &self,
        handle: &BlobHandle,
    ) -> Result<Box<dyn Read + Send>, Error> {
        let path = match self.path_for_handle(handle) {
            Some(p) => p,
            None => return Err(Error::NxBlob),
        };
        match fs::File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                Err(Error::NxBlob)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, handle: &BlobHandle) -> Result<(), Error> {
        let path = match self.path_for_handle(handle) {
            Some(p) => p,
            None => {
                warn!(
                    "{} Asked to release foreign handle {:?}",
                    self.log_prefix, handle
                );
                return Ok(());
            }
        };
        fs::remove_file(path).ignore_not_found()?;
        Ok(())
    }
}

struct FsWritableBlob {
    file: tempfile::NamedTempFile,
    blobs: PathBuf,
}

impl Write for FsWritableBlob {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.file.as_file_mut().write(src)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.as_file_mut().flush()
    }
}

impl WritableBlob for FsWritableBlob {
    fn finalize(self: Box<Self>) -> Result<BlobHandle, Error> {
        let FsWritableBlob { file, blobs } = *self;

        file.as_file().sync_all()?;
        file_ops::chmod(file.path(), 0o440)?;

        let mut file = file;
        loop {
            let name = format!("{:016x}", OsRng.gen::<u64>());
            let dir = blobs.join(&name[..2]);
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o770)
                .create(&dir)
                .ignore_already_exists()?;

            match file.persist_noclobber(dir.join(&name)) {
                Ok(_) => return Ok(BlobHandle::new(name)),
                Err(e)
                    if io::ErrorKind::AlreadyExists == e.error.kind() =>
                {
                    file = e.file;
                }
                Err(e) => return Err(e.error.into()),
            }
        }
    }

    fn discard(self: Box<Self>) -> Result<(), Error> {
        self.file.close()?;
        Ok(())
    }
}
