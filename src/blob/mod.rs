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

//! The backing blob store: anonymous, write-once, read-many byte objects.
//!
//! The patch store never touches storage directly; everything goes through
//! the `BlobStore` capability interface defined here. A blob starts life as
//! an anonymous `WritableBlob`, accumulates bytes, and is either finalised
//! into an immutable blob addressed by a `BlobHandle` or discarded. A
//! finalised blob can be opened for reading any number of times, each open
//! yielding an independent stream, until it is released.
//!
//! Two engines are provided: `FsBlobStore`, which stages blobs as temporary
//! files and persists them under a fan-out directory tree, and
//! `MemBlobStore`, which holds everything in memory and is what the test
//! suites build on. The engine is chosen at construction time by whoever
//! builds the `PatchStore`.
//!
//! Required semantics, which both engines honour and which any further
//! engine must too:
//!
//! - `finalize` followed by `open` on the returned handle succeeds
//!   immediately; there is no consistency window.
//! - `release` does not disturb streams that are already open. Readers race
//!   deletion safely.
//! - Handles are stable: a handle remains usable for `open` until `release`,
//!   across any number of opens.

use std::fmt;
use std::io::{Read, Write};

use crate::support::error::Error;

pub mod fs;
pub mod memory;

pub use self::fs::{FsBlobStore, FsStoreConfig};
pub use self::memory::MemBlobStore;

/// Stable identifier of a finalised blob within its backing store.
///
/// Handles are opaque to the patch store; only the engine that issued a
/// handle can interpret it. They carry no synchronisation-level identity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub(crate) fn new(name: String) -> Self {
        BlobHandle(name)
    }

    pub(crate) fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobHandle({})", self.0)
    }
}

/// The write side of a blob that has been allocated but not yet finalised.
///
/// Bytes are streamed in through the `Write` impl. Exactly one of
/// `finalize` or `discard` terminates the blob; dropping it without either
/// leaves garbage behind which the engine's own reclamation (if any) must
/// eventually sweep.
pub trait WritableBlob: Write + Send {
    /// Close the write side, making the blob immutable and readable, and
    /// return the stable handle under which it can be opened.
    fn finalize(self: Box<Self>) -> Result<BlobHandle, Error>;

    /// Throw the blob away without ever making it readable.
    fn discard(self: Box<Self>) -> Result<(), Error>;
}

/// A store of anonymous byte blobs with create-write-finalize semantics.
pub trait BlobStore: Send + Sync {
    /// Allocate a fresh anonymous blob in write mode.
    fn allocate(&self) -> Result<Box<dyn WritableBlob>, Error>;

    /// Open an independent read stream over a finalised blob.
    ///
    /// Fails with `Error::NxBlob` if the handle has been released.
    fn open(&self, handle: &BlobHandle) -> Result<Box<dyn Read + Send>, Error>;

    /// Release the blob's storage.
    ///
    /// Releasing a handle that is already gone is a no-op. Streams already
    /// open over the blob continue to work.
    fn release(&self, handle: &BlobHandle) -> Result<(), Error>;
}
