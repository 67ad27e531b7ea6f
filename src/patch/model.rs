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

//! Value types shared across the patch store.

use std::fmt;
use std::io::{self, Read, Write};

use crate::blob::WritableBlob;

/// Uniquely addresses a stored patch.
///
/// `item_id` names the synchronised object; `base_version` is the revision
/// the patch applies from and `target_version` the revision it produces. At
/// most one stored patch exists per key at any time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PatchKey {
    pub item_id: String,
    pub base_version: u32,
    pub target_version: u32,
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}->{}",
            self.item_id, self.base_version, self.target_version
        )
    }
}

/// A patch upload in progress.
///
/// Created by `PatchStore::create_incoming_patch`. The caller streams the
/// patch body in through the `Write` impl, then hands the handle back to the
/// store via exactly one of `accept_patch` or `reject_patch`. Until then the
/// upload has no key and is invisible to `lookup_patch`.
///
/// Once accepted or rejected, the handle is terminal: further writes fail,
/// and a second accept or reject fails with
/// `Error::PatchAlreadyTerminated`.
pub struct IncomingPatch {
    pub(crate) item_id: String,
    pub(crate) token: String,
    pub(crate) writer: Option<Box<dyn WritableBlob>>,
}

impl IncomingPatch {
    /// The item this upload belongs to.
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// The caller-supplied correlation token.
    ///
    /// Carried for the caller's bookkeeping and for log messages; it never
    /// becomes part of the patch key.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Write for IncomingPatch {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        match self.writer {
            Some(ref mut w) => w.write(src),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "incoming patch already accepted or rejected",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer {
            Some(ref mut w) => w.flush(),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "incoming patch already accepted or rejected",
            )),
        }
    }
}

impl fmt::Debug for IncomingPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingPatch")
            .field("item_id", &self.item_id)
            .field("token", &self.token)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

/// A committed patch, as returned by `PatchStore::lookup_patch`.
///
/// Reads from the backing blob through the `Read` impl. The stream was
/// opened before the handle was returned and stays readable even if the key
/// is concurrently deleted or superseded.
pub struct StoredPatch {
    pub(crate) key: PatchKey,
    pub(crate) stream: Box<dyn Read + Send>,
}

impl StoredPatch {
    pub fn key(&self) -> &PatchKey {
        &self.key
    }
}

impl Read for StoredPatch {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.stream.read(dst)
    }
}

impl fmt::Debug for StoredPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredPatch").field("key", &self.key).finish()
    }
}
