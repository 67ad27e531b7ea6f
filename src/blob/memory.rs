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

//! An in-memory blob store.
//!
//! Finalised blobs are reference-counted slices, so a reader opened before a
//! `release` keeps reading the same bytes afterwards. This is the engine the
//! patch store tests run against and is also suitable for embedders that
//! want a patch store without any persistence.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use super::{BlobHandle, BlobStore, WritableBlob};
use crate::support::error::Error;

/// A blob store holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemBlobStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Arc<[u8]>>,
    next_id: u64,
}

impl MemBlobStore {
    pub fn new() -> Self {
        MemBlobStore::default()
    }

    /// Return the number of finalised blobs currently held.
    ///
    /// Used by tests to check that supersession and deletion do not leak
    /// storage.
    pub fn blob_count(&self) -> usize {
        self.inner.lock().unwrap().blobs.len()
    }
}

impl BlobStore for MemBlobStore {
    fn allocate(&self) -> Result<Box<dyn WritableBlob>, Error> {
        Ok(Box::new(MemWritableBlob {
            buf: Vec::new(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn open(
        &self,
        handle: &BlobHandle,
    ) -> Result<Box<dyn Read + Send>, Error> {
        let inner = self.inner.lock().unwrap();
        let data = inner
            .blobs
            .get(handle.name())
            .cloned()
            .ok_or(Error::NxBlob)?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    fn release(&self, handle: &BlobHandle) -> Result<(), Error> {
        // Removing a handle that is already gone is a no-op; any Arc still
        // held by an open cursor keeps the bytes alive.
        self.inner.lock().unwrap().blobs.remove(handle.name());
        Ok(())
    }
}

struct MemWritableBlob {
    buf: Vec<u8>,
    inner: Arc<Mutex<Inner>>,
}

impl Write for MemWritableBlob {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(src);
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableBlob for MemWritableBlob {
    fn finalize(self: Box<Self>) -> Result<BlobHandle, Error> {
        let MemWritableBlob { buf, inner } = *self;
        let mut inner = inner.lock().unwrap();
        let name = format!("mem-{:08x}", inner.next_id);
        inner.next_id += 1;
        inner.blobs.insert(name.clone(), Arc::from(buf));
        Ok(BlobHandle::new(name))
    }

    fn discard(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}
