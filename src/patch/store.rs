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

//! The patch store coordinator.
//!
//! `PatchStore` owns the key index mapping `PatchKey` to the handle of the
//! backing blob holding the patch body, and mediates every transition
//! between the incoming and stored patch states.
//!
//! # Visibility
//!
//! A key becomes visible the instant `accept_patch` installs it in the
//! index, which happens only after the backing blob has been finalised. A
//! reader therefore sees either the complete patch or nothing; there is no
//! observable half-written state. Accepting onto an occupied key replaces
//! the prior entry, last writer wins.
//!
//! # Locking
//!
//! The index lock is held only for map operations, with one exception:
//! `lookup_patch` opens its read stream while still holding the lock. A
//! handle found in the index is guaranteed live for as long as the lock is
//! held, because blobs are only ever released after their entry has been
//! removed under the same lock. Blob finalisation, writes and releases all
//! happen outside the lock, so the hold time is bounded by a single `open`
//! call on the backing store.
//!
//! # Blob ownership
//!
//! The store owns each blob it allocates until the blob is either installed
//! in the index (whereupon the index entry owns it, released on delete or
//! supersede) or discarded by reject. Release failures for blobs that have
//! already left the index are logged and swallowed: the index mutation has
//! committed, and the only consequence is storage leaked until the backing
//! store's own reclamation catches it. All other backing-store failures
//! propagate to the caller unchanged; the store never retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{error, info};

use super::model::{IncomingPatch, PatchKey, StoredPatch};
use crate::blob::{BlobHandle, BlobStore};
use crate::support::error::Error;

/// The staging-and-commit store for synchronised binary patches.
pub struct PatchStore {
    log_prefix: String,
    blobs: Arc<dyn BlobStore>,
    index: Mutex<HashMap<PatchKey, BlobHandle>>,
}

impl PatchStore {
    /// Create a patch store over the given backing blob store.
    ///
    /// The blob store is an explicit dependency so tests and embedders can
    /// pick the engine; the store assumes exclusive ownership of every blob
    /// it allocates from it.
    pub fn new(log_prefix: String, blobs: Arc<dyn BlobStore>) -> Self {
        PatchStore {
            log_prefix,
            blobs,
            index: Mutex::new(HashMap::new()),
        }
    }

    /// Open a new incoming patch for `item_id`.
    ///
    /// `token` is an opaque caller-supplied correlation id; it is carried on
    /// the returned handle but plays no part in addressing. One backing blob
    /// is allocated and remains charged to the caller until the patch is
    /// accepted or rejected.
    pub fn create_incoming_patch(
        &self,
        item_id: &str,
        token: &str,
    ) -> Result<IncomingPatch, Error> {
        if item_id.is_empty() {
            return Err(Error::EmptyItemId);
        }

        let writer = self.blobs.allocate()?;
        info!(
            "{} Opened incoming patch for '{}' (token '{}')",
            self.log_prefix, item_id, token
        );
        Ok(IncomingPatch {
            item_id: item_id.to_owned(),
            token: token.to_owned(),
            writer: Some(writer),
        })
    }

    /// Commit `incoming` under the key formed from its item id and the given
    /// version pair, making it visible to `lookup_patch`.
    ///
    /// Any patch previously stored under the same key is replaced and its
    /// blob released. `target_version` must be at least `base_version`
    /// (equal is allowed, for self-contained patches); a bad pair fails with
    /// `Error::BadVersionRange` and leaves `incoming` open so the caller can
    /// retry or reject. A handle that was already accepted or rejected fails
    /// with `Error::PatchAlreadyTerminated`.
    pub fn accept_patch(
        &self,
        incoming: &mut IncomingPatch,
        base_version: u32,
        target_version: u32,
    ) -> Result<(), Error> {
        if target_version < base_version {
            return Err(Error::BadVersionRange);
        }

        let writer = incoming
            .writer
            .take()
            .ok_or(Error::PatchAlreadyTerminated)?;
        let handle = writer.finalize()?;

        let key = PatchKey {
            item_id: incoming.item_id.clone(),
            base_version,
            target_version,
        };

        let superseded = self
            .index
            .lock()
            .unwrap()
            .insert(key.clone(), handle);

        info!(
            "{} Accepted patch {} (token '{}')",
            self.log_prefix, key, incoming.token
        );

        if let Some(old) = superseded {
            info!("{} Superseded prior patch {}", self.log_prefix, key);
            if let Err(e) = self.blobs.release(&old) {
                error!(
                    "{} Failed to release superseded blob {:?}: {}",
                    self.log_prefix, old, e
                );
            }
        }

        Ok(())
    }

    /// Discard `incoming` without installing any key.
    ///
    /// Used when the caller detects a transfer failure or no longer wants
    /// the patch. Fails with `Error::PatchAlreadyTerminated` if the handle
    /// was already accepted or rejected.
    pub fn reject_patch(
        &self,
        incoming: &mut IncomingPatch,
    ) -> Result<(), Error> {
        let writer = incoming
            .writer
            .take()
            .ok_or(Error::PatchAlreadyTerminated)?;
        writer.discard()?;

        info!(
            "{} Rejected incoming patch for '{}' (token '{}')",
            self.log_prefix, incoming.item_id, incoming.token
        );
        Ok(())
    }

    /// Look up the stored patch for the given key.
    ///
    /// Absence is an `Ok(None)`, never an error. On a hit, the returned
    /// patch's stream is already open and remains readable even if another
    /// thread deletes or supersedes the key before the caller finishes.
    pub fn lookup_patch(
        &self,
        item_id: &str,
        base_version: u32,
        target_version: u32,
    ) -> Result<Option<StoredPatch>, Error> {
        let key = PatchKey {
            item_id: item_id.to_owned(),
            base_version,
            target_version,
        };

        let index = self.index.lock().unwrap();
        let handle = match index.get(&key) {
            Some(h) => h,
            None => return Ok(None),
        };
        // Opened under the lock: the entry's presence proves the blob has
        // not been released yet.
        let stream = self.blobs.open(handle)?;
        Ok(Some(StoredPatch { key, stream }))
    }

    /// Delete stored patches for `item_id`.
    ///
    /// With `base_version` given, only patches applying from that revision
    /// are removed; otherwise every patch for the item goes. Backing blobs
    /// are released. Deleting keys that do not exist is a silent no-op.
    pub fn delete_patches(
        &self,
        item_id: &str,
        base_version: Option<u32>,
    ) -> Result<(), Error> {
        let doomed = {
            let mut index = self.index.lock().unwrap();
            let keys = index
                .keys()
                .filter(|k| {
                    k.item_id == item_id
                        && base_version.map_or(true, |b| b == k.base_version)
                })
                .cloned()
                .collect::<Vec<_>>();

            keys.into_iter()
                .filter_map(|key| {
                    index.remove(&key).map(|handle| (key, handle))
                })
                .collect::<Vec<_>>()
        };

        for (key, handle) in doomed {
            info!("{} Deleted patch {}", self.log_prefix, key);
            if let Err(e) = self.blobs.release(&handle) {
                error!(
                    "{} Failed to release blob {:?} of deleted patch {}: {}",
                    self.log_prefix, handle, key, e
                );
            }
        }

        Ok(())
    }

    /// Return the number of stored patches currently visible.
    pub fn patch_count(&self) -> usize {
        self.index.lock().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};

    use proptest::prelude::*;

    use super::*;
    use crate::blob::MemBlobStore;

    fn set_up() -> (MemBlobStore, PatchStore) {
        let blobs = MemBlobStore::new();
        let store =
            PatchStore::new("test".to_owned(), Arc::new(blobs.clone()));
        (blobs, store)
    }

    fn accept_bytes(
        store: &PatchStore,
        item_id: &str,
        data: &[u8],
        base: u32,
        target: u32,
    ) {
        let mut incoming =
            store.create_incoming_patch(item_id, "tok").unwrap();
        incoming.write_all(data).unwrap();
        store.accept_patch(&mut incoming, base, target).unwrap();
    }

    fn read_bytes(
        store: &PatchStore,
        item_id: &str,
        base: u32,
        target: u32,
    ) -> Option<Vec<u8>> {
        store.lookup_patch(item_id, base, target).unwrap().map(
            |mut stored| {
                let mut content = Vec::new();
                stored.read_to_end(&mut content).unwrap();
                content
            },
        )
    }

    #[test]
    fn hello_world_scenario() {
        let (_, store) = set_up();

        let mut incoming =
            store.create_incoming_patch("foo", "123").unwrap();
        assert_eq!("foo", incoming.item_id());
        assert_eq!("123", incoming.token());
        incoming.write_all(b"hello world").unwrap();
        store.accept_patch(&mut incoming, 1, 1).unwrap();

        let mut stored = store.lookup_patch("foo", 1, 1).unwrap().unwrap();
        assert_eq!("foo", stored.key().item_id);
        let mut content = Vec::new();
        stored.read_to_end(&mut content).unwrap();
        assert_eq!(b"hello world", &content[..]);

        store.delete_patches("foo", Some(1)).unwrap();
        assert!(store.lookup_patch("foo", 1, 1).unwrap().is_none());
    }

    #[test]
    fn reject_leaves_nothing_visible() {
        let (blobs, store) = set_up();

        let mut incoming =
            store.create_incoming_patch("foo", "123").unwrap();
        incoming.write_all(b"never to be seen").unwrap();
        store.reject_patch(&mut incoming).unwrap();

        assert!(store.lookup_patch("foo", 1, 2).unwrap().is_none());
        assert_eq!(0, store.patch_count());
        assert_eq!(0, blobs.blob_count());
    }

    #[test]
    fn delete_all_versions_of_item() {
        let (blobs, store) = set_up();
        accept_bytes(&store, "item", b"1->2", 1, 2);
        accept_bytes(&store, "item", b"2->3", 2, 3);
        accept_bytes(&store, "other", b"1->2", 1, 2);

        store.delete_patches("item", None).unwrap();
        assert!(store.lookup_patch("item", 1, 2).unwrap().is_none());
        assert!(store.lookup_patch("item", 2, 3).unwrap().is_none());
        // Other items are untouched.
        assert_eq!(Some(b"1->2".to_vec()), read_bytes(&store, "other", 1, 2));
        assert_eq!(1, blobs.blob_count());
    }

    #[test]
    fn delete_scoped_to_base_version() {
        let (_, store) = set_up();
        accept_bytes(&store, "item", b"1->2", 1, 2);
        accept_bytes(&store, "item", b"1->3", 1, 3);
        accept_bytes(&store, "item", b"2->3", 2, 3);

        store.delete_patches("item", Some(1)).unwrap();
        assert!(store.lookup_patch("item", 1, 2).unwrap().is_none());
        assert!(store.lookup_patch("item", 1, 3).unwrap().is_none());
        assert_eq!(Some(b"2->3".to_vec()), read_bytes(&store, "item", 2, 3));
    }

    #[test]
    fn delete_of_absent_item_is_noop() {
        let (_, store) = set_up();
        store.delete_patches("ghost", None).unwrap();
        store.delete_patches("ghost", Some(5)).unwrap();
    }

    #[test]
    fn supersession_replaces_content_without_leaking() {
        let (blobs, store) = set_up();
        accept_bytes(&store, "item", b"first", 1, 2);
        assert_eq!(1, blobs.blob_count());

        accept_bytes(&store, "item", b"second", 1, 2);
        assert_eq!(Some(b"second".to_vec()), read_bytes(&store, "item", 1, 2));
        // The superseded blob was released; repeated accepts on one key do
        // not grow storage.
        assert_eq!(1, blobs.blob_count());
        assert_eq!(1, store.patch_count());
    }

    #[test]
    fn distinct_keys_are_distinct_patches() {
        let (blobs, store) = set_up();
        accept_bytes(&store, "item", b"1->2", 1, 2);
        accept_bytes(&store, "item", b"1->3", 1, 3);

        assert_eq!(Some(b"1->2".to_vec()), read_bytes(&store, "item", 1, 2));
        assert_eq!(Some(b"1->3".to_vec()), read_bytes(&store, "item", 1, 3));
        assert_eq!(2, blobs.blob_count());
    }

    #[test]
    fn double_accept_fails() {
        let (_, store) = set_up();
        let mut incoming =
            store.create_incoming_patch("item", "tok").unwrap();
        incoming.write_all(b"body").unwrap();
        store.accept_patch(&mut incoming, 1, 2).unwrap();

        assert_matches!(
            Err(Error::PatchAlreadyTerminated),
            store.accept_patch(&mut incoming, 1, 3)
        );
        assert_matches!(
            Err(Error::PatchAlreadyTerminated),
            store.reject_patch(&mut incoming)
        );
        // The first accept is unaffected.
        assert!(store.lookup_patch("item", 1, 2).unwrap().is_some());
    }

    #[test]
    fn double_reject_fails() {
        let (_, store) = set_up();
        let mut incoming =
            store.create_incoming_patch("item", "tok").unwrap();
        store.reject_patch(&mut incoming).unwrap();

        assert_matches!(
            Err(Error::PatchAlreadyTerminated),
            store.reject_patch(&mut incoming)
        );
        assert_matches!(
            Err(Error::PatchAlreadyTerminated),
            store.accept_patch(&mut incoming, 1, 2)
        );
    }

    #[test]
    fn write_after_terminal_fails() {
        let (_, store) = set_up();
        let mut incoming =
            store.create_incoming_patch("item", "tok").unwrap();
        incoming.write_all(b"body").unwrap();
        store.accept_patch(&mut incoming, 1, 2).unwrap();

        assert!(incoming.write_all(b"more").is_err());
        assert!(incoming.flush().is_err());
    }

    #[test]
    fn empty_item_id_is_rejected() {
        let (blobs, store) = set_up();
        assert_matches!(
            Err(Error::EmptyItemId),
            store.create_incoming_patch("", "tok")
        );
        assert_eq!(0, blobs.blob_count());
    }

    #[test]
    fn bad_version_range_leaves_handle_open() {
        let (_, store) = set_up();
        let mut incoming =
            store.create_incoming_patch("item", "tok").unwrap();
        incoming.write_all(b"body").unwrap();

        assert_matches!(
            Err(Error::BadVersionRange),
            store.accept_patch(&mut incoming, 3, 2)
        );
        // The handle is still open; a valid accept goes through.
        store.accept_patch(&mut incoming, 2, 3).unwrap();
        assert_eq!(Some(b"body".to_vec()), read_bytes(&store, "item", 2, 3));
    }

    #[test]
    fn open_stream_survives_delete() {
        let (_, store) = set_up();
        accept_bytes(&store, "item", b"still here", 1, 2);

        let mut stored = store.lookup_patch("item", 1, 2).unwrap().unwrap();
        store.delete_patches("item", None).unwrap();
        assert!(store.lookup_patch("item", 1, 2).unwrap().is_none());

        let mut content = Vec::new();
        stored.read_to_end(&mut content).unwrap();
        assert_eq!(b"still here", &content[..]);
    }

    #[test]
    fn open_stream_survives_supersession() {
        let (_, store) = set_up();
        accept_bytes(&store, "item", b"old bytes", 1, 2);

        let mut stored = store.lookup_patch("item", 1, 2).unwrap().unwrap();
        accept_bytes(&store, "item", b"new bytes", 1, 2);

        let mut content = Vec::new();
        stored.read_to_end(&mut content).unwrap();
        assert_eq!(b"old bytes", &content[..]);
        assert_eq!(
            Some(b"new bytes".to_vec()),
            read_bytes(&store, "item", 1, 2)
        );
    }

    #[test]
    fn concurrent_accepts_on_distinct_items() {
        let (blobs, store) = set_up();

        crossbeam::thread::scope(|s| {
            for n in 0..8u32 {
                let store = &store;
                s.spawn(move |_| {
                    let item = format!("item-{}", n);
                    for v in 1..=16u32 {
                        let mut incoming = store
                            .create_incoming_patch(&item, "tok")
                            .unwrap();
                        incoming
                            .write_all(format!("{}:{}", item, v).as_bytes())
                            .unwrap();
                        store.accept_patch(&mut incoming, v, v + 1).unwrap();

                        // Immediately visible to the accepting thread.
                        let mut stored = store
                            .lookup_patch(&item, v, v + 1)
                            .unwrap()
                            .unwrap();
                        let mut content = Vec::new();
                        stored.read_to_end(&mut content).unwrap();
                        assert_eq!(
                            format!("{}:{}", item, v).into_bytes(),
                            content
                        );
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(8 * 16, store.patch_count());
        assert_eq!(8 * 16, blobs.blob_count());
    }

    #[test]
    fn concurrent_accepts_on_same_key_leave_one_winner() {
        let (blobs, store) = set_up();

        crossbeam::thread::scope(|s| {
            for n in 0..8u32 {
                let store = &store;
                s.spawn(move |_| {
                    for round in 0..16u32 {
                        let mut incoming = store
                            .create_incoming_patch("contested", "tok")
                            .unwrap();
                        incoming
                            .write_all(
                                format!("{}:{}", n, round).as_bytes(),
                            )
                            .unwrap();
                        store.accept_patch(&mut incoming, 1, 2).unwrap();

                        // A concurrent lookup sees some writer's complete
                        // body, never a torn one.
                        if let Some(mut stored) =
                            store.lookup_patch("contested", 1, 2).unwrap()
                        {
                            let mut content = Vec::new();
                            stored.read_to_end(&mut content).unwrap();
                            let text = String::from_utf8(content).unwrap();
                            let mut parts = text.splitn(2, ':');
                            let writer: u32 =
                                parts.next().unwrap().parse().unwrap();
                            let round: u32 =
                                parts.next().unwrap().parse().unwrap();
                            assert!(writer < 8 && round < 16);
                        }
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(1, store.patch_count());
        assert_eq!(1, blobs.blob_count());
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_bytes(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            base in 0u32..1000,
            delta in 0u32..1000,
        ) {
            let (_, store) = set_up();
            let mut incoming =
                store.create_incoming_patch("item", "tok").unwrap();
            incoming.write_all(&data).unwrap();
            store
                .accept_patch(&mut incoming, base, base + delta)
                .unwrap();

            let mut stored = store
                .lookup_patch("item", base, base + delta)
                .unwrap()
                .unwrap();
            let mut content = Vec::new();
            stored.read_to_end(&mut content).unwrap();
            prop_assert_eq!(data, content);
        }
    }
}
