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

//! Patchbox is the staging-and-commit layer a synchronisation server uses to
//! hold incrementally-transferred binary patches.
//!
//! A patch is addressed by the triple of the item it belongs to, the revision
//! it applies from, and the revision it produces. Uploads are staged as
//! anonymous blobs in a backing store and become visible under their key only
//! at the moment they are accepted; a rejected or abandoned upload never
//! becomes observable.
//!
//! The crate is split into the `patch` module, which owns the key index and
//! the accept/reject/lookup/delete state machine, and the `blob` module,
//! which defines the backing-store capability interface together with
//! filesystem and in-memory engines.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod blob;
pub mod patch;
pub mod support;
