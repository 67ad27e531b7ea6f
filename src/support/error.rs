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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An empty item id was passed where a patch item must be named.
    #[error("Empty item id")]
    EmptyItemId,
    /// The target version of a patch is below its base version.
    #[error("Target version is below base version")]
    BadVersionRange,
    /// An incoming patch was accepted or rejected a second time, or written
    /// to after reaching a terminal state. Surfaced as an error rather than
    /// a no-op so that confused callers are caught.
    #[error("Incoming patch already accepted or rejected")]
    PatchAlreadyTerminated,
    /// A blob handle was opened after its blob had been released.
    #[error("No such blob")]
    NxBlob,
    /// Failure from the backing blob store. Propagated unchanged; the patch
    /// store never retries on the caller's behalf.
    #[error(transparent)]
    Io(#[from] io::Error),
}
