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

//! The patch store proper: keyed, committed patches and the staging protocol
//! that produces them.

pub mod model;
pub mod store;

pub use self::model::{IncomingPatch, PatchKey, StoredPatch};
pub use self::store::PatchStore;
