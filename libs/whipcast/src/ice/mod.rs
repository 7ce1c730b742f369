// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! ICE server directory: relay credentials from WHIP `Link` headers or persisted state.

mod directory;
mod entry;
mod store;

pub use directory::{IceServerDirectory, TURN_URLS_KEY};
pub use entry::{IceServerEntry, TlsCertPolicy};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
