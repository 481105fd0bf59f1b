// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rsmap-storage: append-only lifecycle records over an embedded
//! transactional key/value store.
//!
//! The coordinator process owns the database file exclusively for its whole
//! tenure; everything here is written from that single process. Records are
//! replayed on startup to rebuild in-memory state, so the serialized form is
//! the source of truth.

pub mod db;
pub mod records;
pub mod store;

pub use db::{Database, StoreError};
pub use records::{
    now_nanos, AcquireEvent, AcquireLog, AcquireRecord, InitEvent, InitLog, InitRecord,
    ServerEvent, ServerLog, ServerRecord,
};
pub use store::{RecordKind, RecordStore};
