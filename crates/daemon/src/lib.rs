// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rsmap-daemon: the coordinator side of the rsmap resource broker.
//!
//! Whichever worker process wins the election for a broker directory runs
//! this code in-process: it replays the persisted records, owns the database
//! and serves the RPC surface to every other worker.

pub mod acquire;
pub mod election;
pub mod init;
pub mod map;
pub mod protocol;
pub mod server;

pub use acquire::{AcquireController, AcquireEntry, ReleaseEntry};
pub use election::{
    dir_lock, execution_id, try_become_coordinator, Coordinator, ElectionConfig, MapDirs,
    EXECUTION_ID_ENV,
};
pub use init::InitController;
pub use map::{ResourceMap, ServerSideMap};
