// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller contexts: the identity of a concurrent user of a resource.
//!
//! A context is an ordered list of source-location frames. Each frame carries
//! an opaque hash minted when the frame is appended, so two otherwise
//! identical call sites (same file and line, different test processes or
//! tasks) remain distinguishable. Equality of contexts is by the
//! concatenation of their hashes.

use std::panic::Location;

use serde::{Deserialize, Serialize};

/// One source-location frame of a caller context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: i64,
    pub hash: String,
}

/// Ordered frames identifying the logical call site of an operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerContext(Vec<Frame>);

impl CallerContext {
    /// An empty context; real contexts grow through [`CallerContext::append`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new context with a frame for `location` appended.
    ///
    /// A fresh hash is minted for the frame, so appending the same location
    /// twice yields two distinct operator identities.
    pub fn append(&self, location: &Location<'_>) -> Self {
        let mut frames = self.0.clone();
        frames.push(Frame {
            file: location.file().to_string(),
            line: i64::from(location.line()),
            hash: mint_hash(),
        });
        Self(frames)
    }

    /// Operator identity: the concatenation of frame hashes.
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(self.0.len() * (HASH_LEN + 2));
        for frame in &self.0 {
            if !key.is_empty() {
                key.push_str("->");
            }
            key.push_str(&frame.hash);
        }
        key
    }

    pub fn frames(&self) -> &[Frame] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for CallerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, frame) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "->")?;
            }
            write!(f, "{}:{}({})", frame.file, frame.line, frame.hash)?;
        }
        Ok(())
    }
}

const HASH_LEN: usize = 8;

fn mint_hash() -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    hex.truncate(HASH_LEN);
    hex
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
