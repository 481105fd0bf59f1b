// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic append-only record store over the bucketed database.

use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::TransactionBehavior;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{read_record, Database, StoreError, BUCKET_ACQUIRE, BUCKET_INIT};
use crate::records::{AcquireRecord, InitRecord};

/// A record type bound to its bucket.
pub trait RecordKind: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const BUCKET: &'static str;
}

impl RecordKind for InitRecord {
    const BUCKET: &'static str = BUCKET_INIT;
}

impl RecordKind for AcquireRecord {
    const BUCKET: &'static str = BUCKET_ACQUIRE;
}

/// Keyed access to one bucket of records.
pub struct RecordStore<R> {
    db: Arc<Database>,
    _record: PhantomData<R>,
}

impl<R> Clone for RecordStore<R> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _record: PhantomData,
        }
    }
}

impl<R: RecordKind> RecordStore<R> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    /// Load the record for `name`, or `None` when nothing was stored yet.
    pub fn get(&self, name: &str) -> Result<Option<R>, StoreError> {
        let conn = self.db.conn();
        read_record(&conn, R::BUCKET, name)
    }

    /// Mutate the records for every name inside one write transaction.
    ///
    /// For each name the mutator receives the stored record (or a default
    /// one) and whether it existed; the result is written back. Multi-name
    /// calls are atomic: either every mutation lands or none does.
    pub fn put<F>(&self, names: &[&str], mut mutate: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &mut R, bool),
    {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for name in names {
            let stored: Option<R> = read_record(&tx, R::BUCKET, name)?;
            let exists = stored.is_some();
            let mut record = stored.unwrap_or_default();
            mutate(name, &mut record, exists);
            let json = serde_json::to_string(&record)?;
            tx.execute(
                &format!("INSERT OR REPLACE INTO {} (name, record) VALUES (?1, ?2)", R::BUCKET),
                rusqlite::params![name, json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Visit every stored record. Iteration order is the store's own.
    pub fn for_each<F>(&self, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, R),
    {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!("SELECT name, record FROM {}", R::BUCKET))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (name, json) = row?;
            let record: R = serde_json::from_str(&json)?;
            visit(&name, record);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
