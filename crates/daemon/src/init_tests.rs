// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Init controller unit tests

use std::sync::Arc;
use std::time::Duration;

use rsmap_storage::Database;

use super::*;

struct Rig {
    _dir: tempfile::TempDir,
    db: Arc<Database>,
}

impl Rig {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::open_exclusive(&dir.path().join("logs.db"), Duration::ZERO).expect("open"),
        );
        Self { _dir: dir, db }
    }

    fn store(&self) -> RecordStore<InitRecord> {
        RecordStore::new(Arc::clone(&self.db))
    }

    async fn controller(&self, closing: CancellationToken) -> InitController {
        InitController::load(self.store(), closing)
            .await
            .expect("load")
    }

    fn events(&self, resource: &str) -> Vec<InitEvent> {
        self.store()
            .get(resource)
            .expect("get")
            .map(|r| r.logs.iter().map(|l| l.event).collect())
            .unwrap_or_default()
    }
}

fn ctx() -> CallerContext {
    CallerContext::new().append(std::panic::Location::caller())
}

fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn first_try_appends_started() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel()).await;
    let a = ctx();

    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));
    assert_eq!(rig.events("db"), vec![InitEvent::Started]);
}

#[tokio::test]
async fn complete_appends_and_later_tries_decline() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel()).await;
    let a = ctx();
    let b = ctx();

    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));
    ctl.complete("db", &a).expect("complete");

    assert!(!ctl.try_init("db", &b, &no_cancel()).await.expect("try"));
    assert_eq!(rig.events("db"), vec![InitEvent::Started, InitEvent::Completed]);
}

#[tokio::test]
async fn completed_record_accepts_no_further_entries() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel()).await;
    let a = ctx();

    ctl.try_init("db", &a, &no_cancel()).await.expect("try");
    ctl.complete("db", &a).expect("complete");

    for _ in 0..3 {
        let other = ctx();
        assert!(!ctl.try_init("db", &other, &no_cancel()).await.expect("try"));
    }
    assert_eq!(rig.events("db").len(), 2);
}

#[tokio::test]
async fn failure_then_retry_by_another_operator() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel()).await;
    let a = ctx();
    let b = ctx();

    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));
    ctl.fail("db", &a).expect("fail");

    assert!(ctl.try_init("db", &b, &no_cancel()).await.expect("try"));
    ctl.complete("db", &b).expect("complete");

    assert_eq!(
        rig.events("db"),
        vec![
            InitEvent::Started,
            InitEvent::Failed,
            InitEvent::Started,
            InitEvent::Completed,
        ]
    );

    let record = rig.store().get("db").expect("get").expect("record");
    assert_eq!(record.logs[0].context.key(), a.key());
    assert_eq!(record.logs[1].context.key(), a.key());
    assert_eq!(record.logs[2].context.key(), b.key());
    assert_eq!(record.logs[3].context.key(), b.key());
}

#[tokio::test]
async fn second_chance_does_not_append_started_twice() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel()).await;
    let a = ctx();

    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));
    // The response was lost; the same operator asks again.
    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));

    assert_eq!(rig.events("db"), vec![InitEvent::Started]);
}

#[tokio::test]
async fn complete_on_unknown_resource_is_not_found() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel()).await;
    assert!(matches!(
        ctl.complete("ghost", &ctx()),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(ctl.fail("ghost", &ctx()), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn closing_short_circuits_every_operation() {
    let rig = Rig::new();
    let closing = CancellationToken::new();
    let ctl = rig.controller(closing.clone()).await;
    let a = ctx();

    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));
    closing.cancel();

    assert_eq!(
        ctl.try_init("db", &ctx(), &no_cancel()).await,
        Err(Error::Closing)
    );
    assert_eq!(ctl.complete("db", &a), Err(Error::Closing));
    assert_eq!(ctl.fail("db", &a), Err(Error::Closing));
}

// Replay: reloading a stored record yields exactly the state its last event
// describes.

#[tokio::test]
async fn replay_of_completed_record_declines_tries() {
    let rig = Rig::new();
    let a = ctx();
    {
        let ctl = rig.controller(no_cancel()).await;
        ctl.try_init("db", &a, &no_cancel()).await.expect("try");
        ctl.complete("db", &a).expect("complete");
    }

    let ctl = rig.controller(no_cancel()).await;
    assert!(!ctl.try_init("db", &ctx(), &no_cancel()).await.expect("try"));
}

#[tokio::test]
async fn replay_of_failed_record_frees_the_slot() {
    let rig = Rig::new();
    let a = ctx();
    {
        let ctl = rig.controller(no_cancel()).await;
        ctl.try_init("db", &a, &no_cancel()).await.expect("try");
        ctl.fail("db", &a).expect("fail");
    }

    let ctl = rig.controller(no_cancel()).await;
    assert!(ctl.try_init("db", &ctx(), &no_cancel()).await.expect("try"));
}

#[tokio::test]
async fn replay_of_started_record_keeps_the_lock_for_its_operator() {
    let rig = Rig::new();
    let a = ctx();
    {
        let ctl = rig.controller(no_cancel()).await;
        ctl.try_init("db", &a, &no_cancel()).await.expect("try");
        // Coordinator dies here; no COMPLETED or FAILED entry.
    }

    let ctl = rig.controller(no_cancel()).await;

    // A stranger cannot take the slot.
    let stranger = ctx();
    let try_res = tokio::time::timeout(
        Duration::from_millis(100),
        ctl.try_init("db", &stranger, &no_cancel()),
    )
    .await;
    assert!(try_res.is_err(), "stranger acquired a replayed init lock");

    // The recorded operator completes its interrupted init.
    assert!(ctl.try_init("db", &a, &no_cancel()).await.expect("try"));
    ctl.complete("db", &a).expect("complete");

    assert_eq!(
        rig.events("db"),
        vec![InitEvent::Started, InitEvent::Completed]
    );
}
