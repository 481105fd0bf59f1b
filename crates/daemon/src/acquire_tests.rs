// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Acquire controller unit tests

use std::sync::Arc;
use std::time::Duration;

use rsmap_storage::Database;

use super::*;

const GRACE: Duration = Duration::from_secs(3600);

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

    fn store(&self) -> RecordStore<AcquireRecord> {
        RecordStore::new(Arc::clone(&self.db))
    }

    fn controller(&self, closing: CancellationToken) -> Arc<AcquireController> {
        Arc::new(AcquireController::load(self.store(), GRACE, closing).expect("load"))
    }

    fn record(&self, resource: &str) -> AcquireRecord {
        self.store()
            .get(resource)
            .expect("get")
            .expect("record stored")
    }

    fn events(&self, resource: &str) -> Vec<AcquireEvent> {
        self.record(resource).logs.iter().map(|l| l.event).collect()
    }
}

fn ctx() -> CallerContext {
    CallerContext::new().append(std::panic::Location::caller())
}

fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn shared_acquire_logs_acquiring_then_acquired() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let a = ctx();

    ctl.acquire("db", &a, 100, false, &no_cancel())
        .await
        .expect("acquire");

    let record = rig.record("db");
    assert_eq!(record.max, 100);
    assert_eq!(
        rig.events("db"),
        vec![AcquireEvent::Acquiring, AcquireEvent::Acquired]
    );
    assert_eq!(record.logs[1].n, 1);
}

#[tokio::test]
async fn exclusive_acquire_takes_full_weight() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let a = ctx();

    ctl.acquire("db", &a, 7, true, &no_cancel())
        .await
        .expect("acquire");
    assert_eq!(rig.record("db").logs[1].n, 7);
}

#[tokio::test]
async fn max_of_later_callers_is_ignored() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let a = ctx();
    let b = ctx();

    ctl.acquire("db", &a, 3, false, &no_cancel())
        .await
        .expect("acquire");
    ctl.acquire("db", &b, 99, false, &no_cancel())
        .await
        .expect("acquire");

    assert_eq!(rig.record("db").max, 3);
}

#[tokio::test]
async fn repeat_acquire_appends_nothing() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let a = ctx();

    ctl.acquire("db", &a, 5, true, &no_cancel())
        .await
        .expect("first");
    ctl.acquire("db", &a, 5, true, &no_cancel())
        .await
        .expect("second");

    assert_eq!(rig.events("db").len(), 2);
}

#[tokio::test]
async fn release_of_non_holder_appends_nothing() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());

    ctl.release("ghost", &ctx()).expect("unknown resource");

    let a = ctx();
    ctl.acquire("db", &a, 5, false, &no_cancel())
        .await
        .expect("acquire");
    ctl.release("db", &ctx()).expect("non-holder");

    assert_eq!(rig.events("db").len(), 2);
}

#[tokio::test]
async fn release_appends_weight_zero() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let a = ctx();

    ctl.acquire("db", &a, 5, true, &no_cancel())
        .await
        .expect("acquire");
    ctl.release("db", &a).expect("release");

    let record = rig.record("db");
    assert_eq!(record.logs[2].event, AcquireEvent::Released);
    assert_eq!(record.logs[2].n, 0);
}

#[tokio::test]
async fn writers_wait_for_readers() {
    // Two shared holders, an exclusive caller with a deadline, then a retry
    // after both readers released.
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let a = ctx();
    let b = ctx();
    let c = ctx();

    ctl.acquire("db", &a, 100, false, &no_cancel())
        .await
        .expect("a");
    ctl.acquire("db", &b, 100, false, &no_cancel())
        .await
        .expect("b");

    let deadline = CancellationToken::new();
    {
        let deadline = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            deadline.cancel();
        });
    }
    let denied = ctl.acquire("db", &c, 100, true, &deadline).await;
    assert_eq!(denied, Err(rsmap_core::Error::Cancelled));

    ctl.release("db", &a).expect("release a");
    ctl.release("db", &b).expect("release b");

    ctl.acquire("db", &c, 100, true, &no_cancel())
        .await
        .expect("c retries");
    let record = rig.record("db");
    let last = record.logs.last().expect("entries");
    assert_eq!(last.event, AcquireEvent::Acquired);
    assert_eq!(last.n, 100);
    assert_eq!(last.context.key(), c.key());
}

#[tokio::test]
async fn held_weights_never_exceed_max() {
    // Exclusivity invariant over the persisted stream: at every prefix the
    // outstanding acquired weight stays within max.
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());

    let mut tasks = Vec::new();
    for i in 0..8 {
        let ctl = Arc::clone(&ctl);
        tasks.push(tokio::spawn(async move {
            let me = CallerContext::new().append(std::panic::Location::caller());
            let exclusive = i % 4 == 0;
            ctl.acquire("db", &me, 3, exclusive, &CancellationToken::new())
                .await
                .expect("acquire");
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctl.release("db", &me).expect("release");
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    let record = rig.record("db");
    let mut outstanding: std::collections::HashMap<String, i64> = Default::default();
    for log in &record.logs {
        match log.event {
            AcquireEvent::Acquiring => {}
            AcquireEvent::Acquired => {
                outstanding.insert(log.context.key(), log.n);
            }
            AcquireEvent::Released => {
                outstanding.remove(&log.context.key());
            }
        }
        let total: i64 = outstanding.values().sum();
        assert!(total <= record.max, "over-committed: {total} > {}", record.max);
    }
}

#[tokio::test]
async fn replayed_acquirer_precedes_fresh_one() {
    let rig = Rig::new();
    let a = ctx();

    // A previous coordinator logged ACQUIRING without a matching ACQUIRED.
    rig.store()
        .put(&["db"], |_, record, _| {
            record.max = 5;
            record.logs.push(AcquireLog {
                event: AcquireEvent::Acquiring,
                n: 0,
                context: a.clone(),
                ts: 1,
            });
        })
        .expect("seed");

    let ctl = rig.controller(no_cancel());

    // B is issued first but must not overtake the replayed A.
    let b_task = {
        let ctl = Arc::clone(&ctl);
        let b = ctx();
        tokio::spawn(async move {
            ctl.acquire("db", &b, 5, true, &CancellationToken::new())
                .await
                .expect("b acquires");
            b
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!b_task.is_finished(), "fresh acquirer did not wait for replay");

    ctl.acquire("db", &a, 5, true, &no_cancel())
        .await
        .expect("a acquires");
    ctl.release("db", &a).expect("release a");

    let b = b_task.await.expect("join");
    ctl.release("db", &b).expect("release b");

    // A's grant landed before B's.
    let acquired: Vec<String> = rig
        .record("db")
        .logs
        .iter()
        .filter(|l| l.event == AcquireEvent::Acquired)
        .map(|l| l.context.key())
        .collect();
    assert_eq!(acquired, vec![a.key(), b.key()]);
}

#[tokio::test]
async fn multi_acquire_shares_one_acquiring_timestamp() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let me = ctx();

    let entries = vec![
        AcquireEntry {
            resource: "t".to_string(),
            context: me.clone(),
            max: 2,
            exclusive: true,
        },
        AcquireEntry {
            resource: "p".to_string(),
            context: me.clone(),
            max: 4,
            exclusive: false,
        },
    ];
    ctl.acquire_multi(&entries, &no_cancel())
        .await
        .expect("multi");

    let t = rig.record("t");
    let p = rig.record("p");
    assert_eq!(t.logs[0].event, AcquireEvent::Acquiring);
    assert_eq!(p.logs[0].event, AcquireEvent::Acquiring);
    assert_eq!(t.logs[0].ts, p.logs[0].ts);
    assert_eq!(t.logs[1].event, AcquireEvent::Acquired);
    assert_eq!(t.logs[1].n, 2);
    assert_eq!(p.logs[1].n, 1);
}

#[tokio::test]
async fn opposed_multi_acquires_do_not_deadlock() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());

    let run = |order: [&'static str; 2], ctl: Arc<AcquireController>| async move {
        for _ in 0..20 {
            let me = CallerContext::new().append(std::panic::Location::caller());
            let entries: Vec<AcquireEntry> = order
                .iter()
                .map(|name| AcquireEntry {
                    resource: name.to_string(),
                    context: me.clone(),
                    max: 3,
                    exclusive: true,
                })
                .collect();
            ctl.acquire_multi(&entries, &CancellationToken::new())
                .await
                .expect("multi acquire");
            let releases: Vec<ReleaseEntry> = entries
                .iter()
                .map(|e| ReleaseEntry {
                    resource: e.resource.clone(),
                    context: e.context.clone(),
                })
                .collect();
            ctl.release_multi(&releases).expect("multi release");
        }
    };

    let forward = tokio::spawn(run(["t", "p"], Arc::clone(&ctl)));
    let backward = tokio::spawn(run(["p", "t"], Arc::clone(&ctl)));

    tokio::time::timeout(Duration::from_secs(60), async {
        forward.await.expect("forward");
        backward.await.expect("backward");
    })
    .await
    .expect("deadlocked");
}

#[tokio::test]
async fn release_multi_shares_one_timestamp() {
    let rig = Rig::new();
    let ctl = rig.controller(no_cancel());
    let me = ctx();

    let entries = vec![
        AcquireEntry {
            resource: "t".to_string(),
            context: me.clone(),
            max: 2,
            exclusive: false,
        },
        AcquireEntry {
            resource: "p".to_string(),
            context: me.clone(),
            max: 2,
            exclusive: false,
        },
    ];
    ctl.acquire_multi(&entries, &no_cancel())
        .await
        .expect("multi");
    ctl.release_multi(&[
        ReleaseEntry {
            resource: "t".to_string(),
            context: me.clone(),
        },
        ReleaseEntry {
            resource: "p".to_string(),
            context: me.clone(),
        },
    ])
    .expect("release");

    let t = rig.record("t");
    let p = rig.record("p");
    assert_eq!(t.logs[2].event, AcquireEvent::Released);
    assert_eq!(t.logs[2].ts, p.logs[2].ts);
}

#[tokio::test]
async fn closing_interrupts_waiters_and_blocks_release() {
    let rig = Rig::new();
    let closing = CancellationToken::new();
    let ctl = rig.controller(closing.clone());
    let a = ctx();

    ctl.acquire("db", &a, 5, true, &no_cancel())
        .await
        .expect("a acquires");

    let b = ctx();
    let b_task = {
        let ctl = Arc::clone(&ctl);
        let b = b.clone();
        tokio::spawn(async move { ctl.acquire("db", &b, 5, true, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    closing.cancel();
    assert_eq!(b_task.await.expect("join"), Err(rsmap_core::Error::Closing));
    assert_eq!(ctl.release("db", &a), Err(rsmap_core::Error::Closing));

    assert_eq!(
        rig.events("db"),
        vec![
            AcquireEvent::Acquiring,
            AcquireEvent::Acquired,
            AcquireEvent::Acquiring,
        ]
    );
}
