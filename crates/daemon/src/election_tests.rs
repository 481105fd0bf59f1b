// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Election unit tests

use rsmap_storage::ServerEvent;

use super::*;

fn ctx() -> CallerContext {
    CallerContext::new().append(std::panic::Location::caller())
}

#[test]
fn prepare_creates_the_execution_directory() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("prepare");

    assert!(dirs.root.is_dir());
    assert_eq!(dirs.root.parent(), Some(base.path()));
    assert_eq!(dirs.db_file.file_name().unwrap(), "logs.db");
    assert_eq!(dirs.addr_file.file_name().unwrap(), "addr");
}

#[test]
fn prepare_rejects_directory_shaped_files() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("first prepare");
    std::fs::create_dir(&dirs.db_file).expect("occupy db path");

    assert!(matches!(
        MapDirs::prepare(base.path()),
        Err(Error::Config(_))
    ));
}

#[test]
fn addr_roundtrips_through_publication() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("prepare");

    assert_eq!(dirs.read_addr(), None);

    dirs.publish_addr("http://127.0.0.1:4000").expect("publish");
    assert_eq!(dirs.read_addr().as_deref(), Some("http://127.0.0.1:4000"));

    // Republication overwrites atomically.
    dirs.publish_addr("http://127.0.0.1:5000").expect("republish");
    assert_eq!(dirs.read_addr().as_deref(), Some("http://127.0.0.1:5000"));
}

#[test]
fn published_addr_ends_with_newline() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("prepare");
    dirs.publish_addr("http://127.0.0.1:4000").expect("publish");

    let raw = std::fs::read_to_string(&dirs.addr_file).expect("read");
    assert_eq!(raw, "http://127.0.0.1:4000\n");
}

#[test]
fn dir_lock_is_shared_per_directory() {
    let base = tempfile::tempdir().expect("tempdir");
    let a = dir_lock(base.path());
    let b = dir_lock(base.path());
    assert!(Arc::ptr_eq(&a, &b));

    let other = tempfile::tempdir().expect("tempdir");
    let c = dir_lock(other.path());
    assert!(!Arc::ptr_eq(&a, &c));
}

#[tokio::test]
async fn election_is_won_once_per_directory() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("prepare");
    let config = ElectionConfig {
        lock_timeout: Duration::from_millis(30),
        ..ElectionConfig::default()
    };

    let winner = try_become_coordinator(&dirs, &ctx(), &config)
        .await
        .expect("try")
        .expect("first attempt wins");
    assert!(dirs.read_addr().is_some(), "winner published its address");
    assert_eq!(dirs.read_addr().as_deref(), Some(winner.addr()));

    let loser = try_become_coordinator(&dirs, &ctx(), &config)
        .await
        .expect("try");
    assert!(loser.is_none(), "database lock was not exclusive");

    winner.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_the_database_and_records_history() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("prepare");
    let config = ElectionConfig {
        lock_timeout: Duration::from_millis(30),
        ..ElectionConfig::default()
    };

    let first = try_become_coordinator(&dirs, &ctx(), &config)
        .await
        .expect("try")
        .expect("win");
    let first_addr = first.addr().to_string();
    first.shutdown().await;

    let second = try_become_coordinator(&dirs, &ctx(), &config)
        .await
        .expect("try")
        .expect("a new coordinator takes over");
    second.shutdown().await;

    let db = rsmap_storage::Database::open_exclusive(&dirs.db_file, Duration::ZERO).expect("open");
    let record = db.server_record().expect("read").expect("record");
    let events: Vec<ServerEvent> = record.logs.iter().map(|l| l.event).collect();
    assert_eq!(
        events,
        vec![
            ServerEvent::Launched,
            ServerEvent::Stopped,
            ServerEvent::Launched,
            ServerEvent::Stopped,
        ]
    );
    assert_eq!(record.logs[0].addr, first_addr);
}

#[tokio::test]
async fn coordinator_closing_token_fails_new_operations() {
    let base = tempfile::tempdir().expect("tempdir");
    let dirs = MapDirs::prepare(base.path()).expect("prepare");
    let config = ElectionConfig::default();

    let coordinator = try_become_coordinator(&dirs, &ctx(), &config)
        .await
        .expect("try")
        .expect("win");
    let map = coordinator.map();
    let closing = coordinator.closing();

    use crate::map::ResourceMap;
    let holder = ctx();
    map.acquire("db", &holder, 5, true, &CancellationToken::new())
        .await
        .expect("acquire");

    closing.cancel();
    assert_eq!(map.release("db", &holder).await, Err(Error::Closing));

    coordinator.shutdown().await;
}
