//! End-to-end environment scenarios: commit visibility, conflict retry,
//! truncation, deferred tasks, commit-failure handling, and store
//! configuration checks.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tephra_env::{ConfigurationStrategy, Environment, EnvironmentConfig};
use tephra_error::TephraError;
use tephra_types::StoreConfig;

fn open_env(dir: &Path) -> Environment {
    Environment::open_with_config(dir, EnvironmentConfig::new(ConfigurationStrategy::Ignore))
        .expect("environment should open")
}

fn create_store(env: &Environment, name: &str, config: StoreConfig) {
    env.execute_in_transaction(|txn| {
        env.open_store(name, config, txn)?;
        Ok(())
    })
    .expect("store creation should commit");
}

#[test]
fn basic_commit_and_snapshot_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());

    let mut writer = env.begin_transaction().expect("begin writer");
    let store = env
        .open_store("a", StoreConfig::WITHOUT_DUPLICATES, &mut writer)
        .expect("open store");
    store.put(&mut writer, &[0x01], b"A").expect("put");
    assert!(writer.flush().expect("flush"));
    writer.abort();

    let mut reader = env.begin_readonly_transaction().expect("begin reader");
    let store = env
        .open_store_opt("a", StoreConfig::USE_EXISTING, &mut reader, false)
        .expect("open store")
        .expect("store exists");
    assert_eq!(store.get(&reader, &[0x01]).expect("get").as_deref(), Some(&b"A"[..]));
    reader.abort();

    env.close().expect("close");
}

#[test]
fn conflicting_flush_returns_false_and_revert_recovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    let mut w1 = env.begin_transaction().expect("begin w1");
    let mut w2 = env.begin_transaction().expect("begin w2");
    let store = env
        .open_store_opt("a", StoreConfig::USE_EXISTING, &mut w1, false)
        .expect("open")
        .expect("store exists");

    store.put(&mut w1, &[0x01], b"X").expect("put in w1");
    assert!(w1.flush().expect("w1 flush"));

    store.put(&mut w2, &[0x01], b"Y").expect("put in w2");
    assert!(!w2.flush().expect("w2 flush conflicts"), "stale snapshot must not flush");

    // The conflicting flush left the published state untouched.
    w2.revert().expect("revert");
    assert_eq!(store.get(&w2, &[0x01]).expect("get").as_deref(), Some(&b"X"[..]));

    store.put(&mut w2, &[0x01], b"Y").expect("put again");
    assert!(w2.flush().expect("w2 flush after revert"));
    w2.abort();
    w1.abort();
    env.close().expect("close");
}

#[test]
fn truncate_allocates_a_fresh_structure_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());

    let mut txn = env.begin_transaction().expect("begin");
    let store = env
        .open_store("s", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .expect("open");
    let id_before = store.structure_id();
    store.put(&mut txn, b"row", b"data").expect("put");
    assert!(txn.commit().expect("commit"));

    let mut txn = env.begin_transaction().expect("begin");
    let truncated = env.truncate_store("s", &mut txn).expect("truncate");
    let id_after = truncated.structure_id();
    assert_ne!(id_after, id_before);
    assert_ne!(id_after.get() & 0xff, 0);
    assert!(txn.commit().expect("commit"));

    let mut reader = env.begin_readonly_transaction().expect("begin reader");
    let store = env
        .open_store_opt("s", StoreConfig::USE_EXISTING, &mut reader, false)
        .expect("open")
        .expect("name survives truncation");
    assert_eq!(store.structure_id(), id_after);
    assert_eq!(store.get(&reader, b"row").expect("get"), None);
    reader.abort();
    env.close().expect("close");
}

#[test]
fn deferred_task_waits_for_every_live_transaction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    let runs = Arc::new(AtomicUsize::new(0));

    let mut reader = env.begin_readonly_transaction().expect("begin reader");
    let mut writer = env.begin_transaction().expect("begin writer");
    {
        let runs = Arc::clone(&runs);
        env.execute_transaction_safe_task(move || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0, "live transactions defer the task");

    let store = env
        .open_store_opt("a", StoreConfig::USE_EXISTING, &mut writer, false)
        .expect("open")
        .expect("store exists");
    store.put(&mut writer, b"k", b"v").expect("put");
    assert!(writer.commit().expect("commit"));
    assert_eq!(
        runs.load(Ordering::SeqCst),
        0,
        "the reader alive at enqueue time still defers the task"
    );

    reader.abort();
    assert_eq!(runs.load(Ordering::SeqCst), 1, "task runs exactly once after the drain");

    // No live transactions: tasks run inline.
    let inline = Arc::new(AtomicUsize::new(0));
    {
        let inline = Arc::clone(&inline);
        env.execute_transaction_safe_task(move || {
            inline.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(inline.load(Ordering::SeqCst), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    env.close().expect("close");
}

#[test]
fn reverted_transaction_does_not_unblock_older_snapshots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    // Two transactions on the same snapshot; a third commit advances the
    // current root; the first one reverts onto the advanced root while
    // the second stays behind.
    let mut reverting = env.begin_transaction().expect("begin");
    let mut behind = env.begin_transaction().expect("begin");
    env.execute_in_transaction(|txn| {
        let store = env
            .open_store_opt("a", StoreConfig::USE_EXISTING, txn, false)?
            .expect("store exists");
        store.put(txn, b"k", b"v")?;
        Ok(())
    })
    .expect("advancing commit");
    reverting.revert().expect("revert");
    assert_ne!(reverting.snapshot_root(), behind.snapshot_root());

    let runs = Arc::new(AtomicUsize::new(0));
    {
        let runs = Arc::clone(&runs);
        env.execute_transaction_safe_task(move || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
    }

    // A drain while both are live must not release the task: the stamp is
    // the maximum live root and the bound is the minimum.
    env.begin_readonly_transaction().expect("begin").abort();
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    reverting.abort();
    assert_eq!(
        runs.load(Ordering::SeqCst),
        0,
        "the transaction still on the old snapshot defers the task"
    );
    behind.abort();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    env.close().expect("close");
}

#[test]
fn failed_rollback_makes_the_environment_inoperative() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    let mut writer = env.begin_transaction().expect("begin");
    let store = env
        .open_store_opt("a", StoreConfig::USE_EXISTING, &mut writer, false)
        .expect("open")
        .expect("store exists");
    store.put(&mut writer, b"k", b"v").expect("put");

    env.log().inject_append_failure();
    env.log().inject_set_high_address_failure();
    let flush_err = writer.flush().expect_err("flush must fail");
    assert!(matches!(flush_err, TephraError::FlushFailed { .. }));
    writer.abort();

    let begin_err = env.begin_transaction().expect_err("begin must fail");
    let TephraError::Inoperative { cause } = &begin_err else {
        panic!("expected an inoperative environment, got {begin_err}");
    };
    // The sticky cause is the original commit failure, not the rollback
    // failure.
    assert!(cause.to_string().contains("injected append fault"));
    assert!(!cause.to_string().contains("set_high_address"));

    // Inoperative is permanent for normal operations; only a forced close
    // leaves the state.
    assert!(env.begin_readonly_transaction().is_err());
    assert!(env.clear().is_err());
    assert!(matches!(env.close(), Err(TephraError::Inoperative { .. })));
    env.environment_config()
        .set_env_close_forcedly(true)
        .expect("set forced close");
    env.close().expect("forced close leaves inoperative");
}

#[test]
fn failed_commit_with_successful_rollback_stays_operative() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    let high_before = env.log().high_address();
    let mut writer = env.begin_transaction().expect("begin");
    let store = env
        .open_store_opt("a", StoreConfig::USE_EXISTING, &mut writer, false)
        .expect("open")
        .expect("store exists");
    store.put(&mut writer, b"k", b"v").expect("put");

    env.log().inject_append_failure();
    let err = writer.flush().expect_err("flush must fail");
    assert!(matches!(err, TephraError::FlushFailed { .. }));
    writer.abort();

    assert_eq!(
        env.log().high_address(),
        high_before,
        "high address must be restored after a failed commit"
    );

    // The environment keeps working.
    env.execute_in_transaction(|txn| {
        let store = env.open_store_opt("a", StoreConfig::USE_EXISTING, txn, false)?.expect("store");
        store.put(txn, b"k", b"v2")?;
        Ok(())
    })
    .expect("subsequent commit succeeds");
    let value = env
        .compute_in_readonly_transaction(|txn| {
            let store = env
                .open_store_opt("a", StoreConfig::USE_EXISTING, txn, false)?
                .expect("store");
            store.get(txn, b"k")
        })
        .expect("read");
    assert_eq!(value.as_deref(), Some(&b"v2"[..]));
    env.close().expect("close");
}

#[test]
fn duplicates_mismatch_is_rejected_without_touching_the_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "c", StoreConfig::WITHOUT_DUPLICATES);

    let high_before = env.log().high_address();
    let mut txn = env.begin_transaction().expect("begin");
    let err = env
        .open_store("c", StoreConfig::WITH_DUPLICATES, &mut txn)
        .expect_err("duplicates mismatch must fail");
    assert!(matches!(err, TephraError::ConfigMismatch { .. }));
    txn.abort();
    assert_eq!(env.log().high_address(), high_before);
    env.close().expect("close");
}

#[test]
fn prefixing_falls_back_only_when_never_realized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "plain", StoreConfig::WITHOUT_DUPLICATES);
    create_store(&env, "prefixed", StoreConfig::WITHOUT_DUPLICATES_WITH_PREFIXING);

    let mut txn = env.begin_transaction().expect("begin");
    // Requesting prefixing on a store that never had it falls back.
    let store = env
        .open_store(
            "plain",
            StoreConfig::WITHOUT_DUPLICATES_WITH_PREFIXING,
            &mut txn,
        )
        .expect("fallback open");
    assert!(!store.config().prefixing);
    // The reverse direction is a hard mismatch.
    let err = env
        .open_store("prefixed", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .expect_err("prefixing downgrade must fail");
    assert!(matches!(err, TephraError::ConfigMismatch { .. }));
    txn.abort();
    env.close().expect("close");
}

#[test]
fn reopening_a_store_preserves_its_meta_info() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "dup", StoreConfig::WITH_DUPLICATES);

    let (id, config) = env
        .compute_in_readonly_transaction(|txn| {
            let store = env
                .open_store_opt("dup", StoreConfig::USE_EXISTING, txn, false)?
                .expect("store exists");
            Ok((store.structure_id(), store.config()))
        })
        .expect("compute");
    assert!(config.duplicates);
    assert!(!config.prefixing);

    // Same identity when opened with the creating configuration.
    let again = env
        .compute_in_readonly_transaction(|txn| {
            let store = env
                .open_store_opt("dup", StoreConfig::WITH_DUPLICATES, txn, false)?
                .expect("store exists");
            Ok(store.structure_id())
        })
        .expect("compute");
    assert_eq!(again, id);
    env.close().expect("close");
}

#[test]
fn allocated_structure_ids_never_have_a_zero_low_byte() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    let mut txn = env.begin_transaction().expect("begin");
    let mut seen = std::collections::HashSet::new();
    for i in 0..300 {
        let store = env
            .open_store(
                &format!("store-{i:03}"),
                StoreConfig::WITHOUT_DUPLICATES,
                &mut txn,
            )
            .expect("open");
        let id = store.structure_id().get();
        assert_ne!(id & 0xff, 0, "id {id:#x} has a zero low byte");
        assert_ne!(id, 1, "meta tree id must never be allocated");
        assert!(seen.insert(id), "id {id:#x} allocated twice");
    }
    assert!(txn.commit().expect("commit"));
    env.close().expect("close");
}

#[test]
fn readonly_transaction_flush_writes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    let high_before = env.log().high_address();
    let mut reader = env.begin_readonly_transaction().expect("begin");
    assert!(reader.flush().expect("readonly flush"));
    assert!(reader.flush().expect("readonly flush is idempotent"));
    assert_eq!(env.log().high_address(), high_before);
    reader.abort();
    env.close().expect("close");
}

#[test]
fn close_and_clear_refuse_while_transactions_are_live() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    let txn = env.begin_transaction().expect("begin");
    assert!(matches!(
        env.clear(),
        Err(TephraError::EnvironmentActive { .. })
    ));
    assert!(matches!(
        env.close(),
        Err(TephraError::EnvironmentActive { .. })
    ));
    drop(txn);
    env.close().expect("close succeeds once inactive");
    assert!(matches!(env.close(), Err(TephraError::Closed { .. })));
    assert!(matches!(
        env.begin_transaction(),
        Err(TephraError::Closed { .. })
    ));
}

#[test]
fn forced_close_tolerates_live_transactions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EnvironmentConfig::new(ConfigurationStrategy::Ignore);
    config.set_env_close_forcedly(true).expect("set");
    let env = Environment::open_with_config(dir.path(), config).expect("open");
    let txn = env.begin_readonly_transaction().expect("begin");
    env.close().expect("forced close");
    drop(txn);
}

#[test]
fn clear_resets_stores_and_structure_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    let first_id = env
        .compute_in_transaction(|txn| {
            let store = env.open_store("a", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            store.put(txn, b"k", b"v")?;
            Ok(store.structure_id())
        })
        .expect("create");

    env.clear().expect("clear");

    let (exists, fresh_id) = env
        .compute_in_transaction(|txn| {
            let exists = env.store_exists("a", txn)?;
            let store = env.open_store("b", StoreConfig::WITHOUT_DUPLICATES, txn)?;
            Ok((exists, store.structure_id()))
        })
        .expect("after clear");
    assert!(!exists, "clear drops every store");
    assert_eq!(fresh_id, first_id, "structure id counter restarts");
    env.close().expect("close");
}

#[test]
fn readonly_environment_policies() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let env = open_env(dir.path());
        create_store(&env, "existing", StoreConfig::WITHOUT_DUPLICATES);
        env.close().expect("close");
    }

    let config = EnvironmentConfig::new(ConfigurationStrategy::Ignore);
    config.set_env_is_readonly(true).expect("set");
    config.set_env_readonly_empty_stores(true).expect("set");
    let env = Environment::open_with_config(dir.path(), config).expect("open readonly");

    let mut txn = env.begin_transaction().expect("begin");
    assert!(txn.is_readonly(), "a readonly environment begins readonly transactions");

    let missing = env
        .open_store("missing", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .expect("temporary empty store");
    assert!(missing.is_temporary_empty());
    assert_eq!(missing.get(&txn, b"any").expect("get"), None);
    assert!(matches!(
        missing.put(&mut txn, b"any", b"x"),
        Err(TephraError::ReadonlyViolation)
    ));

    let existing = env
        .open_store_opt("existing", StoreConfig::USE_EXISTING, &mut txn, false)
        .expect("open")
        .expect("store exists");
    assert!(matches!(
        existing.put(&mut txn, b"k", b"v"),
        Err(TephraError::ReadonlyViolation)
    ));
    txn.abort();
    env.close().expect("close");
}

#[test]
fn remove_store_requires_an_existing_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "doomed", StoreConfig::WITHOUT_DUPLICATES);

    env.execute_in_transaction(|txn| env.remove_store("doomed", txn))
        .expect("remove commits");

    let gone = env
        .compute_in_readonly_transaction(|txn| {
            env.open_store_opt("doomed", StoreConfig::USE_EXISTING, txn, false)
        })
        .expect("compute");
    assert!(gone.is_none());

    let mut txn = env.begin_transaction().expect("begin");
    assert!(matches!(
        env.remove_store("never-existed", &mut txn),
        Err(TephraError::StoreNotFound { .. })
    ));
    txn.abort();
    env.close().expect("close");
}

#[test]
fn store_names_and_existence_follow_the_transaction_view() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "beta", StoreConfig::WITHOUT_DUPLICATES);
    create_store(&env, "alpha", StoreConfig::WITHOUT_DUPLICATES);

    let mut txn = env.begin_transaction().expect("begin");
    env.open_store("gamma", StoreConfig::WITHOUT_DUPLICATES, &mut txn)
        .expect("create in txn");
    env.remove_store("beta", &mut txn).expect("remove in txn");
    let names = env.get_all_store_names(&txn).expect("names");
    assert_eq!(names, vec!["alpha".to_owned(), "gamma".to_owned()]);
    assert!(env.store_exists("gamma", &txn).expect("exists"));
    txn.abort();

    // The abort discarded everything.
    let names = env
        .compute_in_readonly_transaction(|txn| env.get_all_store_names(txn))
        .expect("names");
    assert_eq!(names, vec!["alpha".to_owned(), "beta".to_owned()]);
    env.close().expect("close");
}

#[test]
fn concurrent_writers_serialize_through_conflict_retry() {
    const THREADS: u64 = 4;
    const INCREMENTS: u64 = 25;

    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "counter", StoreConfig::WITHOUT_DUPLICATES);

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..INCREMENTS {
                    env.execute_in_transaction(|txn| {
                        let store = env
                            .open_store_opt("counter", StoreConfig::USE_EXISTING, txn, false)?
                            .expect("store exists");
                        let current = store
                            .get(txn, b"n")?
                            .map_or(0u64, |raw| {
                                u64::from_be_bytes(raw.try_into().expect("8-byte counter"))
                            });
                        store.put(txn, b"n", &(current + 1).to_be_bytes())?;
                        Ok(())
                    })
                    .expect("increment commits");
                }
            });
        }
    });

    let total = env
        .compute_in_readonly_transaction(|txn| {
            let store = env
                .open_store_opt("counter", StoreConfig::USE_EXISTING, txn, false)?
                .expect("store exists");
            Ok(store
                .get(txn, b"n")?
                .map_or(0u64, |raw| {
                    u64::from_be_bytes(raw.try_into().expect("8-byte counter"))
                }))
        })
        .expect("read total");
    assert_eq!(total, THREADS * INCREMENTS);
    env.close().expect("close");
}

#[test]
fn commit_and_begin_hooks_fire() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    let begin_seen = Arc::new(AtomicUsize::new(0));
    let commit_seen = Arc::new(AtomicUsize::new(0));

    let begin_in_hook = Arc::clone(&begin_seen);
    let mut txn = env
        .begin_transaction_with_hook(move || {
            begin_in_hook.fetch_add(1, Ordering::SeqCst);
        })
        .expect("begin");
    assert_eq!(begin_seen.load(Ordering::SeqCst), 1, "begin hook runs at begin");

    let commit_in_hook = Arc::clone(&commit_seen);
    txn.set_commit_hook(move || {
        commit_in_hook.fetch_add(1, Ordering::SeqCst);
    });
    let store = env
        .open_store_opt("a", StoreConfig::USE_EXISTING, &mut txn, false)
        .expect("open")
        .expect("store exists");
    store.put(&mut txn, b"k", b"v").expect("put");
    assert!(txn.commit().expect("commit"));
    assert_eq!(commit_seen.load(Ordering::SeqCst), 1, "commit hook runs on flush");
    env.close().expect("close");
}

#[test]
fn store_get_cache_serves_current_versions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EnvironmentConfig::new(ConfigurationStrategy::Ignore);
    config.set_env_store_get_cache_size(128).expect("set");
    let env = Environment::open_with_config(dir.path(), config).expect("open");
    create_store(&env, "cached", StoreConfig::WITHOUT_DUPLICATES);

    env.execute_in_transaction(|txn| {
        let store = env
            .open_store_opt("cached", StoreConfig::USE_EXISTING, txn, false)?
            .expect("store");
        store.put(txn, b"k", b"v1")?;
        Ok(())
    })
    .expect("first write");

    let read = |expected: &[u8]| {
        let value = env
            .compute_in_readonly_transaction(|txn| {
                let store = env
                    .open_store_opt("cached", StoreConfig::USE_EXISTING, txn, false)?
                    .expect("store");
                store.get(txn, b"k")
            })
            .expect("read");
        assert_eq!(value.as_deref(), Some(expected));
    };
    read(b"v1");
    read(b"v1");

    // A new version must never be served stale values from the cache.
    env.execute_in_transaction(|txn| {
        let store = env
            .open_store_opt("cached", StoreConfig::USE_EXISTING, txn, false)?
            .expect("store");
        store.put(txn, b"k", b"v2")?;
        Ok(())
    })
    .expect("second write");
    read(b"v2");
    env.close().expect("close");
}

#[test]
fn runtime_config_changes_reach_the_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    assert!(!env.log().config().durable_write());
    env.environment_config()
        .set_log_durable_write(true)
        .expect("set");
    assert!(env.log().config().durable_write());
    env.environment_config()
        .set_log_sync_period(250)
        .expect("set");
    assert_eq!(env.log().config().sync_period_ms(), 250);
    env.close().expect("close");
}

#[test]
fn sidecar_properties_apply_at_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path()).expect("dir");
    std::fs::write(
        dir.path().join("tephra.properties"),
        "tephra.env.storeGetCacheSize = 64\n# comment\n",
    )
    .expect("write sidecar");
    let env = open_env(dir.path());
    assert_eq!(env.environment_config().env_store_get_cache_size(), 64);
    env.close().expect("close");
}

#[test]
fn disk_usage_grows_with_commits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    let before = env.get_disk_usage().expect("disk usage");
    env.execute_in_transaction(|txn| {
        let store = env.open_store("bulk", StoreConfig::WITHOUT_DUPLICATES, txn)?;
        for i in 0u32..64 {
            store.put(txn, &i.to_be_bytes(), &[0xab; 128])?;
        }
        Ok(())
    })
    .expect("bulk write");
    assert!(env.get_disk_usage().expect("disk usage") > before);
    env.close().expect("close");
}

#[test]
fn expired_records_reach_the_collector_after_commit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = open_env(dir.path());
    create_store(&env, "a", StoreConfig::WITHOUT_DUPLICATES);

    env.execute_in_transaction(|txn| {
        let store = env
            .open_store_opt("a", StoreConfig::USE_EXISTING, txn, false)?
            .expect("store");
        store.put(txn, b"k", b"v1")?;
        Ok(())
    })
    .expect("write");
    // Rewriting the same key supersedes tree nodes and the previous
    // version marker.
    env.execute_in_transaction(|txn| {
        let store = env
            .open_store_opt("a", StoreConfig::USE_EXISTING, txn, false)?
            .expect("store");
        store.put(txn, b"k", b"v2")?;
        Ok(())
    })
    .expect("rewrite");

    env.gc();
    let profile = env.garbage_collector().utilization();
    let reclaimed: u64 = profile.segments.values().sum();
    assert!(reclaimed > 0, "superseded records should be accounted");
    env.close().expect("close");
}

#[test]
fn monitor_enabled_environment_works_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EnvironmentConfig::new(ConfigurationStrategy::Ignore);
    config.set_env_monitor_txns_timeout(10_000).expect("set");
    let env = Environment::open_with_config(dir.path(), config).expect("open");
    env.execute_in_transaction(|txn| {
        let store = env.open_store("m", StoreConfig::WITHOUT_DUPLICATES, txn)?;
        store.put(txn, b"k", b"v")?;
        Ok(())
    })
    .expect("commit");
    env.close().expect("close");
}
