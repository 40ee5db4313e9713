//! Durability and concurrency tests for the persisted stores.
//!
//! Covers:
//! - results outlive a restart (a fresh registry over the same cache root)
//! - validity is judged against the stored timestamp
//! - concurrent per-key file writers leave one intact entry

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration as ChronoDuration, Utc};
use fncache_storage::{BackendRegistry, Computed, Memoized, StorageLocation};
use fncache_test_utils::fixtures::{test_function, TempCacheRoot};
use fncache_test_utils::generators::arb_validity;
use fncache_test_utils::{CacheEntry, CallArgs, CallCounter, MemoConfig, Validity, FOREVER};
use proptest::prelude::*;

fn fetch(memo: &Memoized, counter: &CallCounter, url: &str) -> String {
    memo.call(&CallArgs::new().arg(url), || {
        Computed::value(counter.run(format!("body of {url}")))
    })
    .expect("call should succeed")
}

#[test]
fn test_results_survive_restart() {
    for config in [
        MemoConfig::per_key_file(FOREVER),
        MemoConfig::per_module(FOREVER),
    ] {
        let mut root = TempCacheRoot::new();
        let counter = CallCounter::new();

        {
            let memo = root.memoized("src/http.rs", "fetch", config.clone());
            fetch(&memo, &counter, "https://example.com/a");
        }
        root.restart();

        let memo = root.memoized("src/http.rs", "fetch", config);
        let body = fetch(&memo, &counter, "https://example.com/a");

        assert_eq!(body, "body of https://example.com/a");
        assert_eq!(counter.count(), 1);
    }
}

#[test]
fn test_in_memory_results_do_not_survive_restart() {
    let mut root = TempCacheRoot::new();
    let counter = CallCounter::new();

    {
        let memo = root.memoized("src/http.rs", "fetch", MemoConfig::in_memory(FOREVER));
        fetch(&memo, &counter, "https://example.com/a");
    }
    root.restart();

    let memo = root.memoized("src/http.rs", "fetch", MemoConfig::in_memory(FOREVER));
    fetch(&memo, &counter, "https://example.com/a");
    assert_eq!(counter.count(), 2);
}

#[test]
fn test_version_tag_invalidates_persisted_results() {
    let root = TempCacheRoot::new();
    let counter = CallCounter::new();
    let config = root.config(MemoConfig::per_key_file(FOREVER));

    let v1 = Memoized::new(
        test_function("src/http.rs", "fetch").with_version("1"),
        config.clone(),
        root.registry(),
    );
    let v2 = Memoized::new(
        test_function("src/http.rs", "fetch").with_version("2"),
        config,
        root.registry(),
    );

    fetch(&v1, &counter, "https://example.com/a");
    fetch(&v1, &counter, "https://example.com/a");
    fetch(&v2, &counter, "https://example.com/a");
    assert_eq!(counter.count(), 2);
}

#[test]
fn test_store_layout_follows_source_path() {
    let root = TempCacheRoot::new();
    let file_memo = root.memoized("src/<gen>.rs", "fetch", MemoConfig::per_key_file(FOREVER));
    let lmdb_memo = root.memoized("src/<gen>.rs", "fetch", MemoConfig::per_module(FOREVER));
    let counter = CallCounter::new();

    fetch(&file_memo, &counter, "https://example.com/a");
    fetch(&lmdb_memo, &counter, "https://example.com/a");

    let location = StorageLocation::for_source(root.path(), "src/<gen>.rs");
    assert_eq!(location.path(), root.path().join("src/_lt_gen_gt_.rs.cache"));
    assert!(location.path().join("data.mdb").is_file());

    let entries: Vec<_> = std::fs::read_dir(location.with_suffix("d"))
        .expect("entry directory should exist")
        .collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_forever_ignores_entry_age_but_windows_do_not() {
    let root = TempCacheRoot::new();
    let forever = root.memoized("src/age.rs", "lookup", MemoConfig::per_module(FOREVER));
    let args = CallArgs::new().arg("old");

    let key = forever.key_for(&args).expect("key should build");
    let ten_years_ago = Utc::now() - ChronoDuration::days(3650);
    let backend = root
        .registry()
        .resolve(forever.function(), forever.config())
        .expect("resolve should succeed");
    backend
        .set(&key, &CacheEntry::new(ten_years_ago, serde_json::json!("ancient")))
        .expect("set should succeed");

    let counter = CallCounter::new();
    let value: String = forever
        .call(&args, || Computed::value(counter.run("fresh".to_string())))
        .expect("call should succeed");
    assert_eq!(value, "ancient");
    assert_eq!(counter.count(), 0);

    let daily = root.memoized(
        "src/age.rs",
        "lookup",
        MemoConfig::per_module(Validity::seconds(86_400)),
    );
    let value: String = daily
        .call(&args, || Computed::value(counter.run("fresh".to_string())))
        .expect("call should succeed");
    assert_eq!(value, "fresh");
    assert_eq!(counter.count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: a stored entry is served exactly while its age is inside the
    /// validity window, and recomputed once it falls outside.
    #[test]
    fn prop_stored_entry_is_served_only_while_valid(
        validity in arb_validity(),
        age_secs in 0u64..172_800,
    ) {
        // Keep clear of the window edge so call latency cannot flip the outcome.
        if let Validity::Within(window) = validity {
            let window = window.as_secs();
            prop_assume!(age_secs >= window || age_secs + 5 <= window);
        }

        let root = TempCacheRoot::new();
        let memo = root.memoized("src/expiry.rs", "lookup", MemoConfig::in_memory(validity));
        let args = CallArgs::new().arg("k");
        let key = memo.key_for(&args).expect("key should build");
        let backend = root
            .registry()
            .resolve(memo.function(), memo.config())
            .expect("resolve should succeed");
        let stored_at = Utc::now() - ChronoDuration::seconds(age_secs as i64);
        backend
            .set(&key, &CacheEntry::new(stored_at, serde_json::json!("stored")))
            .expect("set should succeed");

        let value: String = memo
            .call(&args, || Computed::value("fresh".to_string()))
            .expect("call should succeed");

        let served = match validity {
            Validity::Forever => true,
            Validity::Within(window) => age_secs < window.as_secs(),
        };
        prop_assert_eq!(value, if served { "stored" } else { "fresh" });
    }
}

#[test]
fn test_concurrent_file_writers_leave_one_intact_entry() {
    const WRITERS: usize = 8;

    let root = TempCacheRoot::new();
    let memo = Arc::new(root.memoized(
        "src/race.rs",
        "compute",
        MemoConfig::per_key_file(FOREVER),
    ));
    let barrier = Arc::new(Barrier::new(WRITERS));
    let counter = CallCounter::new();

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let memo = Arc::clone(&memo);
            let barrier = Arc::clone(&barrier);
            let counter = counter.clone();
            thread::spawn(move || {
                barrier.wait();
                let value: String = memo
                    .call(&CallArgs::new().arg("shared"), || {
                        Computed::value(counter.run(format!("writer-{i}-{}", "x".repeat(4096))))
                    })
                    .expect("call should succeed");
                value
            })
        })
        .collect();

    for handle in handles {
        let value = handle.join().expect("writer thread should not panic");
        assert!(value.starts_with("writer-"));
    }

    let runs = counter.count();
    let value: String = memo
        .call(&CallArgs::new().arg("shared"), || {
            Computed::value(counter.run("late".to_string()))
        })
        .expect("call should succeed");

    assert!(value.starts_with("writer-"));
    assert!(value.ends_with(&"x".repeat(4096)));
    assert_eq!(counter.count(), runs);
}

#[test]
fn test_separate_registries_share_files_but_not_handles() {
    let root = TempCacheRoot::new();
    let config = root.config(MemoConfig::per_key_file(FOREVER));
    let first = Arc::new(BackendRegistry::new());
    let second = Arc::new(BackendRegistry::new());
    let counter = CallCounter::new();

    let a = Memoized::new(test_function("src/multi.rs", "f"), config.clone(), first.clone());
    let b = Memoized::new(test_function("src/multi.rs", "f"), config, second.clone());

    fetch(&a, &counter, "https://example.com/x");
    fetch(&b, &counter, "https://example.com/x");

    assert_eq!(counter.count(), 1);
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
}
