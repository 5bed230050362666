use carton::{Container, Entry, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// Eight readers race one writer; every read must observe a valid,
// fully-formed value.
#[test]
fn test_concurrent_reads_with_one_writer() {
    const READERS: usize = 8;
    const READS_PER_THREAD: u64 = 10_000;
    const WRITES: usize = 10_000;

    let c = Arc::new(Container::new());
    c.set("k", Value::String("v-0000".to_string())).unwrap();

    let total_reads = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for _ in 0..READERS {
        let c = Arc::clone(&c);
        let total_reads = Arc::clone(&total_reads);
        handles.push(std::thread::spawn(move || {
            for _ in 0..READS_PER_THREAD {
                let value = c.get("k").expect("key is never removed");
                // A torn payload would break the v-NNNN shape.
                let s = value.as_str().expect("writer only writes strings");
                assert!(s.starts_with("v-") && s.len() == 6, "torn read: {s:?}");
                total_reads.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for ind in 0..WRITES {
        c.replace("k", format!("v-{ind:04}")).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        total_reads.load(Ordering::Relaxed),
        (READERS as u64) * READS_PER_THREAD
    );
}

// An external observer sees each batch entirely or not at all.
#[test]
fn test_batch_atomicity() {
    let c = Arc::new(Container::new());
    let stop = Arc::new(AtomicBool::new(false));

    let observer = {
        let c = Arc::clone(&c);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut observations = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let got = c.get_batch(&["a", "b", "c"]);
                let generations: Vec<Option<i64>> =
                    got.iter().map(|v| v.as_ref().map(|v| v.as_i64().unwrap())).collect();

                match (&generations[0], &generations[1], &generations[2]) {
                    (None, None, None) => (),
                    (Some(a), Some(b), Some(c)) => {
                        assert!(a == b && b == c, "partial batch observed: {generations:?}");
                    }
                    _ => panic!("partial batch observed: {generations:?}"),
                }
                observations += 1;
            }
            observations
        })
    };

    for generation in 0..2_000i64 {
        c.bulk_insert(vec![
            Entry::new("a", generation),
            Entry::new("b", generation),
            Entry::new("c", generation),
        ])
        .unwrap();
        assert_eq!(c.remove_batch(&["a", "b", "c"]), 3);
    }

    stop.store(true, Ordering::Relaxed);
    assert!(observer.join().unwrap() > 0);
}

// Scenario: a snapshot reader rides out 1,000 writes; the final active
// snapshot equals the final written state, and snapshots are prefix-
// consistent with the write history.
#[test]
fn test_snapshot_reader_over_write_stream() {
    const WRITES: i64 = 1_000;

    let c = Arc::new(Container::new());
    c.set("a", 0i64).unwrap();
    c.set("b", 0i64).unwrap();
    c.enable_snapshot_reads();

    let reader = {
        let c = Arc::clone(&c);
        std::thread::spawn(move || {
            let mut max_seen = 0i64;
            while max_seen < WRITES {
                let (a, b) = c
                    .with_snapshot(|entries| {
                        let find = |key: &str| {
                            entries
                                .iter()
                                .find(|e| e.name == key)
                                .map(|e| e.value.as_i64().unwrap())
                                .unwrap()
                        };
                        (find("a"), find("b"))
                    })
                    .expect("snapshot reads are enabled");

                // "a" is always written before "b": a snapshot is a
                // prefix of the write history, so b can't lead a.
                assert!(b <= a, "snapshot is not a history prefix: a={a} b={b}");
                max_seen = max_seen.max(b);
            }
        })
    };

    for generation in 1..=WRITES {
        c.replace("a", generation).unwrap();
        c.replace("b", generation).unwrap();
    }
    reader.join().unwrap();

    // The active snapshot converges on the final written state.
    assert_eq!(c.snapshot_get("a").unwrap().as_i64().unwrap(), WRITES);
    assert_eq!(c.snapshot_get("b").unwrap().as_i64().unwrap(), WRITES);
}

#[test]
fn test_snapshot_reads_disabled_by_default() {
    let c = Container::new();
    c.set("k", 1i32).unwrap();
    assert!(!c.snapshot_reads_enabled());
    assert_eq!(c.snapshot_get("k"), None);
    assert!(c.with_snapshot(|_| ()).is_none());
}

// Serializers racing a writer always produce well-formed images.
#[test]
fn test_serialize_under_concurrent_writes() {
    let c = Arc::new(Container::new());
    c.set("stable", "fixed").unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let c = Arc::clone(&c);
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                let wire = c.serialize_binary().unwrap();
                let decoded = Container::deserialize_binary(&wire).unwrap();
                assert_eq!(decoded.get("stable").unwrap().as_str().unwrap(), "fixed");
            }
        }));
    }

    for ind in 0..2_000i32 {
        c.replace("counter", ind).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

// Mutating a shared nested container is visible through every parent,
// under the child's own lock.
#[test]
fn test_shared_nested_container_mutation() {
    let shared = Arc::new(Container::new());
    shared.set("hits", 0i64).unwrap();

    let parent_a = Container::new();
    parent_a.set("child", Value::Container(Arc::clone(&shared))).unwrap();
    let parent_b = Container::new();
    parent_b.set("child", Value::Container(Arc::clone(&shared))).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let shared = Arc::clone(&shared);
        handles.push(std::thread::spawn(move || {
            for _ in 0..1_000 {
                loop {
                    let current = shared.get("hits").unwrap();
                    let next = current.as_i64().unwrap() + 1;
                    if shared.update_if("hits", &current, next).unwrap() {
                        break;
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for parent in [&parent_a, &parent_b] {
        let through = parent.get("child").unwrap();
        assert_eq!(
            through.as_container().unwrap().get("hits").unwrap().as_i64().unwrap(),
            4_000
        );
    }
}
