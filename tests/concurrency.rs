//! Behavior under parallel mutation.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semagraph::{Addr, ElementType, MemoryContext, Storage, StoreConfig};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Arc<Storage> {
    // Surface store tracing (RUST_LOG=semagraph=debug) when a test fails.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Arc::new(Storage::initialize(StoreConfig::new(dir)).unwrap())
}

fn out_list(storage: &Storage, ctx: &MemoryContext, node: Addr) -> Vec<Addr> {
    let mut list = Vec::new();
    let mut cursor = storage.get_first_out_arc(ctx, node).unwrap();
    while cursor.is_not_empty() {
        list.push(cursor);
        cursor = storage.get_next_out_arc(ctx, cursor).unwrap();
    }
    list
}

#[test]
fn concurrent_arc_creation_on_shared_endpoints() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let setup = storage.context();
    let n1 = storage.node_new(&setup, ElementType::CONST);
    let n2 = storage.node_new(&setup, ElementType::CONST);

    const THREADS: usize = 8;
    const ARCS_PER_THREAD: usize = 50;

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let storage = Arc::clone(&storage);
        handles.push(std::thread::spawn(move || {
            let ctx = storage.context();
            let mut created = Vec::with_capacity(ARCS_PER_THREAD);
            for _ in 0..ARCS_PER_THREAD {
                let arc = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
                assert!(arc.is_not_empty());
                created.push(arc);
            }
            created
        }));
    }

    let mut all: Vec<Addr> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    let distinct = all.len();
    all.dedup();
    assert_eq!(all.len(), distinct, "every arc address must be unique");
    assert_eq!(all.len(), THREADS * ARCS_PER_THREAD);

    // Every created arc appears exactly once in the out-list.
    let ctx = storage.context();
    let mut listed = out_list(&storage, &ctx, n1);
    listed.sort();
    assert_eq!(listed, all);
    for arc in &all {
        assert_eq!(storage.get_arc_begin(&ctx, *arc).unwrap(), n1);
        assert_eq!(storage.get_arc_end(&ctx, *arc).unwrap(), n2);
    }
}

#[test]
fn concurrent_node_creation_yields_distinct_addresses() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());

    const THREADS: usize = 8;
    const NODES_PER_THREAD: usize = 400;

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let storage = Arc::clone(&storage);
        handles.push(std::thread::spawn(move || {
            let ctx = storage.context();
            (0..NODES_PER_THREAD)
                .map(|_| {
                    let addr = storage.node_new(&ctx, ElementType::CONST);
                    assert!(addr.is_not_empty());
                    addr
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut all: Vec<Addr> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total);

    let ctx = storage.context();
    let stat = storage.get_elements_stat(&ctx).unwrap();
    assert_eq!(stat.node_count as usize, total);
}

#[test]
fn concurrent_star_churn_leaves_consistent_graph() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());

    const THREADS: usize = 6;
    const ROUNDS: usize = 40;

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let storage = Arc::clone(&storage);
        handles.push(std::thread::spawn(move || {
            let ctx = storage.context();
            for round in 0..ROUNDS {
                let hub = storage.node_new(&ctx, ElementType::CONST);
                let mut spokes = Vec::new();
                for _ in 0..5 {
                    let spoke = storage.node_new(&ctx, ElementType::CONST);
                    let arc = storage.arc_new(&ctx, ElementType::CONST, hub, spoke);
                    assert!(arc.is_not_empty());
                    spokes.push(spoke);
                }
                // Alternate between tearing down the hub (cascade) and the
                // spokes (leaf removal).
                if round % 2 == 0 {
                    storage.free(&ctx, hub).unwrap();
                    for spoke in spokes {
                        storage.free(&ctx, spoke).unwrap();
                    }
                } else {
                    for spoke in spokes {
                        storage.free(&ctx, spoke).unwrap();
                    }
                    assert!(storage
                        .get_first_out_arc(&ctx, hub)
                        .unwrap()
                        .is_empty());
                    storage.free(&ctx, hub).unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let ctx = storage.context();
    let stat = storage.get_elements_stat(&ctx).unwrap();
    assert_eq!(stat.live_count(), 0, "all churned elements should be gone");
}

#[test]
fn randomized_churn_keeps_lists_consistent() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());

    const THREADS: u64 = 4;
    const OPS: usize = 300;

    let mut handles = Vec::new();
    for seed in 0..THREADS {
        let storage = Arc::clone(&storage);
        handles.push(std::thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            let ctx = storage.context();
            // Arcs only ever connect this thread's own elements, so the
            // cascades of concurrent frees never overlap across threads.
            let mut pool: Vec<Addr> = Vec::new();
            for _ in 0..OPS {
                match rng.gen_range(0..10u32) {
                    0..=3 => {
                        let node = storage.node_new(&ctx, ElementType::CONST);
                        assert!(node.is_not_empty());
                        pool.push(node);
                    }
                    4..=6 => {
                        if !pool.is_empty() {
                            let begin = pool[rng.gen_range(0..pool.len())];
                            let end = pool[rng.gen_range(0..pool.len())];
                            let arc = storage.arc_new(&ctx, ElementType::CONST, begin, end);
                            assert!(arc.is_not_empty());
                            pool.push(arc);
                        }
                    }
                    _ => {
                        if !pool.is_empty() {
                            let victim = pool[rng.gen_range(0..pool.len())];
                            storage.free(&ctx, victim).unwrap();
                            pool.retain(|addr| storage.is_element(&ctx, *addr));
                        }
                    }
                }
            }
            pool
        }));
    }

    let survivors: Vec<Vec<Addr>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Quiescent check: every surviving arc sits in both endpoint lists
    // exactly once.
    let ctx = storage.context();
    let mut live = 0u64;
    for pool in &survivors {
        for &el in pool {
            assert!(storage.is_element(&ctx, el));
            live += 1;
            let ty = storage.get_element_type(&ctx, el).unwrap();
            if !ty.is_arc() {
                continue;
            }
            let begin = storage.get_arc_begin(&ctx, el).unwrap();
            let end = storage.get_arc_end(&ctx, el).unwrap();
            let out_hits = out_list(&storage, &ctx, begin)
                .iter()
                .filter(|a| **a == el)
                .count();
            assert_eq!(out_hits, 1);
            let mut in_hits = 0;
            let mut cursor = storage.get_first_in_arc(&ctx, end).unwrap();
            while cursor.is_not_empty() {
                if cursor == el {
                    in_hits += 1;
                }
                cursor = storage.get_next_in_arc(&ctx, cursor).unwrap();
            }
            assert_eq!(in_hits, 1);
        }
    }
    let stat = storage.get_elements_stat(&ctx).unwrap();
    assert_eq!(stat.live_count(), live);
}

#[test]
fn disjoint_addresses_stay_stable_under_churn() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let setup = storage.context();

    let anchor = storage.node_new(&setup, ElementType::CONST | ElementType::CLASS);
    let anchor_ty = storage.get_element_type(&setup, anchor).unwrap();

    let churn = {
        let storage = Arc::clone(&storage);
        std::thread::spawn(move || {
            let ctx = storage.context();
            for _ in 0..500 {
                let a = storage.node_new(&ctx, ElementType::CONST);
                let b = storage.node_new(&ctx, ElementType::CONST);
                let _ = storage.arc_new(&ctx, ElementType::CONST, a, b);
                storage.free(&ctx, a).unwrap();
                storage.free(&ctx, b).unwrap();
            }
        })
    };

    for _ in 0..500 {
        assert!(storage.is_element(&setup, anchor));
        assert_eq!(storage.get_element_type(&setup, anchor).unwrap(), anchor_ty);
    }
    churn.join().unwrap();

    assert!(storage.is_element(&setup, anchor));
    assert_eq!(storage.get_element_type(&setup, anchor).unwrap(), anchor_ty);
}

#[test]
fn chained_cascades_tear_down_a_path() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    // A chain n0 -> n1 -> ... -> n49; freeing every other interior node
    // makes each cascade overlap the arcs of its neighbors.
    const CHAIN: usize = 50;
    let nodes: Vec<Addr> = (0..CHAIN)
        .map(|_| storage.node_new(&ctx, ElementType::CONST))
        .collect();
    for pair in nodes.windows(2) {
        let arc = storage.arc_new(&ctx, ElementType::CONST, pair[0], pair[1]);
        assert!(arc.is_not_empty());
    }

    for node in nodes.iter().skip(1).step_by(2) {
        storage.free(&ctx, *node).unwrap();
    }

    for (i, node) in nodes.iter().enumerate() {
        assert_eq!(storage.is_element(&ctx, *node), i % 2 == 0);
        if i % 2 == 0 {
            assert!(storage.get_first_out_arc(&ctx, *node).unwrap().is_empty());
            assert!(storage.get_first_in_arc(&ctx, *node).unwrap().is_empty());
        }
    }
    let stat = storage.get_elements_stat(&ctx).unwrap();
    assert_eq!(stat.node_count as usize, CHAIN / 2);
    assert_eq!(stat.arc_count, 0);
}
