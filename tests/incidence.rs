//! End-to-end checks of connector splicing and cascading removal.

use semagraph::{Addr, ElementType, MemoryContext, Storage, StoreConfig};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Storage {
    Storage::initialize(StoreConfig::new(dir)).unwrap()
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

fn in_list(storage: &Storage, ctx: &MemoryContext, node: Addr) -> Vec<Addr> {
    let mut list = Vec::new();
    let mut cursor = storage.get_first_in_arc(ctx, node).unwrap();
    while cursor.is_not_empty() {
        list.push(cursor);
        cursor = storage.get_next_in_arc(ctx, cursor).unwrap();
    }
    list
}

/// prev/next pointers of both lists of `node` must mirror each other.
fn assert_lists_consistent(storage: &Storage, ctx: &MemoryContext, node: Addr) {
    let out = out_list(storage, ctx, node);
    for (i, &arc) in out.iter().enumerate() {
        let prev = storage.get_prev_out_arc(ctx, arc).unwrap();
        if i == 0 {
            assert!(prev.is_empty(), "head of out-list has a predecessor");
        } else {
            assert_eq!(prev, out[i - 1]);
        }
        assert_eq!(storage.get_arc_begin(ctx, arc).unwrap(), node);
    }
    let inn = in_list(storage, ctx, node);
    for (i, &arc) in inn.iter().enumerate() {
        let prev = storage.get_prev_in_arc(ctx, arc).unwrap();
        if i == 0 {
            assert!(prev.is_empty(), "head of in-list has a predecessor");
        } else {
            assert_eq!(prev, inn[i - 1]);
        }
        assert_eq!(storage.get_arc_end(ctx, arc).unwrap(), node);
    }
}

#[test]
fn new_arc_links_endpoints() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let n1 = storage.node_new(&ctx, ElementType::CONST);
    let n2 = storage.node_new(&ctx, ElementType::CONST);
    let arc = storage.arc_new(&ctx, ElementType::CONST, n1, n2);

    assert_eq!(storage.get_arc_begin(&ctx, arc).unwrap(), n1);
    assert_eq!(storage.get_arc_end(&ctx, arc).unwrap(), n2);
    assert_eq!(storage.get_first_out_arc(&ctx, n1).unwrap(), arc);
    assert_eq!(storage.get_first_in_arc(&ctx, n2).unwrap(), arc);
    assert!(storage.get_first_in_arc(&ctx, n1).unwrap().is_empty());
    assert!(storage.get_first_out_arc(&ctx, n2).unwrap().is_empty());
}

#[test]
fn arcs_splice_at_the_head() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let n1 = storage.node_new(&ctx, ElementType::CONST);
    let n2 = storage.node_new(&ctx, ElementType::CONST);
    let a1 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    let a2 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    let a3 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);

    assert_eq!(storage.get_first_out_arc(&ctx, n1).unwrap(), a3);
    assert_eq!(out_list(&storage, &ctx, n1), vec![a3, a2, a1]);
    assert_eq!(in_list(&storage, &ctx, n2), vec![a3, a2, a1]);
    assert_lists_consistent(&storage, &ctx, n1);
    assert_lists_consistent(&storage, &ctx, n2);
}

#[test]
fn freeing_a_middle_arc_relinks_siblings() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let n1 = storage.node_new(&ctx, ElementType::CONST);
    let n2 = storage.node_new(&ctx, ElementType::CONST);
    let a1 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    let a2 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    let a3 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);

    storage.free(&ctx, a2).unwrap();
    assert!(!storage.is_element(&ctx, a2));

    assert_eq!(out_list(&storage, &ctx, n1), vec![a3, a1]);
    assert_eq!(storage.get_next_out_arc(&ctx, a3).unwrap(), a1);
    assert_eq!(storage.get_prev_out_arc(&ctx, a1).unwrap(), a3);
    assert_eq!(in_list(&storage, &ctx, n2), vec![a3, a1]);
    assert_lists_consistent(&storage, &ctx, n1);
    assert_lists_consistent(&storage, &ctx, n2);
}

#[test]
fn freeing_head_and_tail_arcs_keeps_lists_consistent() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let n1 = storage.node_new(&ctx, ElementType::CONST);
    let n2 = storage.node_new(&ctx, ElementType::CONST);
    let a1 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    let a2 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    let a3 = storage.arc_new(&ctx, ElementType::CONST, n1, n2);

    storage.free(&ctx, a3).unwrap();
    assert_eq!(out_list(&storage, &ctx, n1), vec![a2, a1]);
    assert!(storage.get_prev_out_arc(&ctx, a2).unwrap().is_empty());

    storage.free(&ctx, a1).unwrap();
    assert_eq!(out_list(&storage, &ctx, n1), vec![a2]);
    assert!(storage.get_next_out_arc(&ctx, a2).unwrap().is_empty());
    assert_lists_consistent(&storage, &ctx, n1);
    assert_lists_consistent(&storage, &ctx, n2);
}

#[test]
fn freeing_a_node_cascades_to_incident_arcs() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let n1 = storage.node_new(&ctx, ElementType::CONST);
    let n2 = storage.node_new(&ctx, ElementType::CONST);
    let arc = storage.arc_new(&ctx, ElementType::CONST, n1, n2);

    storage.free(&ctx, n1).unwrap();
    assert!(!storage.is_element(&ctx, n1));
    assert!(!storage.is_element(&ctx, arc));
    assert!(storage.is_element(&ctx, n2));
    assert!(storage.get_first_in_arc(&ctx, n2).unwrap().is_empty());
}

#[test]
fn cascade_spans_connectors_on_connectors() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let n1 = storage.node_new(&ctx, ElementType::CONST);
    let n2 = storage.node_new(&ctx, ElementType::CONST);
    let marker = storage.node_new(&ctx, ElementType::CONST | ElementType::CLASS);
    let base = storage.arc_new(&ctx, ElementType::CONST, n1, n2);
    // An access arc attached to another connector.
    let meta = storage.arc_new(
        &ctx,
        ElementType::ARC_ACCESS | ElementType::CONST | ElementType::POS,
        marker,
        base,
    );

    storage.free(&ctx, n1).unwrap();
    assert!(!storage.is_element(&ctx, base));
    assert!(!storage.is_element(&ctx, meta));
    assert!(storage.is_element(&ctx, marker));
    assert!(storage.get_first_out_arc(&ctx, marker).unwrap().is_empty());
    assert!(storage.is_element(&ctx, n2));
}

#[test]
fn fan_out_cascade_clears_every_incident_arc() {
    let dir = tempdir().unwrap();
    let storage = open(dir.path());
    let ctx = storage.context();

    let hub = storage.node_new(&ctx, ElementType::CONST);
    let mut spokes = Vec::new();
    let mut arcs = Vec::new();
    for i in 0..24 {
        let spoke = storage.node_new(&ctx, ElementType::CONST);
        let arc = if i % 2 == 0 {
            storage.arc_new(&ctx, ElementType::CONST, hub, spoke)
        } else {
            storage.arc_new(&ctx, ElementType::CONST, spoke, hub)
        };
        spokes.push(spoke);
        arcs.push(arc);
    }

    storage.free(&ctx, hub).unwrap();
    for arc in arcs {
        assert!(!storage.is_element(&ctx, arc));
    }
    for spoke in spokes {
        assert!(storage.is_element(&ctx, spoke));
        assert!(storage.get_first_out_arc(&ctx, spoke).unwrap().is_empty());
        assert!(storage.get_first_in_arc(&ctx, spoke).unwrap().is_empty());
    }

    let stat = storage.get_elements_stat(&ctx).unwrap();
    assert_eq!(stat.arc_count, 0);
    assert_eq!(stat.node_count, 24);
}
