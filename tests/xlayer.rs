use wps::xlayer::{CircularData, XlayerNode, XlayerPool, XlayerQueue};

#[test]
fn pool_hands_out_every_node_once() {
    let mut nodes = [XlayerNode::default(); 4];
    let mut pool = XlayerPool::new(&mut nodes);

    assert_eq!(pool.free_count(), 4);
    let mut taken = Vec::new();
    while let Some(node) = pool.get_free_node() {
        taken.push(node);
    }
    assert_eq!(taken.len(), 4);
    assert_eq!(pool.free_count(), 0);

    for node in taken {
        pool.free_node(node);
    }
    assert_eq!(pool.free_count(), 4);
}

#[test]
fn queue_enforces_its_size_bound() {
    let mut nodes = [XlayerNode::default(); 4];
    let mut pool = XlayerPool::new(&mut nodes);
    let mut queue = XlayerQueue::new(2);

    let a = pool.get_free_node().unwrap();
    let b = pool.get_free_node().unwrap();
    let c = pool.get_free_node().unwrap();

    assert!(queue.enqueue(&mut pool, a));
    assert!(queue.enqueue(&mut pool, b));
    assert!(!queue.enqueue(&mut pool, c));
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.free_space(), 0);
}

#[test]
fn queue_is_first_in_first_out() {
    let mut nodes = [XlayerNode::default(); 4];
    let mut pool = XlayerPool::new(&mut nodes);
    let mut queue = XlayerQueue::new(4);

    let a = pool.get_free_node().unwrap();
    let b = pool.get_free_node().unwrap();
    let c = pool.get_free_node().unwrap();
    for node in [a, b, c] {
        assert!(queue.enqueue(&mut pool, node));
    }

    assert_eq!(queue.front(), Some(a));
    assert_eq!(queue.dequeue(&mut pool), Some(a));
    assert_eq!(queue.dequeue(&mut pool), Some(b));
    assert_eq!(queue.dequeue(&mut pool), Some(c));
    assert_eq!(queue.dequeue(&mut pool), None);
    assert!(queue.is_empty());
}

#[test]
fn rx_pool_assigns_fixed_slots() {
    let mut nodes = [XlayerNode::default(); 3];
    let mut pool = XlayerPool::with_rx_slots(&mut nodes, 16);

    let a = pool.get_free_node().unwrap();
    let b = pool.get_free_node().unwrap();
    let offset_a = pool.frame(a).buffer_offset;
    let offset_b = pool.frame(b).buffer_offset;
    assert_ne!(offset_a, offset_b);
    assert_eq!(pool.frame(a).buffer_len, 16);

    // The slot survives free/reacquire.
    pool.free_node(a);
    let a2 = pool.get_free_node().unwrap();
    let _ = a2;
    assert_eq!(pool.frame(a).buffer_len, 16);
}

#[test]
fn arena_allocates_and_frees_in_fifo_order() {
    let mut storage = [0u8; 64];
    let mut arena = CircularData::new(&mut storage);

    let a = arena.allocate(16).unwrap();
    let b = arena.allocate(16).unwrap();
    let c = arena.allocate(16).unwrap();
    assert_eq!(arena.used(), 48);
    assert_eq!(a, 0);
    assert_eq!(b, 16);
    assert_eq!(c, 32);

    arena.free(a, 16);
    arena.free(b, 16);
    assert_eq!(arena.used(), 16);

    // Freed space is reusable, wrapping around the end.
    let d = arena.allocate(24).unwrap();
    assert_eq!(arena.used(), 40);
    arena.free(c, 16);
    arena.free(d, 24);
    assert_eq!(arena.used(), 0);
}

#[test]
fn arena_refuses_what_does_not_fit() {
    let mut storage = [0u8; 32];
    let mut arena = CircularData::new(&mut storage);

    let a = arena.allocate(24).unwrap();
    assert!(arena.allocate(16).is_none());
    arena.free(a, 24);
    assert!(arena.allocate(16).is_some());
}

#[test]
fn arena_undoes_the_most_recent_allocation() {
    let mut storage = [0u8; 32];
    let mut arena = CircularData::new(&mut storage);

    let a = arena.allocate(8).unwrap();
    let b = arena.allocate(8).unwrap();
    // The enqueue-failure path releases what it just reserved.
    arena.free(b, 8);
    assert_eq!(arena.used(), 8);
    let b2 = arena.allocate(8).unwrap();
    assert_eq!(b, b2);
    arena.free(b2, 8);
    arena.free(a, 8);
    assert_eq!(arena.used(), 0);
}

#[test]
fn arena_wraps_without_splitting_runs() {
    let mut storage = [0u8; 32];
    let mut arena = CircularData::new(&mut storage);

    let a = arena.allocate(12).unwrap();
    let b = arena.allocate(12).unwrap();
    arena.free(a, 12);
    // 8 bytes remain at the end; a 12-byte run must wrap to offset 0.
    let c = arena.allocate(12).unwrap();
    assert_eq!(c, 0);

    arena.free(b, 12);
    arena.free(c, 12);
    assert_eq!(arena.used(), 0);

    // The drained arena keeps serving contiguous runs.
    let d = arena.allocate(20).unwrap();
    arena.free(d, 20);
    assert_eq!(arena.used(), 0);
}
