mod common;

use common::*;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use synap_autodiscovery::{
    AutoServerPool, ClusterError, HashSlotLocatorFactory, Node, SocketPoolConfig,
};

fn pool(factory: Arc<MockFactory>) -> AutoServerPool {
    let config = SocketPoolConfig {
        dead_timeout_ms: 1_000,
        ..SocketPoolConfig::default()
    };
    AutoServerPool::new(config, factory, Arc::new(HashSlotLocatorFactory))
}

fn endpoints(nodes: &[Arc<dyn Node>]) -> HashSet<SocketAddr> {
    nodes.iter().map(|n| n.endpoint()).collect()
}

#[tokio::test]
async fn test_failed_node_leaves_rotation() {
    init_tracing();
    let factory = MockFactory::new(MockCluster::new("1.6.22"));
    let pool = pool(factory.clone());
    let mut failures = pool.subscribe_node_failures();
    pool.start(vec![addr(1), addr(2), addr(3)]).unwrap();

    factory.node(addr(2)).fail();
    assert_eq!(failures.recv().await.unwrap(), addr(2));

    assert_eq!(
        endpoints(&pool.working_nodes()),
        HashSet::from([addr(1), addr(3)])
    );
    for i in 0..500 {
        let node = pool.locate(&format!("key:{}", i)).unwrap();
        assert_ne!(node.endpoint(), addr(2));
    }

    // Still registered, waiting for resurrection
    assert_eq!(pool.registered_nodes().len(), 3);
    assert!(pool.is_resurrection_scheduled());
}

#[tokio::test]
async fn test_all_nodes_failed() {
    let factory = MockFactory::new(MockCluster::new("1.6.22"));
    let pool = pool(factory.clone());
    let mut failures = pool.subscribe_node_failures();
    pool.start(vec![addr(1)]).unwrap();

    factory.node(addr(1)).fail();
    failures.recv().await.unwrap();

    assert!(matches!(
        pool.locate("user:1"),
        Err(ClusterError::NoReachableNode)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_resurrection_timer() {
    let factory = MockFactory::new(MockCluster::new("1.6.22"));
    let pool = pool(factory.clone());
    let mut failures = pool.subscribe_node_failures();
    pool.start(vec![addr(1), addr(2)]).unwrap();

    let node = factory.node(addr(1));
    node.set_answers_ping(false);
    node.fail();
    failures.recv().await.unwrap();
    let before = pool.current_generation().unwrap().generation();

    // Ping fails: nothing published, timer re-armed
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(pool.current_generation().unwrap().generation(), before);
    assert!(pool.is_resurrection_scheduled());

    node.set_answers_ping(true);
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    assert_eq!(
        endpoints(&pool.working_nodes()),
        HashSet::from([addr(1), addr(2)])
    );
    assert!(pool.current_generation().unwrap().generation() > before);
    assert!(pool.dead_nodes().is_empty());
    assert!(!pool.is_resurrection_scheduled());
}

#[tokio::test]
async fn test_generations_increase() {
    let factory = MockFactory::new(MockCluster::new("1.6.22"));
    let pool = pool(factory);
    pool.start(vec![addr(1)]).unwrap();

    let mut last = pool.current_generation().unwrap().generation();
    for i in 2..6 {
        pool.update_locator(vec![addr(1), addr(i)]).unwrap();
        let generation = pool.current_generation().unwrap().generation();
        assert!(generation > last);
        last = generation;
    }
}

#[tokio::test]
async fn test_removed_nodes_disposed_exactly_once() {
    let factory = MockFactory::new(MockCluster::new("1.6.22"));
    let pool = pool(factory.clone());
    pool.start(vec![addr(1), addr(2)]).unwrap();

    pool.update_locator(vec![addr(2), addr(3)]).unwrap();
    pool.update_locator(vec![addr(3)]).unwrap();
    pool.update_locator(vec![addr(3), addr(1)]).unwrap();

    // The first 10.0.0.1 node was retired; a fresh one replaced it
    assert_eq!(factory.created().len(), 4);
    pool.update_locator(Vec::new()).unwrap();
    assert!(pool.working_nodes().is_empty());

    pool.shutdown();
    pool.shutdown();
    for node in factory.created() {
        assert_eq!(node.dispose_count(), 1, "{}", node.endpoint());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_torn_reads_during_updates() {
    let factory = MockFactory::new(MockCluster::new("1.6.22"));
    let pool = pool(factory);
    let first = vec![addr(1), addr(2)];
    let second = vec![addr(3), addr(4), addr(5)];
    pool.start(first.clone()).unwrap();

    let first_set: HashSet<SocketAddr> = first.iter().copied().collect();
    let second_set: HashSet<SocketAddr> = second.iter().copied().collect();

    let mut readers = Vec::new();
    for reader in 0..4 {
        let pool = pool.clone();
        let (first_set, second_set) = (first_set.clone(), second_set.clone());
        readers.push(tokio::spawn(async move {
            for i in 0..2_000 {
                let generation = pool.current_generation().unwrap();
                let working = endpoints(&generation.working_nodes());
                assert!(working == first_set || working == second_set);

                let node = generation.locate(&format!("{}:{}", reader, i)).unwrap();
                assert!(working.contains(&node.endpoint()));
                tokio::task::yield_now().await;
            }
        }));
    }

    for round in 0..200 {
        let next = if round % 2 == 0 { &second } else { &first };
        pool.update_locator(next.clone()).unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
}
