//! Integration tests for the component coordinator.
//!
//! Coordinators are exercised both against a hand-driven network status key
//! and against a live reconciler that owns it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use trellis_id::Address;
use trellis_manager::cluster::{ClusterStore, LocalCluster};
use trellis_manager::config::Config;
use trellis_manager::reconciler::PassKind;
use trellis_manager::{ComponentCoordinator, CoordinatorError, ManagerSupervisor};
use trellis_topology::{ComponentDescriptor, DeploymentSpec, NetworkDescriptor};

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

fn network(instances: u32) -> NetworkDescriptor {
    let address = addr("n");
    let mut network = NetworkDescriptor::new("n", address.clone());
    let component = ComponentDescriptor::new(
        &address,
        "c",
        DeploymentSpec::Service { main: "c.rs".into() },
        instances,
    )
    .unwrap();
    network.insert_component(component);
    network
}

/// Store holding the descriptor of `n.c-1`, as the reconciler would leave it.
async fn cluster_with_instance() -> Arc<LocalCluster> {
    let cluster = Arc::new(LocalCluster::new());
    let instance = network(1).instances().next().cloned().unwrap();
    cluster
        .set(&instance.address, instance.to_json().unwrap())
        .await
        .unwrap();
    cluster
}

fn coordinator(cluster: &Arc<LocalCluster>, instance: &str) -> ComponentCoordinator<LocalCluster> {
    ComponentCoordinator::new(Arc::clone(cluster), addr(instance), addr("n.__status"))
}

async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "counter stuck at {}, expected {}",
        counter.load(Ordering::SeqCst),
        expected
    );
}

#[tokio::test]
async fn test_start_requires_descriptor() {
    let cluster = Arc::new(LocalCluster::new());
    let mut coordinator = coordinator(&cluster, "n.c-1");

    let err = coordinator.start().await.unwrap_err();
    assert!(matches!(err, CoordinatorError::MissingDescriptor(a) if a == addr("n.c-1")));
    assert!(!coordinator.is_started());
    assert!(!cluster.keys().contains(&addr("n.c-1.__status")));
}

#[tokio::test]
async fn test_start_rejects_invalid_descriptor() {
    let cluster = Arc::new(LocalCluster::new());
    cluster.set(&addr("n.c-1"), "garbage".to_string()).await.unwrap();
    let mut coordinator = coordinator(&cluster, "n.c-1");

    let err = coordinator.start().await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidDescriptor(_)));
}

#[tokio::test]
async fn test_start_waits_for_network_ready() {
    let cluster = cluster_with_instance().await;
    let mut coordinator = coordinator(&cluster, "n.c-1");

    let started = tokio::spawn(async move {
        let descriptor = coordinator.start().await;
        (coordinator, descriptor)
    });

    // Own readiness is signalled before the network is ready.
    for _ in 0..200 {
        if cluster.keys().contains(&addr("n.c-1.__status")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cluster.keys().contains(&addr("n.c-1.__status")));
    assert!(!started.is_finished());

    cluster.set(&addr("n.__status"), "true".to_string()).await.unwrap();
    let (coordinator, descriptor) = tokio::time::timeout(Duration::from_secs(5), started)
        .await
        .expect("start did not resolve")
        .unwrap();

    let descriptor = descriptor.unwrap();
    assert_eq!(descriptor.address, addr("n.c-1"));
    assert_eq!(descriptor.component, "c");
    assert!(coordinator.is_started());
}

#[tokio::test]
async fn test_start_resolves_when_network_already_ready() {
    let cluster = cluster_with_instance().await;
    cluster.set(&addr("n.__status"), "true".to_string()).await.unwrap();
    let mut coordinator = coordinator(&cluster, "n.c-1");

    let descriptor = tokio::time::timeout(Duration::from_secs(5), coordinator.start())
        .await
        .expect("start did not resolve")
        .unwrap();
    assert_eq!(descriptor.number, 1);

    assert!(matches!(
        coordinator.start().await,
        Err(CoordinatorError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn test_pause_and_resume_callbacks_follow_network() {
    let cluster = cluster_with_instance().await;
    cluster.set(&addr("n.__status"), "true".to_string()).await.unwrap();
    let mut coordinator = coordinator(&cluster, "n.c-1");

    let paused = Arc::new(AtomicUsize::new(0));
    let resumed = Arc::new(AtomicUsize::new(0));
    coordinator.on_pause({
        let paused = Arc::clone(&paused);
        move || {
            paused.fetch_add(1, Ordering::SeqCst);
        }
    });
    coordinator.on_resume({
        let resumed = Arc::clone(&resumed);
        move || {
            resumed.fetch_add(1, Ordering::SeqCst);
        }
    });
    coordinator.start().await.unwrap();

    cluster.delete(&addr("n.__status")).await.unwrap();
    wait_for(&paused, 1).await;
    assert_eq!(resumed.load(Ordering::SeqCst), 0);

    cluster.set(&addr("n.__status"), "true".to_string()).await.unwrap();
    wait_for(&resumed, 1).await;

    // Rewriting a present key is not a transition.
    cluster.set(&addr("n.__status"), "true".to_string()).await.unwrap();
    cluster.delete(&addr("n.__status")).await.unwrap();
    wait_for(&paused, 2).await;
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_own_status_toggles() {
    let cluster = cluster_with_instance().await;
    cluster.set(&addr("n.__status"), "true".to_string()).await.unwrap();
    let mut coordinator = coordinator(&cluster, "n.c-1");
    coordinator.start().await.unwrap();
    let status = addr("n.c-1.__status");

    coordinator.pause().await.unwrap();
    assert!(!cluster.keys().contains(&status));

    coordinator.resume().await.unwrap();
    assert!(cluster.keys().contains(&status));

    coordinator.stop().await.unwrap();
    assert!(!cluster.keys().contains(&status));
    assert!(!coordinator.is_started());
    assert_eq!(cluster.watcher_count(&addr("n.__status")), 0);
}

#[tokio::test]
async fn test_coordinators_start_against_reconciler() {
    let cluster = Arc::new(LocalCluster::new());
    let (_shutdown, shutdown_rx) = watch::channel(false);
    let config = Config {
        networks: vec![addr("n")],
        cluster: "test".to_string(),
        stage_timeout: Duration::from_secs(5),
        mailbox_size: 64,
        log_level: "debug".to_string(),
        topology_file: None,
    };
    let mut supervisor = ManagerSupervisor::new(&config, Arc::clone(&cluster), shutdown_rx);
    supervisor.start(&config.networks).unwrap();
    supervisor.wait_started().await.unwrap();

    let handle = supervisor.reconciler(&addr("n")).cloned().unwrap();
    let mut outcomes = handle.subscribe();
    cluster
        .set(&addr("n"), network(2).to_json().unwrap())
        .await
        .unwrap();
    let created = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let outcome = outcomes.recv().await.unwrap();
            if outcome.kind == PassKind::Create {
                return outcome;
            }
        }
    })
    .await
    .expect("create pass did not complete");
    assert_eq!(created.result, Ok(()));

    // Neither resolves until both have signalled.
    let mut first = coordinator(&cluster, "n.c-1");
    let mut second = coordinator(&cluster, "n.c-2");
    let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(first.start(), second.start())
    })
    .await
    .expect("coordinators did not start");
    assert_eq!(first.unwrap().number, 1);
    assert_eq!(second.unwrap().number, 2);
    assert!(cluster.keys().contains(&addr("n.__status")));

    supervisor.shutdown().await;
}
