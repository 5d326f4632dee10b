use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;

use streamlink_core::{DiscoveryEvent, PeerStatus};
use streamlink_services::PeerChange;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Peer discovery across nodes
// ══════════════════════════════════════════════════════════════════════════════

/// appeared("bob") then resolved("bob", ...) yields one online record.
#[tokio::test(start_paused = true)]
async fn appeared_then_resolved_builds_one_record() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let mut changes = alice.registry().subscribe();
    assert!(alice.coordinator.start_discovery());

    link.emit(SERVICE_TYPE, DiscoveryEvent::Appeared { name: "bob".into() });
    link.emit(
        SERVICE_TYPE,
        DiscoveryEvent::Resolved {
            name: "bob".into(),
            address: "10.0.0.5".into(),
            port: 8080,
            attributes: BTreeMap::from([("username".to_string(), "bob".to_string())]),
        },
    );

    let change = next_change(&mut changes).await?;
    assert!(matches!(change, PeerChange::Added(ref p) if p.name == "bob"));

    let peers = alice.registry().snapshot();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].name, "bob");
    assert_eq!(peers[0].status, PeerStatus::Online);
    assert_eq!(peers[0].address.to_string(), "10.0.0.5");
    assert_eq!(link.resolution_requests(), vec!["bob"]);

    alice.coordinator.shutdown().await;
    Ok(())
}

/// Two nodes on one link find each other and never list themselves.
#[tokio::test(start_paused = true)]
async fn nodes_discover_each_other() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let bob = node(&link, "bob");
    alice.coordinator.start_discovery();
    bob.coordinator.start_discovery();

    let (a, b) = tokio::join!(
        alice.coordinator.announce(alice.descriptor()),
        bob.coordinator.announce(bob.descriptor()),
    );
    assert!(a && b);

    wait_for("both registries to converge", || {
        alice.registry().len() == 1 && bob.registry().len() == 1
    })
    .await?;

    let seen_by_alice = alice.registry().get("bob").expect("alice sees bob");
    assert_eq!(seen_by_alice.username(), "bob");
    assert_eq!(seen_by_alice.port, 8080);
    assert!(alice.registry().get("alice").is_none());
    assert!(bob.registry().get("alice").is_some());

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    Ok(())
}

/// Repeated `start_discovery` must not double up notifications.
#[tokio::test(start_paused = true)]
async fn repeated_start_delivers_each_change_once() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let bob = node(&link, "bob");
    assert!(alice.coordinator.start_discovery());
    assert!(alice.coordinator.start_discovery());
    assert_eq!(link.subscriber_count(SERVICE_TYPE), 1);

    let mut changes = alice.registry().subscribe();
    assert!(bob.coordinator.announce(bob.descriptor()).await);
    assert!(matches!(next_change(&mut changes).await?, PeerChange::Added(_)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(changes.try_recv().is_err(), "duplicate change delivered");
    assert_eq!(link.resolution_requests(), vec!["bob"]);

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    Ok(())
}

/// A peer changing status is an update, not a second record.
#[tokio::test(start_paused = true)]
async fn status_change_updates_in_place() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let bob = node(&link, "bob");
    alice.coordinator.start_discovery();
    let mut changes = alice.registry().subscribe();

    assert!(bob.coordinator.announce(bob.descriptor()).await);
    assert!(matches!(next_change(&mut changes).await?, PeerChange::Added(_)));

    let streaming = descriptor("bob").with_attribute("status", "streaming");
    assert!(bob.coordinator.announce(streaming).await);
    let change = next_change(&mut changes).await?;
    assert!(
        matches!(change, PeerChange::Updated(ref p) if p.status == PeerStatus::Streaming),
        "unexpected change: {change:?}"
    );
    assert_eq!(alice.registry().len(), 1);

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    Ok(())
}

/// A peer shutting down disappears from everyone else's registry.
#[tokio::test(start_paused = true)]
async fn departing_peer_is_removed() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let bob = node(&link, "bob");
    alice.coordinator.start_discovery();
    let mut changes = alice.registry().subscribe();

    assert!(bob.coordinator.announce(bob.descriptor()).await);
    assert!(matches!(next_change(&mut changes).await?, PeerChange::Added(_)));

    bob.coordinator.shutdown().await;
    let change = next_change(&mut changes).await?;
    assert!(matches!(change, PeerChange::Removed(ref n) if n == "bob"));
    assert!(alice.registry().is_empty());

    alice.coordinator.shutdown().await;
    Ok(())
}

/// Out-of-order and malformed traffic converges on the last good resolution.
#[tokio::test(start_paused = true)]
async fn noisy_event_stream_converges() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    alice.coordinator.start_discovery();

    let resolved = |address: &str, port: u16| DiscoveryEvent::Resolved {
        name: "carol".into(),
        address: address.into(),
        port,
        attributes: BTreeMap::new(),
    };
    link.emit(SERVICE_TYPE, DiscoveryEvent::Removed { name: "carol".into() });
    link.emit(SERVICE_TYPE, resolved("10.0.0.7", 7000));
    link.emit(SERVICE_TYPE, DiscoveryEvent::Appeared { name: "carol".into() });
    link.emit(SERVICE_TYPE, resolved("", 7001));
    link.emit(SERVICE_TYPE, DiscoveryEvent::Appeared { name: String::new() });
    link.emit(SERVICE_TYPE, resolved("10.0.0.8", 7002));

    wait_for("carol at her last address", || {
        alice
            .registry()
            .get("carol")
            .is_some_and(|p| p.port == 7002)
    })
    .await?;
    let carol = alice.registry().get("carol").expect("carol present");
    assert_eq!(carol.address.to_string(), "10.0.0.8");
    assert_eq!(alice.registry().len(), 1);

    alice.coordinator.shutdown().await;
    Ok(())
}
