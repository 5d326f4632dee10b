use std::time::Duration;

use anyhow::Result;

use streamlink_services::{RegistrationPolicy, RegistrationState};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Announcement lifecycle
// ══════════════════════════════════════════════════════════════════════════════

/// A healthy link publishes on the first try.
#[tokio::test(start_paused = true)]
async fn register_on_healthy_link() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");

    assert!(alice.coordinator.announce(alice.descriptor()).await);
    assert!(alice.coordinator.is_registered());
    assert_eq!(link.publish_calls(), 1);
    assert!(link.is_active(SERVICE_TYPE, "alice"));

    alice.coordinator.shutdown().await;
    Ok(())
}

/// Two transient failures are absorbed by the retry budget.
#[tokio::test(start_paused = true)]
async fn register_recovers_from_two_failures() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    link.fail_next_publishes(2);

    assert!(alice.coordinator.announce(alice.descriptor()).await);
    assert_eq!(link.publish_calls(), 3);
    assert_eq!(alice.registration().retry_count(), 2);
    assert!(alice.coordinator.is_registered());

    alice.coordinator.shutdown().await;
    Ok(())
}

/// A dead link exhausts the budget; discovery of others keeps working.
#[tokio::test(start_paused = true)]
async fn register_gives_up_but_discovery_continues() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let bob = node(&link, "bob");
    assert!(alice.coordinator.start_discovery());

    link.fail_all_publishes(true);
    assert!(!alice.coordinator.announce(alice.descriptor()).await);
    assert_eq!(link.publish_calls(), 3);
    assert!(!alice.coordinator.is_registered());
    assert_eq!(alice.registration().state(), RegistrationState::Unpublished);
    assert!(alice.registration().current_descriptor().is_none());

    link.fail_all_publishes(false);
    let mut changes = alice.registry().subscribe();
    assert!(bob.coordinator.announce(bob.descriptor()).await);
    let change = next_change(&mut changes).await?;
    assert!(matches!(change, PeerChange::Added(p) if p.name == "bob"));

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    Ok(())
}

/// A second caller is turned away while the first is still settling.
#[tokio::test(start_paused = true)]
async fn concurrent_register_admits_one_attempt() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    let registration = alice.registration();

    let (first, second) = tokio::join!(
        registration.register(alice.descriptor()),
        registration.register(alice.descriptor()),
    );

    assert_ne!(first, second);
    assert!(registration.is_registered());
    assert_eq!(link.publish_calls(), 1);

    alice.coordinator.shutdown().await;
    Ok(())
}

/// The health monitor heals an announcement the network forgot.
#[tokio::test(start_paused = true)]
async fn monitor_republishes_lost_announcement() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");

    assert!(alice.coordinator.announce(alice.descriptor()).await);
    assert!(alice.registration().is_monitoring());
    assert!(link.drop_announcement(SERVICE_TYPE, "alice"));

    wait_for("announcement to be restored", || {
        link.is_active(SERVICE_TYPE, "alice")
    })
    .await?;
    assert_eq!(link.publish_calls(), 2);
    assert!(alice.coordinator.is_registered());

    alice.coordinator.shutdown().await;
    Ok(())
}

/// Query failures are logged and the monitor keeps ticking.
#[tokio::test(start_paused = true)]
async fn monitor_survives_query_failures() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    assert!(alice.coordinator.announce(alice.descriptor()).await);

    link.fail_lists(true);
    let before = link.list_calls();
    wait_for("several failed health checks", || link.list_calls() >= before + 3).await?;
    assert!(alice.registration().is_monitoring());
    assert!(alice.coordinator.is_registered());
    assert_eq!(link.publish_calls(), 1);

    link.fail_lists(false);
    link.drop_announcement(SERVICE_TYPE, "alice");
    wait_for("announcement to be restored", || {
        link.is_active(SERVICE_TYPE, "alice")
    })
    .await?;

    alice.coordinator.shutdown().await;
    Ok(())
}

/// A failed heal leaves the node unpublished until the next `register()`.
#[tokio::test(start_paused = true)]
async fn failed_heal_leaves_node_unpublished() -> Result<()> {
    let link = link();
    let policy = RegistrationPolicy {
        monitor_interval: Duration::from_millis(500),
        ..RegistrationPolicy::default()
    };
    let alice = node_with_policy(&link, "alice", policy);
    assert!(alice.coordinator.announce(alice.descriptor()).await);

    link.fail_all_publishes(true);
    link.drop_announcement(SERVICE_TYPE, "alice");
    wait_for("heal attempt", || link.publish_calls() == 2).await?;
    wait_for("state to settle", || {
        alice.registration().state() == RegistrationState::Unpublished
    })
    .await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(link.publish_calls(), 2, "monitor must not retry an unpublished node");

    link.fail_all_publishes(false);
    assert!(alice.coordinator.announce(alice.descriptor()).await);
    assert!(link.is_active(SERVICE_TYPE, "alice"));

    alice.coordinator.shutdown().await;
    Ok(())
}

/// Re-announcing under a new name retracts the old record.
#[tokio::test(start_paused = true)]
async fn rename_retracts_previous_announcement() -> Result<()> {
    let link = link();
    let alice = node(&link, "alice");
    assert!(alice.coordinator.announce(descriptor("alice")).await);

    assert!(alice.coordinator.announce(descriptor("alice-studio")).await);
    assert!(!link.is_active(SERVICE_TYPE, "alice"));
    assert!(link.is_active(SERVICE_TYPE, "alice-studio"));
    assert_eq!(
        alice
            .registration()
            .current_descriptor()
            .map(|d| d.instance_name().to_string()),
        Some("alice-studio".to_string())
    );

    alice.coordinator.shutdown().await;
    assert!(!link.is_active(SERVICE_TYPE, "alice-studio"));
    Ok(())
}
