//! Convergence and link-loss scenarios.

use crate::infra::TestHub;
use crate::*;

/// Two nodes find each other through the hub; when one goes away the other
/// drops it because its link closed.
#[tokio::test(flavor = "multi_thread")]
async fn test_two_nodes_converge_and_part() {
    let hub = TestHub::start().await;

    let p1 = start_node(&hub.endpoint()).await;
    assert!(p1.registry().is_empty(), "first node sees an empty mesh");

    let p2 = start_node(&hub.endpoint()).await;

    wait_until("p1 and p2 linked both ways", || {
        converged(&p1, &[&p2]) && converged(&p2, &[&p1])
    })
    .await;

    let p2_registry = p2.registry().clone();
    p2.shutdown().await;
    assert!(p2_registry.is_empty(), "shutdown clears the registry");

    wait_until("p1 drops p2", || p1.registry().is_empty()).await;
    assert_eq!(p1.links().len(), 0);

    p1.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_three_nodes_converge() {
    let hub = TestHub::start().await;

    let a = start_node(&hub.endpoint()).await;
    let b = start_node(&hub.endpoint()).await;
    let c = start_node(&hub.endpoint()).await;

    wait_until("full mesh of three", || {
        converged(&a, &[&b, &c]) && converged(&b, &[&a, &c]) && converged(&c, &[&a, &b])
    })
    .await;
    assert_eq!(hub.members().len(), 3);

    for node in [a, b, c] {
        node.shutdown().await;
    }
    wait_until("hub forgets everyone", || hub.members().is_empty()).await;
}

/// Closing a link locally removes the peer on this side only: the other
/// node's own outbound link is unaffected.
#[tokio::test(flavor = "multi_thread")]
async fn test_local_link_close_is_one_sided() {
    let hub = TestHub::start().await;
    let p1 = start_node(&hub.endpoint()).await;
    let p2 = start_node(&hub.endpoint()).await;

    wait_until("p1 and p2 linked both ways", || {
        converged(&p1, &[&p2]) && converged(&p2, &[&p1])
    })
    .await;

    assert!(p1.links().close(&p2.local().id).await);
    assert!(!p1.registry().contains(&p2.local().id));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(converged(&p2, &[&p1]), "p2 keeps its own link to p1");

    p1.shutdown().await;
    p2.shutdown().await;
}

/// A `Left` broadcast alone does not drop a linked member.
#[tokio::test(flavor = "multi_thread")]
async fn test_leave_broadcast_is_informational() {
    let hub = TestHub::start().await;
    let p1 = start_node(&hub.endpoint()).await;
    let p2 = start_node(&hub.endpoint()).await;

    wait_until("p1 linked to p2", || converged(&p1, &[&p2])).await;

    // impersonate p2 on a second hub connection and leave with its id
    let mut imposter = crate::infra::announce(&hub.endpoint(), p2.local()).await;
    mesh_services::framing::write_frame(
        imposter.get_mut(),
        &mesh_core::wire::ClientFrame::Leave {
            server: p2.local().clone(),
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(converged(&p1, &[&p2]), "p1 keeps p2 while the link is up");

    drop(imposter);
    p1.shutdown().await;
    p2.shutdown().await;
}
