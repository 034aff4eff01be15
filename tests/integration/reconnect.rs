//! Rendezvous outage and resync.

use std::time::Duration;

use crate::infra::TestHub;
use crate::*;

/// Peer links survive the hub going away. After the hub comes back every
/// node rejoins and learns, from the fresh snapshot, about a node whose
/// `Joined` broadcast it never saw.
#[tokio::test(flavor = "multi_thread")]
async fn test_hub_restart_resyncs_membership() {
    let hub = TestHub::start().await;
    let p1 = start_node(&hub.endpoint()).await;
    let p2 = start_node(&hub.endpoint()).await;

    wait_until("p1 and p2 linked both ways", || {
        converged(&p1, &[&p2]) && converged(&p2, &[&p1])
    })
    .await;

    let addr = hub.stop().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(converged(&p1, &[&p2]), "links outlive the hub");
    assert!(converged(&p2, &[&p1]), "links outlive the hub");

    // p3 joins the restarted hub before p1 and p2 have reconnected
    let hub = TestHub::start_on(addr).await;
    let p3 = start_node(&hub.endpoint()).await;

    wait_until("full mesh of three after resync", || {
        converged(&p1, &[&p2, &p3]) && converged(&p2, &[&p1, &p3]) && converged(&p3, &[&p1, &p2])
    })
    .await;
    wait_until("hub knows all three again", || hub.members().len() == 3).await;

    // resync did not disturb the link that was already up
    assert_eq!(p1.links().len(), 2);
    assert_eq!(p2.links().len(), 2);

    for node in [p1, p2, p3] {
        node.shutdown().await;
    }
}

/// While the hub is down nothing is learned and nothing is lost.
#[tokio::test(flavor = "multi_thread")]
async fn test_membership_stable_while_hub_down() {
    let hub = TestHub::start().await;
    let p1 = start_node(&hub.endpoint()).await;
    let p2 = start_node(&hub.endpoint()).await;

    wait_until("p1 linked to p2", || converged(&p1, &[&p2])).await;

    let _addr = hub.stop().await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(converged(&p1, &[&p2]));
    assert!(converged(&p2, &[&p1]));

    // shutdown still completes without a hub to say goodbye to
    tokio::time::timeout(Duration::from_secs(5), async {
        p1.shutdown().await;
        p2.shutdown().await;
    })
    .await
    .expect("shutdown without a hub");
}
