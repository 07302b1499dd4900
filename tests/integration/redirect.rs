//! Degree-bound and redirect protocol tests.

use std::collections::HashSet;
use std::net::SocketAddr;

use anyhow::Result;

use cairn_core::wire::{PeerControl, ACCEPTED_LINE};
use cairn_services::{initiator, new_neighbor_table, PeerNode};

use crate::{dead_endpoint, wait_until, TestClient};

const HOP_LIMIT: u32 = 8;

async fn listener_only_node() -> Result<PeerNode> {
    let registry = dead_endpoint().await?;
    PeerNode::start(registry, "127.0.0.1:0".parse().unwrap(), HOP_LIMIT).await
}

/// A node at capacity answers a fourth join with exactly one redirect
/// naming one of its current neighbors, and never mutates its own map.
#[tokio::test]
async fn full_node_redirects_fourth_join() -> Result<()> {
    let node = listener_only_node().await?;

    let mut admitted = Vec::new();
    for _ in 0..3 {
        let mut client = TestClient::connect(node.local_endpoint()).await?;
        assert_eq!(client.recv().await?.as_deref(), Some(ACCEPTED_LINE));
        admitted.push(client);
    }
    assert!(wait_until(|| node.neighbors().len() == 3).await);
    let before: HashSet<SocketAddr> = node.neighbors().list().into_iter().collect();

    // inbound neighbors are keyed by their connection-origin address
    let origins: HashSet<SocketAddr> = admitted.iter().map(|c| c.local).collect();
    assert_eq!(before, origins);

    let mut fourth = TestClient::connect(node.local_endpoint()).await?;
    let line = fourth.recv().await?.expect("full node should answer");
    match PeerControl::parse(&line)? {
        PeerControl::Redirect(target) => {
            assert!(
                before.contains(&target),
                "redirect target {target} is not one of the current neighbors {before:?}"
            );
        }
        other => panic!("expected a redirect, got {other:?}"),
    }
    // the stream is closed after the redirect
    assert_eq!(fourth.recv().await?, None);

    let after: HashSet<SocketAddr> = node.neighbors().list().into_iter().collect();
    assert_eq!(before, after);
    Ok(())
}

/// A redirected joiner follows the redirect, lands on the named neighbor,
/// and ends with exactly one connection — never one to the original
/// target as well.
#[tokio::test]
async fn redirected_joiner_lands_on_named_neighbor() -> Result<()> {
    let hub = listener_only_node().await?;
    let mut spokes = Vec::new();
    for _ in 0..3 {
        spokes.push(listener_only_node().await?);
    }

    // Outbound connections key the hub's table by dialable listener
    // endpoints, so its redirects name real targets.
    for spoke in &spokes {
        hub.connect(spoke.local_endpoint());
    }
    assert!(wait_until(|| hub.neighbors().len() == 3).await);
    assert!(wait_until(|| spokes.iter().all(|s| s.neighbors().len() == 1)).await);

    let joiner = listener_only_node().await?;
    joiner.connect(hub.local_endpoint());

    assert!(wait_until(|| joiner.neighbors().len() == 1).await);
    let landed = joiner.neighbors().list()[0];
    let spoke_endpoints: HashSet<SocketAddr> =
        spokes.iter().map(|s| s.local_endpoint()).collect();
    assert!(
        spoke_endpoints.contains(&landed),
        "joiner landed on {landed}, expected one of {spoke_endpoints:?}"
    );
    assert!(!joiner.neighbors().contains(&hub.local_endpoint()));
    assert_eq!(hub.neighbors().len(), 3);

    // one spoke gained the joiner
    assert!(
        wait_until(|| spokes.iter().map(|s| s.neighbors().len()).sum::<usize>() == 4).await,
        "spoke degrees should total 4"
    );
    Ok(())
}

/// With the hop budget exhausted, a join attempt against a saturated node
/// is abandoned instead of chasing redirects forever.
#[tokio::test]
async fn hop_limit_abandons_saturated_join() -> Result<()> {
    let node = listener_only_node().await?;

    let mut admitted = Vec::new();
    for _ in 0..3 {
        let mut client = TestClient::connect(node.local_endpoint()).await?;
        assert_eq!(client.recv().await?.as_deref(), Some(ACCEPTED_LINE));
        admitted.push(client);
    }
    assert!(wait_until(|| node.neighbors().len() == 3).await);

    let table = new_neighbor_table();
    let local: SocketAddr = "127.0.0.1:1".parse().unwrap();
    initiator::establish(node.local_endpoint(), local, table.clone(), 0).await;

    assert!(table.is_empty());
    assert_eq!(node.neighbors().len(), 3);
    Ok(())
}

/// Dialing yourself is a logged no-op.
#[tokio::test]
async fn self_dial_is_a_no_op() -> Result<()> {
    let node = listener_only_node().await?;
    node.connect(node.local_endpoint());

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(node.neighbors().is_empty());
    Ok(())
}

/// Dialing an endpoint that is already a neighbor is skipped, not
/// double-stored.
#[tokio::test]
async fn duplicate_dial_is_skipped() -> Result<()> {
    let a = listener_only_node().await?;
    let b = listener_only_node().await?;

    a.connect(b.local_endpoint());
    assert!(wait_until(|| a.neighbors().len() == 1).await);

    a.connect(b.local_endpoint());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(a.neighbors().len(), 1);
    assert_eq!(b.neighbors().len(), 1);
    Ok(())
}
