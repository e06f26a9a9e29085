//! End-to-end control plane scenarios against an in-memory host

mod common;

use armor_control::control::Actor;
use armor_control::models::{FirewallRule, PeerStatus, RuleAction, SystemConfigUpdate};
use armor_control::store::RecordStore;
use armor_control::wireguard::{KeyPair, TunnelController};
use armor_control::ArmorError;
use common::{fleet, FakeHost};
use futures::future::join_all;
use std::collections::HashMap;

#[tokio::test]
async fn test_allocate_revoke_rotate_scenario() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let admin = Actor::new(1, "203.0.113.5");

    let first = f.plane.provision_peer(&admin, None, "laptop").await.unwrap();
    assert_eq!(first.peer.assigned_ip.to_string(), "10.8.0.2");
    assert!(f.host.device_keys("wg0").contains(&first.peer.public_key));

    let second = f.plane.provision_peer(&admin, None, "phone").await.unwrap();
    let third = f.plane.provision_peer(&admin, None, "tablet").await.unwrap();
    assert_eq!(second.peer.assigned_ip.to_string(), "10.8.0.3");

    // Revoke the first peer: gone from the device, drop rule compiled.
    let outcome = f.plane.revoke_peer(&admin, first.peer.id).await.unwrap();
    assert!(outcome.device_applied);
    assert!(outcome.drop_rule_applied);
    let live = f.plane.controller().device_peers("wg0").await.unwrap();
    assert!(live.iter().all(|p| p.public_key != first.peer.public_key));
    let script = f.host.last_script_containing("armor_revoked").unwrap();
    assert!(script.contains("add rule inet armor_revoked forward ip saddr 10.8.0.2 drop"));

    // Rotate everything still active.
    let before: HashMap<u64, String> = f
        .store
        .list_peers()
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.status == PeerStatus::Active)
        .map(|p| (p.id, p.public_key))
        .collect();
    assert_eq!(before.len(), 2);

    let rotated = f.plane.rotate_all(&admin).await.unwrap();
    assert_eq!(rotated, before.len());

    for (id, old_key) in &before {
        let peer = f.store.get_peer(*id).await.unwrap();
        assert_ne!(&peer.public_key, old_key);
        assert!(peer.rotated_at.is_some());
        assert!(f.host.device_keys("wg0").contains(&peer.public_key));
        assert!(!f.host.device_keys("wg0").contains(old_key));
    }

    // Rotation keeps addresses, and rotated addresses are not left dropped.
    let peer = f.store.get_peer(third.peer.id).await.unwrap();
    assert_eq!(peer.assigned_ip, third.peer.assigned_ip);
    let revoked = f.plane.controller().revoked_addresses().await;
    assert_eq!(revoked, vec![first.peer.assigned_ip]);

    let audit = f.store.list_audit().await.unwrap();
    let actions: Vec<&str> = audit.iter().map(|a| a.action.as_str()).collect();
    assert!(actions.contains(&"CREATE_PEER"));
    assert!(actions.contains(&"REVOKE_PEER"));
    assert!(actions.contains(&"ROTATE_ALL_KEYS"));
}

#[tokio::test]
async fn test_client_config_is_byte_exact() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let provisioned = f
        .plane
        .provision_peer(&Actor::new(3, "203.0.113.5"), None, "laptop")
        .await
        .unwrap();

    let server_key = f.plane.controller().public_key("wg0").await.unwrap();
    let expected = format!(
        "[Interface]\nPrivateKey = {}\nAddress = 10.8.0.2/32\nDNS = 1.1.1.1\n\n[Peer]\nPublicKey = {}\nEndpoint = 127.0.0.1:51820\nAllowedIPs = 0.0.0.0/0\nPersistentKeepalive = 25",
        provisioned.config.private_key, server_key
    );
    assert_eq!(provisioned.client_config(), expected);
}

#[tokio::test]
async fn test_pool_exhaustion_is_reported() {
    let f = fleet("10.8.0.0/30", &[]).await;
    let admin = Actor::new(1, "203.0.113.5");

    // /30 has hosts .1 and .2; .1 is the reserved gateway.
    f.plane.provision_peer(&admin, None, "one").await.unwrap();
    let err = f.plane.provision_peer(&admin, None, "two").await.unwrap_err();
    assert!(matches!(err, ArmorError::PoolExhausted { .. }));
    assert_eq!(f.store.list_peers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_hydrate_restores_allocations() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let admin = Actor::new(1, "203.0.113.5");
    let peer = f.plane.provision_peer(&admin, None, "laptop").await.unwrap().peer;

    let report = f.plane.hydrate().await.unwrap();
    assert_eq!(report.addresses, 1);
    assert_eq!(report.gateway.map(|g| g.to_string()), Some("10.8.0.1".to_string()));
    assert!(f.plane.allocator().is_used(peer.assigned_ip));

    let nodes = f.store.list_nodes().await.unwrap();
    assert_eq!(nodes.iter().filter(|n| n.is_core()).count(), 1);
    assert_eq!(report.core_node, nodes[0].id);
}

#[tokio::test]
async fn test_firewall_updates_recompile_whole_set() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let admin = Actor::new(1, "203.0.113.5");

    let applied = f
        .plane
        .add_firewall_rule(&admin, FirewallRule::new("10.8.0.2", "any", "22", "tcp", RuleAction::Deny))
        .await
        .unwrap();
    assert!(applied.enforced);
    f.plane
        .add_firewall_rule(&admin, FirewallRule::new("any", "10.0.0.0/8", "any", "any", RuleAction::Allow))
        .await
        .unwrap();

    let script = f.host.last_script_containing("wg_filter").unwrap();
    assert!(script.contains("flush chain inet wg_filter forward"));
    assert_eq!(script.matches("add rule inet wg_filter").count(), 2);

    f.plane.delete_firewall_rule(&admin, applied.value.id).await.unwrap();
    let script = f.host.last_script_containing("wg_filter").unwrap();
    assert_eq!(script.matches("add rule inet wg_filter").count(), 1);

    let err = f
        .plane
        .add_firewall_rule(&admin, FirewallRule::new("10.8.0.2; flush ruleset", "any", "any", "any", RuleAction::Deny))
        .await
        .unwrap_err();
    assert!(matches!(err, ArmorError::Validation(_)));
    assert_eq!(f.store.list_firewall_rules().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_blackout_removes_masquerade() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let admin = Actor::new(1, "203.0.113.5");

    let applied = f
        .plane
        .update_system_config(
            &admin,
            SystemConfigUpdate {
                internet_access_limited: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(applied.value.internet_access_limited);

    let script = f.host.last_script_containing("armor_nat").unwrap();
    assert!(!script.contains("masquerade"));
    assert!(script.contains("add rule inet armor_filter forward oifname \"eth0\" drop"));

    let stored = f.store.get_or_create_system_config().await.unwrap();
    assert!(stored.internet_access_limited);
}

#[tokio::test]
async fn test_manual_sync_of_unreachable_edge() {
    let f = fleet("10.8.0.0/22", &["edge-a"]).await;
    let admin = Actor::new(1, "203.0.113.5");
    f.agent.set_reachable(false);

    assert!(f.plane.sync_node(&admin, 1).await.is_err());
    let node = f.store.get_node(1).await.unwrap();
    assert_eq!(node.status, armor_control::models::NodeStatus::Offline);
    assert!(node.desired_fingerprint.is_none());

    f.agent.set_reachable(true);
    let hash = f.plane.sync_node(&admin, 1).await.unwrap();
    let node = f.store.get_node(1).await.unwrap();
    assert_eq!(node.status, armor_control::models::NodeStatus::Online);
    assert_eq!(node.desired_fingerprint.as_deref(), Some(hash.as_str()));
}

#[tokio::test]
async fn test_core_log_stream_yields_heartbeats_until_cancelled() {
    use futures::StreamExt;

    let f = fleet("10.8.0.0/22", &[]).await;
    let core = f.plane.hydrate().await.unwrap().core_node;
    let cancel = tokio_util::sync::CancellationToken::new();

    let mut stream = f.plane.stream_node_logs(core, cancel.clone()).await.unwrap();
    let frame = stream.next().await.unwrap().unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.starts_with("event: log\ndata: "));
    assert!(text.contains("Heartbeat: node operational"));
    assert!(text.ends_with("\n\n"));

    cancel.cancel();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_log_stream_for_unknown_node() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let result = f
        .plane
        .stream_node_logs(99, tokio_util::sync::CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ArmorError::NotFound(_))));
}

#[tokio::test]
async fn test_repeated_sync_leaves_device_unchanged() {
    let host = FakeHost::new();
    let controller = TunnelController::new(host.drivers());
    let key = KeyPair::generate().public.to_base64();
    let allowed = vec!["10.8.0.2/32".to_string(), "192.168.50.0/24".to_string()];

    controller.sync_peer("wg0", &key, &allowed).await.unwrap();
    let first = controller.device_peers("wg0").await.unwrap();
    let scripts = host.scripts();

    controller.sync_peer("wg0", &key, &allowed).await.unwrap();
    let second = controller.device_peers("wg0").await.unwrap();

    assert_eq!(second, first);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].allowed_ips, allowed);
    assert_eq!(host.scripts(), scripts);
    assert!(controller.revoked_addresses().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_provisions_respect_device_limit() {
    let f = fleet("10.8.0.0/22", &[]).await;
    let owner = Actor::new(4, "203.0.113.20");

    let results = join_all((0..8).map(|i| {
        let plane = f.plane.clone();
        let owner = owner.clone();
        async move { plane.provision_peer(&owner, None, &format!("device-{}", i)).await }
    }))
    .await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 5);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ArmorError::Conflict(_))));
    assert_eq!(f.store.count_active_peers(4).await.unwrap(), 5);
    // Rejected provisions gave their addresses back; the gateway stays taken.
    assert_eq!(f.plane.allocator().used_count(), 6);
    assert_eq!(f.host.device_keys("wg0").len(), 5);
}
