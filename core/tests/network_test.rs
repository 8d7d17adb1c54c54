//! End-to-end tests driven through the public `Network`/`AgentClient`
//! surface rather than `EventGateway` directly, mirroring how an embedder
//! would actually use this crate.

use openagents_core::{Event, Network, NetworkConfig, SubscriptionRequest, ValueMap, Visibility};
use std::time::Duration;

#[tokio::test]
async fn two_clients_exchange_a_direct_message() {
    let network = Network::default();
    let alice = network.client("agent:alice");
    let bob = network.client("agent:bob");

    alice.register(ValueMap::new()).await.unwrap();
    bob.register(ValueMap::new()).await.unwrap();
    bob.subscribe(SubscriptionRequest {
        event_patterns: vec!["agent.direct_message.sent".to_string()],
        ..Default::default()
    })
    .unwrap();

    let event = Event::builder("agent.direct_message.sent", "agent:alice")
        .destination("agent:bob")
        .payload(openagents_core::event::text_payload("hello bob"))
        .build()
        .unwrap();
    alice.emit(event, Duration::from_secs(1)).await.unwrap();

    let inbox = bob.poll(10, Duration::from_millis(100)).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(
        inbox[0].payload.get("text").and_then(|v| v.as_str()),
        Some("hello bob")
    );
}

#[tokio::test]
async fn channel_membership_gates_visibility_for_late_subscribers() {
    let network = Network::default();
    let alice = network.client("agent:alice");
    let carol = network.client("agent:carol");
    alice.register(ValueMap::new()).await.unwrap();
    carol.register(ValueMap::new()).await.unwrap();

    // carol subscribes but never joins the channel
    carol
        .subscribe(SubscriptionRequest {
            event_patterns: vec!["channel.*".to_string()],
            ..Default::default()
        })
        .unwrap();

    let event = Event::builder("channel.message.posted", "agent:alice")
        .channel("#general")
        .build()
        .unwrap();
    alice.emit(event, Duration::from_secs(1)).await.unwrap();

    let inbox = carol.poll(10, Duration::from_millis(50)).await;
    assert!(inbox.is_empty(), "non-member must not see channel traffic");
}

#[tokio::test]
async fn restricted_visibility_only_reaches_allowed_agents() {
    let network = Network::default();
    let alice = network.client("agent:alice");
    let bob = network.client("agent:bob");
    let carol = network.client("agent:carol");
    for client in [&alice, &bob, &carol] {
        client.register(ValueMap::new()).await.unwrap();
        client
            .subscribe(SubscriptionRequest {
                event_patterns: vec!["*".to_string()],
                ..Default::default()
            })
            .unwrap();
    }

    let mut allowed = std::collections::BTreeSet::new();
    allowed.insert("agent:bob".to_string());
    let event = Event::builder("agent.secret.shared", "agent:alice")
        .visibility(Visibility::Restricted)
        .allowed_agents(allowed)
        .build()
        .unwrap();
    alice.emit(event, Duration::from_secs(1)).await.unwrap();

    assert_eq!(bob.poll(10, Duration::from_millis(50)).await.len(), 1);
    assert!(carol.poll(10, Duration::from_millis(50)).await.is_empty());
}

#[test]
fn network_config_from_env_overrides_defaults() {
    std::env::set_var("OPENAGENTS_QUEUE_CAPACITY", "42");
    let config = NetworkConfig::from_env();
    assert_eq!(config.queue_capacity, 42);
    std::env::remove_var("OPENAGENTS_QUEUE_CAPACITY");
}
