//! Invocation paths: strategies, selection, timeouts and invoke modes.

mod common;

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{provider, start_cluster, start_cluster_with, CountingLoadBalancer};
use skein_cluster::testing::MockFailure;
use skein_cluster::{ConsumerConfig, ExtensionRegistry, HealthState, InvokeContext, MethodConfig};
use skein_common::provider::DISCOVERED_GROUP;
use skein_common::{InvokeType, ProviderGroup, ProviderInfo, Request, SkeinError};

fn request(method: &str) -> Request {
    Request::new("calculator", method, json!([1, 2]))
}

fn served_by(context: &InvokeContext) -> u16 {
    context.provider().map(|p| p.port).unwrap_or_default()
}

#[tokio::test]
async fn test_fail_fast_calls_transport_once() {
    let config = ConsumerConfig::new("calculator")
        .with_cluster("failfast")
        .with_retries(3);
    let (cluster, factory) = start_cluster(config, 9000..9002).await;
    for port in 9000..9002 {
        factory.endpoint_for(&provider(port)).fail_with(Some(MockFailure::Busy));
    }

    let err = cluster.invoke(request("add")).await.unwrap_err();

    assert!(matches!(err.root(), SkeinError::ServerBusy(_)));
    assert!(matches!(err, SkeinError::Invocation { ref method, .. } if method == "add"));
    assert_eq!(factory.total_calls(), 1);
}

#[tokio::test]
async fn test_fail_over_makes_retries_plus_one_attempts() {
    let config = ConsumerConfig::new("calculator").with_retries(2);
    let (cluster, factory) = start_cluster(config, 9000..9003).await;
    for port in 9000..9003 {
        factory.endpoint_for(&provider(port)).fail_with(Some(MockFailure::Timeout));
    }

    let err = cluster.invoke(request("add")).await.unwrap_err();

    assert!(matches!(err.root(), SkeinError::ClientTimeout(_)));
    assert_eq!(factory.total_calls(), 3);
    for port in 9000..9003 {
        assert_eq!(factory.endpoint_for(&provider(port)).calls(), 1, "each provider tried once");
    }
}

#[tokio::test]
async fn test_fail_over_reuses_single_provider() {
    let config = ConsumerConfig::new("calculator").with_retries(3);
    let (cluster, factory) = start_cluster(config, [9000]).await;
    let endpoint = factory.endpoint_for(&provider(9000));
    endpoint.fail_with(Some(MockFailure::Busy));

    assert!(cluster.invoke(request("add")).await.is_err());
    assert_eq!(endpoint.calls(), 4);
}

#[tokio::test]
async fn test_fail_over_succeeds_on_another_provider() {
    let config = ConsumerConfig::new("calculator")
        .with_retries(1)
        .with_load_balancer("roundrobin");
    let (cluster, factory) = start_cluster(config, 9000..9002).await;
    factory.endpoint_for(&provider(9000)).fail_with(Some(MockFailure::Busy));

    for _ in 0..4 {
        let context = InvokeContext::new();
        let response = cluster.invoke_with_context(request("add"), &context).await.unwrap();
        assert!(response.success);
        assert_eq!(served_by(&context), 9001);
    }
}

#[tokio::test]
async fn test_fail_over_retries_empty_responses() {
    let config = ConsumerConfig::new("calculator").with_retries(1);
    let (cluster, factory) = start_cluster(config, [9000]).await;
    let endpoint = factory.endpoint_for(&provider(9000));
    endpoint.fail_with(Some(MockFailure::Empty));

    let err = cluster.invoke(request("add")).await.unwrap_err();
    assert!(matches!(err.root(), SkeinError::EmptyResponse(_)));
    assert_eq!(endpoint.calls(), 2);
}

#[tokio::test]
async fn test_fail_over_does_not_retry_other_errors() {
    let config = ConsumerConfig::new("calculator").with_retries(3);
    let (cluster, factory) = start_cluster(config, 9000..9002).await;
    for port in 9000..9002 {
        factory
            .endpoint_for(&provider(port))
            .fail_with(Some(MockFailure::Application("division by zero".into())));
    }

    let response = cluster.invoke(request("div")).await.unwrap();
    assert!(!response.success);
    assert!(matches!(response.into_result(), Err(SkeinError::Application(m)) if m == "division by zero"));
    assert_eq!(factory.total_calls(), 1);
}

#[tokio::test]
async fn test_connection_failure_demotes_provider() {
    let config = ConsumerConfig::new("calculator").with_retries(3);
    let (cluster, factory) = start_cluster(config, [9000]).await;
    factory
        .endpoint_for(&provider(9000))
        .fail_with(Some(MockFailure::Connection));

    let err = cluster.invoke(request("add")).await.unwrap_err();
    assert!(matches!(err.root(), SkeinError::Connection(_)));
    assert_eq!(factory.total_calls(), 1);

    let snapshot = cluster.core().connection_registry().health_snapshot();
    assert_eq!(snapshot.state_of(&provider(9000)), Some(HealthState::RetryPending));

    let err = cluster.invoke(request("add")).await.unwrap_err();
    assert!(matches!(err, SkeinError::NoAvailableProvider { ref candidates, .. } if candidates.len() == 1));
}

#[tokio::test]
async fn test_unavailable_candidates_are_skipped() {
    let config = ConsumerConfig::new("calculator").with_load_balancer("roundrobin");
    let (cluster, factory) = start_cluster(config, 9000..9003).await;
    factory.endpoint_for(&provider(9000)).set_healthy(false);
    factory.endpoint_for(&provider(9002)).set_healthy(false);

    for _ in 0..3 {
        let context = InvokeContext::new();
        cluster.invoke_with_context(request("add"), &context).await.unwrap();
        assert_eq!(served_by(&context), 9001);
    }
    let registry = cluster.core().connection_registry().clone();
    registry.reconnect_tick().await;
    let snapshot = registry.health_snapshot();
    assert_eq!(snapshot.alive, vec![provider(9001)]);
    assert_eq!(snapshot.retry_pending.len(), 2);
}

#[tokio::test]
async fn test_exhausted_candidates_name_every_routed_provider() {
    let (cluster, factory) = start_cluster(ConsumerConfig::new("calculator"), 9000..9003).await;
    for port in 9000..9003 {
        factory.endpoint_for(&provider(port)).set_healthy(false);
    }

    match cluster.invoke(request("add")).await.unwrap_err() {
        SkeinError::NoAvailableProvider { service, candidates } => {
            assert_eq!(service, "calculator.add");
            assert_eq!(candidates.len(), 3);
            assert!(candidates.iter().any(|c| c.contains("127.0.0.1:9002")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_round_robin_alternates_between_direct_providers() {
    let config = ConsumerConfig::new("calculator")
        .with_direct_urls(["127.0.0.1:9001?weight=1", "127.0.0.1:9002?weight=1"])
        .with_load_balancer("roundrobin");
    let (cluster, _factory) = start_cluster(config, []).await;

    let mut served = Vec::new();
    for _ in 0..10 {
        let context = InvokeContext::new();
        cluster.invoke_with_context(request("add"), &context).await.unwrap();
        served.push(served_by(&context));
    }

    for pair in served.windows(2) {
        assert_ne!(pair[0], pair[1], "sequence {served:?}");
    }
    assert_eq!(served.iter().filter(|&&p| p == 9001).count(), 5);
}

#[tokio::test]
async fn test_direct_urls_take_precedence_over_discovery() {
    let config = ConsumerConfig::new("calculator").with_direct_urls(["127.0.0.1:9500"]);
    let (cluster, factory) = start_cluster(config, 9000..9003).await;

    for _ in 0..3 {
        let context = InvokeContext::new();
        cluster.invoke_with_context(request("add"), &context).await.unwrap();
        assert_eq!(served_by(&context), 9500);
    }
    assert_eq!(factory.endpoint_for(&provider(9000)).calls(), 0);
}

#[tokio::test]
async fn test_sticky_reuses_provider_without_load_balancer() {
    let selections = Arc::new(AtomicUsize::new(0));
    let mut extensions = ExtensionRegistry::with_defaults();
    let counter = selections.clone();
    extensions.register_load_balancer("counting", move |_| Arc::new(CountingLoadBalancer::new(counter.clone())));

    let config = ConsumerConfig::new("calculator")
        .with_load_balancer("counting")
        .with_sticky(true);
    let (cluster, _factory) = start_cluster_with(config, &extensions, 9000..9003).await;

    let first = InvokeContext::new();
    cluster.invoke_with_context(request("add"), &first).await.unwrap();
    assert_eq!(selections.load(Ordering::SeqCst), 1);

    let second = InvokeContext::new();
    cluster.invoke_with_context(request("add"), &second).await.unwrap();
    assert_eq!(selections.load(Ordering::SeqCst), 1);
    assert_eq!(first.provider(), second.provider());
}

#[tokio::test]
async fn test_sticky_moves_on_when_provider_drops() {
    let selections = Arc::new(AtomicUsize::new(0));
    let mut extensions = ExtensionRegistry::with_defaults();
    let counter = selections.clone();
    extensions.register_load_balancer("counting", move |_| Arc::new(CountingLoadBalancer::new(counter.clone())));

    let config = ConsumerConfig::new("calculator")
        .with_load_balancer("counting")
        .with_method("add", MethodConfig::default().with_sticky(true));
    let (cluster, factory) = start_cluster_with(config, &extensions, 9000..9002).await;

    let first = InvokeContext::new();
    cluster.invoke_with_context(request("add"), &first).await.unwrap();
    let sticky = first.provider().unwrap();
    factory.endpoint_for(&sticky).set_healthy(false);

    let second = InvokeContext::new();
    cluster.invoke_with_context(request("add"), &second).await.unwrap();
    assert_ne!(second.provider(), Some(sticky));
    assert!(selections.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_timeout_resolution_precedence() {
    let config = ConsumerConfig::new("calculator")
        .with_timeout(900)
        .with_method("configured", MethodConfig::default().with_timeout(500));
    let (cluster, factory) = start_cluster(config, []).await;
    cluster
        .update_providers(&ProviderGroup::with_providers(
            DISCOVERED_GROUP,
            [ProviderInfo::new("127.0.0.1", 9000).with_timeout(700)],
        ))
        .await;
    let endpoint = factory.endpoint("127.0.0.1:9000");

    cluster
        .invoke(request("configured").with_timeout(300))
        .await
        .unwrap();
    cluster.invoke(request("configured")).await.unwrap();
    cluster.invoke(request("plain")).await.unwrap();
    assert_eq!(endpoint.timeouts(), vec![300, 500, 700]);

    let bare = provider(9001);
    assert_eq!(cluster.core().resolve_timeout(&request("plain"), &bare).as_millis(), 900);
}

#[tokio::test]
async fn test_pinpoint_bypasses_load_balancing() {
    let config = ConsumerConfig::new("calculator").with_load_balancer("roundrobin");
    let (cluster, factory) = start_cluster(config, 9000..9003).await;

    for _ in 0..3 {
        let context = InvokeContext::new().with_pinpoint_url("127.0.0.1:9002").unwrap();
        cluster.invoke_with_context(request("add"), &context).await.unwrap();
        assert_eq!(served_by(&context), 9002);
    }
    assert_eq!(factory.endpoint_for(&provider(9002)).calls(), 3);

    let unknown = InvokeContext::new().with_pinpoint_url("127.0.0.1:9999").unwrap();
    let err = cluster.invoke_with_context(request("add"), &unknown).await.unwrap_err();
    assert!(matches!(err, SkeinError::Routing(_)));

    factory.endpoint_for(&provider(9001)).set_healthy(false);
    let down = InvokeContext::new().with_pinpoint_url("127.0.0.1:9001").unwrap();
    let err = cluster.invoke_with_context(request("add"), &down).await.unwrap_err();
    assert!(matches!(err, SkeinError::Routing(_)));
}

#[tokio::test]
async fn test_pinpoint_connects_on_demand_when_enabled() {
    let config = ConsumerConfig::new("calculator").with_create_on_demand(true);
    let (cluster, factory) = start_cluster(config, [9000]).await;

    let context = InvokeContext::new().with_pinpoint_url("127.0.0.1:9100").unwrap();
    cluster.invoke_with_context(request("add"), &context).await.unwrap();

    assert_eq!(served_by(&context), 9100);
    cluster.invoke_with_context(request("add"), &context).await.unwrap();
    assert_eq!(factory.endpoint_for(&provider(9100)).connect_attempts(), 1);

    // The on-demand transport is transient: it never joins the health buckets.
    let snapshot = cluster.core().connection_registry().health_snapshot();
    assert_eq!(snapshot.occurrences(&provider(9100)), 0);
    assert_eq!(snapshot.total(), 1);
    assert_eq!(cluster.current_provider_list(), vec![provider(9000)]);

    cluster.destroy().await;
    assert_eq!(factory.endpoint_for(&provider(9100)).disconnects(), 1);
}

#[tokio::test]
async fn test_send_msg_targets_provider_directly() {
    let (cluster, factory) = start_cluster(ConsumerConfig::new("calculator"), 9000..9003).await;

    let response = cluster.send_msg(&provider(9001), request("add")).await.unwrap();
    assert_eq!(response.result.unwrap()["provider"], json!("127.0.0.1:9001"));
    assert_eq!(factory.endpoint_for(&provider(9001)).calls(), 1);

    let err = cluster.send_msg(&provider(9999), request("add")).await.unwrap_err();
    assert!(matches!(err, SkeinError::NoAvailableProvider { .. }));
}

#[tokio::test]
async fn test_requests_get_fresh_ids() {
    let (cluster, _factory) = start_cluster(ConsumerConfig::new("calculator"), [9000]).await;

    let first = cluster.invoke(request("add")).await.unwrap();
    let second = cluster.invoke(request("add")).await.unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_one_way_returns_immediately() {
    let (cluster, factory) = start_cluster(ConsumerConfig::new("calculator"), [9000]).await;

    let response = cluster
        .invoke(request("log").with_invoke_type(InvokeType::OneWay))
        .await
        .unwrap();
    assert!(response.success);
    assert!(response.result.is_none());
    assert_eq!(factory.endpoint_for(&provider(9000)).one_way_calls(), 1);
}

#[tokio::test]
async fn test_future_mode_hands_response_to_caller() {
    let config = ConsumerConfig::new("calculator")
        .with_method("add", MethodConfig::default().with_invoke_type("future"));
    let (cluster, _factory) = start_cluster(config, [9000]).await;

    let context = InvokeContext::new();
    let placeholder = cluster.invoke_with_context(request("add"), &context).await.unwrap();
    assert!(placeholder.result.is_none());

    let response = context.take_future().unwrap().await.unwrap();
    assert_eq!(response.result.unwrap()["method"], json!("add"));
}

#[tokio::test]
async fn test_callback_mode_delivers_response() {
    let config = ConsumerConfig::new("calculator").with_invoke_type("callback");
    let (cluster, _factory) = start_cluster(config, [9000]).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let context = InvokeContext::new().with_callback(move |outcome| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    });

    cluster.invoke_with_context(request("add"), &context).await.unwrap();
    let response = rx.await.unwrap().unwrap();
    assert_eq!(response.result.unwrap()["provider"], json!("127.0.0.1:9000"));
}

#[tokio::test]
async fn test_unknown_invoke_type_is_config_error() {
    let config = ConsumerConfig::new("calculator").with_invoke_type("telepathy");
    let (cluster, factory) = start_cluster(config, [9000]).await;

    let err = cluster.invoke(request("add")).await.unwrap_err();
    assert!(matches!(err.root(), SkeinError::Config(_)));
    assert_eq!(factory.total_calls(), 0);

    let ok = cluster
        .invoke(request("add").with_invoke_type(InvokeType::Sync))
        .await
        .unwrap();
    assert!(ok.success);
}

#[tokio::test]
async fn test_consistent_hash_pins_key_to_provider() {
    let config = ConsumerConfig::new("calculator").with_load_balancer("consistenthash");
    let (cluster, _factory) = start_cluster(config, 9000..9005).await;

    let mut by_key: HashMap<String, u16> = HashMap::new();
    for round in 0..3 {
        for key in ["alice", "bob", "carol"] {
            let context = InvokeContext::new();
            cluster
                .invoke_with_context(request("get").with_hash_key(key), &context)
                .await
                .unwrap();
            let port = served_by(&context);
            if round == 0 {
                by_key.insert(key.to_string(), port);
            } else {
                assert_eq!(by_key[key], port);
            }
        }
    }
}

#[tokio::test]
async fn test_attribute_router_filters_candidates() {
    let config = ConsumerConfig::new("calculator")
        .with_routers(["discovery", "attribute"])
        .with_route_attribute("zone", "b");
    let (cluster, _factory) = start_cluster(config, []).await;
    cluster
        .update_providers(&ProviderGroup::with_providers(
            DISCOVERED_GROUP,
            [
                ProviderInfo::new("127.0.0.1", 9000).with_attribute("zone", "a"),
                ProviderInfo::new("127.0.0.1", 9001).with_attribute("zone", "b"),
            ],
        ))
        .await;

    for _ in 0..5 {
        let context = InvokeContext::new();
        cluster.invoke_with_context(request("add"), &context).await.unwrap();
        assert_eq!(served_by(&context), 9001);
    }
}

#[tokio::test]
async fn test_tracing_filter_is_transparent() {
    let config = ConsumerConfig::new("calculator").with_filters(["tracing"]);
    let (cluster, _factory) = start_cluster(config, [9000]).await;

    assert_eq!(cluster.core().filters().names(), vec!["tracing"]);
    assert!(cluster.invoke(request("add")).await.unwrap().success);
}
