//! Owner/proxy round trips over in-process and stream links.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tenantcache_cluster::{
    duplex, spawn_stream_link, CacheEvent, CacheKey, ClusterCache, ClusterConfig, MessageSink,
    Method, OwnerNode, PeerId, Request, Ttl,
};
use tenantcache_test_utils::assertions::{
    assert_missing_key, assert_tenant_keys, assert_timed_out,
};
use tenantcache_test_utils::{fixtures, CountingLoader, EventRecorder, ProtocolError};

/// Owner plus one proxy connected through an in-process duplex link.
fn cluster(config: ClusterConfig) -> (ClusterCache, ClusterCache) {
    let owner: ClusterCache = ClusterCache::owner(config.clone()).unwrap();
    let (owner_side, proxy_side) = duplex(PeerId(0), PeerId(1));
    owner.attach_peer(owner_side).unwrap();
    let proxy: ClusterCache = ClusterCache::connect(config, proxy_side).unwrap();
    (owner, proxy)
}

#[tokio::test]
async fn test_proxy_get_on_empty_owner_resolves_none() {
    let (_owner, proxy) = cluster(ClusterConfig::default());
    let value = proxy
        .get("acme", &CacheKey::from("missing-key"))
        .await
        .unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_proxy_set_visible_to_owner() {
    let (owner, proxy) = cluster(ClusterConfig::default());

    assert!(proxy
        .set("acme", CacheKey::from("k"), json!(42), None)
        .await
        .unwrap());
    assert_eq!(owner.get("acme", &"k".into()).await.unwrap(), Some(json!(42)));
    assert_eq!(proxy.get("acme", &"k".into()).await.unwrap(), Some(json!(42)));

    // Tenants stay isolated through the proxy too.
    assert_eq!(proxy.get("globex", &"k".into()).await.unwrap(), None);
}

#[tokio::test]
async fn test_stored_null_is_a_hit_through_proxy() {
    let (owner, proxy) = cluster(ClusterConfig::default());

    assert!(proxy
        .set("acme", CacheKey::from("nothing"), serde_json::Value::Null, None)
        .await
        .unwrap());
    assert_eq!(
        owner.get("acme", &"nothing".into()).await.unwrap(),
        Some(serde_json::Value::Null)
    );
    assert_eq!(
        proxy.get("acme", &"nothing".into()).await.unwrap(),
        Some(serde_json::Value::Null)
    );
    assert_eq!(proxy.get("acme", &"absent".into()).await.unwrap(), None);
}

#[tokio::test]
async fn test_out_of_range_ttl_keeps_link_serving() {
    let (owner, proxy) = cluster(ClusterConfig::default());

    assert!(proxy
        .set("acme", CacheKey::from("far"), json!(1), Some(Ttl::from_secs(u64::MAX)))
        .await
        .unwrap());
    assert!(proxy
        .set("acme", CacheKey::from("near"), json!(2), Some(Ttl::from_secs(60)))
        .await
        .unwrap());
    assert_eq!(proxy.get("acme", &"far".into()).await.unwrap(), Some(json!(1)));
    assert_tenant_keys(&owner.stats().await.unwrap(), "acme", 2);
}

#[tokio::test]
async fn test_proxy_delete_flush_and_stats() {
    let (owner, proxy) = cluster(ClusterConfig::default());
    for key in fixtures::item_keys(3) {
        proxy
            .set("acme", key, fixtures::user_record(1), None)
            .await
            .unwrap();
    }
    proxy
        .set("globex", "g".into(), json!(true), None)
        .await
        .unwrap();

    assert_eq!(proxy.delete("acme", &"item:0".into()).await.unwrap(), 1);
    assert_eq!(proxy.delete("acme", &"item:0".into()).await.unwrap(), 0);

    let stats = proxy.stats().await.unwrap();
    assert_eq!(stats.len(), 2);
    assert_tenant_keys(&stats, "acme", 2);
    assert_tenant_keys(&stats, "globex", 1);

    proxy.flush("acme").await.unwrap();
    let stats = owner.stats().await.unwrap();
    assert_tenant_keys(&stats, "acme", 0);
    assert_tenant_keys(&stats, "globex", 1);

    proxy.flush_all().await.unwrap();
    assert!(owner.stats().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_proxies_resolve_independently() {
    let owner: ClusterCache = ClusterCache::owner(ClusterConfig::default()).unwrap();
    let mut proxies: Vec<ClusterCache> = Vec::new();
    for n in 1..=3 {
        let (owner_side, proxy_side) = duplex(PeerId(0), PeerId(n));
        owner.attach_peer(owner_side).unwrap();
        proxies.push(ClusterCache::connect(ClusterConfig::default(), proxy_side).unwrap());
    }
    let [a, b, c] = &proxies[..] else {
        unreachable!()
    };

    let (ra, rb, rc) = tokio::join!(
        a.set("acme", CacheKey::from(1), json!("a"), None),
        b.set("acme", CacheKey::from(2), json!("b"), None),
        c.set("acme", CacheKey::from(1), json!("c"), None),
    );
    assert!(ra.unwrap() && rb.unwrap() && rc.unwrap());

    let two = CacheKey::from(2);
    let (ga, gb) = tokio::join!(c.get("acme", &two), a.get("acme", &two));
    assert_eq!(ga.unwrap(), Some(json!("b")));
    assert_eq!(gb.unwrap(), Some(json!("b")));
    assert_tenant_keys(&owner.stats().await.unwrap(), "acme", 2);
}

#[tokio::test]
async fn test_replies_out_of_send_order() {
    let config = ClusterConfig::default();
    let owner: ClusterCache = ClusterCache::owner(config.clone()).unwrap();
    owner
        .set("acme", "k".into(), json!("shared"), None)
        .await
        .unwrap();
    let owner_node: Arc<OwnerNode<_>> = Arc::clone(owner.owner_node().unwrap());

    // The test plays the transport: it collects requests and delivers the
    // owner's replies in reverse order.
    let (to_owner, mut requests) = tokio::sync::mpsc::unbounded_channel();
    let (to_proxy, replies) = tokio::sync::mpsc::unbounded_channel();
    let proxy: Arc<ClusterCache> =
        Arc::new(ClusterCache::proxy(config, Arc::new(to_owner)).unwrap());
    proxy.proxy_node().unwrap().listen(replies);

    let first = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.get("acme", &"k".into()).await })
    };
    let second = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.get("acme", &"k".into()).await })
    };

    let a = requests.recv().await.unwrap();
    let b = requests.recv().await.unwrap();
    assert_ne!(a["token"], b["token"]);

    for request in [b, a] {
        let reply = owner_node.handle_message(&request).await.unwrap();
        MessageSink::send(&to_proxy, reply).unwrap();
    }

    assert_eq!(first.await.unwrap().unwrap(), Some(json!("shared")));
    assert_eq!(second.await.unwrap().unwrap(), Some(json!("shared")));
    assert!(proxy.proxy_node().unwrap().pending().is_empty());
}

#[tokio::test]
async fn test_missing_key_error_reaches_caller() {
    let owner: ClusterCache = ClusterCache::owner(ClusterConfig::default()).unwrap();
    let (owner_side, mut raw) = duplex(PeerId(0), PeerId(1));
    owner.attach_peer(owner_side).unwrap();

    let request = Request::new(None, Method::Set, "acme").with_value(json!(1));
    raw.outbound.send(request.to_value().unwrap()).unwrap();

    let reply = raw.inbound.recv().await.unwrap();
    assert_eq!(reply["signature"], json!(request.signature().as_str()));
    assert_eq!(reply["body"]["errorKind"], json!("missingKey"));

    let body: tenantcache_cluster::ReplyBody =
        serde_json::from_value(reply["body"].clone()).unwrap();
    assert_missing_key(&body.into_result(Method::Set));
    assert!(owner.stats().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_namespace_is_ignored() {
    let owner: ClusterCache =
        ClusterCache::owner(ClusterConfig::new().with_namespace("ns-a")).unwrap();
    let (owner_side, proxy_side) = duplex(PeerId(0), PeerId(1));
    owner.attach_peer(owner_side).unwrap();

    let proxy: ClusterCache = ClusterCache::connect(
        ClusterConfig::new()
            .with_namespace("ns-b")
            .with_request_timeout(Some(Duration::from_secs(1))),
        proxy_side,
    )
    .unwrap();

    let result = proxy.set("acme", "k".into(), json!(1), None).await;
    assert_timed_out(&result);
    assert!(owner.stats().await.unwrap().is_empty());
    assert!(proxy.proxy_node().unwrap().pending().is_empty());
}

#[tokio::test]
async fn test_unnamespaced_proxy_reaches_namespaced_owner() {
    let owner: ClusterCache =
        ClusterCache::owner(ClusterConfig::new().with_namespace("ns-a")).unwrap();
    let (owner_side, proxy_side) = duplex(PeerId(0), PeerId(1));
    owner.attach_peer(owner_side).unwrap();
    let proxy: ClusterCache = ClusterCache::connect(ClusterConfig::default(), proxy_side).unwrap();

    assert!(proxy.set("acme", "k".into(), json!(1), None).await.unwrap());
}

#[tokio::test]
async fn test_closed_channel_fails_fast() {
    let (owner_side, proxy_side) = duplex(PeerId(0), PeerId(1));
    drop(owner_side);
    let proxy: ClusterCache = ClusterCache::connect(ClusterConfig::default(), proxy_side).unwrap();

    let err = proxy.get("acme", &"k".into()).await.unwrap_err();
    assert_eq!(
        err,
        tenantcache_cluster::CacheError::Protocol(ProtocolError::ChannelUnavailable)
    );
    assert!(proxy.proxy_node().unwrap().pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_owner_times_out() {
    let (_silent, proxy_side) = duplex(PeerId(0), PeerId(1));
    let proxy: ClusterCache = ClusterCache::connect(
        ClusterConfig::new().with_request_timeout(Some(Duration::from_millis(250))),
        proxy_side,
    )
    .unwrap();

    let result = proxy.get("acme", &"k".into()).await;
    assert_timed_out(&result);
    assert!(proxy.proxy_node().unwrap().pending().is_empty());
}

#[tokio::test]
async fn test_abandoned_request_releases_pending_slot() {
    let (mut silent, proxy_side) = duplex(PeerId(0), PeerId(1));
    let proxy: Arc<ClusterCache> = Arc::new(
        ClusterCache::connect(
            ClusterConfig::new().with_request_timeout(None),
            proxy_side,
        )
        .unwrap(),
    );

    let caller = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.get("acme", &"k".into()).await })
    };
    silent.inbound.recv().await.unwrap();
    assert_eq!(proxy.proxy_node().unwrap().pending().len(), 1);

    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());
    assert!(proxy.proxy_node().unwrap().pending().is_empty());
}

#[tokio::test]
async fn test_proxy_get_or_load_populates_owner() {
    let (owner, proxy) = cluster(ClusterConfig::default());
    let loader = CountingLoader::new(json!({"loaded": true}));

    let value = proxy
        .get_or_load("acme", &"profile".into(), &loader)
        .await
        .unwrap();
    assert_eq!(value, json!({"loaded": true}));
    assert_eq!(loader.calls(), 1);
    assert_eq!(
        owner.get("acme", &"profile".into()).await.unwrap(),
        Some(json!({"loaded": true}))
    );

    proxy
        .get_or_load("acme", &"profile".into(), &loader)
        .await
        .unwrap();
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_owner_handlers_see_proxy_writes() {
    let (owner, proxy) = cluster(ClusterConfig::default());
    let recorder = EventRecorder::new();
    owner
        .on(CacheEvent::Set, recorder.handler(CacheEvent::Set))
        .unwrap();
    owner
        .on(CacheEvent::Del, recorder.handler(CacheEvent::Del))
        .unwrap();

    proxy.set("acme", "k".into(), json!(1), None).await.unwrap();
    proxy.delete("acme", &"k".into()).await.unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            (CacheEvent::Set, Some(CacheKey::from("k"))),
            (CacheEvent::Del, Some(CacheKey::from("k"))),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_proxy_ttl_expires_on_owner() {
    let (_owner, proxy) = cluster(ClusterConfig::default());
    proxy
        .set("acme", "short".into(), json!(1), Some(Ttl::from_secs(1)))
        .await
        .unwrap();
    proxy
        .set("acme", "forever".into(), json!(2), Some(Ttl::NEVER))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(proxy.get("acme", &"short".into()).await.unwrap(), None);
    assert_eq!(
        proxy.get("acme", &"forever".into()).await.unwrap(),
        Some(json!(2))
    );
}

#[tokio::test]
async fn test_round_trip_over_json_lines() {
    let owner: ClusterCache = ClusterCache::owner(ClusterConfig::default()).unwrap();
    let (owner_io, proxy_io) = tokio::io::duplex(4096);
    let (owner_read, owner_write) = tokio::io::split(owner_io);
    let (proxy_read, proxy_write) = tokio::io::split(proxy_io);

    owner
        .attach_peer(spawn_stream_link(PeerId(1), owner_read, owner_write))
        .unwrap();
    let proxy: ClusterCache = ClusterCache::connect(
        ClusterConfig::default(),
        spawn_stream_link(PeerId(0), proxy_read, proxy_write),
    )
    .unwrap();

    assert!(proxy
        .set("acme", CacheKey::from(7), json!({"n": 7}), None)
        .await
        .unwrap());
    assert_eq!(
        proxy.get("acme", &CacheKey::from(7)).await.unwrap(),
        Some(json!({"n": 7}))
    );
    assert_eq!(proxy.get("acme", &CacheKey::from("7")).await.unwrap(), None);
}
