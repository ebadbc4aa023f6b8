//! Tenant Cache Demo
//!
//! `tenantcache-demo owner [WORKERS]` starts an owner process that spawns
//! `WORKERS` copies of this binary in worker mode, connected through their
//! stdin and stdout. Each worker runs traffic through a proxy and exits; the
//! owner then logs the shared cache statistics.
//!
//! Configuration comes from `TENANTCACHE_*` environment variables, which the
//! workers inherit.

use std::process::Stdio;

use serde_json::json;
use tenantcache_cluster::{
    handler, init_tracing, loader_fn, spawn_stream_link, CacheError, CacheEvent, CacheKey,
    CacheResult, ClusterCache, ClusterConfig, PeerId, ProtocolError,
};
use tenantcache_core::ConfigError;
use tokio::process::Command;

const DEFAULT_WORKERS: u32 = 3;
const ITEMS_PER_WORKER: u32 = 10;

#[tokio::main]
async fn main() -> CacheResult<()> {
    init_tracing()?;

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "owner".to_string());
    let config = ClusterConfig::from_env();

    match mode.as_str() {
        "owner" => {
            let workers = match args.next() {
                Some(value) => value.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    field: "workers".to_string(),
                    value: value.clone(),
                    reason: "must be a non-negative integer".to_string(),
                })?,
                None => DEFAULT_WORKERS,
            };
            run_owner(config, workers).await
        }
        "worker" => run_worker(config).await,
        other => Err(ConfigError::InvalidValue {
            field: "mode".to_string(),
            value: other.to_string(),
            reason: "expected `owner` or `worker`".to_string(),
        }
        .into()),
    }
}

async fn run_owner(config: ClusterConfig, workers: u32) -> CacheResult<()> {
    let cache: ClusterCache = ClusterCache::owner(config)?;
    cache.on(
        CacheEvent::Expired,
        handler(|key, _| {
            tracing::debug!(key = ?key.map(ToString::to_string), "Entry expired");
        }),
    )?;

    let exe = std::env::current_exe().map_err(transport)?;
    let mut children = Vec::with_capacity(workers as usize);
    for n in 1..=workers {
        let mut child = Command::new(&exe)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(transport)?;

        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            return Err(transport("worker pipes were not captured"));
        };
        cache.attach_peer(spawn_stream_link(PeerId(n), stdout, stdin))?;
        tracing::info!(peer = n, pid = ?child.id(), "Worker started");
        children.push((n, child));
    }

    for (n, mut child) in children {
        let status = child.wait().await.map_err(transport)?;
        tracing::info!(peer = n, %status, "Worker exited");
    }

    let stats = cache.stats().await?;
    for (tenant, store) in stats.iter() {
        tracing::info!(
            tenant = %tenant,
            keys = store.keys,
            hits = store.hits,
            misses = store.misses,
            "Tenant statistics"
        );
    }
    let totals = stats.totals();
    tracing::info!(
        tenants = stats.len(),
        keys = totals.keys,
        hit_rate = totals.hit_rate(),
        "Owner finished"
    );
    Ok(())
}

async fn run_worker(config: ClusterConfig) -> CacheResult<()> {
    let link = spawn_stream_link(PeerId(0), tokio::io::stdin(), tokio::io::stdout());
    let cache: ClusterCache = ClusterCache::connect(config, link)?;

    let pid = std::process::id();
    let tenant = format!("tenant-{}", pid % 2);

    for item in 0..ITEMS_PER_WORKER {
        let key = CacheKey::from(format!("item:{}:{}", pid, item));
        cache
            .set(&tenant, key.clone(), json!({"worker": pid, "item": item}), None)
            .await?;
        let value = cache.get(&tenant, &key).await?;
        tracing::trace!(tenant = %tenant, key = %key, ?value, "Round trip");
    }

    let loader = loader_fn(|tenant: String, key: CacheKey| async move {
        Ok::<_, CacheError>(json!({"tenant": tenant, "loaded": key.to_string()}))
    });
    let profile = cache
        .get_or_load(&tenant, &CacheKey::from("profile"), &loader)
        .await?;
    let missing = cache.get(&tenant, &CacheKey::from("missing")).await?;
    let removed = cache
        .delete(&tenant, &CacheKey::from(format!("item:{}:0", pid)))
        .await?;
    let stats = cache.stats().await?;

    tracing::info!(
        pid,
        tenant = %tenant,
        %profile,
        missing = missing.is_none(),
        removed,
        tenants = stats.len(),
        "Worker finished"
    );
    Ok(())
}

fn transport(e: impl ToString) -> CacheError {
    ProtocolError::Transport {
        reason: e.to_string(),
    }
    .into()
}
