//! flashguard demo
//!
//! Runs a flash sale against the configured cache gateway and reads a few
//! entities through every cache read policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          flashguard                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ CacheClient  │───▶│ Distributed  │◀───│   Seckill    │       │
//! │  │ (read paths) │    │    Lock      │    │ Coordinator  │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          │                   │                   │               │
//! │          ▼                   ▼                   ▼               │
//! │      CacheGateway (Redis or in-memory)     SeckillStore          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flashguard::adapters::{
    GatewayIdGenerator, InMemoryGateway, InMemorySeckillStore, LoggingEventPublisher,
};
use flashguard::cache::{CacheClient, CacheConfig, KeySpace, ReadPolicy, RebuildExecutor};
use flashguard::domain::ports::{CacheGateway, SeckillVoucher};
use flashguard::error::{Error, Result};
use flashguard::lock::DistributedLock;
use flashguard::seckill::{RequestContext, SeckillConfig, SeckillCoordinator, SeckillOutcome};

// =============================================================================
// CLI Arguments
// =============================================================================

/// flashguard - cache protection and flash-sale coordination demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis URL; the in-memory gateway is used when unset
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Redis connection pool size
    #[arg(long, env = "REDIS_POOL_SIZE", default_value = "16")]
    redis_pool_size: usize,

    /// Concurrent background rebuilds
    #[arg(long, env = "REBUILD_WORKERS", default_value = "10")]
    rebuild_workers: usize,

    /// Voucher stock for the demo sale
    #[arg(long, env = "SECKILL_STOCK", default_value = "100")]
    stock: i32,

    /// Concurrent buyers in the demo sale
    #[arg(long, env = "SECKILL_BUYERS", default_value = "200")]
    buyers: u64,

    /// Metrics server bind address; metrics are not served when unset
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting flashguard {}", flashguard::version());
    info!("  Rebuild workers: {}", args.rebuild_workers);
    info!("  Stock: {}, buyers: {}", args.stock, args.buyers);

    let gateway = connect_gateway(&args).await?;

    if let Some(addr) = args.metrics_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let executor = RebuildExecutor::new(args.rebuild_workers);
    let cache = CacheClient::new(gateway.clone(), executor.clone(), CacheConfig::default());
    run_cache_demo(&cache).await?;

    run_seckill_demo(gateway, args.stock, args.buyers).await?;

    executor.shutdown().await;
    info!("Cache metrics: {:?}", cache.metrics().snapshot());

    if args.metrics_addr.is_some() {
        info!("Serving metrics until interrupted");
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Internal(format!("Failed to wait for ctrl-c: {}", e)))?;
    }

    info!("flashguard shutdown complete");
    Ok(())
}

async fn connect_gateway(args: &Args) -> Result<Arc<dyn CacheGateway>> {
    match &args.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            use flashguard::adapters::{RedisGateway, RedisGatewayConfig};

            let config = RedisGatewayConfig {
                url: url.clone(),
                pool_size: args.redis_pool_size,
            };
            let gateway = RedisGateway::connect(&config).await.map_err(|e| {
                error!("Failed to connect to Redis: {}", e);
                e
            })?;
            info!("Connected to Redis");
            Ok(Arc::new(gateway))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => Err(Error::Config(
            "REDIS_URL set but the redis feature is disabled".into(),
        )),
        None => {
            warn!("No Redis URL configured, using the in-memory gateway");
            Ok(Arc::new(InMemoryGateway::new()))
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "deadpool=info", "redis=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Cache Demo
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Shop {
    id: u64,
    name: String,
}

type ShopTable = Arc<HashMap<u64, Shop>>;

async fn find_shop(table: ShopTable, id: u64) -> Result<Option<Shop>> {
    // Simulated store latency
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(table.get(&id).cloned())
}

async fn run_cache_demo(cache: &CacheClient) -> Result<()> {
    let table: ShopTable = Arc::new(
        (1..=3)
            .map(|id| {
                (
                    id,
                    Shop {
                        id,
                        name: format!("shop-{}", id),
                    },
                )
            })
            .collect(),
    );

    let spaces = [
        KeySpace::new("cache:shop:", ReadPolicy::PassThrough, Duration::from_secs(1800)),
        KeySpace::new("cache:shop:mutex:", ReadPolicy::MutexRebuild, Duration::from_secs(1800)),
        KeySpace::new("cache:shop:hot:", ReadPolicy::LogicalExpiry, Duration::from_secs(20)),
    ];

    // Logical keys are served only after pre-warming
    for shop in table.values() {
        cache
            .set_with_logical_expire(&spaces[2].key(&shop.id), shop, spaces[2].ttl)
            .await?;
    }

    for space in &spaces {
        for id in [1u64, 2, 404, 404] {
            let table = table.clone();
            let shop: Option<Shop> = cache.get(space, id, move |id| find_shop(table, id)).await?;
            info!(
                policy = %space.policy,
                id,
                found = shop.is_some(),
                "cache read"
            );
        }
    }

    Ok(())
}

// =============================================================================
// Seckill Demo
// =============================================================================

async fn run_seckill_demo(gateway: Arc<dyn CacheGateway>, stock: i32, buyers: u64) -> Result<()> {
    const VOUCHER_ID: u64 = 1;

    let store = Arc::new(InMemorySeckillStore::new());
    let now = Utc::now();
    store.insert_voucher(SeckillVoucher::new(
        VOUCHER_ID,
        stock,
        now - ChronoDuration::minutes(1),
        now + ChronoDuration::hours(1),
    ));

    let coordinator = SeckillCoordinator::new(
        store.clone(),
        Arc::new(GatewayIdGenerator::new(gateway.clone())),
        DistributedLock::new(gateway),
        Arc::new(LoggingEventPublisher::new()),
        SeckillConfig::default(),
    );

    // Every buyer clicks twice
    let mut handles = Vec::new();
    for user_id in 1..=buyers {
        for _ in 0..2 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .seckill_voucher(&RequestContext::new(user_id), VOUCHER_ID)
                    .await
            }));
        }
    }

    let mut tally: HashMap<String, usize> = HashMap::new();
    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| Error::Internal(format!("seckill task failed: {}", e)))??;
        let label = match outcome {
            SeckillOutcome::Ordered { .. } => "ordered".to_string(),
            SeckillOutcome::Rejected { reason } => reason.as_str().to_string(),
        };
        *tally.entry(label).or_insert(0) += 1;
    }

    let remaining = store.stock_of(VOUCHER_ID).unwrap_or_default();
    info!(
        orders = store.orders().len(),
        remaining_stock = remaining,
        "Flash sale finished: {:?}",
        tally
    );
    if remaining < 0 {
        return Err(Error::Internal("stock went negative".into()));
    }
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        if let Ok(value) = content_type.parse() {
            response
                .headers_mut()
                .insert(hyper::header::CONTENT_TYPE, value);
        }
        response
    }

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                match encoder.encode(&metric_families, &mut buffer) {
                    Ok(()) => respond(StatusCode::OK, encoder.format_type(), buffer),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string().into_bytes(),
                    ),
                }
            }
            "/healthz" => respond(StatusCode::OK, "text/plain", b"ok".to_vec()),
            _ => respond(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
