//! The cat image service: HTTP routes in front of the cache.
//!
//! | Route                    | Answer                                              |
//! |--------------------------|-----------------------------------------------------|
//! | `GET /`                  | a small page that shows a cat                       |
//! | `GET /api/cats/:code`    | the image for `code`, loaded through the cache      |
//! | `DELETE /api/cats/:code` | drops the cached image, `204`                       |
//! | `GET /api/stats`         | cache statistics as JSON                            |
//!
//! [`run`] wires everything together and is what the binary calls.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::background::BackgroundTasks;
use crate::cache::{CacheConfig, ExpiringCache, LoadError, StatsSnapshot};
use crate::config::Config;
use crate::context::Context;
use crate::http::{Response, StatusCode};
use crate::middleware::LoggerMiddleware;
use crate::router::Router;
use crate::server::Server;
use crate::upstream::{CatImage, HttpCatClient, UpstreamError, UpstreamFetcher};

/// The upstream as the service sees it.
pub type CatFetcher = Arc<dyn UpstreamFetcher<u16, CatImage, Error = UpstreamError>>;

/// Cached images, keyed by status code.
pub type CatCache = ExpiringCache<u16, CatImage, UpstreamError>;

const INDEX_HTML: &str = include_str!("index.html");

/// Request handlers sharing one cache and one upstream.
pub struct CatService {
    cache: CatCache,
    fetcher: CatFetcher,
}

#[derive(Debug, Serialize)]
struct StatsBody {
    entries: usize,
    max_capacity: usize,
    hit_rate: f64,
    #[serde(flatten)]
    counters: StatsSnapshot,
}

/// Parses a path segment into an HTTP status code, `100..=599`.
fn parse_code(raw: &str) -> Option<u16> {
    raw.parse::<u16>()
        .ok()
        .filter(|code| (100..=599).contains(code))
}

impl CatService {
    pub fn new(config: CacheConfig, fetcher: CatFetcher) -> Self {
        Self {
            cache: ExpiringCache::new(config),
            fetcher,
        }
    }

    pub fn cache(&self) -> &CatCache {
        &self.cache
    }

    /// `GET /api/cats/:code`
    pub async fn image(&self, raw_code: &str) -> Response {
        let Some(code) = parse_code(raw_code) else {
            return Response::text(
                StatusCode::BadRequest,
                format!("`{raw_code}` is not an HTTP status code"),
            );
        };

        let fetcher = Arc::clone(&self.fetcher);
        match self
            .cache
            .get_or_load(code, move |code| fetcher.fetch(code))
            .await
        {
            Ok(image) => Response::new(StatusCode::Ok)
                .header("Content-Type", image.content_type)
                .header("Cache-Control", "no-store")
                .body_bytes(image.body),
            Err(error) => error_response(code, &error),
        }
    }

    /// `DELETE /api/cats/:code`
    pub fn evict(&self, raw_code: &str) -> Response {
        let Some(code) = parse_code(raw_code) else {
            return Response::text(
                StatusCode::BadRequest,
                format!("`{raw_code}` is not an HTTP status code"),
            );
        };
        let removed = self.cache.invalidate(&code);
        debug!(code, removed, "evict requested");
        Response::new(StatusCode::NoContent)
    }

    /// `GET /api/stats`
    pub fn stats(&self) -> Response {
        let counters = self.cache.stats();
        let body = StatsBody {
            entries: self.cache.len(),
            max_capacity: self.cache.config().max_capacity,
            hit_rate: counters.hit_rate(),
            counters,
        };
        Response::json(StatusCode::Ok, &body)
    }

    /// `GET /`
    pub fn index(&self) -> Response {
        Response::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(INDEX_HTML)
    }

    /// Builds the router with every route of the service.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();
        router.layer(LoggerMiddleware);

        let service = Arc::clone(self);
        router.get("/", move |_ctx: Context| {
            let service = Arc::clone(&service);
            async move { service.index() }
        });

        let service = Arc::clone(self);
        router.get("/api/cats/:code", move |ctx: Context| {
            let service = Arc::clone(&service);
            async move { service.image(ctx.param("code").unwrap_or_default()).await }
        });

        let service = Arc::clone(self);
        router.delete("/api/cats/:code", move |ctx: Context| {
            let service = Arc::clone(&service);
            async move { service.evict(ctx.param("code").unwrap_or_default()) }
        });

        let service = Arc::clone(self);
        router.get("/api/stats", move |_ctx: Context| {
            let service = Arc::clone(&service);
            async move { service.stats() }
        });

        router
    }

    /// Starts the stats reporter and the expiration sweeper.
    pub fn spawn_jobs(&self, config: &Config) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let cache = self.cache.clone();
        tasks.spawn_periodic("stats", config.stats_interval, move || {
            info!(entries = cache.len(), stats = %cache.stats(), "cache stats");
        });

        let cache = self.cache.clone();
        tasks.spawn_periodic("sweep", config.sweep_interval, move || {
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = cache.len(), "swept expired entries");
            }
        });

        tasks
    }
}

fn error_response(code: u16, error: &LoadError<UpstreamError>) -> Response {
    match error {
        LoadError::UpstreamFailure(inner) if matches!(**inner, UpstreamError::NotFound(_)) => {
            Response::text(StatusCode::NotFound, format!("no cat for {code}"))
        }
        LoadError::UpstreamTimeout(_) => {
            warn!(code, %error, "upstream timed out");
            Response::text(StatusCode::GatewayTimeout, error.to_string())
        }
        LoadError::UpstreamFailure(_) | LoadError::Abandoned => {
            warn!(code, error = %error, "failed to load cat");
            Response::text(StatusCode::BadGateway, error.to_string())
        }
    }
}

/// Serves `service` on an already bound `server` until `shutdown` resolves.
pub async fn serve<S>(
    server: Server,
    service: Arc<CatService>,
    config: &Config,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    let jobs = service.spawn_jobs(config);
    let result = server
        .run_until(service.router().into_service(), shutdown)
        .await;
    jobs.shutdown().await;
    result.context("server failed")
}

/// Runs the service described by `config` until `shutdown` resolves.
pub async fn run<S>(config: Config, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    let client = HttpCatClient::new(&config.upstream).context("failed to create upstream client")?;
    let service = Arc::new(CatService::new(config.cache.clone(), Arc::new(client)));
    let server = Server::bind(&config.bind).await?;

    info!(
        address = %server.local_addr(),
        upstream = %config.upstream.base_url,
        ttl = ?config.cache.time_to_live,
        capacity = config.cache.max_capacity,
        "cat cache started"
    );

    serve(server, service, &config, shutdown).await?;
    info!("cat cache stopped");
    Ok(())
}
