//! Request gateway
//!
//! The façade application code calls. Every request is validated against the
//! configured API surface, then:
//!
//! - **reads** (GET/HEAD, and POSTs tagged as queries) go through the cache
//!   strategy of the first matching route, or straight to the network;
//! - **mutations** are sent immediately; a transport failure (or being
//!   offline) turns them into a durable [`QueuedOperation`] and the caller
//!   receives a [`QueuedAck`] instead of an error.
//!
//! Rate limiting is consulted before every network attempt. Each physical
//! attempt is rewritten by the [`VersionRewriter`] with a fresh trace id.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use syncgate_core::effects::{PhysicalTimeEffects, RandomEffects, StorageEffects, TransportEffects};
use syncgate_core::{
    CacheStrategy, ConflictId, ConflictRecord, ConflictStatus, GatewayConfig, GatewayError,
    GatewayRequest, GatewayResponse, GatewayResult, Method, OperationId, OperationIdGenerator,
    OperationStatus, QueuedOperation, RateLimitWindow, ResponseSource, TransportError,
};
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::cache::{cache_key, ResponseCache, RouteMatch};
use crate::connectivity::ConnectivityMonitor;
use crate::events::{EventBus, GatewayEvent};
use crate::rate_limit::{normalize_endpoint, RateLimitDecision, RateLimiter};
use crate::rewrite::VersionRewriter;
use crate::store::DurableStore;

/// Handlers the gateway runs on
#[derive(Clone)]
pub struct GatewayEffects {
    /// Wall clock
    pub time: Arc<dyn PhysicalTimeEffects>,
    /// Randomness for ids, trace ids and jitter
    pub random: Arc<dyn RandomEffects>,
    /// Durable key/value backend
    pub storage: Arc<dyn StorageEffects>,
    /// Remote API
    pub transport: Arc<dyn TransportEffects>,
}

/// Acknowledgment that a mutating request was queued for later delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedAck {
    /// Id to track the operation by
    pub operation_id: OperationId,
    /// Expected wait before the next delivery attempt
    pub estimated_retry_window_ms: u64,
}

impl QueuedAck {
    /// HTTP status equivalent of a queued acknowledgment
    pub const STATUS: u16 = 202;

    /// Expected wait before the next delivery attempt
    pub fn estimated_retry_window(&self) -> Duration {
        Duration::from_millis(self.estimated_retry_window_ms)
    }
}

/// Successful result of [`RequestGateway::execute`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    /// The server (or the cache) answered
    Response(GatewayResponse),
    /// The request was queued for retry
    Queued(QueuedAck),
}

impl ExecuteOutcome {
    /// Response status, 202 for a queued request
    pub fn status(&self) -> u16 {
        match self {
            Self::Response(response) => response.status,
            Self::Queued(_) => QueuedAck::STATUS,
        }
    }

    /// The response, if answered
    pub fn response(&self) -> Option<&GatewayResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Queued(_) => None,
        }
    }

    /// The acknowledgment, if queued
    pub fn queued(&self) -> Option<&QueuedAck> {
        match self {
            Self::Queued(ack) => Some(ack),
            Self::Response(_) => None,
        }
    }
}

struct GatewayInner {
    config: GatewayConfig,
    time: Arc<dyn PhysicalTimeEffects>,
    random: Arc<dyn RandomEffects>,
    transport: Arc<dyn TransportEffects>,
    store: DurableStore,
    limiter: RateLimiter,
    rewriter: VersionRewriter,
    cache: ResponseCache,
    backoff: BackoffPolicy,
    events: EventBus,
    connectivity: ConnectivityMonitor,
    ids: OperationIdGenerator,
    refreshing: Mutex<HashSet<String>>,
}

/// Offline-capable request gateway. Cheap to clone.
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("origin", &self.inner.config.api.origin)
            .field("online", &self.inner.connectivity.is_online())
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl RequestGateway {
    /// Validate `config`, open the durable store and restore persisted
    /// rate-limit windows
    pub async fn open(
        config: GatewayConfig,
        effects: GatewayEffects,
        connectivity: ConnectivityMonitor,
    ) -> GatewayResult<Self> {
        config.validate()?;

        let store = DurableStore::open(effects.storage).await?;
        let ids = OperationIdGenerator::new();
        ids.observe(store.recovery_report().latest_operation_ms);

        let limiter = RateLimiter::new(&config.rate_limits);
        if config.rate_limits.persist_windows {
            let restored = limiter.restore(store.load_windows().await?);
            debug!(restored, "Restored rate-limit windows");
        }

        let inner = GatewayInner {
            rewriter: VersionRewriter::new(&config.versioning),
            cache: ResponseCache::new(&config.cache)?,
            backoff: BackoffPolicy::new(&config.retry),
            time: effects.time,
            random: effects.random,
            transport: effects.transport,
            store,
            limiter,
            events: EventBus::default(),
            connectivity,
            ids,
            refreshing: Mutex::new(HashSet::new()),
            config,
        };

        info!(
            origin = ?inner.config.api.origin,
            online = inner.connectivity.is_online(),
            pending = inner.store.count_with_status(OperationStatus::Pending),
            "Request gateway ready"
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Configuration in force
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Lifecycle event publisher
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Host connectivity signal
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Current window of an endpoint key, if tracked
    pub fn rate_limit_window(&self, endpoint_key: &str) -> Option<RateLimitWindow> {
        self.inner.limiter.window(endpoint_key)
    }

    pub(crate) fn store(&self) -> &DurableStore {
        &self.inner.store
    }

    pub(crate) fn backoff(&self) -> &BackoffPolicy {
        &self.inner.backoff
    }

    pub(crate) async fn now(&self) -> u64 {
        self.inner.time.now_ms().await
    }

    pub(crate) async fn random_unit(&self) -> f64 {
        self.inner.random.random_unit().await
    }

    fn request_timeout(&self) -> Duration {
        self.inner.config.network.request_timeout()
    }

    // ----- caller-facing API -------------------------------------------------

    /// Route one request.
    ///
    /// Returns the response, or a [`QueuedAck`] when a mutating request could
    /// not be delivered. Rate-limit denials and server error statuses are
    /// returned as errors and never queued.
    pub async fn execute(&self, request: GatewayRequest) -> GatewayResult<ExecuteOutcome> {
        let url = self.resolve_url(&request.url)?;
        if self.is_read(&request) {
            self.execute_read(&request, url)
                .await
                .map(ExecuteOutcome::Response)
        } else {
            self.execute_mutation(&request, url).await
        }
    }

    /// Same-origin relative URL for `raw`, or `InvalidRequest`
    fn resolve_url(&self, raw: &str) -> GatewayResult<String> {
        let raw = raw.trim();
        let origin = self
            .inner
            .config
            .api
            .origin
            .as_deref()
            .map(|o| o.trim_end_matches('/'));

        let relative = if raw.starts_with('/') && !raw.starts_with("//") {
            raw.to_string()
        } else if let Some(rest) = origin.and_then(|o| raw.strip_prefix(o)) {
            match rest.chars().next() {
                None => "/".to_string(),
                Some('/') => rest.to_string(),
                Some('?') => format!("/{rest}"),
                Some(_) => {
                    return Err(GatewayError::invalid_request(format!(
                        "'{raw}' is not on the configured origin"
                    )))
                }
            }
        } else if let Some((scheme, _)) = raw.split_once(':') {
            return Err(GatewayError::invalid_request(format!(
                "unsupported URL '{raw}' (scheme '{scheme}' or foreign origin)"
            )));
        } else {
            return Err(GatewayError::invalid_request(format!(
                "'{raw}' is neither an absolute path nor a same-origin URL"
            )));
        };

        if relative.chars().any(char::is_whitespace) {
            return Err(GatewayError::invalid_request(
                "URL must not contain whitespace",
            ));
        }
        let path = relative.split(['?', '#']).next().unwrap_or(&relative);
        if !self
            .inner
            .config
            .api
            .allowed_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Err(GatewayError::invalid_request(format!(
                "'{path}' is outside the configured API prefixes"
            )));
        }
        Ok(relative)
    }

    fn is_read(&self, request: &GatewayRequest) -> bool {
        match request.method {
            Method::Get | Method::Head => true,
            Method::Post => {
                request.query_operation
                    || request
                        .headers
                        .get(&self.inner.config.cache.query_header)
                        .is_some_and(|v| {
                            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
                        })
            }
            Method::Put | Method::Patch | Method::Delete => false,
        }
    }

    async fn execute_read(
        &self,
        request: &GatewayRequest,
        url: String,
    ) -> GatewayResult<GatewayResponse> {
        let Some(route) = self.inner.cache.route_for(&url) else {
            return self.fetch(request, &url, self.request_timeout()).await;
        };

        let key = cache_key(request, &url);
        let now = self.now().await;
        let fresh = self
            .inner
            .cache
            .get(route, &key, now)
            .filter(|hit| hit.fresh);

        match route.strategy {
            CacheStrategy::CacheFirst => {
                if let Some(hit) = fresh {
                    debug!(url = %url, age_ms = hit.age_ms, "Cache hit");
                    if hit.refresh_due {
                        self.spawn_refresh(route, key, request.clone(), url);
                    }
                    return Ok(hit.entry.response.served_from(ResponseSource::Cache));
                }
                debug!(url = %url, "Cache miss");
                let response = self.fetch(request, &url, self.request_timeout()).await?;
                self.store_in_cache(route, &key, &response).await;
                Ok(response)
            }
            CacheStrategy::StaleWhileRevalidate => {
                if let Some(hit) = fresh {
                    debug!(url = %url, age_ms = hit.age_ms, "Cache hit, revalidating");
                    self.spawn_refresh(route, key, request.clone(), url);
                    return Ok(hit.entry.response.served_from(ResponseSource::Cache));
                }
                debug!(url = %url, "Cache miss");
                let response = self.fetch(request, &url, self.request_timeout()).await?;
                self.store_in_cache(route, &key, &response).await;
                Ok(response)
            }
            CacheStrategy::NetworkFirst => {
                let timeout = self
                    .inner
                    .config
                    .network
                    .network_first_timeout()
                    .min(self.request_timeout());
                match self.fetch(request, &url, timeout).await {
                    Ok(response) => {
                        self.store_in_cache(route, &key, &response).await;
                        Ok(response)
                    }
                    Err(GatewayError::NetworkFailure(err)) => match fresh {
                        Some(hit) => {
                            warn!(url = %url, error = %err, age_ms = hit.age_ms, "Network failed, serving cached response");
                            Ok(hit.entry.response.served_from(ResponseSource::StaleCache))
                        }
                        None => Err(GatewayError::NetworkFailure(err)),
                    },
                    Err(other) => Err(other),
                }
            }
        }
    }

    async fn store_in_cache(&self, route: RouteMatch, key: &str, response: &GatewayResponse) {
        let now = self.now().await;
        self.inner.cache.put(route, key, response, now);
    }

    fn spawn_refresh(&self, route: RouteMatch, key: String, request: GatewayRequest, url: String) {
        if !self.inner.refreshing.lock().insert(key.clone()) {
            return;
        }
        let gateway = self.clone();
        tokio::spawn(async move {
            match gateway.fetch(&request, &url, gateway.request_timeout()).await {
                Ok(response) => {
                    gateway.store_in_cache(route, &key, &response).await;
                    debug!(url = %url, "Cache refreshed");
                    gateway
                        .inner
                        .events
                        .emit(GatewayEvent::CacheRefreshed { url: url.clone() });
                }
                Err(err) => debug!(url = %url, error = %err, "Background refresh failed"),
            }
            gateway.inner.refreshing.lock().remove(&key);
        });
    }

    /// Network read: no queuing, no cache
    async fn fetch(
        &self,
        request: &GatewayRequest,
        url: &str,
        timeout: Duration,
    ) -> GatewayResult<GatewayResponse> {
        if !self.inner.connectivity.is_online() {
            return Err(TransportError::Offline.into());
        }
        self.acquire(url).await?;
        let response = self.attempt(request, url, timeout).await?;
        if response.status >= 400 {
            return Err(GatewayError::Remote {
                status: response.status,
                response: Box::new(response),
            });
        }
        Ok(response)
    }

    async fn execute_mutation(
        &self,
        request: &GatewayRequest,
        url: String,
    ) -> GatewayResult<ExecuteOutcome> {
        if !self.inner.connectivity.is_online() {
            debug!(method = %request.method, url = %url, "Offline, queuing without a network attempt");
            return self
                .enqueue(request, url, false)
                .await
                .map(ExecuteOutcome::Queued);
        }

        self.acquire(&url).await?;
        match self.attempt(request, &url, self.request_timeout()).await {
            Ok(response) => self
                .finish_mutation(request, &url, response, None)
                .await
                .map(ExecuteOutcome::Response),
            Err(err) => {
                info!(method = %request.method, url = %url, error = %err, "Delivery failed, queuing");
                self.enqueue(request, url, true)
                    .await
                    .map(ExecuteOutcome::Queued)
            }
        }
    }

    /// Consult the rate limiter for `url`
    async fn acquire(&self, url: &str) -> GatewayResult<()> {
        let now = self.now().await;
        match self.inner.limiter.try_acquire(url, now) {
            RateLimitDecision::Unlimited => Ok(()),
            RateLimitDecision::Allowed { window } => {
                if self.inner.config.rate_limits.persist_windows {
                    if let Err(err) = self.inner.store.save_window(&window).await {
                        warn!(endpoint = %window.endpoint_key, error = %err, "Failed to persist rate-limit window");
                    }
                }
                for evicted in self.inner.limiter.evict(now) {
                    if let Err(err) = self.inner.store.delete_window(&evicted).await {
                        warn!(endpoint = %evicted, error = %err, "Failed to delete evicted window");
                    }
                }
                Ok(())
            }
            RateLimitDecision::Denied {
                endpoint_key,
                retry_after_seconds,
            } => {
                warn!(endpoint = %endpoint_key, retry_after_seconds, "Rate limited");
                self.inner.events.emit(GatewayEvent::RateLimited {
                    endpoint: endpoint_key.clone(),
                    retry_after_seconds,
                });
                Err(GatewayError::RateLimited {
                    endpoint: endpoint_key,
                    retry_after_seconds,
                })
            }
        }
    }

    async fn new_trace_id(&self) -> String {
        let bytes = self.inner.random.random_bytes_16().await;
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string()
    }

    /// One physical exchange: rewrite, stamp a fresh trace id, send
    async fn attempt(
        &self,
        request: &GatewayRequest,
        url: &str,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError> {
        let trace_id = self.new_trace_id().await;
        let rewritten = self
            .inner
            .rewriter
            .rewrite(url, &request.headers, &trace_id);
        let outbound = GatewayRequest {
            url: rewritten.url,
            headers: rewritten.headers,
            ..request.clone()
        };
        debug!(
            method = %outbound.method,
            url = %outbound.url,
            version = %rewritten.version,
            trace_id = %trace_id,
            "Sending request"
        );
        self.inner.transport.send(&outbound, timeout).await
    }

    /// Conflict detection and error-status mapping for a delivered mutation
    async fn finish_mutation(
        &self,
        request: &GatewayRequest,
        url: &str,
        mut response: GatewayResponse,
        operation_id: Option<&OperationId>,
    ) -> GatewayResult<GatewayResponse> {
        if self.is_conflict(&response) {
            response.conflict = self
                .record_conflict(request, url, &response, operation_id)
                .await;
            return Ok(response);
        }
        if response.status >= 400 {
            return Err(GatewayError::Remote {
                status: response.status,
                response: Box::new(response),
            });
        }
        Ok(response)
    }

    fn is_conflict(&self, response: &GatewayResponse) -> bool {
        let conflicts = &self.inner.config.conflicts;
        response.status == conflicts.status
            || response.headers.get(&conflicts.header).is_some_and(|v| {
                !matches!(v.to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
            })
    }

    async fn record_conflict(
        &self,
        request: &GatewayRequest,
        url: &str,
        response: &GatewayResponse,
        operation_id: Option<&OperationId>,
    ) -> Option<ConflictId> {
        let conflicts = &self.inner.config.conflicts;
        let entity_type = response
            .headers
            .get(&conflicts.entity_type_header)
            .or_else(|| request.headers.get(&conflicts.entity_type_header))
            .map(str::to_string)
            .unwrap_or_else(|| entity_type_from_path(url));

        let record = ConflictRecord {
            id: ConflictId::from_random_bytes(self.inner.random.random_bytes_16().await),
            operation_id: operation_id.cloned(),
            entity_type,
            local_version: request
                .headers
                .get(&conflicts.local_version_header)
                .map(str::to_string),
            server_version: response
                .headers
                .get(&conflicts.server_version_header)
                .map(str::to_string),
            status: ConflictStatus::Unresolved,
            detected_at: self.now().await,
            resolved_at: None,
            method: request.method,
            url: url.to_string(),
        };

        if let Err(err) = self.inner.store.insert_conflict(&record).await {
            error!(url = %url, error = %err, "Failed to record version conflict");
            return None;
        }
        warn!(
            conflict_id = %record.id,
            entity_type = %record.entity_type,
            local_version = ?record.local_version,
            server_version = ?record.server_version,
            "Version conflict recorded"
        );
        self.inner.events.emit(GatewayEvent::ConflictDetected {
            conflict_id: record.id,
        });
        Some(record.id)
    }

    async fn enqueue(
        &self,
        request: &GatewayRequest,
        url: String,
        attempted: bool,
    ) -> GatewayResult<QueuedAck> {
        let now = self.now().await;
        let suffix = self.inner.random.random_u64().await;
        let id = self.inner.ids.next(now, suffix);

        let mut op = QueuedOperation::from_request(id.clone(), request, now);
        op.url = url;
        let retry_at = if attempted {
            let unit = self.random_unit().await;
            let at = self.inner.backoff.next_attempt_at(now, 0, unit);
            op.last_attempt_at = Some(now);
            op.next_attempt_at = Some(at);
            at
        } else {
            // Eligible as soon as connectivity returns.
            now.saturating_add(self.inner.config.retry.poll_interval_ms)
        };

        self.inner.store.insert(&op).await?;
        info!(
            operation_id = %id,
            method = %op.method,
            url = %op.url,
            priority = op.priority.0,
            "Queued operation"
        );
        self.inner.events.emit(GatewayEvent::Queued {
            operation_id: id.clone(),
            url: op.url.clone(),
        });

        Ok(QueuedAck {
            operation_id: id,
            estimated_retry_window_ms: retry_at.saturating_sub(now),
        })
    }

    /// Low-level delivery of a queued operation, bypassing the enqueue path.
    ///
    /// `Ok` carries the response (possibly flagged as a conflict); transport
    /// failures, rate-limit denials and error statuses come back as `Err`
    /// for the scheduler to act on.
    pub(crate) async fn deliver_queued(
        &self,
        op: &QueuedOperation,
    ) -> GatewayResult<GatewayResponse> {
        if !self.inner.connectivity.is_online() {
            return Err(TransportError::Offline.into());
        }
        self.acquire(&op.url).await?;
        let request = op.to_request();
        let response = self
            .attempt(&request, &op.url, self.request_timeout())
            .await?;
        self.finish_mutation(&request, &op.url, response, Some(&op.id))
            .await
    }

    // ----- inspection --------------------------------------------------------

    /// A queued operation by id
    pub async fn operation(&self, id: &OperationId) -> GatewayResult<QueuedOperation> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("operation {id}")))
    }

    /// `pending` operations in delivery order
    pub async fn pending_operations(&self) -> GatewayResult<Vec<QueuedOperation>> {
        self.operations_with_status(OperationStatus::Pending).await
    }

    /// Operations in one status, in delivery order
    pub async fn operations_with_status(
        &self,
        status: OperationStatus,
    ) -> GatewayResult<Vec<QueuedOperation>> {
        self.inner.store.operations_with_status(status).await
    }

    /// Cancel a `pending` operation. Fails with `InvalidState` once a
    /// delivery attempt has begun.
    pub async fn cancel(&self, id: &OperationId) -> GatewayResult<QueuedOperation> {
        let op = self.inner.store.cancel(id).await?;
        info!(operation_id = %id, "Canceled operation");
        self.inner.events.emit(GatewayEvent::Canceled {
            operation_id: id.clone(),
        });
        Ok(op)
    }

    /// Conflict records, optionally filtered by status
    pub async fn conflicts(
        &self,
        status: Option<ConflictStatus>,
    ) -> GatewayResult<Vec<ConflictRecord>> {
        self.inner.store.conflicts(status).await
    }

    /// Mark a conflict resolved
    pub async fn resolve_conflict(&self, id: &ConflictId) -> GatewayResult<ConflictRecord> {
        let now = self.now().await;
        let record = self.inner.store.resolve_conflict(id, now).await?;
        info!(conflict_id = %id, "Conflict resolved");
        self.inner
            .events
            .emit(GatewayEvent::ConflictResolved { conflict_id: *id });
        Ok(record)
    }

    pub(crate) fn emit(&self, event: GatewayEvent) {
        self.inner.events.emit(event);
    }
}

/// Last path segment that is neither an id nor a version marker
fn entity_type_from_path(url: &str) -> String {
    normalize_endpoint(url)
        .split('/')
        .filter(|s| !s.is_empty() && *s != ":id")
        .filter(|s| {
            !s.strip_prefix('v')
                .is_some_and(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        })
        .last()
        .unwrap_or("unknown")
        .to_string()
}
