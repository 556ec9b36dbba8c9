//! Per-endpoint admission control: token bucket + priority queue.
//!
//! [`RateLimiter::schedule`] never runs an operation inline. It enqueues a
//! [`QueuedRequest`] and hands back a [`ScheduledRequest`] future that
//! resolves once the operation has run (or was rejected). One drain task per
//! endpoint exists only while that endpoint's queue is non-empty:
//!
//! ```text
//! loop:
//!   queue empty          → exit
//!   bucket has a token   → take it, pop head, spawn operation
//!   otherwise            → sleep(exact wait for next token + buffer)
//! ```
//!
//! Queue order is (priority, arrival). When the queue is full a LOW arrival
//! is refused; any other arrival displaces the oldest entry of the lowest
//! priority class present, or the oldest entry overall when every queued
//! entry outranks it.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LimiterConfig;
use crate::endpoint::EndpointId;
use crate::error::{ConnectionError, QueueRejection};
use crate::policy::{TokenBucket, TokenBucketConfig};

/// Request priority. Ordering: `High < Medium < Low` (lower sorts first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Type-erased operation plus the channel its result goes to.
trait Dispatch: Send {
    /// Run on behalf of `charged`, the endpoint whose token was spent.
    fn run(self: Box<Self>, charged: EndpointId) -> BoxFuture<'static, ()>;
    fn reject(self: Box<Self>, err: ConnectionError);
}

struct Job<F, T> {
    op: F,
    tx: oneshot::Sender<Result<T, ConnectionError>>,
}

impl<F, Fut, T> Dispatch for Job<F, T>
where
    F: FnOnce(EndpointId) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ConnectionError>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>, charged: EndpointId) -> BoxFuture<'static, ()> {
        let Job { op, tx } = *self;
        Box::pin(async move {
            let result = op(charged).await;
            let _ = tx.send(result);
        })
    }

    fn reject(self: Box<Self>, err: ConnectionError) {
        let _ = self.tx.send(Err(err));
    }
}

/// An entry waiting in one endpoint's queue.
pub struct QueuedRequest {
    pub id: u64,
    pub priority: Priority,
    pub enqueued_at: Instant,
    job: Box<dyn Dispatch>,
}

impl QueuedRequest {
    fn reject(self, err: ConnectionError) {
        self.job.reject(err);
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

type QueueKey = (Priority, u64);

#[derive(Default)]
struct EndpointQueue {
    entries: BTreeMap<QueueKey, QueuedRequest>,
    draining: bool,
    closed: bool,
}

impl EndpointQueue {
    /// Insert `req`, applying the capacity rule. Returns whichever request was
    /// turned away (the newcomer or an evicted entry) with its reason.
    fn admit(
        &mut self,
        req: QueuedRequest,
        max: usize,
    ) -> Option<(QueuedRequest, QueueRejection)> {
        if self.entries.len() < max {
            self.entries.insert((req.priority, req.id), req);
            return None;
        }
        if req.priority == Priority::Low {
            return Some((req, QueueRejection::Full));
        }
        let lowest = match self.entries.keys().next_back() {
            Some((p, _)) => *p,
            None => return Some((req, QueueRejection::Full)),
        };
        // Everything queued outranks the newcomer: the oldest entry makes room.
        let victim = if lowest < req.priority {
            self.entries.keys().min_by_key(|(_, id)| *id).copied()?
        } else {
            self.entries
                .range((lowest, 0)..=(lowest, u64::MAX))
                .next()
                .map(|(k, _)| *k)?
        };
        let evicted = self.entries.remove(&victim)?;
        self.entries.insert((req.priority, req.id), req);
        Some((evicted, QueueRejection::Evicted))
    }
}

struct EndpointLimiter {
    id: EndpointId,
    bucket: TokenBucket,
    queue: Mutex<EndpointQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct LimiterInner {
    config: LimiterConfig,
    endpoints: RwLock<HashMap<EndpointId, Arc<EndpointLimiter>>>,
    next_id: AtomicU64,
}

/// Per-endpoint rate limiter with priority queues.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                config,
                endpoints: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create the token bucket and (empty) queue for an endpoint.
    ///
    /// `burst` defaults to the configured burst size, capped at the per-minute budget.
    pub fn register_endpoint(
        &self,
        id: EndpointId,
        max_requests_per_minute: u32,
        burst: Option<u32>,
    ) -> Result<(), ConnectionError> {
        if max_requests_per_minute == 0 {
            return Err(ConnectionError::configuration(
                id.network.clone(),
                format!("{}: max_requests_per_minute must be positive", id.url),
            ));
        }
        let mut endpoints = self.inner.endpoints.write().unwrap();
        if endpoints.contains_key(&id) {
            return Err(ConnectionError::DuplicateEndpoint { url: id.url });
        }
        let max_tokens = burst
            .unwrap_or_else(|| self.inner.config.default_burst_size.min(max_requests_per_minute))
            .max(1);
        let bucket = TokenBucket::new(TokenBucketConfig {
            max_tokens,
            per_minute: max_requests_per_minute,
        });
        tracing::debug!(
            endpoint = %id,
            per_minute = max_requests_per_minute,
            burst = max_tokens,
            "rate limiter registered endpoint"
        );
        endpoints.insert(
            id.clone(),
            Arc::new(EndpointLimiter {
                id,
                bucket,
                queue: Mutex::new(EndpointQueue::default()),
                worker: Mutex::new(None),
            }),
        );
        Ok(())
    }

    /// Remove an endpoint. Every request still queued on it is rejected with
    /// `Disconnected`, and its drain task is stopped. Returns the number rejected.
    pub async fn unregister_endpoint(&self, id: &EndpointId) -> Result<usize, ConnectionError> {
        let ep = self
            .inner
            .endpoints
            .write()
            .unwrap()
            .remove(id)
            .ok_or_else(|| ConnectionError::UnknownEndpoint { url: id.url.clone() })?;
        Ok(close_endpoint(&ep).await)
    }

    pub fn is_registered(&self, id: &EndpointId) -> bool {
        self.inner.endpoints.read().unwrap().contains_key(id)
    }

    /// Queue `op` on the endpoint's queue.
    ///
    /// The returned future resolves with the operation's result once it has
    /// been dispatched, or with a rejection (`QueueCapacity`, `Disconnected`,
    /// `UnknownEndpoint`). Refusals are immediate and never block.
    pub fn schedule<F, Fut, T>(
        &self,
        id: &EndpointId,
        priority: Priority,
        op: F,
    ) -> ScheduledRequest<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ConnectionError>> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule_with_endpoint(id, priority, move |_| op())
    }

    /// Like [`schedule`](Self::schedule), but `op` is told which endpoint's
    /// token paid for it. After a [`transfer`](Self::transfer) that is the
    /// endpoint the request was moved to, not the one it was queued on.
    pub fn schedule_with_endpoint<F, Fut, T>(
        &self,
        id: &EndpointId,
        priority: Priority,
        op: F,
    ) -> ScheduledRequest<T>
    where
        F: FnOnce(EndpointId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ConnectionError>> + Send + 'static,
        T: Send + 'static,
    {
        let request_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let endpoint = id.url.clone();

        let Some(ep) = self.endpoint(id) else {
            return ScheduledRequest::settled(
                request_id,
                endpoint.clone(),
                ConnectionError::UnknownEndpoint { url: endpoint },
            );
        };

        let (tx, rx) = oneshot::channel();
        let req = QueuedRequest {
            id: request_id,
            priority,
            enqueued_at: Instant::now(),
            job: Box::new(Job { op, tx }),
        };

        self.enqueue(&ep, vec![req]);
        ScheduledRequest {
            id: request_id,
            endpoint,
            state: ScheduledState::Pending(rx),
        }
    }

    /// Move every request queued on `from` onto `to`, keeping priority and
    /// arrival order. Capacity rules apply to the merged queue. Returns the
    /// number of requests moved.
    pub fn transfer(&self, from: &EndpointId, to: &EndpointId) -> usize {
        if from == to {
            return 0;
        }
        let (Some(src), Some(dst)) = (self.endpoint(from), self.endpoint(to)) else {
            return 0;
        };
        let moved: Vec<QueuedRequest> = {
            let mut q = src.queue.lock().unwrap();
            std::mem::take(&mut q.entries).into_values().collect()
        };
        let count = moved.len();
        if count > 0 {
            tracing::info!(from = %from, to = %to, count, "moving queued requests to new endpoint");
            self.enqueue(&dst, moved);
        }
        count
    }

    /// Number of requests waiting on the endpoint.
    pub fn queue_len(&self, id: &EndpointId) -> Option<usize> {
        self.endpoint(id).map(|ep| ep.queue.lock().unwrap().entries.len())
    }

    /// Tokens currently available to the endpoint.
    pub fn available_tokens(&self, id: &EndpointId) -> Option<f64> {
        self.endpoint(id).map(|ep| ep.bucket.available())
    }

    pub fn bucket_config(&self, id: &EndpointId) -> Option<TokenBucketConfig> {
        self.endpoint(id).map(|ep| ep.bucket.config())
    }

    /// Reject everything queued on every endpoint and stop all drain tasks.
    pub async fn shutdown(&self) {
        let all: Vec<Arc<EndpointLimiter>> = self
            .inner
            .endpoints
            .write()
            .unwrap()
            .drain()
            .map(|(_, ep)| ep)
            .collect();
        for ep in all {
            close_endpoint(&ep).await;
        }
    }

    fn endpoint(&self, id: &EndpointId) -> Option<Arc<EndpointLimiter>> {
        self.inner.endpoints.read().unwrap().get(id).cloned()
    }

    fn enqueue(&self, ep: &Arc<EndpointLimiter>, reqs: Vec<QueuedRequest>) {
        let max = self.inner.config.max_queue_size;
        let mut turned_away = Vec::new();
        let spawn_worker = {
            let mut q = ep.queue.lock().unwrap();
            if q.closed {
                turned_away.extend(reqs.into_iter().map(|r| (r, None)));
                false
            } else {
                for req in reqs {
                    if let Some((rejected, reason)) = q.admit(req, max) {
                        turned_away.push((rejected, Some(reason)));
                    }
                }
                let start = !q.draining && !q.entries.is_empty();
                if start {
                    q.draining = true;
                }
                start
            }
        };

        for (req, reason) in turned_away {
            let endpoint = ep.id.url.clone();
            match reason {
                Some(reason) => {
                    tracing::warn!(
                        endpoint = %ep.id,
                        request = req.id,
                        priority = %req.priority,
                        %reason,
                        "request rejected"
                    );
                    req.reject(ConnectionError::QueueCapacity { endpoint, reason });
                }
                None => req.reject(ConnectionError::Disconnected { endpoint }),
            }
        }

        if spawn_worker {
            let buffer = Duration::from_millis(self.inner.config.dispatch_buffer_ms);
            let handle = tokio::spawn(drain(Arc::clone(ep), buffer));
            *ep.worker.lock().unwrap() = Some(handle);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("endpoints", &self.inner.endpoints.read().unwrap().len())
            .finish()
    }
}

async fn close_endpoint(ep: &EndpointLimiter) -> usize {
    let pending: Vec<QueuedRequest> = {
        let mut q = ep.queue.lock().unwrap();
        q.closed = true;
        q.draining = false;
        std::mem::take(&mut q.entries).into_values().collect()
    };
    let worker = ep.worker.lock().unwrap().take();
    if let Some(handle) = worker {
        handle.abort();
        let _ = handle.await;
    }
    let count = pending.len();
    for req in pending {
        req.reject(ConnectionError::Disconnected {
            endpoint: ep.id.url.clone(),
        });
    }
    if count > 0 {
        tracing::info!(endpoint = %ep.id, count, "rejected queued requests on disconnect");
    }
    count
}

async fn drain(ep: Arc<EndpointLimiter>, buffer: Duration) {
    loop {
        let next = {
            let mut q = ep.queue.lock().unwrap();
            if q.closed || q.entries.is_empty() {
                q.draining = false;
                return;
            }
            if ep.bucket.try_acquire() {
                q.entries.pop_first().map(|(_, req)| Ok(req))
            } else {
                Some(Err(ep.bucket.time_until_next()))
            }
        };

        match next {
            Some(Ok(req)) => {
                tracing::debug!(
                    endpoint = %ep.id,
                    request = req.id,
                    priority = %req.priority,
                    queued_ms = req.enqueued_at.elapsed().as_millis() as u64,
                    "dispatching request"
                );
                tokio::spawn(req.job.run(ep.id.clone()));
            }
            Some(Err(wait)) => {
                tracing::debug!(endpoint = %ep.id, wait_ms = wait.as_millis() as u64, "waiting for token");
                tokio::time::sleep(wait.saturating_add(buffer)).await;
            }
            None => {}
        }
    }
}

enum ScheduledState<T> {
    Pending(oneshot::Receiver<Result<T, ConnectionError>>),
    Settled(Option<ConnectionError>),
}

/// Handle to a scheduled request; resolves exactly once.
pub struct ScheduledRequest<T> {
    id: u64,
    endpoint: String,
    state: ScheduledState<T>,
}

impl<T> ScheduledRequest<T> {
    fn settled(id: u64, endpoint: String, err: ConnectionError) -> Self {
        Self {
            id,
            endpoint,
            state: ScheduledState::Settled(Some(err)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// URL of the endpoint the request was queued on.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<T> Future for ScheduledRequest<T> {
    type Output = Result<T, ConnectionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ScheduledState::Pending(rx) => Pin::new(rx).poll(cx).map(|res| {
                res.unwrap_or_else(|_| {
                    Err(ConnectionError::Disconnected {
                        endpoint: this.endpoint.clone(),
                    })
                })
            }),
            ScheduledState::Settled(err) => Poll::Ready(Err(err.take().unwrap_or_else(|| {
                ConnectionError::Disconnected {
                    endpoint: this.endpoint.clone(),
                }
            }))),
        }
    }
}
