//! The load balancer: selection, rate limiting, retries, and health.
//!
//! Every logical request flows through [`LoadBalancer::dispatch`]:
//!
//! 1. Collect the candidate set (active instances whose family supports
//!    the request kind, narrowed by the per-call pin).
//! 2. Order candidates by load score, `active_requests + 0.1 *
//!    error_count`, breaking ties by oldest `last_used_at`, then by pool
//!    insertion order.
//! 3. Take the first candidate with a free rate-limit slot; if every
//!    candidate is throttled, sleep until the earliest window frees.
//! 4. Run the adapter translation and the HTTP exchange, then settle the
//!    instance counters.
//! 5. On failure, re-select (excluding the instance just tried unless it
//!    is the only one) and retry per the request's [`RetryPolicy`], with
//!    exponential back-off of 250 ms doubling up to 4 s.
//!
//! A background task wakes every five minutes and probes circuit-open
//! instances with a minimal chat call; a successful probe closes the
//! circuit and clears the error count. The task starts lazily on the
//! first dispatch and holds only a weak reference, so dropping the last
//! balancer handle tears it down.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{ClientError, ProviderError};
use crate::models::{
    GenerationParams, LogicalRequest, Message, NormalizedReply, RequestKind, RetryPolicy,
};
use crate::pool::{DispatchGuard, ProviderInstance, ProviderPool, SlotAttempt, StatsSnapshot};
use crate::providers::http::HttpExecutor;
use crate::providers::{Family, ProviderReply};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

/// How often a throttled-out or instance-less dispatch under
/// `RetryPolicy::Infinite` re-checks the candidate set.
const REVIVAL_POLL: Duration = Duration::from_secs(1);

/// Tunables for a balancer.
#[derive(Debug, Clone)]
pub struct BalancerOptions {
    /// Total timeout for each HTTP call.
    pub request_timeout: Duration,
    /// Sleep between health-check passes over inactive instances.
    pub health_interval: Duration,
}

impl Default for BalancerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            health_interval: Duration::from_secs(300),
        }
    }
}

/// Owns the provider pool and routes every request to exactly one
/// instance. Cheap to share behind an `Arc`; all per-instance state is
/// interior.
pub struct LoadBalancer {
    pool: ProviderPool,
    http: HttpExecutor,
    options: BalancerOptions,
    health_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LoadBalancer {
    pub fn new(pool: ProviderPool, options: BalancerOptions) -> Result<Self, ClientError> {
        let http = HttpExecutor::new(options.request_timeout)?;
        Ok(Self {
            pool,
            http,
            options,
            health_task: parking_lot::Mutex::new(None),
        })
    }

    /// Convenience constructor from a parsed configuration.
    pub fn from_config(config: PoolConfig) -> Result<Self, ClientError> {
        Self::new(ProviderPool::new(config)?, BalancerOptions::default())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pool.stats()
    }

    /// Route one logical request, retrying per `policy`. Returns the
    /// normalized reply with the provider-of-record attached, or the
    /// terminal error once attempts are exhausted.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: &LogicalRequest,
        policy: RetryPolicy,
        pin: Option<Family>,
    ) -> Result<NormalizedReply, ClientError> {
        self.ensure_health_task();

        let request_id = Uuid::new_v4();
        let kind = request.kind();
        let max_attempts = policy.max_attempts();
        let mut attempt: u32 = 0;
        let mut backoff = BACKOFF_BASE;
        let mut previous: Option<Arc<ProviderInstance>> = None;

        loop {
            attempt += 1;
            let guard = self
                .acquire(kind, pin, previous.as_ref(), policy.waits_for_revival())
                .await?;
            let instance = Arc::clone(guard.instance());
            tracing::debug!(
                request_id = %request_id,
                instance = %instance.id(),
                attempt,
                "dispatching {kind} request"
            );

            match self.attempt(&instance, request).await {
                Ok(reply) => {
                    guard.succeed(u64::from(reply.usage.total_tokens));
                    return Ok(NormalizedReply {
                        payload: reply.payload,
                        usage: reply.usage,
                        provider: instance.id(),
                    });
                }
                Err(error) => {
                    let opened = guard.fail();
                    tracing::warn!(
                        request_id = %request_id,
                        instance = %instance.id(),
                        attempt,
                        error = %error,
                        "dispatch attempt failed"
                    );
                    if opened {
                        tracing::warn!(
                            instance = %instance.id(),
                            "circuit opened after repeated failures"
                        );
                    }

                    if let Some(max) = max_attempts {
                        if attempt >= max {
                            return Err(ClientError::Provider {
                                provider: instance.id(),
                                source: error,
                            });
                        }
                    }

                    previous = Some(instance);
                    if policy.backs_off() {
                        tokio::time::sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, BACKOFF_CAP);
                    }
                }
            }
        }
    }

    /// One adapter round trip against one instance. Never retries.
    async fn attempt(
        &self,
        instance: &ProviderInstance,
        request: &LogicalRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let wire = instance
            .family()
            .build_request(instance.endpoint(), request)?;
        let body = self.http.execute(wire).await?;
        instance.family().parse_response(request.kind(), body)
    }

    /// Acquire a dispatch slot on the best available instance, waiting on
    /// rate-limit windows and, when `wait_for_revival` is set, on the
    /// health loop repopulating an empty candidate set.
    async fn acquire(
        &self,
        kind: RequestKind,
        pin: Option<Family>,
        exclude: Option<&Arc<ProviderInstance>>,
        wait_for_revival: bool,
    ) -> Result<DispatchGuard, ClientError> {
        loop {
            let candidates = self.ordered_candidates(kind, pin, exclude);
            if candidates.is_empty() {
                if wait_for_revival {
                    tokio::time::sleep(REVIVAL_POLL).await;
                    continue;
                }
                return Err(ClientError::NoProvidersAvailable { kind });
            }

            let now = Instant::now();
            let mut earliest: Option<Instant> = None;
            for instance in &candidates {
                match instance.try_begin(now) {
                    SlotAttempt::Begun(guard) => return Ok(guard),
                    SlotAttempt::ThrottledUntil(at) => {
                        earliest = Some(earliest.map_or(at, |e| e.min(at)));
                    }
                    // The circuit opened between selection and begin.
                    SlotAttempt::Inactive => {}
                }
            }

            match earliest {
                Some(at) => {
                    tracing::debug!("all candidates throttled, waiting for a rate-limit slot");
                    tokio::time::sleep_until(at).await;
                }
                None => {
                    // Every candidate went inactive under us.
                    if wait_for_revival {
                        tokio::time::sleep(REVIVAL_POLL).await;
                    } else {
                        return Err(ClientError::NoProvidersAvailable { kind });
                    }
                }
            }
        }
    }

    /// The candidate set for one selection round, best first.
    pub(crate) fn ordered_candidates(
        &self,
        kind: RequestKind,
        pin: Option<Family>,
        exclude: Option<&Arc<ProviderInstance>>,
    ) -> Vec<Arc<ProviderInstance>> {
        let mut candidates: Vec<&Arc<ProviderInstance>> = self
            .pool
            .instances()
            .iter()
            .filter(|instance| instance.family().supports(kind))
            .filter(|instance| pin.map_or(true, |family| instance.family() == family))
            .filter(|instance| instance.is_active())
            .collect();

        // The previously tried instance is only re-eligible when it is
        // the sole remaining candidate.
        if let Some(exclude) = exclude {
            let kept: Vec<&Arc<ProviderInstance>> = candidates
                .iter()
                .copied()
                .filter(|instance| !Arc::ptr_eq(instance, exclude))
                .collect();
            if !kept.is_empty() {
                candidates = kept;
            }
        }

        let mut keyed: Vec<(f64, Option<Instant>, usize, &Arc<ProviderInstance>)> = candidates
            .into_iter()
            .enumerate()
            .map(|(position, instance)| {
                let (score, last_used) = instance.selection_key();
                (score, last_used, position, instance)
            })
            .collect();

        keyed.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| match (a.1, b.1) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(&y),
                })
                .then_with(|| a.2.cmp(&b.2))
        });

        keyed
            .into_iter()
            .map(|(_, _, _, instance)| Arc::clone(instance))
            .collect()
    }

    fn ensure_health_task(self: &Arc<Self>) {
        let mut slot = self.health_task.lock();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.options.health_interval;
        *slot = Some(tokio::spawn(Self::health_loop(weak, interval)));
    }

    async fn health_loop(weak: Weak<LoadBalancer>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; the probe cadence starts one
        // interval out.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(balancer) = weak.upgrade() else {
                return;
            };
            balancer.probe_inactive().await;
        }
    }

    /// One health pass: probe every circuit-open instance and revive the
    /// ones that answer.
    pub async fn probe_inactive(&self) {
        for instance in self.pool.instances() {
            if instance.is_active() {
                continue;
            }
            match self.probe(instance).await {
                Ok(()) => {
                    instance.mark_healthy();
                    tracing::info!(instance = %instance.id(), "instance revived by health probe");
                }
                Err(error) => {
                    tracing::debug!(
                        instance = %instance.id(),
                        error = %error,
                        "health probe failed, leaving instance inactive"
                    );
                }
            }
        }
    }

    /// Minimal liveness probe: a one-token chat call.
    async fn probe(&self, instance: &ProviderInstance) -> Result<(), ProviderError> {
        let request = LogicalRequest::Chat {
            messages: vec![Message::user("ping")],
            params: GenerationParams::default().with_max_tokens(1),
        };
        self.attempt(instance, &request).await.map(|_| ())
    }

    /// Stop the background health task. Also happens on drop.
    pub fn shutdown(&self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for LoadBalancer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
