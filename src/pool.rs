//! Provider instances and the pool that owns them.
//!
//! A [`ProviderInstance`] is one (family, key, endpoint, model) tuple with
//! its live state: the sliding rate-limit window, the in-flight counter,
//! the error counter driving the circuit breaker, and cumulative stats.
//! All mutation happens under a single per-instance critical section, so
//! the window push, the in-flight increment, and the error accounting are
//! atomic with respect to concurrent dispatches. The sections are short
//! and never held across an await point.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{InstanceConfig, PoolConfig};
use crate::error::ClientError;
use crate::providers::{Endpoint, Family};

/// Consecutive failures before the circuit opens.
pub(crate) const FAILURE_THRESHOLD: u32 = 3;

/// Width of the sliding rate-limit window.
pub(crate) const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct InstanceState {
    active: bool,
    active_requests: u32,
    error_count: u32,
    total_requests: u64,
    total_tokens: u64,
    window: VecDeque<Instant>,
    last_used_at: Option<Instant>,
}

/// One live provider account.
pub struct ProviderInstance {
    family: Family,
    index: usize,
    endpoint: Endpoint,
    rate_limit: u32,
    state: Mutex<InstanceState>,
}

/// Result of asking an instance for a dispatch slot.
pub(crate) enum SlotAttempt {
    /// Slot acquired; the timestamp is enqueued and the in-flight counter
    /// incremented. Dropping the guard without settling rolls both back.
    Begun(DispatchGuard),
    /// Window full; a slot frees when the oldest timestamp ages out.
    ThrottledUntil(Instant),
    /// Circuit is open.
    Inactive,
}

impl ProviderInstance {
    fn new(config: InstanceConfig, index: usize) -> Self {
        let rate_limit = config.rate_limit.max(1);
        Self {
            family: config.family,
            index,
            endpoint: Endpoint {
                api_key: config.api_key,
                api_base: config.api_base,
                model: config.model,
            },
            rate_limit,
            state: Mutex::new(InstanceState {
                active: true,
                active_requests: 0,
                error_count: 0,
                total_requests: 0,
                total_tokens: 0,
                window: VecDeque::with_capacity(rate_limit as usize),
                last_used_at: None,
            }),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Stable instance id, `family#index` with the index taken from the
    /// declaration order within the family.
    pub fn id(&self) -> String {
        format!("{}#{}", self.family, self.index)
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Selection key: load score plus the last-used tiebreak. Lower score
    /// wins; among equal scores the oldest (or never) `last_used_at` wins.
    pub(crate) fn selection_key(&self) -> (f64, Option<Instant>) {
        let state = self.state.lock();
        let score = state.active_requests as f64 + state.error_count as f64 * 0.1;
        (score, state.last_used_at)
    }

    /// Try to start a dispatch now. Checks the circuit, checks the rate
    /// window, enqueues the send timestamp, and increments the in-flight
    /// counter, all in one critical section.
    pub(crate) fn try_begin(self: &Arc<Self>, now: Instant) -> SlotAttempt {
        let mut state = self.state.lock();
        if !state.active {
            return SlotAttempt::Inactive;
        }
        if state.window.len() as u32 >= self.rate_limit {
            if let Some(oldest) = state.window.front().copied() {
                if now.duration_since(oldest) < RATE_WINDOW {
                    return SlotAttempt::ThrottledUntil(oldest + RATE_WINDOW);
                }
                state.window.pop_front();
            }
        }
        state.window.push_back(now);
        state.active_requests += 1;
        SlotAttempt::Begun(DispatchGuard {
            instance: Arc::clone(self),
            settled: false,
        })
    }

    /// Health-probe success: close the circuit and forget past errors.
    pub(crate) fn mark_healthy(&self) {
        let mut state = self.state.lock();
        state.active = true;
        state.error_count = 0;
    }

    pub(crate) fn snapshot(&self) -> InstanceStats {
        let state = self.state.lock();
        InstanceStats {
            id: self.id(),
            model: self.endpoint.model.clone(),
            active: state.active,
            total_requests: state.total_requests,
            total_tokens: state.total_tokens,
            error_count: state.error_count,
        }
    }

    #[cfg(test)]
    pub(crate) fn window_len(&self) -> usize {
        self.state.lock().window.len()
    }

    #[cfg(test)]
    pub(crate) fn force_inactive(&self) {
        self.state.lock().active = false;
    }
}

impl std::fmt::Debug for ProviderInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderInstance")
            .field("id", &self.id())
            .field("model", &self.endpoint.model)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

/// In-flight dispatch handle. Exactly one of [`DispatchGuard::succeed`]
/// or [`DispatchGuard::fail`] settles it; dropping it unsettled (a
/// cancelled caller) rolls the in-flight counter back.
#[derive(Debug)]
pub(crate) struct DispatchGuard {
    instance: Arc<ProviderInstance>,
    settled: bool,
}

impl DispatchGuard {
    pub(crate) fn instance(&self) -> &Arc<ProviderInstance> {
        &self.instance
    }

    pub(crate) fn succeed(mut self, tokens: u64) {
        let mut state = self.instance.state.lock();
        state.active_requests = state.active_requests.saturating_sub(1);
        state.total_requests += 1;
        state.total_tokens += tokens;
        state.last_used_at = Some(Instant::now());
        self.settled = true;
    }

    /// Record a failed dispatch. Returns `true` when this failure opened
    /// the circuit.
    pub(crate) fn fail(mut self) -> bool {
        let mut state = self.instance.state.lock();
        state.active_requests = state.active_requests.saturating_sub(1);
        state.error_count += 1;
        self.settled = true;
        if state.active && state.error_count >= FAILURE_THRESHOLD {
            state.active = false;
            true
        } else {
            false
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.instance.state.lock();
            state.active_requests = state.active_requests.saturating_sub(1);
        }
    }
}

/// All provider instances, in declaration order. Immutable after init.
pub struct ProviderPool {
    instances: Vec<Arc<ProviderInstance>>,
}

impl ProviderPool {
    pub fn new(config: PoolConfig) -> Result<Self, ClientError> {
        if config.instances.is_empty() {
            return Err(ClientError::config("the provider pool is empty"));
        }

        let mut per_family: BTreeMap<Family, usize> = BTreeMap::new();
        let instances = config
            .instances
            .into_iter()
            .map(|instance| {
                let index = per_family.entry(instance.family).or_insert(0);
                let built = Arc::new(ProviderInstance::new(instance, *index));
                *index += 1;
                built
            })
            .collect();

        Ok(Self { instances })
    }

    pub(crate) fn instances(&self) -> &[Arc<ProviderInstance>] {
        &self.instances
    }

    /// Best-effort stats snapshot: each instance is read consistently,
    /// but the pool is not frozen across instances.
    pub fn stats(&self) -> StatsSnapshot {
        let mut families: BTreeMap<Family, Vec<InstanceStats>> = BTreeMap::new();
        for instance in &self.instances {
            families
                .entry(instance.family())
                .or_default()
                .push(instance.snapshot());
        }
        StatsSnapshot { families }
    }
}

/// Read-only view of one instance's counters.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStats {
    pub id: String,
    pub model: String,
    pub active: bool,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub error_count: u32,
}

/// Per-family stats, instances in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub families: BTreeMap<Family, Vec<InstanceStats>>,
}
