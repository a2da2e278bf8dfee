//! Per-model retry advice with a shared, process-wide cache.
//!
//! The adviser is a small circuit breaker: each failure a model produces
//! updates a cached verdict for it, and later calls consult that verdict
//! before spending a request on the model again. The cache deliberately
//! outlives individual calls so a flapping backend stays penalized across
//! sessions until it succeeds once.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use switchboard_core::provider::ModelReference;
use switchboard_core::Error;
use tracing::debug;

use crate::backoff::BackoffPolicy;

/// Cached verdict for one model reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    /// Never attempt this model again while the entry is cached.
    Skip,
    /// Attempt again once `base + delay` has elapsed.
    Wait {
        /// When the advice was issued.
        base: Instant,
        /// Consecutive failures counted so far.
        count: u32,
        /// Cool-down computed from the backoff policy.
        delay: Duration,
    },
}

/// Tunables for the retry adviser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    /// Attempts allowed on one model before advancing, when
    /// `prefer_next_provider` is off.
    pub max_attempts_per_provider: u32,
    /// Advance to the next candidate on failure instead of retrying in
    /// place. The failure is still cached either way.
    pub prefer_next_provider: bool,
    /// Cool-down schedule between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts_per_provider: 3,
            prefer_next_provider: true,
            backoff: BackoffPolicy::simple(Duration::from_millis(100)),
        }
    }
}

/// Per-call bookkeeping for one fallback pass over a candidate list.
#[derive(Debug, Default)]
pub struct RetryContext {
    /// The candidate currently being attempted.
    pub current: Option<ModelReference>,
    /// Last error seen per candidate, in attempt order.
    pub errors: indexmap::IndexMap<String, Error>,
}

impl RetryContext {
    /// An empty context with no current candidate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nominates the candidate for subsequent advice queries.
    pub fn set_current(&mut self, reference: ModelReference) {
        self.current = Some(reference);
    }

    /// Records the last error seen for a candidate.
    pub fn record(&mut self, reference: &ModelReference, error: Error) {
        self.errors.insert(reference.name(), error);
    }

    /// Consumes the context, yielding the accumulated error map.
    pub fn into_errors(self) -> indexmap::IndexMap<String, Error> {
        self.errors
    }
}

static SHARED: LazyLock<Arc<RetryAdviser>> = LazyLock::new(|| Arc::new(RetryAdviser::default()));

/// Decides, per model reference, whether to retry in place, cool down, or
/// write the model off.
///
/// [`RetryAdviser::shared`] returns the process-wide instance used by
/// default-constructed sessions; a private instance isolates its cache, for
/// tests or callers that want per-tenant state.
///
/// The skip check and the cache update after a failure take the internal
/// lock separately, so two calls racing on the same model can both pass the
/// skip check before either records its failure. The cache converges on the
/// next query; callers must not rely on the pair being atomic.
#[derive(Debug, Default)]
pub struct RetryAdviser {
    strategy: RetryStrategy,
    cache: Mutex<HashMap<ModelReference, RetryAdvice>>,
}

impl RetryAdviser {
    /// An adviser with its own private cache.
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide shared adviser, using the default strategy.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModelReference, RetryAdvice>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when the context's current candidate should be passed over
    /// without spending a request on it.
    pub fn skip(&self, context: &RetryContext) -> bool {
        let Some(current) = &context.current else {
            return true;
        };
        match self.lock().get(current) {
            Some(RetryAdvice::Skip) => true,
            Some(RetryAdvice::Wait { base, delay, .. }) => Instant::now() < *base + *delay,
            None => false,
        }
    }

    /// Digests a failure of the current candidate.
    ///
    /// Returns `Some(delay)` when the caller should retry the same candidate
    /// after the delay, `None` when it should advance. The cached verdict is
    /// updated in both cases, so a candidate abandoned now is still skipped
    /// or cooled down by later calls.
    pub fn retry(&self, context: &RetryContext, error: &Error) -> Option<Duration> {
        let current = context.current.as_ref()?;
        let mut cache = self.lock();
        let count = match cache.get(current) {
            Some(RetryAdvice::Skip) => return None,
            Some(RetryAdvice::Wait { count, .. }) => count + 1,
            None => 1,
        };
        let delay = self.strategy.backoff.delay(count);
        let advice = if is_permanent(error) {
            RetryAdvice::Skip
        } else {
            RetryAdvice::Wait {
                base: Instant::now(),
                count,
                delay,
            }
        };
        debug!(model = %current.name(), ?advice, "caching retry advice");
        cache.insert(current.clone(), advice);
        if self.strategy.prefer_next_provider {
            return None;
        }
        (count <= self.strategy.max_attempts_per_provider).then_some(delay)
    }

    /// Forgets any cached advice for the model, trusting it again
    /// immediately. Called after a successful request.
    pub fn clean_cache(&self, reference: &ModelReference) {
        self.lock().remove(reference);
    }
}

/// Errors that will keep failing no matter how often the model is retried.
fn is_permanent(error: &Error) -> bool {
    matches!(
        error,
        Error::InvalidApiUrl(_) | Error::UnsupportedProvider(_)
    )
}
