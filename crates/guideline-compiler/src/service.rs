//! Bounded fan-out of normalizer calls.
//!
//! [`NormalizationService::normalize_all`] sends every criterion to the
//! normalizer on a pool of at most `workers` threads and returns the
//! outcomes in input order once all of them are done. Each call goes
//! through the cache first, is retried with exponential backoff on
//! retryable errors and is cancelled once the run deadline has passed.
//! Under a deadline each call runs on its own thread and is abandoned when
//! the deadline passes first; a late answer is discarded.
//! A failing criterion never fails the run: its outcome carries a
//! [`NormalizationFailure`] instead.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::NormalizationCache;
use crate::config::CompilerConfig;
use crate::error::{CompilerResult, NormalizationFailure, NormalizerError};
use crate::normalizer::{ConceptNormalizer, NormalizationRequest};
use crate::response::{parse_response, NormalizerResponse};
use crate::retry::{remaining, RetryPolicy};

/// Result of normalizing one criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationOutcome {
    /// Criterion text the outcome belongs to.
    pub criterion_text: String,
    /// The parsed response, or why there is none.
    pub result: Result<NormalizerResponse, NormalizationFailure>,
    /// Normalizer calls made (0 for a cache hit or a call cancelled up front).
    pub attempts: u32,
    /// True if the response came from the cache.
    pub from_cache: bool,
}

impl NormalizationOutcome {
    /// Creates a successful outcome, as if returned by a single call.
    pub fn success(criterion_text: impl Into<String>, response: NormalizerResponse) -> Self {
        Self {
            criterion_text: criterion_text.into(),
            result: Ok(response),
            attempts: 1,
            from_cache: false,
        }
    }

    /// Creates a failed outcome.
    pub fn failure(criterion_text: impl Into<String>, failure: NormalizationFailure) -> Self {
        Self {
            criterion_text: criterion_text.into(),
            result: Err(failure),
            attempts: 0,
            from_cache: false,
        }
    }
}

/// Runs normalizer calls for a batch of criteria.
pub struct NormalizationService<'a, N: ?Sized> {
    normalizer: Arc<N>,
    cache: Option<&'a NormalizationCache>,
    workers: usize,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl<'a, N> NormalizationService<'a, N>
where
    N: ConceptNormalizer + ?Sized + 'static,
{
    /// Creates a service using the worker, timeout and retry settings of `config`.
    pub fn new(normalizer: Arc<N>, config: &CompilerConfig) -> Self {
        Self {
            normalizer,
            cache: None,
            workers: config.workers.max(1),
            timeout: config.timeout,
            retry: config.retry,
        }
    }

    /// Consults and fills `cache` on every call.
    pub fn with_cache(mut self, cache: &'a NormalizationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Normalizes all requests, returning outcomes in input order.
    ///
    /// The run deadline is fixed when this is called. Errors are returned
    /// only if the worker pool cannot be created.
    pub fn normalize_all(
        &self,
        requests: &[NormalizationRequest],
    ) -> CompilerResult<Vec<NormalizationOutcome>> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        info!(
            criteria = requests.len(),
            workers = self.workers,
            timeout_ms = self.timeout.map(|t| t.as_millis() as u64),
            "normalizing criteria"
        );

        let outcomes = self.run(requests, deadline)?;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        let cached = outcomes.iter().filter(|o| o.from_cache).count();
        info!(
            criteria = outcomes.len(),
            failed,
            cached,
            "normalization finished"
        );
        Ok(outcomes)
    }

    #[cfg(feature = "parallel")]
    fn run(
        &self,
        requests: &[NormalizationRequest],
        deadline: Option<Instant>,
    ) -> CompilerResult<Vec<NormalizationOutcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("normalizer-{i}"))
            .build()
            .map_err(|e| crate::error::CompilerError::InvalidConfig(e.to_string()))?;
        Ok(pool.install(|| {
            requests
                .par_iter()
                .map(|request| self.normalize_one(request, deadline))
                .collect()
        }))
    }

    #[cfg(not(feature = "parallel"))]
    fn run(
        &self,
        requests: &[NormalizationRequest],
        deadline: Option<Instant>,
    ) -> CompilerResult<Vec<NormalizationOutcome>> {
        Ok(requests
            .iter()
            .map(|request| self.normalize_one(request, deadline))
            .collect())
    }

    /// Normalizes a single request against an optional run deadline.
    pub fn normalize_one(
        &self,
        request: &NormalizationRequest,
        run_deadline: Option<Instant>,
    ) -> NormalizationOutcome {
        let text = request.criterion_text.as_str();

        if let Some(response) = self.cache.and_then(|cache| cache.get(text)) {
            debug!(criterion = %preview(text), "normalization cache hit");
            return NormalizationOutcome {
                criterion_text: text.to_string(),
                result: Ok(response),
                attempts: 0,
                from_cache: true,
            };
        }

        let deadline = earliest(run_deadline, request.deadline);
        let call = NormalizationRequest {
            deadline,
            ..request.clone()
        };
        let finish = |result, attempts| NormalizationOutcome {
            criterion_text: text.to_string(),
            result,
            attempts,
            from_cache: false,
        };

        let mut attempt = 0;
        loop {
            if remaining(deadline) == Some(Duration::ZERO) {
                warn!(criterion = %preview(text), attempt, "normalization cancelled at deadline");
                return finish(Err(NormalizationFailure::TimedOut), attempt);
            }

            attempt += 1;
            let Some(result) = self.call(&call, deadline) else {
                warn!(criterion = %preview(text), attempt, "normalizer call abandoned at deadline");
                return finish(Err(NormalizationFailure::TimedOut), attempt);
            };
            match result {
                Ok(_) if remaining(deadline) == Some(Duration::ZERO) => {
                    warn!(criterion = %preview(text), attempt, "discarding response received after deadline");
                    return finish(Err(NormalizationFailure::TimedOut), attempt);
                }
                Ok(body) => {
                    return match parse_response(&body) {
                        Ok(response) => {
                            if attempt > 1 {
                                info!(criterion = %preview(text), attempt, "normalization succeeded after retry");
                            }
                            if let Some(cache) = self.cache {
                                cache.put(text, response.clone());
                            }
                            finish(Ok(response), attempt)
                        }
                        Err(error) => {
                            warn!(criterion = %preview(text), %error, "malformed normalizer response");
                            finish(Err(NormalizationFailure::Malformed(error)), attempt)
                        }
                    };
                }
                Err(error) if error.is_retryable() && self.retry.allows_retry_after(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    if remaining(deadline).is_some_and(|left| delay >= left) {
                        warn!(
                            criterion = %preview(text),
                            attempt,
                            %error,
                            "retry would pass the deadline, giving up"
                        );
                        return finish(Err(NormalizationFailure::TimedOut), attempt);
                    }
                    warn!(
                        criterion = %preview(text),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "normalizer call failed, will retry"
                    );
                    thread::sleep(delay);
                }
                Err(error) => {
                    warn!(
                        criterion = %preview(text),
                        attempts = attempt,
                        %error,
                        "normalizer unavailable"
                    );
                    return finish(
                        Err(NormalizationFailure::Unavailable {
                            attempts: attempt,
                            last_error: error,
                        }),
                        attempt,
                    );
                }
            }
        }
    }
}

impl<N> NormalizationService<'_, N>
where
    N: ConceptNormalizer + ?Sized + 'static,
{
    /// Makes one normalizer call, waiting no longer than `deadline`.
    ///
    /// Returns `None` when the deadline passes first. The call keeps running
    /// on its thread and its answer is dropped.
    fn call(
        &self,
        request: &NormalizationRequest,
        deadline: Option<Instant>,
    ) -> Option<Result<String, NormalizerError>> {
        let Some(left) = remaining(deadline) else {
            return Some(self.normalizer.normalize(request));
        };

        let (sender, receiver) = mpsc::channel();
        let normalizer = Arc::clone(&self.normalizer);
        let owned = request.clone();
        let spawned = thread::Builder::new()
            .name("normalizer-call".to_string())
            .spawn(move || {
                // Nobody listens once the caller has given up.
                let _ = sender.send(normalizer.normalize(&owned));
            });
        if let Err(error) = spawned {
            warn!(%error, "cannot start normalizer call thread, calling inline");
            return Some(self.normalizer.normalize(request));
        }

        match receiver.recv_timeout(left) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(NormalizerError::Transport(
                "normalizer call panicked".to_string(),
            ))),
        }
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(60) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::ResponseError;
    use std::sync::atomic::{AtomicU32, Ordering};

    const BODY: &str = r#"{"primary_condition": {"term": "Hypotension"}}"#;

    fn typed<F>(f: F) -> Arc<F>
    where
        F: Fn(&NormalizationRequest) -> Result<String, NormalizerError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn counter() -> (Arc<AtomicU32>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (Arc::clone(&calls), calls)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        }
    }

    fn config(retry: RetryPolicy) -> CompilerConfig {
        CompilerConfig::builder().with_workers(2).with_retry(retry).build()
    }

    #[test]
    fn test_success_on_first_call() {
        let normalizer = typed(|_: &NormalizationRequest| Ok(BODY.to_string()));
        let config = config(fast_retry(3));
        let service = NormalizationService::new(normalizer, &config);

        let outcome = service.normalize_one(&NormalizationRequest::new("Hypotension"), None);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.from_cache);
        assert_eq!(outcome.result.unwrap().primary_condition.term, "Hypotension");
    }

    #[test]
    fn test_retries_transport_errors() {
        let (_, seen) = counter();
        let normalizer = typed(move |_: &NormalizationRequest| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NormalizerError::Transport("connection reset".into()))
            } else {
                Ok(BODY.to_string())
            }
        });
        let config = config(fast_retry(3));
        let service = NormalizationService::new(normalizer, &config);

        let outcome = service.normalize_one(&NormalizationRequest::new("Hypotension"), None);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let (calls, seen) = counter();
        let normalizer = typed(move |_: &NormalizationRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(NormalizerError::Transport("down".into()))
        });
        let config = config(fast_retry(3));
        let service = NormalizationService::new(normalizer, &config);

        let outcome = service.normalize_one(&NormalizationRequest::new("x"), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            outcome.result,
            Err(NormalizationFailure::Unavailable { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_rejected_is_not_retried() {
        let (calls, seen) = counter();
        let normalizer = typed(move |_: &NormalizationRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(NormalizerError::Rejected("invalid".into()))
        });
        let config = config(fast_retry(3));
        let service = NormalizationService::new(normalizer, &config);

        let outcome = service.normalize_one(&NormalizationRequest::new("x"), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.result.is_err());
    }

    #[test]
    fn test_malformed_response_is_not_retried() {
        let normalizer =
            typed(|_: &NormalizationRequest| Ok("I could not find a condition.".to_string()));
        let config = config(fast_retry(3));
        let service = NormalizationService::new(normalizer, &config);

        let outcome = service.normalize_one(&NormalizationRequest::new("x"), None);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            outcome.result,
            Err(NormalizationFailure::Malformed(ResponseError::NoJson))
        );
    }

    #[test]
    fn test_expired_deadline_cancels_before_call() {
        let (calls, seen) = counter();
        let normalizer = typed(move |_: &NormalizationRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(BODY.to_string())
        });
        let config = config(fast_retry(3));
        let service = NormalizationService::new(normalizer, &config);

        let outcome = service.normalize_one(&NormalizationRequest::new("x"), Some(Instant::now()));
        assert_eq!(outcome.result, Err(NormalizationFailure::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_longer_than_budget_times_out() {
        let normalizer =
            typed(|_: &NormalizationRequest| Err(NormalizerError::Timeout(Duration::from_secs(1))));
        let config = CompilerConfig::builder()
            .with_retry(RetryPolicy::default())
            .with_timeout(Duration::from_millis(200))
            .build();
        let service = NormalizationService::new(normalizer, &config);

        let started = Instant::now();
        let outcomes = service
            .normalize_all(&[NormalizationRequest::new("x")])
            .unwrap();
        assert_eq!(outcomes[0].result, Err(NormalizationFailure::TimedOut));
        assert_eq!(outcomes[0].attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_slow_call_is_abandoned_at_deadline() {
        let normalizer = typed(|_: &NormalizationRequest| {
            thread::sleep(Duration::from_secs(3));
            Ok(BODY.to_string())
        });
        let cache = NormalizationCache::new(CacheConfig::default());
        let config = CompilerConfig::builder()
            .with_retry(fast_retry(1))
            .with_timeout(Duration::from_millis(200))
            .build();
        let service = NormalizationService::new(normalizer, &config).with_cache(&cache);

        let started = Instant::now();
        let outcomes = service
            .normalize_all(&[NormalizationRequest::new("Hypotension")])
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcomes[0].result, Err(NormalizationFailure::TimedOut));
        assert_eq!(outcomes[0].attempts, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fast_call_under_deadline_succeeds() {
        let normalizer = typed(|_: &NormalizationRequest| Ok(BODY.to_string()));
        let config = CompilerConfig::builder()
            .with_retry(fast_retry(1))
            .with_timeout(Duration::from_secs(5))
            .build();
        let service = NormalizationService::new(normalizer, &config);

        let outcomes = service
            .normalize_all(&[NormalizationRequest::new("Hypotension")])
            .unwrap();
        assert!(outcomes[0].result.is_ok());
    }

    #[test]
    fn test_normalize_all_keeps_input_order() {
        let normalizer = typed(|request: &NormalizationRequest| {
            Ok(format!(
                r#"{{"primary_condition": {{"term": "{}"}}}}"#,
                request.criterion_text.to_uppercase()
            ))
        });
        let config = config(fast_retry(1));
        let service = NormalizationService::new(normalizer, &config);

        let requests: Vec<_> = (0..20)
            .map(|i| NormalizationRequest::new(format!("criterion {i}")))
            .collect();
        let outcomes = service.normalize_all(&requests).unwrap();
        assert_eq!(outcomes.len(), 20);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.criterion_text, format!("criterion {i}"));
            assert_eq!(
                outcome.result.as_ref().unwrap().primary_condition.term,
                format!("CRITERION {i}")
            );
        }
    }

    #[test]
    fn test_cache_is_filled_and_used() {
        let (calls, seen) = counter();
        let normalizer = typed(move |_: &NormalizationRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(BODY.to_string())
        });
        let cache = NormalizationCache::new(CacheConfig::default());
        let config = config(fast_retry(1));
        let service = NormalizationService::new(normalizer, &config).with_cache(&cache);

        let first = service.normalize_one(&NormalizationRequest::new("Hypotension"), None);
        let second = service.normalize_one(&NormalizationRequest::new("  hypotension "), None);
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let normalizer = typed(|_: &NormalizationRequest| Ok("not json".to_string()));
        let cache = NormalizationCache::new(CacheConfig::default());
        let config = config(fast_retry(1));
        let service = NormalizationService::new(normalizer, &config).with_cache(&cache);

        service.normalize_one(&NormalizationRequest::new("x"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_earliest_deadline() {
        let now = Instant::now();
        let later = now + Duration::from_secs(5);
        assert_eq!(earliest(Some(now), Some(later)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(None, None), None);
    }
}
