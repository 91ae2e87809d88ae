//! Ordered fallback over (filter, endpoint) attempts.
//!
//! ## Attempt Order
//!
//! For each filter, primary first:
//!
//! 1. Walk the endpoint ladder, newest first, skipping rungs already known
//!    to be unsupported
//! 2. Retry transient failures on a rung with backoff; once exhausted, move
//!    to the next rung
//! 3. A 404/405/410 moves to the next rung immediately and is remembered
//! 4. Any other rejection ends the ladder for this filter
//!
//! The first filter whose result is non-empty wins. When every filter comes
//! back empty, the primary's empty result is returned so the caller can
//! report a true zero.

use std::collections::HashSet;
use std::future::Future;
use std::sync::RwLock;

use tracing::{debug, error, warn};

use trackq_core::{Error, Result, SearchEndpoint};

use crate::retry::{retry_with_backoff, RetryPolicy};

/// Endpoints found missing on this tracker deployment.
#[derive(Debug, Default)]
pub struct EndpointMemory {
    unsupported: RwLock<HashSet<SearchEndpoint>>,
}

impl EndpointMemory {
    pub fn is_unsupported(&self, endpoint: SearchEndpoint) -> bool {
        match self.unsupported.read() {
            Ok(set) => set.contains(&endpoint),
            Err(poisoned) => poisoned.into_inner().contains(&endpoint),
        }
    }

    pub fn mark_unsupported(&self, endpoint: SearchEndpoint) {
        match self.unsupported.write() {
            Ok(mut set) => set.insert(endpoint),
            Err(poisoned) => poisoned.into_inner().insert(endpoint),
        };
    }

    /// Ladder with known-missing rungs removed. Never empty: when every rung
    /// has been marked, the full ladder is tried again.
    pub fn usable(&self, ladder: &[SearchEndpoint]) -> Vec<SearchEndpoint> {
        let usable: Vec<_> = ladder
            .iter()
            .copied()
            .filter(|e| !self.is_unsupported(*e))
            .collect();
        if usable.is_empty() {
            ladder.to_vec()
        } else {
            usable
        }
    }
}

/// What the chain settled on.
#[derive(Debug)]
pub struct ChainOutcome<T> {
    pub value: T,
    /// Index into the filters given to `run` (0 is the primary).
    pub filter_index: usize,
    pub endpoint: SearchEndpoint,
    /// Upstream calls made, retries included.
    pub attempts: u32,
    /// Non-fatal failures met along the way.
    pub errors: Vec<String>,
}

/// Runs an operation across filters and endpoints in a fixed order.
pub struct FallbackChain<'a> {
    ladder: &'a [SearchEndpoint],
    policy: RetryPolicy,
    memory: &'a EndpointMemory,
}

impl<'a> FallbackChain<'a> {
    pub fn new(ladder: &'a [SearchEndpoint], policy: RetryPolicy, memory: &'a EndpointMemory) -> Self {
        Self {
            ladder,
            policy,
            memory,
        }
    }

    /// Try `filters` in order until one yields a non-empty value.
    ///
    /// Returns the primary's error when the primary failed and no fallback
    /// produced data.
    pub async fn run<T, F, Fut>(
        &self,
        filters: &[String],
        is_empty: impl Fn(&T) -> bool,
        mut op: F,
    ) -> Result<ChainOutcome<T>>
    where
        F: FnMut(SearchEndpoint, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        let mut errors = Vec::new();
        let mut primary: Option<(T, SearchEndpoint)> = None;
        let mut primary_error: Option<Error> = None;

        for (index, filter) in filters.iter().enumerate() {
            match self.ladder(filter, &mut op, &mut attempts, &mut errors).await {
                Ok((value, endpoint)) if !is_empty(&value) => {
                    if index > 0 {
                        debug!(filter = %filter, fallback = index, "Fallback filter produced data");
                    }
                    return Ok(ChainOutcome {
                        value,
                        filter_index: index,
                        endpoint,
                        attempts,
                        errors,
                    });
                }
                Ok((value, endpoint)) => {
                    debug!(filter = %filter, "Filter returned nothing");
                    if index == 0 {
                        primary = Some((value, endpoint));
                    }
                }
                Err(e) => {
                    errors.push(format!("{}: {}", filter, e));
                    if index == 0 {
                        primary_error = Some(e);
                    }
                }
            }
        }

        match (primary, primary_error) {
            (Some((value, endpoint)), _) => Ok(ChainOutcome {
                value,
                filter_index: 0,
                endpoint,
                attempts,
                errors,
            }),
            (None, Some(e)) => Err(e),
            (None, None) => Err(Error::Internal("fallback chain ran no filters".to_string())),
        }
    }

    async fn ladder<T, F, Fut>(
        &self,
        filter: &str,
        op: &mut F,
        attempts: &mut u32,
        errors: &mut Vec<String>,
    ) -> Result<(T, SearchEndpoint)>
    where
        F: FnMut(SearchEndpoint, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for endpoint in self.memory.usable(self.ladder) {
            let retried = retry_with_backoff(&self.policy, || op(endpoint, filter.to_string())).await;
            *attempts += retried.attempts;

            match retried.result {
                Ok(value) => {
                    debug!(endpoint = %endpoint, filter = %filter, "Endpoint answered");
                    return Ok((value, endpoint));
                }
                Err(e @ Error::EndpointUnsupported { .. }) => {
                    warn!(endpoint = %endpoint, error = %e, "Endpoint unsupported, trying next");
                    self.memory.mark_unsupported(endpoint);
                    last_error = Some(e);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        endpoint = %endpoint,
                        attempt = retried.attempts,
                        error = %e,
                        "Endpoint still failing after retries, trying next"
                    );
                    errors.push(format!("{} endpoint: {}", endpoint, e));
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(endpoint = %endpoint, filter = %filter, error = %e, "Tracker rejected filter");
                    return Err(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Internal("empty endpoint ladder".to_string())))
    }
}
