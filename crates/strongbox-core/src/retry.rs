//! Bounded retries around storage and key store calls.
//!
//! A [`RetryExecutor`] is created per client call. Every step of that call runs
//! through [`RetryExecutor::execute`]; on failure the installed
//! [`ErrorCallback`] (if any) picks the [`Action`], falling back to the step's
//! default. Retries are budgeted per executor, so one client call can never
//! retry more than [`RetryPolicy::max_retries`] times in total.

use std::{fmt, sync::Arc, thread, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    callback::{Action, ErrorCallback, OperationType},
    properties::PropertiesError,
};

/// How many times a call may be re-attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retry budget for a single client call. Zero disables retries.
    pub max_retries: u32,
    /// Base delay; the n-th retry waits `n * backoff_ms`.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 10,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps; handy for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_ms: 0,
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(retry)))
    }
}

/// Options shared by every factory: retry budget and the optional error callback.
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub retry: RetryPolicy,
    pub error_callback: Option<Arc<dyn ErrorCallback>>,
}

impl StoreOptions {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            error_callback: None,
        }
    }

    pub fn with_error_callback(mut self, callback: Arc<dyn ErrorCallback>) -> Self {
        self.error_callback = Some(callback);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("retry", &self.retry)
            .field("error_callback", &self.error_callback.is_some())
            .finish()
    }
}

/// Failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub error: PropertiesError,
    pub retryable: bool,
}

impl AttemptError {
    pub fn retryable(error: PropertiesError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    pub fn fatal(error: PropertiesError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// Final failure of [`RetryExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    pub error: PropertiesError,
    /// The callback asked for the offending record to be deleted.
    pub cleanup: bool,
}

pub struct RetryExecutor<'a> {
    operation: OperationType,
    config_uri: &'a str,
    options: &'a StoreOptions,
    retries: u32,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(operation: OperationType, config_uri: &'a str, options: &'a StoreOptions) -> Self {
        Self {
            operation,
            config_uri,
            options,
            retries: 0,
        }
    }

    /// Retries consumed so far by this executor.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Runs `op` until it succeeds or the resolved action stops it.
    pub fn execute<T>(
        &mut self,
        name: &str,
        key: &str,
        default_action: Action,
        mut op: impl FnMut() -> Result<T, AttemptError>,
    ) -> Result<T, Abort> {
        loop {
            let failure = match op() {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            let status = failure.error.status();
            match self.resolve(status, key, default_action) {
                Action::Retry
                    if failure.retryable && self.retries < self.options.retry.max_retries =>
                {
                    self.retries += 1;
                    warn!(
                        operation = %self.operation,
                        config_uri = self.config_uri,
                        key,
                        name,
                        retry = self.retries,
                        %status,
                        "retrying failed step"
                    );
                    let delay = self.options.retry.delay(self.retries);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Action::ClearData => {
                    debug!(config_uri = self.config_uri, key, name, %status, "cleanup requested");
                    return Err(Abort {
                        error: failure.error,
                        cleanup: true,
                    });
                }
                _ => {
                    debug!(config_uri = self.config_uri, key, name, %status, "step failed");
                    return Err(Abort {
                        error: failure.error,
                        cleanup: false,
                    });
                }
            }
        }
    }

    fn resolve(&self, status: crate::StatusCode, key: &str, default_action: Action) -> Action {
        let decided = match &self.options.error_callback {
            Some(callback) => callback.decide(self.operation, status, self.config_uri, key),
            None => Action::Continue,
        };
        match decided {
            Action::Continue => default_action,
            other => other,
        }
    }
}
