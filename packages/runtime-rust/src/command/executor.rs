//! Command execution: breaker check, bulkhead submission, timeout, fallback.
//!
//! Every primary outcome (success, failure, timeout, short-circuit,
//! rejection) is recorded exactly once. The worker and the waiting caller
//! race to settle a call through a shared [`Settlement`]; whichever takes the
//! breaker permit records the outcome, so a call abandoned on timeout is
//! never counted twice and a call whose caller went away is still counted.

use std::any::Any;
use std::future::{Future, Ready};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use guardrail_core::{EventType, OperationKey};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::breaker::{CallPermit, CircuitBreaker};
use super::bulkhead::{Bulkhead, Work};
use super::config::CommandConfig;
use super::error::{CommandError, FailureKind};
use super::outcome::Outcome;
use crate::context;
use crate::strategy::{Plugins, StrategyRegistry};

/// Fallback type used when none is supplied.
type NoFallback<I, T> = fn(I) -> Ready<anyhow::Result<T>>;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Bulkhead, breaker, and configuration for one key. Created once per key.
#[derive(Debug)]
struct Command {
    config: CommandConfig,
    bulkhead: Arc<Bulkhead>,
    breaker: Arc<CircuitBreaker>,
}

/// Shared between the caller and the worker; the first to settle records.
struct Settlement {
    permit: Mutex<Option<CallPermit>>,
}

impl Settlement {
    fn new(permit: CallPermit) -> Self {
        Self {
            permit: Mutex::new(Some(permit)),
        }
    }

    /// Records `event` if nobody has yet. Returns `true` for the winner.
    fn settle(&self, event: EventType) -> bool {
        let permit = self.permit.lock().take();
        match permit {
            Some(permit) => {
                permit.complete(event);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandExecutor
// ---------------------------------------------------------------------------

/// Runs protected operations under per-key bulkheads and circuit breakers.
#[derive(Debug)]
pub struct CommandExecutor {
    plugins: Arc<Plugins>,
    commands: DashMap<OperationKey, Arc<Command>>,
    closed: AtomicBool,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(plugins: Arc<Plugins>) -> Self {
        Self {
            plugins,
            commands: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn plugins(&self) -> &Arc<Plugins> {
        &self.plugins
    }

    /// Runs `op(input)` under the bulkhead and breaker for `key`.
    ///
    /// # Errors
    ///
    /// Returns the failure kind that stopped the call: `ShortCircuited`,
    /// `Rejected`, `Timeout`, or `OperationFailed`, and `Config` when the
    /// key's configuration is invalid.
    pub async fn execute<I, T, Op, Fut>(
        &self,
        key: &OperationKey,
        input: I,
        op: Op,
    ) -> Result<Outcome<T>, CommandError>
    where
        I: Send + 'static,
        T: Send + 'static,
        Op: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.run(key, input, op, None::<(I, NoFallback<I, T>)>)
            .await
    }

    /// Like [`execute`](Self::execute), but substitutes `fallback(input)`
    /// when the protected operation cannot complete.
    ///
    /// The fallback runs on the calling task with the caller's context and
    /// receives a clone of the same input. A substituted value comes back as
    /// [`Outcome::Fallback`].
    ///
    /// # Errors
    ///
    /// Returns `FallbackFailed` if the fallback fails (it is not retried)
    /// and `Config` when the key's configuration is invalid.
    pub async fn execute_with_fallback<I, T, Op, Fut, Fb, FbFut>(
        &self,
        key: &OperationKey,
        input: I,
        op: Op,
        fallback: Fb,
    ) -> Result<Outcome<T>, CommandError>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        Op: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        Fb: FnOnce(I) -> FbFut,
        FbFut: Future<Output = anyhow::Result<T>>,
    {
        let fallback_input = input.clone();
        self.run(key, input, op, Some((fallback_input, fallback)))
            .await
    }

    /// The breaker for `key`, if the key has been executed.
    #[must_use]
    pub fn breaker(&self, key: &OperationKey) -> Option<Arc<CircuitBreaker>> {
        self.commands.get(key).map(|c| Arc::clone(&c.breaker))
    }

    /// The bulkhead for `key`, if the key has been executed.
    #[must_use]
    pub fn bulkhead(&self, key: &OperationKey) -> Option<Arc<Bulkhead>> {
        self.commands.get(key).map(|c| Arc::clone(&c.bulkhead))
    }

    /// The configuration resolved for `key`, if the key has been executed.
    #[must_use]
    pub fn config(&self, key: &OperationKey) -> Option<CommandConfig> {
        self.commands.get(key).map(|c| c.config.clone())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<OperationKey> {
        self.commands.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shuts down every bulkhead and waits up to `timeout` for them to drain.
    /// Keys first used afterwards are rejected without creating a bulkhead.
    ///
    /// Returns `true` if all drained.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        // Set before collecting: a key created concurrently either sees the
        // flag or is already in the map when its shard is visited.
        self.closed.store(true, Ordering::SeqCst);
        let bulkheads: Vec<Arc<Bulkhead>> = self
            .commands
            .iter()
            .map(|e| Arc::clone(&e.bulkhead))
            .collect();
        tracing::info!(bulkheads = bulkheads.len(), "shutting down command executor");
        let drained =
            futures_util::future::join_all(bulkheads.iter().map(|b| b.shutdown(timeout))).await;
        drained.into_iter().all(|d| d)
    }

    async fn run<I, T, Op, Fut, Fb, FbFut>(
        &self,
        key: &OperationKey,
        input: I,
        op: Op,
        fallback: Option<(I, Fb)>,
    ) -> Result<Outcome<T>, CommandError>
    where
        I: Send + 'static,
        T: Send + 'static,
        Op: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        Fb: FnOnce(I) -> FbFut,
        FbFut: Future<Output = anyhow::Result<T>>,
    {
        let registry = self.plugins.snapshot();
        let command = match self.command(key, &registry) {
            Ok(command) => command,
            Err(error @ CommandError::Rejected { .. }) => {
                publish(&registry, key, EventType::Rejected);
                tracing::debug!(key = %key, "executor shut down, rejecting unseen key");
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        registry.hook().on_start(key);

        let error = if let Some(permit) = command.breaker.try_acquire() {
            let started = Instant::now();
            let result = dispatch(&registry, &command, key, input, op, permit).await;
            registry.metrics().publish_latency(key, started.elapsed());
            match result {
                Ok(value) => {
                    registry.hook().on_success(key);
                    return Ok(Outcome::Primary(value));
                }
                Err(error) => error,
            }
        } else {
            command.breaker.record(EventType::ShortCircuited);
            publish(&registry, key, EventType::ShortCircuited);
            CommandError::ShortCircuited { key: key.clone() }
        };
        registry.hook().on_error(key, &error);

        let Some((input, fallback)) = fallback else {
            publish(&registry, key, EventType::FallbackMissing);
            return Err(error);
        };
        let cause = error.kind().unwrap_or(FailureKind::OperationFailed);
        tracing::info!(key = %key, cause = %cause, "running fallback");
        registry.hook().on_fallback_start(key);

        match fallback(input).await {
            Ok(value) => {
                command.breaker.record(EventType::FallbackSuccess);
                publish(&registry, key, EventType::FallbackSuccess);
                registry.hook().on_fallback_success(key);
                Ok(Outcome::Fallback { value, cause })
            }
            Err(source) => {
                command.breaker.record(EventType::FallbackFailure);
                publish(&registry, key, EventType::FallbackFailure);
                registry.hook().on_fallback_error(key, &source);
                tracing::error!(key = %key, cause = %cause, error = %source, "fallback failed");
                Err(CommandError::FallbackFailed {
                    key: key.clone(),
                    cause,
                    source,
                })
            }
        }
    }

    /// Looks up or lazily creates the command for `key`. Concurrent first
    /// calls for the same key create it once: the map's entry lock is held
    /// while it is built.
    fn command(
        &self,
        key: &OperationKey,
        registry: &StrategyRegistry,
    ) -> Result<Arc<Command>, CommandError> {
        if let Some(existing) = self.commands.get(key) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self.commands.entry(key.clone()).or_try_insert_with(|| {
            if self.closed.load(Ordering::SeqCst) {
                return Err(CommandError::Rejected { key: key.clone() });
            }
            let config = registry.properties().command_config(key);
            config.validate().map_err(|source| CommandError::Config {
                key: key.clone(),
                source,
            })?;
            let bulkhead = registry
                .concurrency()
                .create_bulkhead(key, config.bulkhead());
            let breaker = CircuitBreaker::new(key.clone(), config.breaker());
            tracing::info!(
                key = %key,
                core_size = config.core_size,
                max_queue_size = config.max_queue_size,
                execution_timeout_ms = config.execution_timeout_ms,
                strategy = registry.concurrency().name(),
                "initialized command"
            );
            Ok(Arc::new(Command {
                config,
                bulkhead: Arc::new(bulkhead),
                breaker: Arc::new(breaker),
            }))
        })?;
        Ok(Arc::clone(entry.value()))
    }
}

/// Submits `op(input)` to the bulkhead and waits for its outcome.
async fn dispatch<I, T, Op, Fut>(
    registry: &Arc<StrategyRegistry>,
    command: &Command,
    key: &OperationKey,
    input: I,
    op: Op,
    permit: CallPermit,
) -> Result<T, CommandError>
where
    I: Send + 'static,
    T: Send + 'static,
    Op: FnOnce(I) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let settlement = Arc::new(Settlement::new(permit));
    let (tx, mut rx) = oneshot::channel::<anyhow::Result<T>>();

    let body: Work = {
        let settlement = Arc::clone(&settlement);
        let registry = Arc::clone(registry);
        let key = key.clone();
        Box::pin(async move {
            let result = match AssertUnwindSafe(async move { op(input).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!(
                    "operation panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            let event = if result.is_ok() {
                EventType::Success
            } else {
                EventType::Failure
            };
            if settlement.settle(event) {
                publish(&registry, &key, event);
                // The caller may have gone away; the outcome is already recorded.
                let _ = tx.send(result);
            } else {
                publish(&registry, &key, EventType::LateCompletion);
                tracing::debug!(key = %key, event = %event, "discarding result of abandoned call");
            }
        })
    };

    let carrier = context::capture();
    let work = registry.concurrency().wrap(body, &carrier);
    let Ok(handle) = command.bulkhead.submit(work) else {
        settlement.settle(EventType::Rejected);
        publish(registry, key, EventType::Rejected);
        return Err(CommandError::Rejected { key: key.clone() });
    };

    let config = &command.config;
    let received = if config.execution_timeout_enabled {
        if let Ok(received) = tokio::time::timeout(config.execution_timeout(), &mut rx).await {
            received
        } else {
            if settlement.settle(EventType::Timeout) {
                publish(registry, key, EventType::Timeout);
                if config.interrupt_on_timeout {
                    handle.abort();
                }
                tracing::debug!(
                    key = %key,
                    timeout_ms = config.execution_timeout_ms,
                    "call timed out, abandoning worker"
                );
                return Err(CommandError::Timeout {
                    key: key.clone(),
                    timeout_ms: config.execution_timeout_ms,
                });
            }
            // The worker settled at the deadline; its result is in flight.
            rx.await
        }
    } else {
        rx.await
    };

    match received {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(CommandError::OperationFailed {
            key: key.clone(),
            source,
        }),
        Err(_closed) => {
            // Worker dropped without settling, e.g. the runtime shut down.
            if settlement.settle(EventType::Failure) {
                publish(registry, key, EventType::Failure);
            }
            Err(CommandError::OperationFailed {
                key: key.clone(),
                source: anyhow::anyhow!("worker for {key} stopped before producing a result"),
            })
        }
    }
}

fn publish(registry: &StrategyRegistry, key: &OperationKey, event: EventType) {
    registry.metrics().publish_event(key, event);
    registry.notifier().mark_event(key, event);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
