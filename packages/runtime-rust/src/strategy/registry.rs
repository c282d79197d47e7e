use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::concurrency::{ConcurrencyStrategy, ContextPropagatingStrategy, DefaultConcurrencyStrategy};
use super::hook::{EventNotifier, ExecutionHook, NoopExecutionHook, TracingEventNotifier};
use super::metrics::{FacadeMetricsPublisher, MetricsPublisher};
use super::properties::{PropertiesStrategy, StaticProperties};

// ---------------------------------------------------------------------------
// StrategyRegistry
// ---------------------------------------------------------------------------

/// Immutable set of pluggable policies used by a command executor.
///
/// Changing a policy means building a new registry; see
/// [`Plugins::install_context_propagation`].
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    concurrency: Arc<dyn ConcurrencyStrategy>,
    metrics: Arc<dyn MetricsPublisher>,
    hook: Arc<dyn ExecutionHook>,
    notifier: Arc<dyn EventNotifier>,
    properties: Arc<dyn PropertiesStrategy>,
    /// Whether `concurrency` was explicitly registered rather than defaulted.
    concurrency_registered: bool,
}

impl StrategyRegistry {
    #[must_use]
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Starts a builder pre-populated with this registry's policies.
    #[must_use]
    pub fn to_builder(&self) -> StrategyRegistryBuilder {
        StrategyRegistryBuilder {
            concurrency: self
                .concurrency_registered
                .then(|| Arc::clone(&self.concurrency)),
            metrics: Some(Arc::clone(&self.metrics)),
            hook: Some(Arc::clone(&self.hook)),
            notifier: Some(Arc::clone(&self.notifier)),
            properties: Some(Arc::clone(&self.properties)),
        }
    }

    #[must_use]
    pub fn concurrency(&self) -> &Arc<dyn ConcurrencyStrategy> {
        &self.concurrency
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn MetricsPublisher> {
        &self.metrics
    }

    #[must_use]
    pub fn hook(&self) -> &Arc<dyn ExecutionHook> {
        &self.hook
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<dyn EventNotifier> {
        &self.notifier
    }

    #[must_use]
    pub fn properties(&self) -> &Arc<dyn PropertiesStrategy> {
        &self.properties
    }

    /// The explicitly registered concurrency strategy, if any.
    #[must_use]
    pub fn registered_concurrency(&self) -> Option<&Arc<dyn ConcurrencyStrategy>> {
        self.concurrency_registered.then_some(&self.concurrency)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        StrategyRegistryBuilder::default().build()
    }
}

/// Builder for [`StrategyRegistry`]. Unset policies take defaults.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistryBuilder {
    concurrency: Option<Arc<dyn ConcurrencyStrategy>>,
    metrics: Option<Arc<dyn MetricsPublisher>>,
    hook: Option<Arc<dyn ExecutionHook>>,
    notifier: Option<Arc<dyn EventNotifier>>,
    properties: Option<Arc<dyn PropertiesStrategy>>,
}

impl StrategyRegistryBuilder {
    #[must_use]
    pub fn concurrency(mut self, strategy: Arc<dyn ConcurrencyStrategy>) -> Self {
        self.concurrency = Some(strategy);
        self
    }

    #[must_use]
    pub fn metrics(mut self, publisher: Arc<dyn MetricsPublisher>) -> Self {
        self.metrics = Some(publisher);
        self
    }

    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: Arc<dyn PropertiesStrategy>) -> Self {
        self.properties = Some(properties);
        self
    }

    #[must_use]
    pub fn build(self) -> StrategyRegistry {
        let concurrency_registered = self.concurrency.is_some();
        StrategyRegistry {
            concurrency: self
                .concurrency
                .unwrap_or_else(|| Arc::new(DefaultConcurrencyStrategy)),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(FacadeMetricsPublisher)),
            hook: self.hook.unwrap_or_else(|| Arc::new(NoopExecutionHook)),
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(TracingEventNotifier)),
            properties: self
                .properties
                .unwrap_or_else(|| Arc::new(StaticProperties::default())),
            concurrency_registered,
        }
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// Errors from reconfiguring [`Plugins`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("context propagation is already installed")]
    AlreadyInstalled,
    #[error("registry is sealed: commands have already executed")]
    Sealed,
}

/// Holder of the active [`StrategyRegistry`].
///
/// Readers take a snapshot per command execution; reconfiguration swaps in
/// a complete new registry with one atomic store, so no reader observes a
/// half-applied change. The first snapshot taken by an executor seals the
/// holder against further reconfiguration.
///
/// Sealing and installation serialize on `gate`: either the install lands
/// before the first snapshot, or the install fails with `Sealed`.
#[derive(Debug)]
pub struct Plugins {
    current: ArcSwap<StrategyRegistry>,
    context_installed: AtomicBool,
    sealed: AtomicBool,
    gate: Mutex<()>,
}

impl Plugins {
    #[must_use]
    pub fn new(registry: StrategyRegistry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
            context_installed: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
            gate: Mutex::new(()),
        }
    }

    /// Replaces the concurrency strategy with one that propagates request
    /// context, chaining to the previously registered strategy. Every other
    /// policy is carried over unchanged.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyInstalled` on a second call and
    /// `RegistryError::Sealed` once commands have executed.
    pub fn install_context_propagation(&self) -> Result<(), RegistryError> {
        let _gate = self.gate.lock();
        if self.sealed.load(Ordering::Acquire) {
            return Err(RegistryError::Sealed);
        }
        if self
            .context_installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RegistryError::AlreadyInstalled);
        }

        let existing = self.current.load_full();
        let previous = existing.registered_concurrency().cloned();
        tracing::info!(
            previous = previous.as_ref().map_or("none", |p| p.name()),
            "installing context-propagating concurrency strategy"
        );
        let rebuilt = existing
            .to_builder()
            .concurrency(Arc::new(ContextPropagatingStrategy::new(previous)))
            .build();
        self.current.store(Arc::new(rebuilt));
        Ok(())
    }

    /// The active registry, without sealing.
    #[must_use]
    pub fn current(&self) -> Arc<StrategyRegistry> {
        self.current.load_full()
    }

    /// The active registry for one execution. Seals the holder.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StrategyRegistry> {
        if self.sealed.load(Ordering::Acquire) {
            return self.current.load_full();
        }
        let _gate = self.gate.lock();
        self.sealed.store(true, Ordering::Release);
        self.current.load_full()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl Default for Plugins {
    fn default() -> Self {
        Self::new(StrategyRegistry::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use guardrail_core::{EventType, OperationKey};

    use super::*;
    use crate::strategy::metrics::NoopMetricsPublisher;

    #[derive(Debug)]
    struct SecurityStrategy;

    impl ConcurrencyStrategy for SecurityStrategy {
        fn name(&self) -> &'static str {
            "security"
        }
    }

    #[derive(Debug)]
    struct CountingNotifier;

    impl EventNotifier for CountingNotifier {
        fn mark_event(&self, _key: &OperationKey, _event: EventType) {}
    }

    #[test]
    fn defaults_fill_unset_policies() {
        let registry = StrategyRegistry::default();
        assert_eq!(registry.concurrency().name(), "default");
        assert_eq!(registry.metrics().name(), "metrics-facade");
        assert_eq!(registry.properties().name(), "static");
        assert!(registry.registered_concurrency().is_none());
    }

    #[test]
    fn install_without_previous_strategy() {
        let plugins = Plugins::default();
        plugins.install_context_propagation().unwrap();
        let registry = plugins.current();
        assert_eq!(registry.concurrency().name(), "context-propagating");
    }

    #[test]
    fn install_preserves_previous_and_other_policies() {
        let metrics: Arc<dyn MetricsPublisher> = Arc::new(NoopMetricsPublisher);
        let notifier: Arc<dyn EventNotifier> = Arc::new(CountingNotifier);
        let plugins = Plugins::new(
            StrategyRegistry::builder()
                .concurrency(Arc::new(SecurityStrategy))
                .metrics(Arc::clone(&metrics))
                .notifier(Arc::clone(&notifier))
                .build(),
        );
        let before = plugins.current();

        plugins.install_context_propagation().unwrap();
        let after = plugins.current();

        assert_eq!(after.concurrency().name(), "context-propagating");
        assert!(Arc::ptr_eq(after.metrics(), &metrics));
        assert!(Arc::ptr_eq(after.notifier(), &notifier));
        assert!(Arc::ptr_eq(after.hook(), before.hook()));
        assert!(Arc::ptr_eq(after.properties(), before.properties()));
        // The old snapshot is untouched.
        assert_eq!(before.concurrency().name(), "security");
    }

    #[test]
    fn install_runs_once() {
        let plugins = Plugins::default();
        plugins.install_context_propagation().unwrap();
        assert_eq!(
            plugins.install_context_propagation(),
            Err(RegistryError::AlreadyInstalled)
        );
    }

    #[test]
    fn install_racing_first_snapshot_is_all_or_nothing() {
        for _ in 0..200 {
            let plugins = Plugins::default();
            let barrier = std::sync::Barrier::new(5);
            let (installed, seen) = std::thread::scope(|scope| {
                let readers: Vec<_> = (0..4)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            plugins.snapshot().concurrency().name()
                        })
                    })
                    .collect();
                barrier.wait();
                let installed = plugins.install_context_propagation();
                let seen: Vec<&'static str> =
                    readers.into_iter().map(|r| r.join().unwrap()).collect();
                (installed, seen)
            });

            let expected = match installed {
                Ok(()) => "context-propagating",
                Err(RegistryError::Sealed) => "default",
                Err(other) => panic!("unexpected {other:?}"),
            };
            assert!(seen.iter().all(|name| *name == expected), "{seen:?}");
        }
    }

    #[test]
    fn install_after_first_execution_is_refused() {
        let plugins = Plugins::default();
        let _ = plugins.snapshot();
        assert!(plugins.is_sealed());
        assert_eq!(
            plugins.install_context_propagation(),
            Err(RegistryError::Sealed)
        );
    }
}
