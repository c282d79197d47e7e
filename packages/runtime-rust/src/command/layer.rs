//! Tower adapter: runs an inner service as a protected command.
//!
//! Every request becomes one command execution under the layer's key, so
//! the inner service gets the key's bulkhead, breaker, timeout, and
//! optional fallback without knowing about them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use guardrail_core::OperationKey;
use tower::{Layer, Service, ServiceExt};

use super::error::CommandError;
use super::executor::CommandExecutor;
use super::outcome::Outcome;

/// Fallback shared by every request passing through one layer.
pub type LayerFallback<Req, Resp> =
    Arc<dyn Fn(Req) -> BoxFuture<'static, anyhow::Result<Resp>> + Send + Sync>;

// ---------------------------------------------------------------------------
// CommandLayer
// ---------------------------------------------------------------------------

/// Tower layer that executes each request as the command `key`.
pub struct CommandLayer<Req, Resp> {
    executor: Arc<CommandExecutor>,
    key: OperationKey,
    fallback: Option<LayerFallback<Req, Resp>>,
}

impl<Req, Resp> CommandLayer<Req, Resp> {
    #[must_use]
    pub fn new(executor: Arc<CommandExecutor>, key: impl Into<OperationKey>) -> Self {
        Self {
            executor,
            key: key.into(),
            fallback: None,
        }
    }

    /// Serves `fallback(request)` when the inner service cannot.
    #[must_use]
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        Req: 'static,
        Resp: 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |req| -> BoxFuture<'static, anyhow::Result<Resp>> {
            Box::pin(fallback(req))
        }));
        self
    }
}

impl<Req, Resp> Clone for CommandLayer<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            key: self.key.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for CommandLayer<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandLayer")
            .field("key", &self.key)
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, Req, Resp> Layer<S> for CommandLayer<Req, Resp> {
    type Service = CommandService<S, Req, Resp>;

    fn layer(&self, inner: S) -> Self::Service {
        CommandService {
            inner,
            layer: self.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandService
// ---------------------------------------------------------------------------

/// Service produced by [`CommandLayer`].
///
/// Readiness of the inner service is awaited inside the bulkhead, so a
/// saturated inner service counts against the command's timeout.
pub struct CommandService<S, Req, Resp> {
    inner: S,
    layer: CommandLayer<Req, Resp>,
}

impl<S: Clone, Req, Resp> Clone for CommandService<S, Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            layer: self.layer.clone(),
        }
    }
}

impl<S, Req, Resp> fmt::Debug for CommandService<S, Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandService")
            .field("layer", &self.layer)
            .finish_non_exhaustive()
    }
}

impl<S, Req, Resp> Service<Req> for CommandService<S, Req, Resp>
where
    S: Service<Req, Response = Resp> + Clone + Send + 'static,
    S::Error: Into<anyhow::Error>,
    S::Future: Send + 'static,
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    type Response = Outcome<Resp>;
    type Error = CommandError;
    type Future = BoxFuture<'static, Result<Outcome<Resp>, CommandError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let inner = self.inner.clone();
        let layer = self.layer.clone();
        let op = move |req: Req| async move {
            inner
                .oneshot(req)
                .await
                .map_err(Into::<anyhow::Error>::into)
        };

        Box::pin(async move {
            match layer.fallback {
                Some(fallback) => {
                    layer
                        .executor
                        .execute_with_fallback(&layer.key, req, op, move |req| fallback(req))
                        .await
                }
                None => layer.executor.execute(&layer.key, req, op).await,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::service_fn;

    use super::*;
    use crate::command::error::FailureKind;
    use crate::strategy::Plugins;

    type LicenseLayer = CommandLayer<String, Vec<String>>;

    fn executor() -> Arc<CommandExecutor> {
        Arc::new(CommandExecutor::new(Arc::new(Plugins::default())))
    }

    async fn lookup(org: String) -> anyhow::Result<Vec<String>> {
        if org == "missing" {
            anyhow::bail!("organization {org} not found");
        }
        Ok(vec![format!("license-for-{org}")])
    }

    #[tokio::test]
    async fn passes_requests_through() {
        let svc = LicenseLayer::new(executor(), "licenses").layer(service_fn(lookup));
        let outcome = svc.oneshot("acme".to_string()).await.unwrap();
        assert_eq!(outcome, Outcome::Primary(vec!["license-for-acme".to_string()]));
    }

    #[tokio::test]
    async fn inner_error_surfaces_without_fallback() {
        let svc = LicenseLayer::new(executor(), "licenses").layer(service_fn(lookup));
        let err = svc.oneshot("missing".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::OperationFailed));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn fallback_serves_failed_requests() {
        let layer = LicenseLayer::new(executor(), "licenses")
            .with_fallback(|org: String| async move { Ok(vec![format!("placeholder-{org}")]) });
        let svc = layer.layer(service_fn(lookup));

        let outcome = svc.clone().oneshot("missing".to_string()).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Fallback {
                value: vec!["placeholder-missing".to_string()],
                cause: FailureKind::OperationFailed,
            }
        );
        let outcome = svc.oneshot("acme".to_string()).await.unwrap();
        assert!(!outcome.is_fallback());
    }

    #[tokio::test]
    async fn layers_share_the_key_breaker() {
        let executor = executor();
        let layer = LicenseLayer::new(Arc::clone(&executor), "licenses");
        let first = layer.layer(service_fn(lookup));
        let second = layer.layer(service_fn(lookup));
        first.oneshot("a".to_string()).await.unwrap();
        second.oneshot("b".to_string()).await.unwrap();

        let breaker = executor.breaker(&OperationKey::new("licenses")).unwrap();
        assert_eq!(breaker.stats().success, 2);
    }
}
