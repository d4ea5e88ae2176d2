//! Resource lifecycle management
//!
//! Infrastructure dependencies are opened through [`ResourceFactory`] and
//! released through [`Resource::close`]. Every successful acquisition pushes
//! one release step onto a [`Teardown`] before the next acquisition begins,
//! so a failure part way through never leaves a resource untracked.
//!
//! ```text
//! build:     telemetry ─► database ─► rpc ─► http ─► writer ─► reader
//! teardown:  reader ─► writer ─► http ─► rpc ─► database ─► telemetry
//! ```

pub mod broker;
pub mod container;
pub mod postgres;
pub mod servers;

pub use broker::{BrokerMessage, BrokerReader, BrokerWriter, ChannelBroker};
pub use container::{Collaborators, InfraContainer, PartialInit};
pub use postgres::{Database, PostgresFactory};
pub use servers::{HttpServer, HttpServerFactory, RpcServer, RpcServerFactory};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::{FaultlineConfig, LifecycleConfig};
use crate::error::{FaultError, FaultResult};
use crate::wrapper::panic_message;

/// A handle to an acquired infrastructure dependency.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Name used in logs and teardown bookkeeping
    fn name(&self) -> &str;

    /// Release the resource. Called at most once by the container.
    async fn close(&self) -> FaultResult<()>;
}

/// Opens a resource from configuration.
#[async_trait]
pub trait ResourceFactory<H>: Send + Sync
where
    H: Resource + ?Sized + 'static,
{
    async fn open(&self, config: &FaultlineConfig) -> FaultResult<Arc<H>>;
}

type ReleaseStep = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct TeardownInner {
    steps: Mutex<Vec<(String, ReleaseStep)>>,
    done: OnceCell<()>,
}

/// Ordered release steps, executed in reverse registration order exactly once.
///
/// Clones share the same steps, so any number of shutdown paths can hold a
/// copy. Concurrent calls to [`Teardown::run`] wait for the single execution
/// to finish.
#[derive(Clone)]
pub struct Teardown {
    inner: Arc<TeardownInner>,
}

impl Teardown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TeardownInner {
                steps: Mutex::new(Vec::new()),
                done: OnceCell::new(),
            }),
        }
    }

    /// Register a release step.
    pub fn push<F, Fut>(&self, name: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.has_run() {
            tracing::warn!(resource = %name, "Release step registered after teardown ran; it will not execute");
        }
        let step: ReleaseStep = Box::new(move || -> BoxFuture<'static, ()> { Box::pin(release()) });
        self.inner.steps.lock().push((name, step));
    }

    /// Register `resource.close()`, bounded by `timeout`. Failures are logged.
    pub fn push_resource<R>(&self, resource: Arc<R>, timeout: Duration)
    where
        R: Resource + ?Sized + 'static,
    {
        let name = resource.name().to_string();
        self.push(name.clone(), move || async move {
            match tokio::time::timeout(timeout, resource.close()).await {
                Ok(Ok(())) => tracing::debug!(resource = %name, "Resource released"),
                Ok(Err(e)) => tracing::warn!(resource = %name, error = %e, "Failed to release resource"),
                Err(_) => tracing::warn!(resource = %name, ?timeout, "Timed out releasing resource"),
            }
        });
    }

    /// Names of the pending steps, in registration order.
    pub fn pending(&self) -> Vec<String> {
        self.inner.steps.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.steps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_run(&self) -> bool {
        self.inner.done.initialized()
    }

    /// Execute every registered step in reverse order. Later calls are no-ops.
    ///
    /// Steps are taken one at a time, so a run that is dropped part way
    /// leaves the rest for the next call. A panicking step is logged and
    /// does not stop the steps registered before it.
    pub async fn run(&self) {
        self.inner
            .done
            .get_or_init(|| async {
                tracing::info!(steps = self.len(), "Running teardown");
                loop {
                    let next = self.inner.steps.lock().pop();
                    let Some((name, release)) = next else {
                        break;
                    };
                    tracing::debug!(resource = %name, "Releasing");
                    if let Err(payload) = AssertUnwindSafe(release()).catch_unwind().await {
                        tracing::error!(
                            resource = %name,
                            panic = %panic_message(payload.as_ref()),
                            "Release step panicked"
                        );
                    }
                }
            })
            .await;
    }
}

impl Default for Teardown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("pending", &self.pending())
            .field("has_run", &self.has_run())
            .finish()
    }
}

/// Run one acquisition step.
///
/// The open future is bounded by `lifecycle.acquire_timeout`; on success the
/// handle's release is pushed onto `teardown` before returning.
pub async fn acquire<H, Fut>(
    teardown: &Teardown,
    name: &str,
    lifecycle: &LifecycleConfig,
    open: Fut,
) -> FaultResult<Arc<H>>
where
    H: Resource + ?Sized + 'static,
    Fut: Future<Output = FaultResult<Arc<H>>>,
{
    let handle = match tokio::time::timeout(lifecycle.acquire_timeout, open).await {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => return Err(e.context(format!("Failed to open {}", name))),
        Err(_) => {
            return Err(FaultError::Timeout {
                resource: name.to_string(),
                duration: lifecycle.acquire_timeout,
            })
        }
    };
    teardown.push_resource(handle.clone(), lifecycle.release_timeout);
    tracing::info!(resource = name, "Acquired");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn steps_run_in_reverse_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let teardown = Teardown::new();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            teardown.push(name, move || async move { log.lock().push(name) });
        }
        assert_eq!(teardown.pending(), vec!["a", "b", "c"]);

        teardown.run().await;
        teardown.clone().run().await;

        assert_eq!(*log.lock(), vec!["c", "b", "a"]);
        assert!(teardown.has_run());
        assert!(teardown.is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_execute_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let teardown = Teardown::new();
        let counter = count.clone();
        teardown.push("slow", move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let teardown = teardown.clone();
                tokio::spawn(async move { teardown.run().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interrupted_run_resumes_with_remaining_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let teardown = Teardown::new();
        let fast = log.clone();
        teardown.push("database", move || async move { fast.lock().push("database") });
        let slow = log.clone();
        teardown.push("http-server", move || async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            slow.lock().push("http-server");
        });

        let interrupted = tokio::time::timeout(Duration::from_millis(20), teardown.run()).await;
        assert!(interrupted.is_err());
        assert!(!teardown.has_run());
        assert_eq!(teardown.pending(), vec!["database"]);

        teardown.run().await;
        assert_eq!(*log.lock(), vec!["database"]);
        assert!(teardown.has_run());
    }

    #[tokio::test]
    async fn panicking_step_does_not_skip_earlier_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let teardown = Teardown::new();
        let first = log.clone();
        teardown.push("telemetry", move || async move { first.lock().push("telemetry") });
        teardown.push("broker-reader", || async {
            if true {
                panic!("reader already closed");
            }
        });

        teardown.run().await;
        assert_eq!(*log.lock(), vec!["telemetry"]);
        assert!(teardown.has_run());
    }

    #[tokio::test]
    async fn acquire_times_out_without_registering() {
        let teardown = Teardown::new();
        let lifecycle = LifecycleConfig {
            acquire_timeout: Duration::from_millis(10),
            release_timeout: Duration::from_millis(10),
        };
        let result: FaultResult<Arc<dyn Resource>> = acquire(&teardown, "database", &lifecycle, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(FaultError::resource("database", "unreachable"))
        })
        .await;

        assert!(matches!(result, Err(FaultError::Timeout { ref resource, .. }) if resource == "database"));
        assert!(teardown.is_empty());
    }
}
