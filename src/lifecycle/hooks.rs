//! User-supplied lifecycle hooks.
//!
//! - `pre_master`: master only, before the listening socket opens
//! - `post_master`: master only, the first time every configured worker is ready
//! - worker factory: inside each worker, produces the application router

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::cluster::WorkerId;
use crate::error::BoxError;

/// Asynchronous hook run in the master.
pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Builds the worker's application. Called once per worker process.
pub type WorkerFactory =
    Arc<dyn Fn(WorkerId) -> BoxFuture<'static, Result<axum::Router, BoxError>> + Send + Sync>;

pub(crate) fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

pub(crate) fn worker_factory<F, Fut>(f: F) -> WorkerFactory
where
    F: Fn(WorkerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<axum::Router, BoxError>> + Send + 'static,
{
    Arc::new(move |id| f(id).boxed())
}

/// Guards `post_master` so it fires at most once per master lifetime.
#[derive(Debug, Default)]
pub struct PostMasterLatch {
    fired: AtomicBool,
}

impl PostMasterLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once: the first call where `ready >= expected`.
    pub fn should_fire(&self, ready: usize, expected: usize) -> bool {
        ready >= expected
            && self
                .fired
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Run `post_master` in the background; failures are logged only.
pub(crate) fn spawn_post_master(hook: Hook) {
    tokio::spawn(async move {
        match hook().await {
            Ok(()) => tracing::info!("post_master hook completed"),
            Err(e) => tracing::error!(error = %e, "post_master hook failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn latch_fires_once_at_full_capacity() {
        let latch = PostMasterLatch::new();
        assert!(!latch.should_fire(1, 2));
        assert!(latch.should_fire(2, 2));
        assert!(latch.has_fired());
        // restart cycle reaches full capacity again
        assert!(!latch.should_fire(1, 2));
        assert!(!latch.should_fire(2, 2));
    }

    #[tokio::test]
    async fn hook_wraps_async_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let h = hook(move || {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        h().await.unwrap();
        h().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hook_errors_are_returned() {
        let h = hook(|| async { Err::<(), BoxError>("database unreachable".into()) });
        let err = h().await.unwrap_err();
        assert_eq!(err.to_string(), "database unreachable");
    }
}
