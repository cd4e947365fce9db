//! Thread↔loop bridge (spec §9, "Looper").
//!
//! The original system needed to hop work from OS threads (the embedded
//! XML-RPC server thread, the connection-checker thread) onto a single
//! cooperative event loop. Tokio's multi-threaded runtime makes most of
//! that unnecessary, but the *shape* of the primitive set is still useful:
//! task tracking with names (for `block_till_done` diagnostics), and an
//! explicit `offload` for blocking work, instead of a global "current loop"
//! singleton. We keep that shape rather than scattering bare `tokio::spawn`
//! calls through the crate.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

/// Tracks spawned tasks by name so `block_till_done` can report which ones
/// are still outstanding when a shutdown is slow (spec §5, "Cancellation
/// and timeouts").
pub struct Looper {
    handle: tokio::runtime::Handle,
    tasks: tokio::sync::Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Looper {
    /// Captures the handle of the runtime this `Looper` is constructed
    /// from. Must be called from within a tokio runtime context.
    pub fn current() -> Self {
        Self { handle: tokio::runtime::Handle::current(), tasks: tokio::sync::Mutex::new(Vec::new()) }
    }

    /// Spawns a named, fire-and-forget task on the loop.
    pub async fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle.spawn(task);
        self.tasks.lock().await.push((name.into(), handle));
    }

    /// Runs a future to completion from a thread that does not itself own
    /// the loop (e.g. the callback server's accept thread), blocking the
    /// calling thread until it resolves.
    pub fn run_sync_from_other_thread<F, T>(&self, task: F) -> T
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::block_in_place(|| self.handle.block_on(task))
    }

    /// Offloads a blocking function (e.g. the XML-RPC worker pool's actual
    /// request/response round trip when a backend-specific client forces
    /// synchronous I/O) onto the runtime's blocking pool.
    pub async fn offload<F, T>(&self, blocking_fn: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self.handle.spawn_blocking(blocking_fn).await {
            Ok(value) => value,
            Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
        }
    }

    /// Awaits all tracked tasks for up to `timeout`, logging (not failing)
    /// the names of any still running afterwards. A task that was
    /// cancelled during normal shutdown is not surfaced as a failure (spec
    /// §5).
    pub async fn block_till_done(&self, timeout: Duration) {
        let mut tasks = self.tasks.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;

        let mut still_running = Vec::new();
        for (name, handle) in tasks.drain(..) {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) if join_err.is_cancelled() => {}
                Ok(Err(join_err)) => warn!(task = %name, error = %join_err, "task panicked"),
                Err(_elapsed) => still_running.push(name),
            }
        }

        if !still_running.is_empty() {
            warn!(tasks = ?still_running, "block_till_done timed out waiting for tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offload_returns_blocking_result() {
        let looper = Looper::current();
        let result = looper.offload(|| 1 + 1).await;
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn block_till_done_waits_for_spawned_tasks() {
        let looper = Looper::current();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = flag.clone();
        looper
            .spawn("test-task", async move {
                flag2.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await;
        looper.block_till_done(Duration::from_secs(1)).await;
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
