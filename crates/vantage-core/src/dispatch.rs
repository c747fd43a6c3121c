//! Executor-affine call marshaling
//!
//! All orchestration state is owned by a single control task; nothing is
//! guarded by locks. Code running anywhere else reaches that state
//! through a [`DispatchProxy`]: each call is packaged as a job and posted
//! onto the owning task's queue, where it runs in FIFO order relative to
//! other jobs from the same proxy. The owner itself mutates the target
//! directly, which is the inline path of the same contract.
//!
//! [`DispatchQueue::detach`] invalidates the proxy: any job still queued,
//! and any posted later, becomes a silent no-op. This is the only
//! cancellation primitive; it is deliberate behavior, not a defect. The
//! proxy's lifetime is independent of the target's, so a clone captured
//! by a pending closure stays safe to use after the target is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// A deferred mutation of the target
pub type Job<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// Create a connected queue/proxy pair for a target of type `T`.
///
/// The queue belongs next to the target on its owning task; proxies may
/// be cloned and sent anywhere.
pub fn dispatch_pair<T>() -> (DispatchQueue<T>, DispatchProxy<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let live = Arc::new(AtomicBool::new(true));
    (
        DispatchQueue {
            rx,
            live: Arc::clone(&live),
        },
        DispatchProxy { tx, live },
    )
}

/// Caller-side handle: posts jobs onto the owning task's queue
pub struct DispatchProxy<T> {
    tx: mpsc::UnboundedSender<Job<T>>,
    live: Arc<AtomicBool>,
}

impl<T> Clone for DispatchProxy<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            live: Arc::clone(&self.live),
        }
    }
}

impl<T> DispatchProxy<T> {
    /// Post a call to run on the owning task.
    ///
    /// Fire-and-forget: no result is returned. Calls posted through one
    /// proxy run in post order; after [`DispatchQueue::detach`] the call
    /// is silently discarded.
    pub fn invoke(&self, f: impl FnOnce(&mut T) + Send + 'static) {
        if !self.live.load(Ordering::Acquire) {
            return;
        }
        // A closed queue means the owner is gone: same no-op contract.
        let _ = self.tx.send(Box::new(f));
    }

    /// Whether the target has been detached
    pub fn is_detached(&self) -> bool {
        !self.live.load(Ordering::Acquire)
    }
}

/// Owner-side handle: held next to the target on its owning task
pub struct DispatchQueue<T> {
    rx: mpsc::UnboundedReceiver<Job<T>>,
    live: Arc<AtomicBool>,
}

impl<T> DispatchQueue<T> {
    /// Wait for the next posted job.
    ///
    /// Returns `None` when every proxy has been dropped and the queue is
    /// drained. The job must be run through [`DispatchQueue::apply`] so
    /// the validity check happens immediately before the target is
    /// touched.
    pub async fn recv(&mut self) -> Option<Job<T>> {
        self.rx.recv().await
    }

    /// Run a dequeued job against the target, unless detached
    pub fn apply(&self, job: Job<T>, target: &mut T) {
        if self.live.load(Ordering::Acquire) {
            job(target);
        }
    }

    /// Invalidate all proxies.
    ///
    /// Called from the owning task before the target is destroyed. Jobs
    /// already queued are still dequeued but no longer touch the target.
    pub fn detach(&mut self) {
        self.live.store(false, Ordering::Release);
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        calls: Vec<u32>,
    }

    #[tokio::test]
    async fn test_jobs_run_in_post_order() {
        let (mut queue, proxy) = dispatch_pair::<Counter>();
        let mut target = Counter::default();

        let poster = tokio::spawn(async move {
            for i in 0..100 {
                proxy.invoke(move |c| c.calls.push(i));
            }
        });
        poster.await.unwrap();

        let mut received = 0;
        while received < 100 {
            let job = queue.recv().await.unwrap();
            queue.apply(job, &mut target);
            received += 1;
        }

        assert_eq!(target.calls, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_invoke_does_not_run_on_calling_task() {
        let (mut queue, proxy) = dispatch_pair::<Counter>();
        let mut target = Counter::default();

        proxy.invoke(|c| c.calls.push(1));

        // Nothing ran yet: the mutation only happens once the owner
        // dequeues and applies the job.
        assert!(target.calls.is_empty());

        let job = queue.recv().await.unwrap();
        queue.apply(job, &mut target);
        assert_eq!(target.calls, vec![1]);
    }

    #[tokio::test]
    async fn test_detach_makes_queued_jobs_no_ops() {
        let (mut queue, proxy) = dispatch_pair::<Counter>();
        let mut target = Counter::default();

        proxy.invoke(|c| c.calls.push(1));
        queue.detach();

        // The queued job is still dequeued, but must not touch the target.
        while let Some(job) = queue.recv().await {
            queue.apply(job, &mut target);
        }
        assert!(target.calls.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_after_detach_is_silent() {
        let (mut queue, proxy) = dispatch_pair::<Counter>();
        queue.detach();

        assert!(proxy.is_detached());
        proxy.invoke(|c| c.calls.push(1));

        // Queue is closed and empty.
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_proxy_outlives_target() {
        let (mut queue, proxy) = dispatch_pair::<Counter>();

        {
            let mut target = Counter::default();
            let job = {
                proxy.invoke(|c| c.calls.push(1));
                queue.recv().await.unwrap()
            };
            queue.apply(job, &mut target);
            queue.detach();
        }
        // Target dropped; a stale clone of the proxy must stay harmless.
        let stale = proxy.clone();
        stale.invoke(|c| c.calls.push(2));
        assert!(stale.is_detached());
    }
}
