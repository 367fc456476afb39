//! Resource gate: blocks jobs until their declared resources fit.
//!
//! Admission decisions on one worker are serialized by the gate's mutex;
//! the admitted work itself runs without it, so several admitted jobs can
//! run at once. Every release broadcasts to all waiters because one freed
//! commitment may be enough for several smaller jobs.
//!
//! There is no fairness ordering: after a broadcast, whichever waiter
//! re-checks first wins. A large job can starve while smaller ones keep
//! fitting into the freed capacity.

use std::future::Future;
use std::pin::pin;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use sealgrid_core::{CancelScope, Cancelled, Resources, WorkerId, WorkerResources};

use crate::resources::{ActiveResources, UsedResources};

/// Admission control for a single worker.
#[derive(Debug)]
pub struct ResourceGate {
    worker: WorkerId,
    active: Mutex<ActiveResources>,
    released: Notify,
}

/// Releases its commitment and wakes waiters when dropped.
struct Commitment<'a> {
    gate: &'a ResourceGate,
    used: Option<UsedResources>,
}

impl Drop for Commitment<'_> {
    fn drop(&mut self) {
        if let Some(used) = self.used.take() {
            self.gate.active.lock().free(used);
            self.gate.released.notify_waiters();
        }
    }
}

impl ResourceGate {
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            active: Mutex::new(ActiveResources::new()),
            released: Notify::new(),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Copy of the current committed totals.
    pub fn snapshot(&self) -> ActiveResources {
        self.active.lock().clone()
    }

    pub fn utilization(&self, wr: &WorkerResources) -> f64 {
        self.active.lock().utilization(wr)
    }

    /// Non-blocking admission check against the current totals.
    pub fn can_handle_request(&self, need: &Resources, wr: &WorkerResources) -> bool {
        self.active.lock().can_handle_request(need, self.worker, wr)
    }

    /// Wait until `need` fits, run `work` under the commitment, then release.
    ///
    /// The commitment is released on every exit path: normal return, error,
    /// panic unwinding, or the returned future being dropped mid-flight.
    /// Waiting observes `scope`; `work` itself is not bound to it.
    pub async fn with_resources<F, Fut, T, E>(
        &self,
        wr: &WorkerResources,
        need: &Resources,
        scope: &CancelScope,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        let _commitment = self.admit(wr, need, scope).await.map_err(E::from)?;
        work().await
    }

    async fn admit(
        &self,
        wr: &WorkerResources,
        need: &Resources,
        scope: &CancelScope,
    ) -> Result<Commitment<'_>, Cancelled> {
        let mut warned = false;
        loop {
            // Register for the next release before checking, so a release
            // landing between the check and the await is not missed.
            let mut notified = pin!(self.released.notified());
            notified.as_mut().enable();

            {
                let mut active = self.active.lock();
                if active.can_handle_request(need, self.worker, wr) {
                    let used = active.add(wr, need);
                    debug!(worker = %self.worker, cpu = used.cpu(), gpu = used.gpu(), "resources committed");
                    return Ok(Commitment {
                        gate: self,
                        used: Some(used),
                    });
                }
            }

            if !warned {
                warned = true;
                if !ActiveResources::new().can_handle_request(need, self.worker, wr) {
                    warn!(
                        worker = %self.worker,
                        "request exceeds the worker's total capacity; it will wait until cancelled"
                    );
                }
            }

            tokio::select! {
                _ = notified => {}
                reason = scope.cancelled() => {
                    debug!(worker = %self.worker, %reason, "gave up waiting for resources");
                    return Err(reason);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use sealgrid_core::Threads;

    fn worker(cpus: u64) -> WorkerResources {
        WorkerResources {
            mem_physical: 64 << 30,
            mem_swap: 0,
            mem_reserved: 0,
            cpus,
            gpus: Vec::new(),
            gpu_slots: 1,
        }
    }

    fn threads(n: u64) -> Resources {
        Resources {
            min_memory: 0,
            max_memory: 0,
            base_min_memory: 0,
            threads: Threads::Fixed(n),
            can_gpu: false,
        }
    }

    #[tokio::test]
    async fn runs_work_and_releases() {
        let gate = ResourceGate::new(WorkerId(1));
        let wr = worker(4);
        let scope = CancelScope::background();

        let out: Result<u32, Cancelled> = gate
            .with_resources(&wr, &threads(4), &scope, || async {
                Ok(42)
            })
            .await;

        assert_eq!(out, Ok(42));
        assert_eq!(gate.snapshot(), ActiveResources::new());
    }

    #[derive(Debug, PartialEq)]
    enum JobError {
        Failed,
        Cancelled(Cancelled),
    }

    impl From<Cancelled> for JobError {
        fn from(c: Cancelled) -> Self {
            JobError::Cancelled(c)
        }
    }

    #[tokio::test]
    async fn work_error_is_returned_unchanged() {
        let gate = ResourceGate::new(WorkerId(1));
        let wr = worker(4);
        let scope = CancelScope::background();

        let out: Result<(), JobError> = gate
            .with_resources(&wr, &threads(2), &scope, || async { Err(JobError::Failed) })
            .await;

        assert_eq!(out, Err(JobError::Failed));
        assert_eq!(gate.snapshot().cpu_use(), 0);
    }

    #[tokio::test]
    async fn cancelled_wait_commits_nothing() {
        let gate = Arc::new(ResourceGate::new(WorkerId(1)));
        let wr = worker(4);
        let (scope, handle) = CancelScope::new();

        // Hold the whole worker so the second request has to wait.
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = {
            let gate = gate.clone();
            let wr = wr.clone();
            tokio::spawn(async move {
                let scope = CancelScope::background();
                gate.with_resources(&wr, &threads(4), &scope, || async {
                    let _ = hold_rx.await;
                    Ok::<_, Cancelled>(())
                })
                .await
            })
        };
        while gate.snapshot().cpu_use() != 4 {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let gate = gate.clone();
            let wr = wr.clone();
            tokio::spawn(async move {
                gate.with_resources(&wr, &threads(1), &scope, || async { Ok::<_, Cancelled>(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), Err(Cancelled::Cancelled));
        assert_eq!(gate.snapshot().cpu_use(), 4);

        hold_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(gate.snapshot(), ActiveResources::new());
    }

    #[tokio::test]
    async fn dropping_admitted_work_releases() {
        let gate = Arc::new(ResourceGate::new(WorkerId(1)));
        let wr = worker(4);

        let task = {
            let gate = gate.clone();
            let wr = wr.clone();
            tokio::spawn(async move {
                let scope = CancelScope::background();
                gate.with_resources(&wr, &threads(3), &scope, || async {
                    std::future::pending::<()>().await;
                    Ok::<_, Cancelled>(())
                })
                .await
            })
        };
        while gate.snapshot().cpu_use() != 3 {
            tokio::task::yield_now().await;
        }

        task.abort();
        let _ = task.await;
        assert_eq!(gate.snapshot().cpu_use(), 0);
    }
}
