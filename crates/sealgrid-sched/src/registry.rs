//! Worker registry: the set of workers jobs can be admitted onto.
//!
//! Each registered worker owns one `ResourceGate`. Placement ranks the
//! workers that can take a request right now by how loaded they are and
//! hands the job to the least loaded one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use sealgrid_core::{CancelScope, Cancelled, Resources, WorkerId, WorkerResources};

use crate::error::{SchedulerError, SchedulerResult};
use crate::gate::ResourceGate;
use crate::resources::ActiveResources;

/// A registered worker: its capacity and its admission gate.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub resources: WorkerResources,
    pub gate: Arc<ResourceGate>,
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker with the capacity it reported.
    pub async fn register(&self, id: WorkerId, resources: WorkerResources) -> SchedulerResult<WorkerHandle> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&id) {
            return Err(SchedulerError::AlreadyRegistered(id));
        }
        info!(
            worker = %id,
            cpus = resources.cpus,
            gpus = resources.gpus.len(),
            mem_physical = resources.mem_physical,
            "worker registered"
        );
        let handle = WorkerHandle {
            resources,
            gate: Arc::new(ResourceGate::new(id)),
        };
        workers.insert(id, handle.clone());
        Ok(handle)
    }

    /// Remove a worker. Jobs already admitted keep their gate alive until
    /// they finish.
    pub async fn unregister(&self, id: WorkerId) -> SchedulerResult<()> {
        let removed = self.workers.write().await.remove(&id);
        match removed {
            Some(_) => {
                info!(worker = %id, "worker unregistered");
                Ok(())
            }
            None => Err(SchedulerError::WorkerNotFound(id)),
        }
    }

    pub async fn get(&self, id: WorkerId) -> SchedulerResult<WorkerHandle> {
        self.workers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::WorkerNotFound(id))
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Workers that could admit `need` right now, least utilized first.
    ///
    /// Fails with `NoCapableWorker` when no registered worker could fit the
    /// request even while idle.
    pub async fn rank(&self, need: &Resources) -> SchedulerResult<Vec<WorkerId>> {
        let workers = self.workers.read().await;
        let mut capable = false;
        let mut ranked: Vec<(WorkerId, f64)> = Vec::new();

        for (id, w) in workers.iter() {
            if !ActiveResources::new().can_handle_request(need, *id, &w.resources) {
                continue;
            }
            capable = true;
            if w.gate.can_handle_request(need, &w.resources) {
                ranked.push((*id, w.gate.utilization(&w.resources)));
            }
        }

        if !capable {
            return Err(SchedulerError::NoCapableWorker);
        }

        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }

    /// Place a job on the best worker and run it there.
    ///
    /// Picks the least utilized worker that can admit `need` now; when every
    /// capable worker is busy, queues on the least utilized capable one.
    /// `work` receives the id of the worker it was admitted onto.
    pub async fn schedule<F, Fut, T, E>(&self, need: &Resources, scope: &CancelScope, work: F) -> Result<T, E>
    where
        F: FnOnce(WorkerId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Cancelled> + From<SchedulerError>,
    {
        let handle = self.pick(need).await?;
        let id = handle.gate.worker();
        debug!(worker = %id, "job placed");
        handle
            .gate
            .with_resources(&handle.resources, need, scope, || work(id))
            .await
    }

    async fn pick(&self, need: &Resources) -> SchedulerResult<WorkerHandle> {
        if let Some(id) = self.rank(need).await?.first().copied() {
            return self.get(id).await;
        }

        let workers = self.workers.read().await;
        workers
            .iter()
            .filter(|(id, w)| ActiveResources::new().can_handle_request(need, **id, &w.resources))
            .min_by(|a, b| {
                let ua = a.1.gate.utilization(&a.1.resources);
                let ub = b.1.gate.utilization(&b.1.resources);
                ua.total_cmp(&ub).then(a.0.cmp(b.0))
            })
            .map(|(_, w)| w.clone())
            .ok_or(SchedulerError::NoCapableWorker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealgrid_core::Threads;

    fn worker(cpus: u64) -> WorkerResources {
        WorkerResources {
            mem_physical: 32 << 30,
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
    async fn test_register_and_unregister() {
        let registry = WorkerRegistry::new();
        registry.register(WorkerId(1), worker(4)).await.unwrap();
        assert!(matches!(
            registry.register(WorkerId(1), worker(4)).await,
            Err(SchedulerError::AlreadyRegistered(WorkerId(1)))
        ));
        assert_eq!(registry.len().await, 1);

        registry.unregister(WorkerId(1)).await.unwrap();
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.unregister(WorkerId(1)).await,
            Err(SchedulerError::WorkerNotFound(WorkerId(1)))
        ));
    }

    #[tokio::test]
    async fn test_rank_prefers_idle_workers() {
        let registry = WorkerRegistry::new();
        let busy = registry.register(WorkerId(1), worker(8)).await.unwrap();
        registry.register(WorkerId(2), worker(8)).await.unwrap();

        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn({
            let busy = busy.clone();
            async move {
                let scope = CancelScope::background();
                busy.gate
                    .with_resources(&busy.resources, &threads(6), &scope, || async {
                        let _ = hold_rx.await;
                        Ok::<_, Cancelled>(())
                    })
                    .await
            }
        });
        while busy.gate.snapshot().cpu_use() != 6 {
            tokio::task::yield_now().await;
        }

        assert_eq!(registry.rank(&threads(2)).await.unwrap(), vec![WorkerId(2), WorkerId(1)]);
        assert_eq!(registry.rank(&threads(4)).await.unwrap(), vec![WorkerId(2)]);

        hold_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rank_rejects_oversized_request() {
        let registry = WorkerRegistry::new();
        registry.register(WorkerId(1), worker(4)).await.unwrap();
        assert!(matches!(
            registry.rank(&threads(16)).await,
            Err(SchedulerError::NoCapableWorker)
        ));
    }

    #[tokio::test]
    async fn test_schedule_runs_on_least_loaded_worker() {
        let registry = WorkerRegistry::new();
        registry.register(WorkerId(1), worker(2)).await.unwrap();
        registry.register(WorkerId(2), worker(16)).await.unwrap();

        let scope = CancelScope::background();
        let placed = registry
            .schedule(&threads(4), &scope, |id| async move { Ok::<_, SchedulerError>(id) })
            .await
            .unwrap();
        assert_eq!(placed, WorkerId(2));

        let handle = registry.get(WorkerId(2)).await.unwrap();
        assert_eq!(handle.gate.snapshot().cpu_use(), 0);
    }
}
