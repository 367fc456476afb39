//! Per-worker resource accounting.
//!
//! `ActiveResources` tracks what the jobs currently admitted onto a worker
//! have committed. It does no I/O and never blocks; `ResourceGate` adds the
//! waiting on top.

use sealgrid_core::{Resources, WorkerId, WorkerResources};
use tracing::debug;

const MIB: u64 = 1 << 20;

/// Running totals committed on one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveResources {
    mem_used_min: u64,
    mem_used_max: u64,
    cpu_use: u64,
    gpu_use: u64,
}

/// Exactly what one `add` committed, handed back to `free`.
///
/// Deliberately neither `Clone` nor `Copy`: a commitment can be released once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a commitment must be passed back to ActiveResources::free"]
pub struct UsedResources {
    mem_used_min: u64,
    mem_used_max: u64,
    cpu_use: u64,
    gpu_use: u64,
}

impl UsedResources {
    pub fn cpu(&self) -> u64 {
        self.cpu_use
    }

    pub fn gpu(&self) -> u64 {
        self.gpu_use
    }
}

/// GPU units a worker offers: every device split into `gpu_slots` slots.
pub fn virtual_gpus(wr: &WorkerResources) -> u64 {
    (wr.gpus.len() as u64).saturating_mul(wr.gpu_slots)
}

/// CPU threads and GPU units a request takes on a given worker.
pub fn need_cpu_gpu(need: &Resources, wr: &WorkerResources) -> (u64, u64) {
    let cpu = need.threads.resolve(wr.cpus);
    let gpu = if need.can_gpu && !wr.gpus.is_empty() { 1 } else { 0 };
    (cpu, gpu)
}

impl ActiveResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu_use(&self) -> u64 {
        self.cpu_use
    }

    pub fn gpu_use(&self) -> u64 {
        self.gpu_use
    }

    pub fn mem_used_min(&self) -> u64 {
        self.mem_used_min
    }

    pub fn mem_used_max(&self) -> u64 {
        self.mem_used_max
    }

    /// Whether `need` fits on the worker next to what is already committed.
    pub fn can_handle_request(&self, need: &Resources, wid: WorkerId, res: &WorkerResources) -> bool {
        // TODO: charge base_min_memory once per task type rather than per job.
        // Sums saturate: an absurd request must be rejected, never wrap into one that fits.
        let min_need_mem = res
            .mem_reserved
            .saturating_add(self.mem_used_min)
            .saturating_add(need.min_memory)
            .saturating_add(need.base_min_memory);
        if min_need_mem > res.mem_physical {
            debug!(
                worker = %wid,
                need_mib = min_need_mem / MIB,
                have_mib = res.mem_physical / MIB,
                "not scheduling on worker; not enough physical memory"
            );
            return false;
        }

        let max_need_mem = res
            .mem_reserved
            .saturating_add(self.mem_used_max)
            .saturating_add(need.max_memory)
            .saturating_add(need.base_min_memory);
        let virtual_mem = res.mem_swap.saturating_add(res.mem_physical);
        if max_need_mem > virtual_mem {
            debug!(
                worker = %wid,
                need_mib = max_need_mem / MIB,
                have_mib = virtual_mem / MIB,
                "not scheduling on worker; not enough virtual memory"
            );
            return false;
        }

        let (need_cpu, need_gpu) = need_cpu_gpu(need, res);

        if self.cpu_use.saturating_add(need_cpu) > res.cpus {
            debug!(
                worker = %wid,
                need = need_cpu,
                in_use = self.cpu_use,
                target = res.cpus,
                "not scheduling on worker; not enough threads"
            );
            return false;
        }

        let gpus = virtual_gpus(res);
        if self.gpu_use.saturating_add(need_gpu) > gpus {
            debug!(
                worker = %wid,
                need = need_gpu,
                in_use = self.gpu_use,
                target = gpus,
                "not scheduling on worker; not enough gpu slots"
            );
            return false;
        }

        true
    }

    /// Commit `need` and return the record that releases it.
    pub fn add(&mut self, wr: &WorkerResources, need: &Resources) -> UsedResources {
        let (cpu, gpu) = need_cpu_gpu(need, wr);
        self.cpu_use = self.cpu_use.saturating_add(cpu);
        self.gpu_use = self.gpu_use.saturating_add(gpu);
        self.mem_used_min = self.mem_used_min.saturating_add(need.min_memory);
        self.mem_used_max = self.mem_used_max.saturating_add(need.max_memory);
        UsedResources {
            mem_used_min: need.min_memory,
            mem_used_max: need.max_memory,
            cpu_use: cpu,
            gpu_use: gpu,
        }
    }

    /// Release a commitment made by `add`.
    pub fn free(&mut self, used: UsedResources) {
        debug_assert!(self.cpu_use >= used.cpu_use, "cpu released more than committed");
        debug_assert!(self.gpu_use >= used.gpu_use, "gpu released more than committed");
        self.mem_used_min = self.mem_used_min.saturating_sub(used.mem_used_min);
        self.mem_used_max = self.mem_used_max.saturating_sub(used.mem_used_max);
        self.cpu_use = self.cpu_use.saturating_sub(used.cpu_use);
        self.gpu_use = self.gpu_use.saturating_sub(used.gpu_use);
    }

    /// Load in `0.0..`: the largest of cpu, min-memory and max-memory usage.
    pub fn utilization(&self, wr: &WorkerResources) -> f64 {
        let cpu = fraction(self.cpu_use, wr.cpus);
        let mem_min = fraction(
            self.mem_used_min.saturating_add(wr.mem_reserved),
            wr.mem_physical,
        );
        let mem_max = fraction(
            self.mem_used_max.saturating_add(wr.mem_reserved),
            wr.mem_physical.saturating_add(wr.mem_swap),
        );
        cpu.max(mem_min).max(mem_max)
    }
}

fn fraction(used: u64, total: u64) -> f64 {
    if total == 0 {
        return if used == 0 { 0.0 } else { 1.0 };
    }
    used as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealgrid_core::Threads;

    const GIB: u64 = 1 << 30;

    fn worker(cpus: u64, gpus: usize) -> WorkerResources {
        WorkerResources {
            mem_physical: 64 * GIB,
            mem_swap: 16 * GIB,
            mem_reserved: 2 * GIB,
            cpus,
            gpus: (0..gpus).map(|i| format!("gpu{i}")).collect(),
            gpu_slots: 1,
        }
    }

    fn need(threads: u64, min: u64, max: u64) -> Resources {
        Resources {
            min_memory: min,
            max_memory: max,
            base_min_memory: 0,
            threads: Threads::Fixed(threads),
            can_gpu: false,
        }
    }

    #[test]
    fn admits_within_capacity() {
        let active = ActiveResources::new();
        assert!(active.can_handle_request(&need(4, GIB, GIB), WorkerId(1), &worker(8, 0)));
    }

    #[test]
    fn rejects_physical_memory_overflow() {
        let active = ActiveResources::new();
        // 2 reserved + 63 > 64 physical
        let big = need(1, 63 * GIB, 63 * GIB);
        assert!(!active.can_handle_request(&big, WorkerId(1), &worker(8, 0)));
    }

    #[test]
    fn base_memory_counts_against_both_limits() {
        let active = ActiveResources::new();
        let mut req = need(1, 30 * GIB, 30 * GIB);
        assert!(active.can_handle_request(&req, WorkerId(1), &worker(8, 0)));
        req.base_min_memory = 33 * GIB;
        assert!(!active.can_handle_request(&req, WorkerId(1), &worker(8, 0)));
    }

    #[test]
    fn huge_requests_are_rejected_not_wrapped() {
        let active = ActiveResources::new();
        let wr = worker(8, 1);

        let mut req = need(1, u64::MAX, 0);
        assert!(!active.can_handle_request(&req, WorkerId(1), &wr));

        req = need(1, GIB, u64::MAX);
        assert!(!active.can_handle_request(&req, WorkerId(1), &wr));

        req = need(1, 0, 0);
        req.base_min_memory = u64::MAX;
        assert!(!active.can_handle_request(&req, WorkerId(1), &wr));

        req = need(u64::MAX, 0, 0);
        assert!(!active.can_handle_request(&req, WorkerId(1), &wr));
    }

    #[test]
    fn saturated_totals_keep_rejecting() {
        let mut active = ActiveResources::new();
        let wr = worker(8, 0);
        let _a = active.add(&wr, &need(1, u64::MAX, u64::MAX));
        let _b = active.add(&wr, &need(1, GIB, GIB));
        assert_eq!(active.mem_used_min(), u64::MAX);
        assert!(!active.can_handle_request(&need(1, 0, 0), WorkerId(1), &wr));
        assert!(active.utilization(&wr) >= 1.0);
    }

    #[test]
    fn rejects_virtual_memory_overflow() {
        let active = ActiveResources::new();
        // min fits physical, max exceeds physical + swap (80 GiB)
        let req = need(1, 10 * GIB, 79 * GIB);
        assert!(!active.can_handle_request(&req, WorkerId(1), &worker(8, 0)));
    }

    #[test]
    fn rejects_cpu_overflow() {
        let mut active = ActiveResources::new();
        let wr = worker(8, 0);
        let _used = active.add(&wr, &need(6, 0, 0));
        assert!(!active.can_handle_request(&need(3, 0, 0), WorkerId(1), &wr));
        assert!(active.can_handle_request(&need(2, 0, 0), WorkerId(1), &wr));
    }

    #[test]
    fn all_threads_takes_the_whole_worker() {
        let mut active = ActiveResources::new();
        let wr = worker(16, 0);
        let mut req = need(0, 0, 0);
        req.threads = Threads::All;
        let used = active.add(&wr, &req);
        assert_eq!(used.cpu(), 16);
        assert!(!active.can_handle_request(&need(1, 0, 0), WorkerId(1), &wr));
    }

    #[test]
    fn gpu_slots_are_limited() {
        let mut active = ActiveResources::new();
        let mut wr = worker(32, 1);
        wr.gpu_slots = 2;
        let mut req = need(1, 0, 0);
        req.can_gpu = true;

        let _a = active.add(&wr, &req);
        let _b = active.add(&wr, &req);
        assert_eq!(active.gpu_use(), 2);
        assert!(!active.can_handle_request(&req, WorkerId(1), &wr));
    }

    #[test]
    fn gpu_jobs_run_on_cpu_only_workers() {
        let active = ActiveResources::new();
        let mut req = need(1, 0, 0);
        req.can_gpu = true;
        assert_eq!(need_cpu_gpu(&req, &worker(4, 0)), (1, 0));
        assert!(active.can_handle_request(&req, WorkerId(1), &worker(4, 0)));
    }

    #[test]
    fn add_then_free_restores_totals() {
        let mut active = ActiveResources::new();
        let wr = worker(8, 2);
        let before = active.clone();

        let mut gpu_req = need(2, GIB, 2 * GIB);
        gpu_req.can_gpu = true;
        let a = active.add(&wr, &gpu_req);
        let b = active.add(&wr, &need(3, 4 * GIB, 8 * GIB));
        assert_eq!(active.cpu_use(), 5);
        assert_eq!(active.mem_used_max(), 10 * GIB);

        active.free(b);
        active.free(a);
        assert_eq!(active, before);
    }

    #[test]
    fn utilization_takes_the_largest_dimension() {
        let mut active = ActiveResources::new();
        let wr = worker(8, 0);
        assert!((active.utilization(&wr) - 2.0 / 64.0).abs() < 1e-9);

        let _used = active.add(&wr, &need(6, 0, 0));
        assert!((active.utilization(&wr) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn utilization_of_empty_worker_is_finite() {
        let active = ActiveResources::new();
        let wr = WorkerResources {
            mem_physical: 0,
            mem_swap: 0,
            mem_reserved: 0,
            cpus: 0,
            gpus: Vec::new(),
            gpu_slots: 1,
        };
        assert_eq!(active.utilization(&wr), 0.0);
    }
}
