//! Worker capacity and per-job resource requirements.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a worker registered with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical capacity snapshot of a worker machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResources {
    /// Physical memory in bytes.
    pub mem_physical: u64,
    /// Swap in bytes.
    pub mem_swap: u64,
    /// Memory held back for the OS and non-job processes.
    pub mem_reserved: u64,
    /// Number of CPU threads.
    pub cpus: u64,
    /// GPU device names, in device order.
    pub gpus: Vec<String>,
    /// Concurrent GPU jobs each device accepts.
    #[serde(default = "default_gpu_slots")]
    pub gpu_slots: u64,
}

fn default_gpu_slots() -> u64 {
    1
}

impl WorkerResources {
    /// Snapshot the current host: CPU count, physical memory and swap.
    ///
    /// GPUs cannot be discovered portably and are left for the caller to fill
    /// in from configuration.
    pub fn probe(mem_reserved: u64) -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();

        Self {
            mem_physical: sys.total_memory(),
            mem_swap: sys.total_swap(),
            mem_reserved,
            cpus: sys.cpus().len() as u64,
            gpus: Vec::new(),
            gpu_slots: default_gpu_slots(),
        }
    }
}

/// Thread requirement of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threads {
    Fixed(u64),
    /// Every CPU the worker has.
    All,
}

impl Threads {
    /// Resolve against a worker's CPU count.
    pub fn resolve(self, cpus: u64) -> u64 {
        match self {
            Threads::Fixed(n) => n,
            Threads::All => cpus,
        }
    }
}

/// Declared resource requirement of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Memory the job needs resident.
    pub min_memory: u64,
    /// Memory the job may grow to, swap included.
    pub max_memory: u64,
    /// Floor charged regardless of task type (shared parameters, caches).
    pub base_min_memory: u64,
    pub threads: Threads,
    /// Whether the job runs on a GPU when the worker has one.
    pub can_gpu: bool,
}
