//! sealgrid-sched: resource-aware admission of jobs onto workers.
//!
//! A job declares what it needs (`Resources`); a worker reports what it has
//! (`WorkerResources`). The gate admits a job only while the sum of all
//! admitted jobs stays within the worker's memory, CPU and GPU capacity,
//! and parks the rest until a release makes room.
//!
//! # Architecture
//!
//! ```text
//! WorkerRegistry
//!   ├── rank(need) → admissible workers, least utilized first
//!   └── Per-worker handle
//!       ├── WorkerResources (reported capacity)
//!       └── ResourceGate
//!           ├── ActiveResources (committed totals, behind a mutex)
//!           └── Notify (broadcast on every release)
//! ```
//!
//! `table::default_resources` supplies the usual requirement of each task
//! type for a given seal proof.

pub mod error;
pub mod gate;
pub mod registry;
pub mod resources;
pub mod table;

pub use error::{SchedulerError, SchedulerResult};
pub use gate::ResourceGate;
pub use registry::{WorkerHandle, WorkerRegistry};
pub use resources::{ActiveResources, UsedResources, need_cpu_gpu, virtual_gpus};
pub use table::{TaskType, default_resources};
