//! Default per-task resource requirements.
//!
//! The large-sector figures follow what sealing hosts are usually
//! provisioned for; small test proofs scale everything down to the sector
//! size so a laptop can run the full pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use sealgrid_core::{Resources, SealProof, Threads};

const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

/// Kind of job a worker runs against a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AddPiece,
    PreCommit1,
    PreCommit2,
    Commit1,
    Commit2,
    Fetch,
    Finalize,
    Unseal,
}

impl TaskType {
    pub const ALL: [TaskType; 8] = [
        TaskType::AddPiece,
        TaskType::PreCommit1,
        TaskType::PreCommit2,
        TaskType::Commit1,
        TaskType::Commit2,
        TaskType::Fetch,
        TaskType::Finalize,
        TaskType::Unseal,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            TaskType::AddPiece => "AP",
            TaskType::PreCommit1 => "PC1",
            TaskType::PreCommit2 => "PC2",
            TaskType::Commit1 => "C1",
            TaskType::Commit2 => "C2",
            TaskType::Fetch => "GET",
            TaskType::Finalize => "FIN",
            TaskType::Unseal => "UNS",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

fn res(min_memory: u64, max_memory: u64, base_min_memory: u64, threads: Threads, can_gpu: bool) -> Resources {
    Resources {
        min_memory,
        max_memory,
        base_min_memory,
        threads,
        can_gpu,
    }
}

/// Default requirement of `task` for sectors sealed with `proof`.
pub fn default_resources(task: TaskType, proof: SealProof) -> Resources {
    use Threads::{All, Fixed};

    match proof {
        SealProof::StackedDrg64GiB => match task {
            TaskType::AddPiece => res(8 * GIB, 8 * GIB, GIB, Fixed(1), false),
            TaskType::PreCommit1 | TaskType::Unseal => res(112 * GIB, 128 * GIB, 10 * GIB, Fixed(1), false),
            TaskType::PreCommit2 => res(30 * GIB, 30 * GIB, GIB, All, true),
            TaskType::Commit1 => res(GIB, GIB, GIB, Fixed(0), false),
            TaskType::Commit2 => res(60 * GIB, 190 * GIB, 64 * GIB, All, true),
            TaskType::Fetch => res(MIB, MIB, 0, Fixed(0), false),
            TaskType::Finalize => res(GIB, 2 * GIB, 0, Fixed(1), false),
        },
        SealProof::StackedDrg32GiB => match task {
            TaskType::AddPiece => res(4 * GIB, 4 * GIB, GIB, Fixed(1), false),
            TaskType::PreCommit1 | TaskType::Unseal => res(56 * GIB, 64 * GIB, 10 * GIB, Fixed(1), false),
            TaskType::PreCommit2 => res(15 * GIB, 15 * GIB, GIB, All, true),
            TaskType::Commit1 => res(GIB, GIB, GIB, Fixed(0), false),
            TaskType::Commit2 => res(30 * GIB, 150 * GIB, 32 * GIB, All, true),
            TaskType::Fetch => res(MIB, MIB, 0, Fixed(0), false),
            TaskType::Finalize => res(GIB, 2 * GIB, 0, Fixed(1), false),
        },
        SealProof::StackedDrg512MiB => match task {
            TaskType::AddPiece => res(2 * GIB, 4 * GIB, GIB, Fixed(1), false),
            TaskType::PreCommit1 | TaskType::Unseal => res(768 * MIB, 768 * MIB, GIB, Fixed(1), false),
            TaskType::PreCommit2 => res(GIB, 1536 * MIB, GIB, All, true),
            TaskType::Commit1 => res(GIB, GIB, GIB, Fixed(0), false),
            TaskType::Commit2 => res(GIB, 1536 * MIB, 10 * GIB, All, true),
            TaskType::Fetch => res(MIB, MIB, 0, Fixed(0), false),
            TaskType::Finalize => res(512 * MIB, GIB, 0, Fixed(1), false),
        },
        SealProof::StackedDrg2KiB | SealProof::StackedDrg8MiB => {
            let size = proof.sector_size();
            match task {
                TaskType::Fetch => res(MIB, MIB, 0, Fixed(0), false),
                TaskType::Commit1 => res(size, size, size, Fixed(0), false),
                TaskType::PreCommit2 | TaskType::Commit2 => res(size, size, size, All, true),
                _ => res(size, size, size, Fixed(1), false),
            }
        }
    }
}
