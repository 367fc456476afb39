//! Sector and storage identifiers shared across sealgrid crates.
//!
//! These types travel over the wire (index records, stat payloads) and
//! through the store APIs, so all of them are serde-serializable.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a sector: the owning miner plus its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorId {
    pub miner: u64,
    pub number: u64,
}

impl SectorId {
    pub fn new(miner: u64, number: u64) -> Self {
        Self { miner, number }
    }
}

/// Canonical sector file name, e.g. `s-t01000-42`.
impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

impl FromStr for SectorId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("s-t0")
            .ok_or_else(|| ParseError::SectorName(s.to_string()))?;
        let (miner, number) = rest
            .split_once('-')
            .ok_or_else(|| ParseError::SectorName(s.to_string()))?;
        let miner = miner
            .parse()
            .map_err(|_| ParseError::SectorName(s.to_string()))?;
        let number = number
            .parse()
            .map_err(|_| ParseError::SectorName(s.to_string()))?;
        Ok(Self { miner, number })
    }
}

/// Errors from parsing identifiers out of paths and URLs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid sector name: {0}")]
    SectorName(String),

    #[error("unknown file type: {0}")]
    FileType(String),
}

// ── File types ─────────────────────────────────────────────────────

/// Bitmask of the file roles a sector can have on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileType(u8);

impl FileType {
    pub const NONE: FileType = FileType(0);
    pub const UNSEALED: FileType = FileType(1);
    pub const SEALED: FileType = FileType(1 << 1);
    pub const CACHE: FileType = FileType(1 << 2);

    /// Every single-bit file type, in processing order.
    pub const ALL: [FileType; 3] = [Self::UNSEALED, Self::SEALED, Self::CACHE];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any bit of `other` is also set in `self`.
    pub const fn intersects(self, other: FileType) -> bool {
        self.0 & other.0 != 0
    }

    /// Number of file types set in the mask.
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate the single-bit types contained in this mask.
    pub fn iter(self) -> impl Iterator<Item = FileType> {
        Self::ALL.into_iter().filter(move |ft| self.intersects(*ft))
    }

    /// Directory / URL segment name of a single-bit file type.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::UNSEALED => Some("unsealed"),
            Self::SEALED => Some("sealed"),
            Self::CACHE => Some("cache"),
            _ => None,
        }
    }
}

impl BitOr for FileType {
    type Output = FileType;

    fn bitor(self, rhs: FileType) -> FileType {
        FileType(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileType {
    fn bitor_assign(&mut self, rhs: FileType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FileType {
    type Output = FileType;

    fn bitand(self, rhs: FileType) -> FileType {
        FileType(self.0 & rhs.0)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().filter_map(FileType::name).collect();
        f.write_str(&names.join("|"))
    }
}

impl FromStr for FileType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ft| ft.name() == Some(s))
            .ok_or_else(|| ParseError::FileType(s.to_string()))
    }
}

// ── Per-file-type maps ─────────────────────────────────────────────

/// One optional value per single-bit file type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMap<T> {
    pub unsealed: Option<T>,
    pub sealed: Option<T>,
    pub cache: Option<T>,
}

impl<T> Default for FileMap<T> {
    fn default() -> Self {
        Self {
            unsealed: None,
            sealed: None,
            cache: None,
        }
    }
}

impl<T> FileMap<T> {
    pub fn get(&self, ft: FileType) -> Option<&T> {
        match ft {
            FileType::UNSEALED => self.unsealed.as_ref(),
            FileType::SEALED => self.sealed.as_ref(),
            FileType::CACHE => self.cache.as_ref(),
            _ => None,
        }
    }

    /// Set the slot for a single-bit file type. Multi-bit masks are ignored.
    pub fn set(&mut self, ft: FileType, value: T) {
        match ft {
            FileType::UNSEALED => self.unsealed = Some(value),
            FileType::SEALED => self.sealed = Some(value),
            FileType::CACHE => self.cache = Some(value),
            _ => {}
        }
    }
}

/// Local paths of a sector's files, one per requested file type.
pub type SectorPaths = FileMap<PathBuf>;

/// Storage location holding each of a sector's files.
pub type SectorStores = FileMap<StorageId>;

impl SectorPaths {
    pub fn path(&self, ft: FileType) -> Option<&Path> {
        self.get(ft).map(PathBuf::as_path)
    }
}

// ── Acquire parameters ─────────────────────────────────────────────

/// Which class of storage a path is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// Scratch space used while sealing.
    Sealing,
    /// Long-term storage.
    Storage,
}

/// What to do with the remote source once data is local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    Copy,
    Move,
    /// Move, then relocate the local files under the cache root and link back.
    MoveCache,
}

impl AcquireMode {
    pub fn is_move(self) -> bool {
        matches!(self, AcquireMode::Move | AcquireMode::MoveCache)
    }
}

/// Registered seal proof; determines the sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SealProof {
    StackedDrg2KiB,
    StackedDrg8MiB,
    StackedDrg512MiB,
    StackedDrg32GiB,
    StackedDrg64GiB,
}

impl SealProof {
    /// Sector size in bytes.
    pub fn sector_size(self) -> u64 {
        match self {
            SealProof::StackedDrg2KiB => 2 << 10,
            SealProof::StackedDrg8MiB => 8 << 20,
            SealProof::StackedDrg512MiB => 512 << 20,
            SealProof::StackedDrg32GiB => 32 << 30,
            SealProof::StackedDrg64GiB => 64 << 30,
        }
    }
}

// ── Storage ────────────────────────────────────────────────────────

/// Identifier of a storage location (a local directory or a remote node path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl StorageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registration record of a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub id: StorageId,
    /// Base URLs the location is reachable at (e.g. `http://10.0.0.1:3456/remote`).
    pub urls: Vec<String>,
    /// Fetch ranking; lower is preferred.
    pub weight: u64,
    pub can_seal: bool,
    pub can_store: bool,
}

/// A storage location holding a particular sector file, as reported by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorStorageInfo {
    pub id: StorageId,
    /// Per-sector URLs (`<base>/<kind>/<sector>`).
    pub urls: Vec<String>,
    pub weight: u64,
    pub can_seal: bool,
    pub can_store: bool,
    /// Whether this location holds the primary copy.
    pub primary: bool,
}

/// Capacity report of a storage location. Field names match the stat wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FsStat {
    pub capacity: u64,
    pub available: u64,
    #[serde(default)]
    pub reserved: u64,
}

/// Append path segments to a base URL, normalising slashes.
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    for seg in segments {
        out.push('/');
        out.push_str(seg.trim_matches('/'));
    }
    out
}

/// URL of one sector file under a storage base URL.
pub fn sector_url(base: &str, ft: FileType, sector: SectorId) -> String {
    let name = sector.to_string();
    join_url(base, &[ft.name().unwrap_or("none"), name.as_str()])
}
