//! redb table definitions for the sector index.
//!
//! Values are JSON-serialized records. Sector keys have the form
//! `{sector}:{kind}`, e.g. `s-t01000-42:sealed`.

use redb::TableDefinition;

/// Attached storage locations keyed by storage id.
pub const STORAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("storage");

/// Declarations keyed by `{sector}:{kind}`; each value lists the holders.
pub const SECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("sectors");
