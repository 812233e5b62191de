//! Process-wide hash tables shared by every [`Position`](super::Position).
//!
//! Built once by [`init`] before any position exists, then handed around as
//! an `Arc` so worker threads can share it without locking.

use std::sync::Arc;

use tracing::debug;

use crate::engine::attacks;
use crate::engine::cuckoo::CuckooTable;
use crate::engine::types::ChessError;
use crate::engine::zobrist::ZobristKeys;

/// Zobrist keys plus the cuckoo table derived from them.
pub struct HashTables {
    pub zobrist: ZobristKeys,
    pub cuckoo: CuckooTable,
}

impl HashTables {
    pub fn new() -> Result<Self, ChessError> {
        let zobrist = ZobristKeys::new();
        let cuckoo = CuckooTable::build(&zobrist)?;
        Ok(HashTables { zobrist, cuckoo })
    }
}

/// Build the attack, Zobrist and cuckoo tables. Call once at start-up and
/// clone the returned `Arc` into every position.
pub fn init() -> Result<Arc<HashTables>, ChessError> {
    // Force the lazily built attack tables now rather than on the first move.
    let _ = attacks::tables();
    let tables = HashTables::new()?;
    debug!(cuckoo_entries = tables.cuckoo.len(), "hash tables ready");
    Ok(Arc::new(tables))
}
