//! Command memory pool
//!
//! A bump arena for allocations that live as long as the command. Every
//! allocation goes through the fallible `bumpalo` API so that running out
//! of memory surfaces as an error instead of an abort.

use bumpalo::{AllocErr, Bump};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("Pool allocation of {size} bytes failed")]
    AllocFailed { size: usize, err: AllocErr },
}

#[derive(Debug)]
pub struct MemPool {
    arena: Bump,
}

impl MemPool {
    /// Create a pool, reserving the first chunk up front
    pub fn create(chunk_size: usize) -> Result<Self, PoolError> {
        if chunk_size == 0 {
            return Err(PoolError::ZeroChunkSize);
        }
        let arena = Bump::try_with_capacity(chunk_size)
            .map_err(|err| PoolError::AllocFailed { size: chunk_size, err })?;

        trace!(chunk_size, "Created memory pool");
        Ok(Self { arena })
    }

    /// Copy a string into the pool
    pub fn alloc_str(&self, s: &str) -> Result<&str, PoolError> {
        let stored = self
            .arena
            .try_alloc_str(s)
            .map_err(|err| PoolError::AllocFailed { size: s.len(), err })?;
        Ok(&*stored)
    }

    /// Bytes handed out so far, including chunk overhead
    pub fn allocated(&self) -> usize {
        self.arena.allocated_bytes()
    }

    /// Release every allocation, keeping the most recent chunk
    pub fn empty(&mut self) {
        self.arena.reset();
    }
}
