use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::{buffer_pool::BufferPool, error::DbResult};

static NEXT_TRANSACTION_NUM: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a transaction. Ids are handed out in increasing order and are
/// never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new() -> Self {
        Self(NEXT_TRANSACTION_NUM.fetch_add(1, Ordering::SeqCst))
    }

    pub fn num(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// A running transaction against a buffer pool.
///
/// Finishing the transaction consumes the handle. A handle dropped without `commit` or `abort`
/// is aborted.
pub struct Tx {
    tid: TransactionId,
    pool: Arc<BufferPool>,
    finished: bool,
}

impl Tx {
    pub fn begin(pool: Arc<BufferPool>) -> Self {
        let tid = TransactionId::new();
        log::trace!("Transaction {} started", tid);

        Self {
            tid,
            pool,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.tid
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Flush every page this transaction dirtied, then release its locks.
    pub fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        self.pool.transaction_complete(self.tid, true)?;
        log::trace!("Transaction {} committed", self.tid);
        Ok(())
    }

    /// Throw away every change this transaction made, then release its locks.
    pub fn abort(mut self) -> DbResult<()> {
        self.finished = true;
        self.pool.transaction_complete(self.tid, false)?;
        log::trace!("Rolled back transaction {}", self.tid);
        Ok(())
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if let Err(e) = self.pool.transaction_complete(self.tid, false) {
            log::warn!("failed to roll back dropped transaction {}: {}", self.tid, e);
        }
    }
}
