use std::io;

use thiserror::Error;

use crate::{page_id::PageId, transaction::TransactionId};

/// Why a transaction was told to abort while waiting on a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The waiting transaction was interrupted from the outside.
    Interrupted,
    /// Granting the lock would have closed a cycle in the wait-for graph.
    Deadlock,
    /// The configured acquisition timeout elapsed.
    Timeout,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("transaction {tid} aborted: {reason:?}")]
    TransactionAborted {
        tid: TransactionId,
        reason: AbortReason,
    },

    #[error("tuple descriptor does not match table {table_id}")]
    SchemaMismatch { table_id: u64 },

    #[error("page {0} does not belong to this table")]
    ForeignPage(PageId),

    #[error("page {page_id} out of bounds ({num_pages} pages)")]
    PageOutOfBounds { page_id: PageId, num_pages: usize },

    #[error("slot {slot} of page {page_id} is already empty")]
    SlotEmpty { page_id: PageId, slot: usize },

    #[error("page {0} has no empty slot")]
    PageFull(PageId),

    #[error("a {page_size} byte page cannot hold a single {tuple_size} byte tuple")]
    PageTooSmall { page_size: usize, tuple_size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("tuple has not been stored in a page")]
    NoRecordId,

    #[error("unsupported aggregate: {0}")]
    UnsupportedAggregate(String),

    #[error("no table with id {0:x}")]
    NoSuchTable(u64),

    #[error("no table named '{0}'")]
    UnknownTable(String),

    #[error("no field '{0}'")]
    NoSuchField(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("iterator has no more tuples")]
    NoSuchElement,

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),
}

impl DbError {
    /// True for faults that require the caller to abort its transaction.
    pub fn is_abort(&self) -> bool {
        matches!(self, DbError::TransactionAborted { .. })
    }
}

pub type DbResult<T> = Result<T, DbError>;
