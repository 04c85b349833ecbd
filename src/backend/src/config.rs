use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Settings shared by the buffer pool, the lock manager and every heap file opened through them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Size in bytes of every page of every table.
    pub page_size: usize,
    /// Upper bound on how long `acquire` may wait. `None` waits until woken.
    pub lock_timeout_ms: Option<u64>,
    /// Abort a waiter whose wait would close a cycle in the wait-for graph.
    pub detect_deadlocks: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            lock_timeout_ms: None,
            detect_deadlocks: true,
        }
    }
}

impl DbConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.detect_deadlocks = enabled;
        self
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.page_size == 0 {
            return Err(DbError::InvalidConfig("page_size must be positive".to_string()));
        }
        Ok(())
    }
}
