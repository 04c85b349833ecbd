use std::collections::{HashMap, HashSet};

use crate::{page_id::PageId, transaction::TransactionId};

/// Who is blocked on whom, plus pending interrupts for blocked transactions.
///
/// Only ever locked on its own, under the lock directory, or while a single page lock is held; it
/// never takes another lock.
#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
    waiting_on: HashMap<TransactionId, PageId>,
    interrupted: HashSet<TransactionId>,
}

impl WaitGraph {
    /// Record that `tid` is waiting on `pid` behind `blockers`, replacing any older edges.
    pub fn set_waiting(&mut self, tid: TransactionId, pid: PageId, blockers: HashSet<TransactionId>) {
        self.waiting_on.insert(tid, pid);
        if blockers.is_empty() {
            self.edges.remove(&tid);
        } else {
            self.edges.insert(tid, blockers);
        }
    }

    pub fn clear_waiting(&mut self, tid: TransactionId) {
        self.waiting_on.remove(&tid);
        self.edges.remove(&tid);
    }

    /// Drop every trace of a finished transaction, including edges pointing at it.
    pub fn forget(&mut self, tid: TransactionId) {
        self.clear_waiting(tid);
        self.interrupted.remove(&tid);
        for blockers in self.edges.values_mut() {
            blockers.remove(&tid);
        }
        self.edges.retain(|_, blockers| !blockers.is_empty());
    }

    /// Whether following wait-for edges from `start` leads back to `start`.
    pub fn has_cycle_through(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut stack: Vec<TransactionId> = self
            .edges
            .get(&start)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default();

        while let Some(node) = stack.pop() {
            if node == start {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = self.edges.get(&node) {
                stack.extend(next.iter().copied());
            }
        }

        false
    }

    /// Flag `tid` as interrupted and return the page it is currently waiting on, if any.
    ///
    /// The flag is only kept for a transaction that is waiting or `holds_locks`; anything else
    /// has either finished or not started, and nothing would ever clear it.
    pub fn interrupt(&mut self, tid: TransactionId, holds_locks: bool) -> Option<PageId> {
        let waiting_on = self.waiting_on.get(&tid).copied();
        if waiting_on.is_some() || holds_locks {
            self.interrupted.insert(tid);
        }
        waiting_on
    }

    pub fn is_waiting(&self, tid: TransactionId) -> bool {
        self.waiting_on.contains_key(&tid)
    }

    /// Consume a pending interrupt for `tid`.
    pub fn take_interrupt(&mut self, tid: TransactionId) -> bool {
        self.interrupted.remove(&tid)
    }
}
