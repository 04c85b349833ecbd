use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::{
    config::DbConfig,
    error::{AbortReason, DbError, DbResult},
    page_id::PageId,
    transaction::TransactionId,
    wait_graph::WaitGraph,
};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Shared,
    Exclusive,
}

// Grant level and holders of a single page. `level` is `None` exactly when `holders` is empty.
#[derive(Debug, Default)]
struct LockState {
    level: Option<Permission>,
    holders: HashSet<TransactionId>,
}

impl LockState {
    fn is_sole_holder(&self, tid: TransactionId) -> bool {
        self.holders.len() == 1 && self.holders.contains(&tid)
    }

    fn can_grant(&self, tid: TransactionId, perm: Permission) -> bool {
        match (self.level, perm) {
            (None, _) => true,
            (Some(Permission::Shared), Permission::Shared) => true,
            // upgrade in place, only without other readers
            (Some(Permission::Shared), Permission::Exclusive) => self.is_sole_holder(tid),
            // re-entrant; a shared request by the writer keeps the exclusive grant
            (Some(Permission::Exclusive), _) => self.is_sole_holder(tid),
        }
    }

    fn grant(&mut self, tid: TransactionId, perm: Permission) {
        if self.level != Some(Permission::Exclusive) {
            self.level = Some(perm);
        }
        self.holders.insert(tid);
    }

    fn release(&mut self, tid: TransactionId) -> bool {
        let removed = self.holders.remove(&tid);
        if self.holders.is_empty() {
            self.level = None;
        }
        removed
    }

    fn blockers(&self, tid: TransactionId) -> HashSet<TransactionId> {
        self.holders.iter().copied().filter(|h| *h != tid).collect()
    }
}

#[derive(Debug, Default)]
struct PageLock {
    state: Mutex<LockState>,
    condvar: Condvar,
}

// Both maps live behind one mutex. It is only held to look up, insert or remove entries and is
// never taken while a page's own state mutex is held.
#[derive(Debug, Default)]
struct Directory {
    pages: HashMap<PageId, Arc<PageLock>>,
    held: HashMap<TransactionId, HashSet<PageId>>,
}

/// Page-level shared/exclusive locks for strict two-phase locking.
///
/// Every page gets its own mutex and condition variable, so work on unrelated pages never
/// contends. Page entries are created on first request and never removed.
#[derive(Debug)]
pub struct LockManager {
    directory: Mutex<Directory>,
    waits: Mutex<WaitGraph>,
    timeout: Option<Duration>,
    detect_deadlocks: bool,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::with_config(&DbConfig::default())
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &DbConfig) -> Self {
        Self {
            directory: Mutex::new(Directory::default()),
            waits: Mutex::new(WaitGraph::default()),
            timeout: config.lock_timeout(),
            detect_deadlocks: config.detect_deadlocks,
        }
    }

    fn page_lock(&self, pid: &PageId) -> Arc<PageLock> {
        let mut directory = self.directory.lock();
        directory.pages.entry(*pid).or_default().clone()
    }

    fn abort(tid: TransactionId, reason: AbortReason) -> DbError {
        log::debug!("aborting transaction {}: {:?}", tid, reason);
        DbError::TransactionAborted { tid, reason }
    }

    /// Block until `tid` can be granted `perm` on `pid`, then record the grant.
    ///
    /// Returns `TransactionAborted` if the wait is interrupted, if waiting would deadlock, or if
    /// the configured timeout elapses. The caller is expected to abort the transaction and
    /// release its locks.
    ///
    /// # Arguments
    ///
    /// * `tid` - The transaction requesting the lock.
    /// * `pid` - The page to lock.
    /// * `perm` - The requested permission.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, perm: Permission) -> DbResult<()> {
        log::trace!("{} requesting {:?} lock on {}", tid, perm, pid);
        let lock = self.page_lock(&pid);
        let deadline = self.timeout.map(|t| Instant::now() + t);

        {
            let mut state = lock.state.lock();
            let mut waited = false;
            while !state.can_grant(tid, perm) {
                waited = true;
                {
                    let mut waits = self.waits.lock();
                    if waits.take_interrupt(tid) {
                        waits.clear_waiting(tid);
                        return Err(Self::abort(tid, AbortReason::Interrupted));
                    }

                    waits.set_waiting(tid, pid, state.blockers(tid));
                    if self.detect_deadlocks && waits.has_cycle_through(tid) {
                        waits.clear_waiting(tid);
                        return Err(Self::abort(tid, AbortReason::Deadlock));
                    }
                }

                log::trace!("{} waiting for {:?} lock on {}", tid, perm, pid);
                match deadline {
                    Some(deadline) => {
                        let timed_out = lock.condvar.wait_until(&mut state, deadline).timed_out();
                        if timed_out && !state.can_grant(tid, perm) {
                            self.waits.lock().clear_waiting(tid);
                            return Err(Self::abort(tid, AbortReason::Timeout));
                        }
                    }
                    None => lock.condvar.wait(&mut state),
                }
            }

            state.grant(tid, perm);
            if waited {
                self.waits.lock().clear_waiting(tid);
            }
        }

        self.directory
            .lock()
            .held
            .entry(tid)
            .or_default()
            .insert(pid);
        log::trace!("{} granted {:?} lock on {}", tid, perm, pid);

        Ok(())
    }

    /// Release the lock `tid` holds on `pid` and wake every waiter on that page.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let lock = {
            let mut directory = self.directory.lock();
            if let Some(held) = directory.held.get_mut(&tid) {
                held.remove(&pid);
                if held.is_empty() {
                    directory.held.remove(&tid);
                }
            }
            directory.pages.get(&pid).cloned()
        };

        match lock {
            Some(lock) => Self::release_page_lock(tid, pid, &lock),
            None => log::warn!("{} released {} which was never locked", tid, pid),
        }
    }

    fn release_page_lock(tid: TransactionId, pid: PageId, lock: &PageLock) {
        let mut state = lock.state.lock();
        if state.release(tid) {
            log::trace!("{} released lock on {}", tid, pid);
        } else {
            log::warn!("{} released {} without holding it", tid, pid);
        }
        lock.condvar.notify_all();
    }

    /// Whether `tid` currently holds a lock on `pid`. Never blocks on page locks.
    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.directory
            .lock()
            .held
            .get(&tid)
            .is_some_and(|held| held.contains(&pid))
    }

    /// Release every lock held by `tid`. Used when a transaction commits or aborts.
    pub fn release_all(&self, tid: TransactionId) {
        let locks: Vec<(PageId, Arc<PageLock>)> = {
            let mut directory = self.directory.lock();
            let held = directory.held.remove(&tid).unwrap_or_default();
            held.into_iter()
                .filter_map(|pid| directory.pages.get(&pid).map(|lock| (pid, lock.clone())))
                .collect()
        };

        log::trace!("{} releasing {} locks", tid, locks.len());
        for (pid, lock) in locks {
            Self::release_page_lock(tid, pid, &lock);
        }

        self.waits.lock().forget(tid);
    }

    /// Cancel `tid`'s current blocking wait in `acquire`, which then returns
    /// `TransactionAborted` with `AbortReason::Interrupted`. A transaction that holds locks but is
    /// not waiting has its next wait cancelled instead. Interrupting a transaction that neither
    /// waits nor holds locks does nothing.
    pub fn interrupt(&self, tid: TransactionId) {
        let (waiting_on, lock) = {
            let directory = self.directory.lock();
            let holds_locks = directory.held.contains_key(&tid);
            let waiting_on = self.waits.lock().interrupt(tid, holds_locks);
            (waiting_on, waiting_on.and_then(|pid| directory.pages.get(&pid).cloned()))
        };
        log::debug!("interrupting {} (waiting on {:?})", tid, waiting_on);

        if let Some(lock) = lock {
            let _state = lock.state.lock();
            lock.condvar.notify_all();
        }
    }

    /// Whether `tid` is currently blocked in `acquire`.
    pub fn is_waiting(&self, tid: TransactionId) -> bool {
        self.waits.lock().is_waiting(tid)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc, Barrier,
        },
        thread,
        time::Duration,
    };

    use crate::{
        config::DbConfig,
        error::{AbortReason, DbError},
        page_id::PageId,
        tests::test_utils::init_logging,
        transaction::TransactionId,
    };

    use super::{LockManager, Permission};

    const WAIT: Duration = Duration::from_millis(100);

    fn abort_reason(err: DbError) -> AbortReason {
        match err {
            DbError::TransactionAborted { reason, .. } => reason,
            other => panic!("expected an abort, got {other:?}"),
        }
    }

    #[test]
    fn test_many_shared_holders() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let pid = PageId::new(1, 0);
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let lock_mgr = lock_mgr.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let tid = TransactionId::new();
                    barrier.wait();
                    lock_mgr.acquire(tid, pid, Permission::Shared).unwrap();
                    // every reader holds the lock at the same time
                    barrier.wait();
                    tid
                })
            })
            .collect();

        for handle in handles {
            let tid = handle.join().unwrap();
            assert!(lock_mgr.holds(tid, pid));
        }
    }

    #[test]
    fn test_exclusive_waits_for_all_readers() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let pid = PageId::new(1, 0);
        let (r1, r2) = (TransactionId::new(), TransactionId::new());
        lock_mgr.acquire(r1, pid, Permission::Shared).unwrap();
        lock_mgr.acquire(r2, pid, Permission::Shared).unwrap();

        let (send, recv) = mpsc::channel();
        let handle = thread::spawn({
            let lock_mgr = lock_mgr.clone();
            move || {
                let writer = TransactionId::new();
                lock_mgr.acquire(writer, pid, Permission::Exclusive).unwrap();
                send.send(writer).unwrap();
            }
        });

        assert!(recv.recv_timeout(WAIT).is_err());
        lock_mgr.release(r1, pid);
        assert!(recv.recv_timeout(WAIT).is_err());
        lock_mgr.release(r2, pid);

        let writer = recv.recv().unwrap();
        handle.join().unwrap();
        assert!(lock_mgr.holds(writer, pid));
        assert!(!lock_mgr.holds(r1, pid));
        assert!(!lock_mgr.holds(r2, pid));
    }

    #[test]
    fn test_sole_reader_upgrades_in_place() {
        let lock_mgr = LockManager::new();
        let pid = PageId::new(1, 0);
        let tid = TransactionId::new();

        lock_mgr.acquire(tid, pid, Permission::Shared).unwrap();
        lock_mgr.acquire(tid, pid, Permission::Exclusive).unwrap();
        // re-entrant
        lock_mgr.acquire(tid, pid, Permission::Exclusive).unwrap();
        assert!(lock_mgr.holds(tid, pid));

        lock_mgr.release(tid, pid);
        assert!(!lock_mgr.holds(tid, pid));
    }

    #[test]
    fn test_shared_request_keeps_exclusive_grant() {
        let lock_mgr =
            LockManager::with_config(&DbConfig::default().with_lock_timeout(Duration::from_millis(50)));
        let pid = PageId::new(1, 0);
        let (writer, reader) = (TransactionId::new(), TransactionId::new());

        lock_mgr.acquire(writer, pid, Permission::Exclusive).unwrap();
        lock_mgr.acquire(writer, pid, Permission::Shared).unwrap();

        let err = lock_mgr.acquire(reader, pid, Permission::Shared).unwrap_err();
        assert_eq!(abort_reason(err), AbortReason::Timeout);

        lock_mgr.release_all(writer);
        lock_mgr.acquire(reader, pid, Permission::Shared).unwrap();
    }

    #[test]
    fn test_timeout_aborts_waiter() {
        let lock_mgr =
            LockManager::with_config(&DbConfig::default().with_lock_timeout(Duration::from_millis(50)));
        let pid = PageId::new(2, 3);
        let (t1, t2) = (TransactionId::new(), TransactionId::new());

        lock_mgr.acquire(t1, pid, Permission::Shared).unwrap();
        let err = lock_mgr.acquire(t2, pid, Permission::Exclusive).unwrap_err();
        assert!(err.is_abort());
        assert_eq!(abort_reason(err), AbortReason::Timeout);
        assert!(!lock_mgr.holds(t2, pid));
    }

    #[test]
    fn test_release_all_with_concurrent_holds() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let tid = TransactionId::new();
        let pids: Vec<PageId> = (0..64).map(|n| PageId::new(9, n)).collect();
        for pid in pids.iter() {
            lock_mgr.acquire(tid, *pid, Permission::Exclusive).unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let reader = thread::spawn({
            let lock_mgr = lock_mgr.clone();
            let barrier = barrier.clone();
            let pids = pids.clone();
            move || {
                barrier.wait();
                for _ in 0..100 {
                    for pid in pids.iter() {
                        lock_mgr.holds(tid, *pid);
                    }
                }
            }
        });

        barrier.wait();
        lock_mgr.release_all(tid);
        reader.join().unwrap();

        assert!(pids.iter().all(|pid| !lock_mgr.holds(tid, *pid)));
        // the pages are free again
        let other = TransactionId::new();
        for pid in pids.iter() {
            lock_mgr.acquire(other, *pid, Permission::Exclusive).unwrap();
        }
    }

    #[test]
    fn test_double_upgrade_deadlock() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let pid = PageId::new(1, 0);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let lock_mgr = lock_mgr.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let tid = TransactionId::new();
                    lock_mgr.acquire(tid, pid, Permission::Shared).unwrap();
                    barrier.wait();
                    let result = lock_mgr.acquire(tid, pid, Permission::Exclusive);
                    if result.is_err() {
                        lock_mgr.release_all(tid);
                    }
                    result.map_err(abort_reason)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(AbortReason::Deadlock)));
    }

    #[test]
    fn test_cross_page_deadlock() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let (a, b) = (PageId::new(1, 0), PageId::new(1, 1));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [(a, b), (b, a)]
            .into_iter()
            .map(|(first, second)| {
                let lock_mgr = lock_mgr.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let tid = TransactionId::new();
                    lock_mgr.acquire(tid, first, Permission::Exclusive).unwrap();
                    barrier.wait();
                    let result = lock_mgr.acquire(tid, second, Permission::Exclusive);
                    lock_mgr.release_all(tid);
                    result.map_err(abort_reason)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Err(AbortReason::Deadlock)));
    }

    #[test]
    fn test_interrupt_waiting_transaction() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let pid = PageId::new(4, 0);
        let (writer, reader) = (TransactionId::new(), TransactionId::new());
        lock_mgr.acquire(writer, pid, Permission::Exclusive).unwrap();

        let handle = thread::spawn({
            let lock_mgr = lock_mgr.clone();
            move || lock_mgr.acquire(reader, pid, Permission::Shared)
        });

        while !lock_mgr.is_waiting(reader) {
            thread::yield_now();
        }
        lock_mgr.interrupt(reader);

        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(abort_reason(err), AbortReason::Interrupted);
        assert!(!lock_mgr.holds(reader, pid));
        assert!(!lock_mgr.is_waiting(reader));
        assert!(lock_mgr.holds(writer, pid));
    }

    #[test]
    fn test_interrupt_of_finished_or_unknown_transaction_is_ignored() {
        let lock_mgr =
            LockManager::with_config(&DbConfig::default().with_lock_timeout(Duration::from_millis(50)));
        let pid = PageId::new(5, 0);
        let (finished, unknown, writer) =
            (TransactionId::new(), TransactionId::new(), TransactionId::new());

        lock_mgr.acquire(finished, pid, Permission::Shared).unwrap();
        lock_mgr.release_all(finished);
        lock_mgr.interrupt(finished);
        lock_mgr.interrupt(unknown);

        // nothing was recorded, so the next waits run into the timeout instead
        lock_mgr.acquire(writer, pid, Permission::Exclusive).unwrap();
        for tid in [finished, unknown] {
            let err = lock_mgr.acquire(tid, pid, Permission::Shared).unwrap_err();
            assert_eq!(abort_reason(err), AbortReason::Timeout);
        }
    }

    #[test]
    fn test_interrupt_of_idle_holder_cancels_next_wait() {
        let lock_mgr = LockManager::new();
        let (a, b) = (PageId::new(6, 0), PageId::new(6, 1));
        let (holder, other) = (TransactionId::new(), TransactionId::new());
        lock_mgr.acquire(holder, a, Permission::Exclusive).unwrap();
        lock_mgr.acquire(other, b, Permission::Exclusive).unwrap();

        lock_mgr.interrupt(holder);
        // grants that need no wait are unaffected
        lock_mgr.acquire(holder, a, Permission::Shared).unwrap();

        let err = lock_mgr.acquire(holder, b, Permission::Shared).unwrap_err();
        assert_eq!(abort_reason(err), AbortReason::Interrupted);
        lock_mgr.release_all(holder);
        lock_mgr.release_all(other);
    }

    #[test]
    fn test_threaded_locks() {
        init_logging();
        let lock_mgr = Arc::new(LockManager::new());
        let pid = PageId::new(1, 1);
        let start_barrier = Arc::new(Barrier::new(3));

        let xlock_counter = Arc::new(AtomicUsize::new(0));
        let slock_counter = Arc::new(AtomicUsize::new(0));

        let handle_x = thread::spawn({
            let start_barrier = start_barrier.clone();
            let lock_mgr = lock_mgr.clone();
            let xlock_counter = xlock_counter.clone();
            move || {
                start_barrier.wait();
                for _ in 0..500 {
                    let tid = TransactionId::new();
                    lock_mgr.acquire(tid, pid, Permission::Shared).unwrap();
                    lock_mgr.acquire(tid, pid, Permission::Exclusive).unwrap();
                    xlock_counter.fetch_add(1, Ordering::SeqCst);
                    lock_mgr.release_all(tid);
                }
            }
        });

        let handle_s = thread::spawn({
            let start_barrier = start_barrier.clone();
            let lock_mgr = lock_mgr.clone();
            let slock_counter = slock_counter.clone();
            move || {
                start_barrier.wait();
                for _ in 0..100 {
                    let tids: Vec<_> = (0..5).map(|_| TransactionId::new()).collect();
                    for tid in tids.iter() {
                        lock_mgr.acquire(*tid, pid, Permission::Shared).unwrap();
                        slock_counter.fetch_add(1, Ordering::SeqCst);
                    }
                    for tid in tids.iter() {
                        lock_mgr.release(*tid, pid);
                    }
                }
            }
        });

        start_barrier.wait();
        handle_x.join().unwrap();
        handle_s.join().unwrap();

        assert_eq!(xlock_counter.load(Ordering::SeqCst), 500);
        assert_eq!(slock_counter.load(Ordering::SeqCst), 500);
    }
}
