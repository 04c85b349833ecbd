use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::{
    config::DbConfig,
    error::{DbError, DbResult},
    heap_file::HeapFile,
    heap_page::HeapPage,
    lock_manager::{LockManager, Permission},
    page_id::{PageId, TableId},
    transaction::TransactionId,
    tuple::Tuple,
};

/// A cached page shared by every transaction that has it locked.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// Where heap files get their pages from. Every page handed out is locked on behalf of the
/// requesting transaction first.
pub trait PageSource {
    /// Lock `pid` for `tid` with `perm`, then return the cached page, reading it from disk on a
    /// miss. Blocks while a conflicting lock is held.
    fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permission) -> DbResult<PageRef>;

    /// Give up the lock `tid` holds on `pid` before the transaction ends.
    fn release_page(&self, tid: TransactionId, pid: PageId);

    fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool;
}

/// Page cache for every registered table, plus the lock manager that guards it.
///
/// Pages stay cached until discarded. Dirty pages are written back only when the transaction that
/// dirtied them commits.
#[derive(Debug)]
pub struct BufferPool {
    config: DbConfig,
    lock_mgr: LockManager,
    tables: RwLock<HashMap<TableId, Arc<HeapFile>>>,
    pages: Mutex<HashMap<PageId, PageRef>>,
}

impl BufferPool {
    pub fn new(config: DbConfig) -> Self {
        Self {
            lock_mgr: LockManager::with_config(&config),
            config,
            tables: RwLock::new(HashMap::new()),
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_mgr
    }

    /// Register a heap file. Registering a second file for a table that is already known
    /// returns the existing one.
    pub fn add_table(&self, file: HeapFile) -> Arc<HeapFile> {
        let mut tables = self.tables.write();
        tables
            .entry(file.id())
            .or_insert_with(|| {
                debug!("registered table {:x}", file.id());
                Arc::new(file)
            })
            .clone()
    }

    pub fn table(&self, table_id: TableId) -> DbResult<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(DbError::NoSuchTable(table_id))
    }

    /// Add a tuple to a table on behalf of `tid`, marking every touched page dirty.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: TableId, tuple: Tuple) -> DbResult<()> {
        let file = self.table(table_id)?;
        let pages = file.insert_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, pages);
        Ok(())
    }

    /// Remove a stored tuple on behalf of `tid`, marking its page dirty.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple.record_id().ok_or(DbError::NoRecordId)?;
        let file = self.table(rid.page_id().table_id())?;
        let pages = file.delete_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, pages);
        Ok(())
    }

    fn mark_dirty(&self, tid: TransactionId, pages: Vec<PageRef>) {
        let mut cache = self.pages.lock();
        for page in pages {
            let pid = {
                let mut guard = page.write();
                guard.mark_dirty(Some(tid));
                guard.id()
            };
            trace!("page {} dirtied by {}", pid, tid);
            cache.entry(pid).or_insert(page);
        }
    }

    fn dirty_pages(&self, tid: Option<TransactionId>) -> Vec<PageRef> {
        self.pages
            .lock()
            .values()
            .filter(|page| match (page.read().is_dirty(), tid) {
                (Some(owner), Some(tid)) => owner == tid,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect()
    }

    fn flush_page(&self, page: &PageRef) -> DbResult<()> {
        let mut guard = page.write();
        if guard.is_dirty().is_none() {
            return Ok(());
        }

        let file = self.table(guard.id().table_id())?;
        file.write_page(&guard)?;
        guard.mark_dirty(None);
        guard.set_before_image();
        trace!("flushed page {}", guard.id());

        Ok(())
    }

    /// Write back every page dirtied by `tid`.
    pub fn flush_pages(&self, tid: TransactionId) -> DbResult<()> {
        for page in self.dirty_pages(Some(tid)) {
            self.flush_page(&page)?;
        }
        Ok(())
    }

    /// Write back every dirty page, whoever dirtied it.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        for page in self.dirty_pages(None) {
            self.flush_page(&page)?;
        }
        Ok(())
    }

    /// Drop a page from the cache without writing it back.
    pub fn discard_page(&self, pid: PageId) {
        if self.pages.lock().remove(&pid).is_some() {
            trace!("discarded page {}", pid);
        }
    }

    fn restore_pages(&self, tid: TransactionId) -> DbResult<()> {
        for page in self.dirty_pages(Some(tid)) {
            let mut guard = page.write();
            let restored = guard.before_image()?;
            trace!("restored page {} for {}", guard.id(), tid);
            *guard = restored;
        }
        Ok(())
    }

    /// Finish `tid`: on commit flush its dirty pages, on abort put back their last flushed
    /// contents. Either way every lock the transaction holds is released afterwards.
    ///
    /// A commit whose flush fails restores the pages that were not yet written and returns the
    /// write error. Pages flushed before the failure stay on disk.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> DbResult<()> {
        let result = if commit {
            self.flush_pages(tid).inspect_err(|e| {
                warn!("flush for {} failed, rolling back: {}", tid, e);
                if let Err(restore) = self.restore_pages(tid) {
                    warn!("rollback of {} failed: {}", tid, restore);
                }
            })
        } else {
            self.restore_pages(tid)
        };

        self.lock_mgr.release_all(tid);
        debug!(
            "{} {}",
            tid,
            if commit { "committed" } else { "aborted" }
        );

        result
    }

    /// Abort whatever lock wait `tid` is in now or, if it holds locks, the next one it starts.
    pub fn interrupt(&self, tid: TransactionId) {
        self.lock_mgr.interrupt(tid);
    }

    pub fn num_cached_pages(&self) -> usize {
        self.pages.lock().len()
    }
}

impl PageSource for BufferPool {
    fn get_page(&self, tid: TransactionId, pid: PageId, perm: Permission) -> DbResult<PageRef> {
        self.lock_mgr.acquire(tid, pid, perm)?;

        let mut cache = self.pages.lock();
        if let Some(page) = cache.get(&pid) {
            return Ok(page.clone());
        }

        let file = self.table(pid.table_id())?;
        let page = Arc::new(RwLock::new(file.read_page(pid)?));
        cache.insert(pid, page.clone());
        trace!("cached page {}", pid);

        Ok(page)
    }

    fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_mgr.release(tid, pid);
    }

    fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_mgr.holds(tid, pid)
    }
}
