use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use crate::{
    buffer_pool::{PageRef, PageSource},
    error::{DbError, DbResult},
    heap_page::HeapPage,
    lock_manager::Permission,
    page_id::{PageId, TableId},
    transaction::TransactionId,
    tuple::Tuple,
    tuple_desc::TupleDesc,
};

/// The on-disk pages of a single table, stored back to back with no file header.
///
/// Page `n` lives at byte offset `n * page_size`. Pages are only ever appended, never removed.
pub struct HeapFile {
    id: TableId,
    path: PathBuf,
    file: Mutex<File>,
    desc: Arc<TupleDesc>,
    page_size: usize,
    num_pages: AtomicUsize,
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

impl HeapFile {
    /// Open the heap file at `path`, creating it if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the backing file.
    /// * `desc` - Descriptor of every tuple stored in the table.
    /// * `page_size` - Size in bytes of each page.
    pub fn open(path: &Path, desc: Arc<TupleDesc>, page_size: usize) -> DbResult<Self> {
        Self::check_page_size(page_size, &desc)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let path = fs::canonicalize(path)?;
        let id = Self::table_id_for(&path);
        let num_pages = file.metadata()?.len() as usize / page_size;
        log::debug!(
            "opened heap file {} as table {:x} with {} pages",
            path.to_string_lossy(),
            id,
            num_pages
        );

        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
            desc,
            page_size,
            num_pages: AtomicUsize::new(num_pages),
        })
    }

    fn check_page_size(page_size: usize, desc: &TupleDesc) -> DbResult<()> {
        if HeapPage::num_slots_for(page_size, desc) == 0 {
            return Err(DbError::PageTooSmall {
                page_size,
                tuple_size: desc.byte_size(),
            });
        }
        Ok(())
    }

    /// Stable id of the table stored at the canonical path `path`.
    pub fn table_id_for(path: &Path) -> TableId {
        xxh3_64(path.to_string_lossy().as_bytes())
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn reopen_read_only(&self) -> DbResult<()> {
        *self.file.lock() = File::open(&self.path)?;
        Ok(())
    }

    fn file_position(&self, page_number: usize) -> u64 {
        (page_number * self.page_size) as u64
    }

    /// Read a page from disk.
    ///
    /// Any page up to and including `num_pages()` may be read; bytes that were never written
    /// read as zero, so the page just past the end is an empty page ready to be appended.
    pub fn read_page(&self, pid: PageId) -> DbResult<HeapPage> {
        if pid.table_id() != self.id {
            return Err(DbError::ForeignPage(pid));
        }

        let num_pages = self.num_pages();
        if pid.page_number() > num_pages {
            return Err(DbError::PageOutOfBounds {
                page_id: pid,
                num_pages,
            });
        }

        let mut data = HeapPage::empty_page_data(self.page_size);
        let position = self.file_position(pid.page_number());
        {
            let mut file = self.file.lock();
            let len = file.metadata()?.len();
            if position < len {
                let available = ((len - position) as usize).min(self.page_size);
                file.seek(SeekFrom::Start(position))?;
                file.read_exact(&mut data[..available])?;
            }
        }

        log::trace!("read page {}", pid);
        HeapPage::new(pid, &data, self.desc.clone(), self.page_size)
    }

    /// Write a page to disk. Pages past the current end of the file are ignored: the file only
    /// grows through `insert_tuple`.
    pub fn write_page(&self, page: &HeapPage) -> DbResult<()> {
        let pid = page.id();
        if pid.table_id() != self.id {
            return Err(DbError::ForeignPage(pid));
        }

        if pid.page_number() >= self.num_pages() {
            log::debug!("ignoring write of page {} past the end of the file", pid);
            return Ok(());
        }

        self.write_at(pid.page_number(), &page.page_data())
    }

    fn write_at(&self, page_number: usize, data: &[u8]) -> DbResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.file_position(page_number)))?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_data()?;
        log::trace!("wrote page {} of table {:x}", page_number, self.id);

        Ok(())
    }

    // Must only be called while holding the exclusive lock on `page_number`. Returns whether
    // the file grew.
    fn append_empty_page(&self, page_number: usize) -> DbResult<bool> {
        if self.num_pages() != page_number {
            return Ok(false);
        }

        self.write_at(page_number, &HeapPage::empty_page_data(self.page_size))?;
        self.num_pages.store(page_number + 1, Ordering::SeqCst);
        log::debug!("table {:x} grew to {} pages", self.id, page_number + 1);

        Ok(true)
    }

    /// Insert a tuple into the first page with a free slot, growing the file by one page if
    /// every page is full. Returns the modified pages; the caller is responsible for marking
    /// them dirty.
    ///
    /// Pages are inspected in ascending order under shared locks. A full page whose lock was
    /// not already held by `tid` is released again straight away, and only the page that
    /// receives the tuple is locked exclusively.
    pub fn insert_tuple(
        &self,
        source: &dyn PageSource,
        tid: TransactionId,
        tuple: Tuple,
    ) -> DbResult<Vec<PageRef>> {
        if tuple.desc().as_ref() != self.desc.as_ref() {
            return Err(DbError::SchemaMismatch { table_id: self.id });
        }

        for page_number in 0..self.num_pages() {
            let pid = PageId::new(self.id, page_number);
            let held_before = source.holds_lock(tid, pid);

            let page = source.get_page(tid, pid, Permission::Shared)?;
            let has_space = page.read().num_empty_slots() > 0;
            if !has_space {
                if !held_before {
                    source.release_page(tid, pid);
                }
                continue;
            }

            let page = source.get_page(tid, pid, Permission::Exclusive)?;
            let mut guard = page.write();
            if guard.num_empty_slots() > 0 {
                guard.insert_tuple(tuple)?;
                drop(guard);
                return Ok(vec![page]);
            }
        }

        loop {
            let page_number = self.num_pages();
            let pid = PageId::new(self.id, page_number);
            let page = source.get_page(tid, pid, Permission::Exclusive)?;
            let appended = self.append_empty_page(page_number)?;

            let mut guard = page.write();
            if guard.num_empty_slots() > 0 {
                guard.insert_tuple(tuple)?;
                drop(guard);
                return Ok(vec![page]);
            }
            if appended {
                return Err(DbError::PageFull(pid));
            }
            // another transaction appended and filled this page first
        }
    }

    /// Remove a stored tuple from its page. Returns the modified page.
    pub fn delete_tuple(
        &self,
        source: &dyn PageSource,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<Vec<PageRef>> {
        let rid = tuple.record_id().ok_or(DbError::NoRecordId)?;
        let pid = rid.page_id();
        if pid.table_id() != self.id {
            return Err(DbError::ForeignPage(pid));
        }

        let num_pages = self.num_pages();
        if pid.page_number() >= num_pages {
            return Err(DbError::PageOutOfBounds {
                page_id: pid,
                num_pages,
            });
        }

        let page = source.get_page(tid, pid, Permission::Exclusive)?;
        page.write().delete_tuple(tuple)?;

        Ok(vec![page])
    }

    /// Iterate over every stored tuple, reading pages through `source` as `tid`.
    pub fn iterator<'a>(&'a self, source: &'a dyn PageSource, tid: TransactionId) -> HeapFileIterator<'a> {
        HeapFileIterator {
            file: self,
            source,
            tid,
            cursor: None,
        }
    }
}

struct Cursor {
    next_page: usize,
    tuples: VecDeque<Tuple>,
}

/// Lazy scan over a heap file in page order, then slot order.
///
/// Each page is locked shared and read exactly once per pass. The page count is re-read while
/// advancing, so pages appended by the scanning transaction itself are visited. Locks are never
/// released here; they belong to the transaction.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    source: &'a dyn PageSource,
    tid: TransactionId,
    cursor: Option<Cursor>,
}

impl HeapFileIterator<'_> {
    pub fn open(&mut self) -> DbResult<()> {
        self.cursor = Some(Cursor {
            next_page: 0,
            tuples: VecDeque::new(),
        });
        Ok(())
    }

    pub fn has_next(&mut self) -> DbResult<bool> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(false);
        };

        while cursor.tuples.is_empty() {
            if cursor.next_page >= self.file.num_pages() {
                return Ok(false);
            }

            let pid = PageId::new(self.file.id(), cursor.next_page);
            let page = self.source.get_page(self.tid, pid, Permission::Shared)?;
            cursor.tuples = page.read().tuples().cloned().collect();
            cursor.next_page += 1;
        }

        Ok(true)
    }

    pub fn next(&mut self) -> DbResult<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoSuchElement);
        }

        self.cursor
            .as_mut()
            .and_then(|cursor| cursor.tuples.pop_front())
            .ok_or(DbError::NoSuchElement)
    }

    pub fn rewind(&mut self) -> DbResult<()> {
        self.close();
        self.open()
    }

    pub fn close(&mut self) {
        self.cursor = None;
    }
}
