use std::sync::Arc;

use crate::{
    buffer_pool::BufferPool,
    error::{DbError, DbResult},
    field::{Field, Type},
    page_id::TableId,
    transaction::TransactionId,
    tuple::Tuple,
    tuple_desc::TupleDesc,
};

use super::op_iterator::OpIterator;

/// Inserts every tuple produced by its child into a table, then yields a single tuple holding
/// the number of rows inserted.
pub struct Insert<'a, C: OpIterator> {
    pool: &'a BufferPool,
    tid: TransactionId,
    child: C,
    table_id: TableId,
    desc: Arc<TupleDesc>,
    opened: bool,
    done: bool,
}

impl<'a, C: OpIterator> Insert<'a, C> {
    pub fn new(pool: &'a BufferPool, tid: TransactionId, child: C, table_id: TableId) -> DbResult<Self> {
        let table = pool.table(table_id)?;
        if child.tuple_desc().as_ref() != table.tuple_desc().as_ref() {
            return Err(DbError::SchemaMismatch { table_id });
        }

        Ok(Self {
            pool,
            tid,
            child,
            table_id,
            desc: Arc::new(TupleDesc::new(&[(Type::Int, "count")])),
            opened: false,
            done: false,
        })
    }
}

impl<C: OpIterator> OpIterator for Insert<'_, C> {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.opened = true;
        self.done = false;
        Ok(())
    }

    fn has_next(&mut self) -> DbResult<bool> {
        Ok(self.opened && !self.done)
    }

    fn next(&mut self) -> DbResult<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoSuchElement);
        }

        let table = self.pool.table(self.table_id)?;
        let mut count: i32 = 0;
        while self.child.has_next()? {
            let mut tuple = self.child.next()?.with_desc(table.tuple_desc().clone());
            tuple.set_record_id(None);
            self.pool.insert_tuple(self.tid, self.table_id, tuple)?;
            count = count.checked_add(1).ok_or(DbError::Overflow("insert count"))?;
        }
        self.done = true;
        log::debug!("{} inserted {} tuples into table {:x}", self.tid, count, self.table_id);

        Tuple::new(self.desc.clone(), vec![Field::Int(count)])
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
