use std::sync::Arc;

use crate::{
    buffer_pool::PageSource,
    error::DbResult,
    heap_file::{HeapFile, HeapFileIterator},
    page_id::TableId,
    transaction::TransactionId,
    tuple::Tuple,
    tuple_desc::{TdItem, TupleDesc},
};

use super::op_iterator::OpIterator;

/// Reads every tuple of a table in storage order.
///
/// Output fields are named `<alias>.<field>`, with `null` standing in for unnamed fields.
pub struct SeqScan<'a> {
    file: &'a HeapFile,
    alias: String,
    desc: Arc<TupleDesc>,
    iter: HeapFileIterator<'a>,
}

impl<'a> SeqScan<'a> {
    /// Creates a new SeqScan over `file`, reading pages from `source` as `tid`.
    ///
    /// # Arguments
    ///
    /// * `source` - Where pages are fetched and locked.
    /// * `tid` - The transaction performing the scan.
    /// * `file` - The table to scan.
    /// * `alias` - Prefix for every output field name.
    pub fn new(source: &'a dyn PageSource, tid: TransactionId, file: &'a HeapFile, alias: &str) -> Self {
        Self {
            file,
            alias: alias.to_string(),
            desc: Arc::new(Self::aliased_desc(file.tuple_desc(), alias)),
            iter: file.iterator(source, tid),
        }
    }

    fn aliased_desc(desc: &TupleDesc, alias: &str) -> TupleDesc {
        let items = desc
            .items()
            .iter()
            .map(|item| TdItem {
                field_type: item.field_type,
                name: Some(format!(
                    "{}.{}",
                    alias,
                    item.name.as_deref().unwrap_or("null")
                )),
            })
            .collect();
        TupleDesc::from_items(items)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn table_id(&self) -> TableId {
        self.file.id()
    }
}

impl OpIterator for SeqScan<'_> {
    fn open(&mut self) -> DbResult<()> {
        self.iter.open()
    }

    fn has_next(&mut self) -> DbResult<bool> {
        self.iter.has_next()
    }

    fn next(&mut self) -> DbResult<Tuple> {
        Ok(self.iter.next()?.with_desc(self.desc.clone()))
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.iter.rewind()
    }

    fn close(&mut self) {
        self.iter.close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
