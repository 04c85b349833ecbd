use std::sync::Arc;

use crate::{error::DbResult, tuple::Tuple, tuple_desc::TupleDesc};

/// A pull-based operator producing a stream of tuples.
///
/// `has_next` and `next` may only be called between `open` and `close`; on a closed operator
/// `has_next` is false. `next` on an exhausted operator fails with `NoSuchElement`.
pub trait OpIterator {
    fn open(&mut self) -> DbResult<()>;

    fn has_next(&mut self) -> DbResult<bool>;

    fn next(&mut self) -> DbResult<Tuple>;

    /// Restart from the first tuple.
    fn rewind(&mut self) -> DbResult<()>;

    fn close(&mut self);

    fn tuple_desc(&self) -> &Arc<TupleDesc>;
}

impl<T: OpIterator + ?Sized> OpIterator for Box<T> {
    fn open(&mut self) -> DbResult<()> {
        (**self).open()
    }

    fn has_next(&mut self) -> DbResult<bool> {
        (**self).has_next()
    }

    fn next(&mut self) -> DbResult<Tuple> {
        (**self).next()
    }

    fn rewind(&mut self) -> DbResult<()> {
        (**self).rewind()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        (**self).tuple_desc()
    }
}
