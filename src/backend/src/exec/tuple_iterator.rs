use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    tuple::Tuple,
    tuple_desc::TupleDesc,
};

use super::op_iterator::OpIterator;

/// Replays a fixed list of tuples.
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    pos: Option<usize>,
}

impl TupleIterator {
    /// Every tuple must carry a descriptor with the same types as `desc`.
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> DbResult<Self> {
        if let Some(bad) = tuples.iter().find(|t| t.desc().as_ref() != desc.as_ref()) {
            return Err(DbError::TypeMismatch(format!(
                "tuple ({}) does not match {}",
                bad, desc
            )));
        }

        Ok(Self {
            desc,
            tuples,
            pos: None,
        })
    }
}

impl OpIterator for TupleIterator {
    fn open(&mut self) -> DbResult<()> {
        self.pos = Some(0);
        Ok(())
    }

    fn has_next(&mut self) -> DbResult<bool> {
        Ok(self.pos.is_some_and(|pos| pos < self.tuples.len()))
    }

    fn next(&mut self) -> DbResult<Tuple> {
        let pos = self.pos.ok_or(DbError::NoSuchElement)?;
        let tuple = self.tuples.get(pos).cloned().ok_or(DbError::NoSuchElement)?;
        self.pos = Some(pos + 1);
        Ok(tuple)
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.open()
    }

    fn close(&mut self) {
        self.pos = None;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
