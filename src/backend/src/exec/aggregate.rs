use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    field::Type,
    tuple::Tuple,
    tuple_desc::{TdItem, TupleDesc},
};

use super::{
    aggregator::{AggregateIterator, AggregateOp, Aggregator, IntegerAggregator, StringAggregator},
    op_iterator::OpIterator,
};

/// Computes one aggregate over one column of its child, optionally grouped by another column.
///
/// The whole child is consumed on `open`. Output tuples are `(group, value)` when grouping and
/// `(value)` otherwise, in ascending group order; the value column is named `<op>(<field>)`.
pub struct Aggregate<C: OpIterator> {
    child: C,
    agg_field: usize,
    group_field: Option<usize>,
    op: AggregateOp,
    aggregator: Box<dyn Aggregator + Send>,
    results: Option<AggregateIterator>,
    desc: Arc<TupleDesc>,
}

impl<C: OpIterator> Aggregate<C> {
    /// Creates a new Aggregate over `child`.
    ///
    /// # Arguments
    ///
    /// * `child` - The operator producing the input tuples.
    /// * `agg_field` - Index of the column being aggregated.
    /// * `group_field` - Index of the column to group by, if any.
    /// * `op` - The aggregate to compute. String columns only support `Count`.
    pub fn new(child: C, agg_field: usize, group_field: Option<usize>, op: AggregateOp) -> DbResult<Self> {
        let child_desc = child.tuple_desc().clone();
        let agg_type = child_desc.field_type(agg_field)?;
        let group_by = group_field
            .map(|g| child_desc.field_type(g).map(|t| (g, t)))
            .transpose()?;

        let aggregator: Box<dyn Aggregator + Send> = match agg_type {
            Type::Int => Box::new(IntegerAggregator::new(group_by, agg_field, op)),
            Type::String => Box::new(StringAggregator::new(group_by, op)?),
        };

        let agg_name = format!(
            "{}({})",
            op,
            child_desc.field_name(agg_field)?.unwrap_or("null")
        );
        let mut items = Vec::with_capacity(2);
        if let Some((g, group_type)) = group_by {
            items.push(TdItem {
                field_type: group_type,
                name: child_desc.field_name(g)?.map(str::to_string),
            });
        }
        items.push(TdItem {
            field_type: Type::Int,
            name: Some(agg_name),
        });

        Ok(Self {
            child,
            agg_field,
            group_field,
            op,
            aggregator,
            results: None,
            desc: Arc::new(TupleDesc::from_items(items)),
        })
    }

    pub fn aggregate_field(&self) -> usize {
        self.agg_field
    }

    pub fn group_field(&self) -> Option<usize> {
        self.group_field
    }

    pub fn aggregate_op(&self) -> AggregateOp {
        self.op
    }

    pub fn aggregate_field_name(&self) -> DbResult<Option<&str>> {
        self.child.tuple_desc().field_name(self.agg_field)
    }

    pub fn group_field_name(&self) -> DbResult<Option<&str>> {
        match self.group_field {
            Some(g) => self.child.tuple_desc().field_name(g),
            None => Ok(None),
        }
    }
}

impl<C: OpIterator> OpIterator for Aggregate<C> {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.aggregator.clear();
        while self.child.has_next()? {
            let tuple = self.child.next()?;
            self.aggregator.merge_tuple(&tuple)?;
        }

        let mut results = self.aggregator.iterator();
        results.open()?;
        self.results = Some(results);
        Ok(())
    }

    fn has_next(&mut self) -> DbResult<bool> {
        match self.results.as_mut() {
            Some(results) => results.has_next(),
            None => Ok(false),
        }
    }

    fn next(&mut self) -> DbResult<Tuple> {
        let results = self.results.as_mut().ok_or(DbError::NoSuchElement)?;
        Ok(results.next()?.with_desc(self.desc.clone()))
    }

    /// Replays the computed groups without reading the child again.
    fn rewind(&mut self) -> DbResult<()> {
        match self.results.as_mut() {
            Some(results) => results.rewind(),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.results = None;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
