use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DbError, DbResult},
    field::{Field, Type},
    tuple::Tuple,
    tuple_desc::TupleDesc,
};

use super::op_iterator::OpIterator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl Display for AggregateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        };
        write!(f, "{}", name)
    }
}

/// Column a group is keyed on, along with its type.
pub type GroupBy = Option<(usize, Type)>;

/// Folds tuples into per-group running state.
pub trait Aggregator {
    /// Fold one tuple into the state of its group.
    fn merge_tuple(&mut self, tuple: &Tuple) -> DbResult<()>;

    /// Snapshot of every group seen so far, as `(group, value)` or `(value)` tuples.
    fn iterator(&self) -> AggregateIterator;

    fn clear(&mut self);
}

fn group_key(group_by: GroupBy, tuple: &Tuple) -> DbResult<Option<Field>> {
    group_by
        .map(|(field, _)| tuple.field(field).cloned())
        .transpose()
}

fn output_desc(group_by: GroupBy) -> Arc<TupleDesc> {
    match group_by {
        Some((_, group_type)) => Arc::new(TupleDesc::from_types(&[group_type, Type::Int])),
        None => Arc::new(TupleDesc::from_types(&[Type::Int])),
    }
}

#[derive(Clone, Copy, Debug)]
struct AggregateState {
    min: i32,
    max: i32,
    sum: i64,
    count: i64,
}

impl Default for AggregateState {
    fn default() -> Self {
        Self {
            min: i32::MAX,
            max: i32::MIN,
            sum: 0,
            count: 0,
        }
    }
}

impl AggregateState {
    fn merge(&mut self, value: i32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value as i64;
        self.count += 1;
    }

    fn value(&self, op: AggregateOp) -> DbResult<i32> {
        match op {
            AggregateOp::Min => Ok(self.min),
            AggregateOp::Max => Ok(self.max),
            AggregateOp::Sum => i32::try_from(self.sum).map_err(|_| DbError::Overflow("sum")),
            // integer division, truncating toward zero
            AggregateOp::Avg => i32::try_from(self.sum / self.count).map_err(|_| DbError::Overflow("avg")),
            AggregateOp::Count => i32::try_from(self.count).map_err(|_| DbError::Overflow("count")),
        }
    }
}

/// Computes any aggregate over an integer column.
#[derive(Debug)]
pub struct IntegerAggregator {
    group_by: GroupBy,
    agg_field: usize,
    op: AggregateOp,
    groups: BTreeMap<Option<Field>, AggregateState>,
}

impl IntegerAggregator {
    pub fn new(group_by: GroupBy, agg_field: usize, op: AggregateOp) -> Self {
        Self {
            group_by,
            agg_field,
            op,
            groups: BTreeMap::new(),
        }
    }
}

impl Aggregator for IntegerAggregator {
    fn merge_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let value = tuple.field(self.agg_field)?.as_int().ok_or_else(|| {
            DbError::TypeMismatch(format!("field {} is not an int", self.agg_field))
        })?;
        let key = group_key(self.group_by, tuple)?;
        self.groups.entry(key).or_default().merge(value);
        Ok(())
    }

    fn iterator(&self) -> AggregateIterator {
        AggregateIterator {
            desc: output_desc(self.group_by),
            groups: Groups::Numeric {
                op: self.op,
                groups: self.groups.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            },
            pos: None,
        }
    }

    fn clear(&mut self) {
        self.groups.clear();
    }
}

/// Counts the values of a string column. No other aggregate is defined over strings.
#[derive(Debug)]
pub struct StringAggregator {
    group_by: GroupBy,
    counts: BTreeMap<Option<Field>, i64>,
}

impl StringAggregator {
    pub fn new(group_by: GroupBy, op: AggregateOp) -> DbResult<Self> {
        if op != AggregateOp::Count {
            return Err(DbError::UnsupportedAggregate(format!("{} over a string field", op)));
        }

        Ok(Self {
            group_by,
            counts: BTreeMap::new(),
        })
    }
}

impl Aggregator for StringAggregator {
    fn merge_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let key = group_key(self.group_by, tuple)?;
        *self.counts.entry(key).or_default() += 1;
        Ok(())
    }

    fn iterator(&self) -> AggregateIterator {
        AggregateIterator {
            desc: output_desc(self.group_by),
            groups: Groups::CountOnly(self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect()),
            pos: None,
        }
    }

    fn clear(&mut self) {
        self.counts.clear();
    }
}

enum Groups {
    Numeric {
        op: AggregateOp,
        groups: Vec<(Option<Field>, AggregateState)>,
    },
    CountOnly(Vec<(Option<Field>, i64)>),
}

impl Groups {
    fn len(&self) -> usize {
        match self {
            Groups::Numeric { groups, .. } => groups.len(),
            Groups::CountOnly(groups) => groups.len(),
        }
    }

    fn row(&self, i: usize) -> DbResult<(Option<Field>, i32)> {
        match self {
            Groups::Numeric { op, groups } => {
                let (key, state) = groups.get(i).ok_or(DbError::NoSuchElement)?;
                Ok((key.clone(), state.value(*op)?))
            }
            Groups::CountOnly(groups) => {
                let (key, count) = groups.get(i).ok_or(DbError::NoSuchElement)?;
                let count = i32::try_from(*count).map_err(|_| DbError::Overflow("count"))?;
                Ok((key.clone(), count))
            }
        }
    }
}

/// Replays the groups of an aggregator in ascending group order.
pub struct AggregateIterator {
    desc: Arc<TupleDesc>,
    groups: Groups,
    pos: Option<usize>,
}

impl OpIterator for AggregateIterator {
    fn open(&mut self) -> DbResult<()> {
        self.pos = Some(0);
        Ok(())
    }

    fn has_next(&mut self) -> DbResult<bool> {
        Ok(self.pos.is_some_and(|pos| pos < self.groups.len()))
    }

    fn next(&mut self) -> DbResult<Tuple> {
        let pos = self.pos.ok_or(DbError::NoSuchElement)?;
        let (key, value) = self.groups.row(pos)?;
        self.pos = Some(pos + 1);

        let fields = match key {
            Some(key) => vec![key, Field::Int(value)],
            None => vec![Field::Int(value)],
        };
        Tuple::new(self.desc.clone(), fields)
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
