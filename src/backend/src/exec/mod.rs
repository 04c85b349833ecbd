pub mod aggregate;
pub mod aggregator;
pub mod insert;
pub mod op_iterator;
pub mod seq_scan;
pub mod tuple_iterator;
