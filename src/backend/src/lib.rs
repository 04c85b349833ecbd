
pub mod buffer_pool;
pub mod config;
pub mod db;
pub mod error;
pub mod exec;
pub mod field;
pub mod heap_file;
pub mod heap_page;
pub mod lock_manager;
pub mod page_id;
pub mod record_id;
pub mod transaction;
pub mod tuple;
pub mod tuple_desc;

mod wait_graph;

pub use buffer_pool::{BufferPool, PageRef, PageSource};
pub use config::DbConfig;
pub use db::HeapDB;
pub use error::{AbortReason, DbError, DbResult};
pub use heap_file::HeapFile;
pub use lock_manager::{LockManager, Permission};
pub use transaction::{TransactionId, Tx};
