use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;

use crate::{
    buffer_pool::BufferPool,
    config::DbConfig,
    error::{DbError, DbResult},
    heap_file::HeapFile,
    transaction::Tx,
    tuple_desc::TupleDesc,
};

const TABLE_FILE_EXTENSION: &str = "dat";

/// A directory of named heap files sharing one buffer pool.
pub struct HeapDB {
    data_dir: PathBuf,
    buffer_pool: Arc<BufferPool>,
    tables: RwLock<HashMap<String, Arc<HeapFile>>>,
}

impl HeapDB {
    pub fn open(data_dir: &Path, config: DbConfig) -> DbResult<Self> {
        config.validate()?;
        fs::create_dir_all(data_dir)?;
        log::info!(
            "opening database in {} with {} byte pages",
            data_dir.to_string_lossy(),
            config.page_size
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            buffer_pool: Arc::new(BufferPool::new(config)),
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Open (or create) the table called `name`, stored in `<data_dir>/<name>.dat`.
    pub fn create_table(&self, name: &str, desc: TupleDesc) -> DbResult<Arc<HeapFile>> {
        let path = self
            .data_dir
            .join(name)
            .with_extension(TABLE_FILE_EXTENSION);
        let file = HeapFile::open(&path, Arc::new(desc), self.buffer_pool.config().page_size)?;
        let file = self.buffer_pool.add_table(file);
        self.tables.write().insert(name.to_string(), file.clone());

        Ok(file)
    }

    pub fn table(&self, name: &str) -> DbResult<Arc<HeapFile>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownTable(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn begin(&self) -> Tx {
        Tx::begin(self.buffer_pool.clone())
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        self.buffer_pool.clone()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{
        field::Type,
        tests::test_utils::int_tuple,
    };

    use super::*;

    #[test]
    fn test_tables_by_name() {
        let td = tempdir().unwrap();
        let db = HeapDB::open(&td.path().join("data"), DbConfig::default()).unwrap();
        let people = db
            .create_table("people", TupleDesc::new(&[(Type::Int, "id"), (Type::String, "name")]))
            .unwrap();
        db.create_table("scores", TupleDesc::from_types(&[Type::Int]))
            .unwrap();

        assert_eq!(db.table("people").unwrap().id(), people.id());
        assert_eq!(db.table_names(), vec!["people", "scores"]);
        assert!(matches!(db.table("nope"), Err(DbError::UnknownTable(_))));
        assert!(db.data_dir().join("people.dat").exists());
    }

    #[test]
    fn test_open_rejects_zero_page_size() {
        let td = tempdir().unwrap();
        let dir = td.path().join("data");
        assert!(matches!(
            HeapDB::open(&dir, DbConfig::default().with_page_size(0)),
            Err(DbError::InvalidConfig(_))
        ));
        assert!(!dir.exists());

        // valid, but too small for this table's tuples
        let db = HeapDB::open(&dir, DbConfig::default().with_page_size(4)).unwrap();
        assert!(matches!(
            db.create_table("t", TupleDesc::new(&[(Type::Int, "x")])),
            Err(DbError::PageTooSmall { page_size: 4, tuple_size: 4 })
        ));
        assert!(db.table_names().is_empty());
    }

    #[test]
    fn test_reopen_sees_committed_rows() {
        let td = tempdir().unwrap();
        let dir = td.path().join("data");
        let desc = TupleDesc::new(&[(Type::Int, "x")]);
        {
            let db = HeapDB::open(&dir, DbConfig::default()).unwrap();
            let t = db.create_table("t", desc.clone()).unwrap();
            let tx = db.begin();
            let pool = db.buffer_pool();
            for i in 0..10 {
                pool.insert_tuple(tx.id(), t.id(), int_tuple(t.tuple_desc(), &[i]))
                    .unwrap();
            }
            tx.commit().unwrap();
        }

        let db = HeapDB::open(&dir, DbConfig::default()).unwrap();
        let t = db.create_table("t", desc).unwrap();
        assert_eq!(t.num_pages(), 1);
        let tx = db.begin();
        let pool = db.buffer_pool();
        let mut iter = t.iterator(&*pool, tx.id());
        iter.open().unwrap();
        let mut sum = 0;
        while iter.has_next().unwrap() {
            sum += iter.next().unwrap().field(0).unwrap().as_int().unwrap();
        }
        assert_eq!(sum, 45);
    }
}
