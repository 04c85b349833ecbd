use core::fmt;

use serde::{Deserialize, Serialize};

pub type TableId = u64;

// PageId points to a page's location inside a table's heap file.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    table_id: TableId,
    page_number: usize,
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:x}/{}]", self.table_id, self.page_number)
    }
}

impl PageId {
    /// Create a new PageId
    ///
    /// # Arguments
    ///
    /// * `table_id` - The id of the heap file the page is stored in
    /// * `page_number` - The index of the page within that file
    pub fn new(table_id: TableId, page_number: usize) -> Self {
        Self {
            table_id,
            page_number,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn next(&self) -> PageId {
        PageId::new(self.table_id, self.page_number + 1)
    }
}
