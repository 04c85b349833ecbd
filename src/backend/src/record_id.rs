use std::fmt::Display;

use crate::page_id::PageId;

/// Location of a stored tuple: the page holding it and its slot within that page.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct RecordId {
    page_id: PageId,
    slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecordId({},{})", self.page_id, self.slot)
    }
}
