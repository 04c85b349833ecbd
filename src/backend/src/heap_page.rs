use std::sync::Arc;

use crate::{
    error::{DbError, DbResult},
    page_id::PageId,
    record_id::RecordId,
    transaction::TransactionId,
    tuple::Tuple,
    tuple_desc::TupleDesc,
};

/// A page of a heap file that has been pulled into memory.
///
/// The on-disk image is a bitmap header with one bit per slot (least significant bit first,
/// rounded up to whole bytes) followed by `num_slots` fixed-size tuple slots. Any bytes left over
/// at the end of the page are zero.
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuples with descriptor `desc` that fit on a page of `page_size` bytes. Every
    /// tuple costs its byte size plus one header bit.
    pub fn num_slots_for(page_size: usize, desc: &TupleDesc) -> usize {
        (page_size * 8) / (desc.byte_size() * 8 + 1)
    }

    fn header_size_for(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// An all-zero page image: every slot empty.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// Decode a page image. `data` shorter than a page is treated as zero-padded.
    ///
    /// # Arguments
    ///
    /// * `pid` - The id of the page being decoded.
    /// * `data` - The raw bytes read from the heap file.
    /// * `desc` - The descriptor of the table the page belongs to.
    /// * `page_size` - The size of a page in bytes.
    pub fn new(pid: PageId, data: &[u8], desc: Arc<TupleDesc>, page_size: usize) -> DbResult<Self> {
        let mut image = Self::empty_page_data(page_size);
        let n = data.len().min(page_size);
        image[..n].copy_from_slice(&data[..n]);

        let num_slots = Self::num_slots_for(page_size, &desc);
        let header_size = Self::header_size_for(num_slots);
        let header = image[..header_size].to_vec();
        let slot_size = desc.byte_size();

        let mut page = Self {
            pid,
            desc: desc.clone(),
            page_size,
            header,
            tuples: Vec::with_capacity(num_slots),
            dirty: None,
            before_image: image.clone(),
        };

        for slot in 0..num_slots {
            if !page.is_slot_used(slot) {
                page.tuples.push(None);
                continue;
            }

            let start = header_size + slot * slot_size;
            let mut fields = Vec::with_capacity(desc.num_fields());
            for i in 0..desc.num_fields() {
                let field_start = start + desc.offset(i);
                fields.push(desc.field_type(i)?.parse(&image[field_start..])?);
            }

            let mut tuple = Tuple::new(desc.clone(), fields)?;
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            page.tuples.push(Some(tuple));
        }

        Ok(page)
    }

    /// A page with every slot empty.
    pub fn empty(pid: PageId, desc: Arc<TupleDesc>, page_size: usize) -> DbResult<Self> {
        Self::new(pid, &Self::empty_page_data(page_size), desc, page_size)
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots())
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        self.header
            .get(slot / 8)
            .is_some_and(|byte| byte & (1 << (slot % 8)) != 0)
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }

    /// Store a tuple in the first empty slot and stamp it with its new RecordId.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> DbResult<RecordId> {
        if tuple.desc().as_ref() != self.desc.as_ref() {
            return Err(DbError::SchemaMismatch {
                table_id: self.pid.table_id(),
            });
        }

        let slot = (0..self.num_slots())
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or(DbError::PageFull(self.pid))?;

        let rid = RecordId::new(self.pid, slot);
        tuple.set_record_id(Some(rid));
        self.set_slot(slot, true);
        self.tuples[slot] = Some(tuple);
        log::trace!("inserted tuple into slot {} of page {}", slot, self.pid);

        Ok(rid)
    }

    /// Clear the slot recorded in the tuple's RecordId.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple.record_id().ok_or(DbError::NoRecordId)?;
        if rid.page_id() != self.pid {
            return Err(DbError::ForeignPage(rid.page_id()));
        }

        if !self.is_slot_used(rid.slot()) {
            return Err(DbError::SlotEmpty {
                page_id: self.pid,
                slot: rid.slot(),
            });
        }

        self.set_slot(rid.slot(), false);
        self.tuples[rid.slot()] = None;
        log::trace!("cleared slot {} of page {}", rid.slot(), self.pid);

        Ok(())
    }

    /// Tuples in occupied slots, in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    /// Encode the page into a full page image.
    pub fn page_data(&self) -> Vec<u8> {
        let mut data = Self::empty_page_data(self.page_size);
        let header_size = self.header.len();
        data[..header_size].copy_from_slice(&self.header);

        let slot_size = self.desc.byte_size();
        for (slot, tuple) in self.tuples.iter().enumerate() {
            let Some(tuple) = tuple else { continue };
            let start = header_size + slot * slot_size;
            for (i, field) in tuple.fields().iter().enumerate() {
                let field_start = start + self.desc.offset(i);
                field.serialize(&mut data[field_start..]);
            }
        }

        data
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirty = tid;
    }

    /// The transaction that last dirtied this page, if it has unflushed changes.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    /// The page as it was when it was read or last flushed.
    pub fn before_image(&self) -> DbResult<HeapPage> {
        HeapPage::new(self.pid, &self.before_image, self.desc.clone(), self.page_size)
    }

    pub fn set_before_image(&mut self) {
        self.before_image = self.page_data();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        field::{Field, Type, STRING_LEN},
        tuple::Tuple,
        tuple_desc::TupleDesc,
    };

    use super::*;

    fn two_int_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(&[(Type::Int, "a"), (Type::Int, "b")]))
    }

    fn tuple(desc: &Arc<TupleDesc>, a: i32, b: i32) -> Tuple {
        Tuple::new(desc.clone(), vec![Field::from(a), Field::from(b)]).unwrap()
    }

    #[test]
    fn test_slot_count() {
        let desc = two_int_desc();
        // 8 byte tuples: 32 * 8 / 65 = 3 slots, 1 header byte
        assert_eq!(HeapPage::num_slots_for(32, &desc), 3);
        assert_eq!(HeapPage::num_slots_for(4096, &desc), 504);
    }

    #[test]
    fn test_insert_delete_and_reuse() {
        let desc = two_int_desc();
        let mut page = HeapPage::empty(PageId::new(1, 0), desc.clone(), 32).unwrap();
        assert_eq!(page.num_empty_slots(), 3);

        for i in 0..3 {
            let rid = page.insert_tuple(tuple(&desc, i, i * 10)).unwrap();
            assert_eq!(rid.slot(), i as usize);
        }
        assert_eq!(page.num_empty_slots(), 0);
        assert!(page.insert_tuple(tuple(&desc, 9, 9)).is_err());

        // delete the middle slot, it becomes the first free slot
        let middle = page.tuples().nth(1).unwrap().clone();
        page.delete_tuple(&middle).unwrap();
        assert!(!page.is_slot_used(1));
        assert!(matches!(
            page.delete_tuple(&middle),
            Err(DbError::SlotEmpty { slot: 1, .. })
        ));

        let rid = page.insert_tuple(tuple(&desc, 42, 42)).unwrap();
        assert_eq!(rid.slot(), 1);
        let values: Vec<i32> = page
            .tuples()
            .map(|t| t.field(0).unwrap().as_int().unwrap())
            .collect();
        assert_eq!(values, vec![0, 42, 2]);
    }

    #[test]
    fn test_page_data_roundtrip() {
        let desc = Arc::new(TupleDesc::new(&[(Type::Int, "id"), (Type::String, "name")]));
        let pid = PageId::new(3, 2);
        let mut page = HeapPage::empty(pid, desc.clone(), 4096).unwrap();
        page.insert_tuple(Tuple::new(desc.clone(), vec![Field::from(1), Field::from("joe")]).unwrap())
            .unwrap();
        page.insert_tuple(Tuple::new(desc.clone(), vec![Field::from(2), Field::from("amy")]).unwrap())
            .unwrap();

        let data = page.page_data();
        assert_eq!(data.len(), 4096);
        // first two bits of the header are set
        assert_eq!(data[0], 0b11);

        let reread = HeapPage::new(pid, &data, desc, 4096).unwrap();
        assert_eq!(reread.page_data(), data);
        let names: Vec<String> = reread
            .tuples()
            .map(|t| t.field(1).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["joe", "amy"]);
        assert_eq!(
            reread.tuples().next().unwrap().record_id(),
            Some(RecordId::new(pid, 0))
        );
    }

    #[test]
    fn test_long_string_reads_back_as_cached() {
        let desc = Arc::new(TupleDesc::new(&[(Type::Int, "id"), (Type::String, "name")]));
        let pid = PageId::new(3, 0);
        let mut page = HeapPage::empty(pid, desc.clone(), 4096).unwrap();
        let long = Field::Str("y".repeat(200));
        page.insert_tuple(Tuple::new(desc.clone(), vec![Field::from(1), long]).unwrap())
            .unwrap();

        let reread = HeapPage::new(pid, &page.page_data(), desc, 4096).unwrap();
        let cached = page.tuples().next().unwrap();
        assert_eq!(cached.fields(), reread.tuples().next().unwrap().fields());
        assert_eq!(cached.field(1).unwrap(), &Field::Str("y".repeat(STRING_LEN)));
    }

    #[test]
    fn test_before_image() {
        let desc = two_int_desc();
        let mut page = HeapPage::empty(PageId::new(1, 0), desc.clone(), 32).unwrap();
        page.insert_tuple(tuple(&desc, 1, 1)).unwrap();

        assert_eq!(page.before_image().unwrap().tuples().count(), 0);
        page.set_before_image();
        assert_eq!(page.before_image().unwrap().tuples().count(), 1);
    }

    #[test]
    fn test_rejects_foreign_schema() {
        let desc = two_int_desc();
        let other = Arc::new(TupleDesc::from_types(&[Type::Int]));
        let mut page = HeapPage::empty(PageId::new(1, 0), desc, 32).unwrap();

        let t = Tuple::new(other, vec![Field::from(1)]).unwrap();
        assert!(matches!(
            page.insert_tuple(t),
            Err(DbError::SchemaMismatch { .. })
        ));
    }
}
