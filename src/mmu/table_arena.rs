//! Scratch region the translation tables are carved from.
//!
//! Tables are handed out with a bump pointer. Released tables are threaded
//! into a free list through their first descriptor, so no bookkeeping lives
//! outside the region itself.

use crate::{
    address::{Address, PhysicalAddress},
    error::{Error, Result},
};

use super::Granule;

/// Index of a table inside the arena.
pub type TableId = usize;

const FREE_LIST_END: u64 = u64::MAX;

pub struct TableArena<'a> {
    storage: &'a mut [u64],
    /// Physical address of `storage[0]`, as seen by the table walker.
    base: PhysicalAddress,
    granule: Granule,
    next_unused: TableId,
    free_head: Option<TableId>,
    in_use: usize,
}

impl<'a> TableArena<'a> {
    pub fn new(storage: &'a mut [u64], base: PhysicalAddress, granule: Granule) -> Result<Self> {
        if !base.is_aligned(granule.size()) {
            return Err(Error::UnalignedAddress(base.as_raw_ptr()));
        }

        let entries = granule.entries_per_table();
        if storage.is_empty() || storage.len() % entries != 0 {
            return Err(Error::InvalidTableRegion);
        }

        Ok(Self {
            storage,
            base,
            granule,
            next_unused: 0,
            free_head: None,
            in_use: 0,
        })
    }

    /// Arena over memory that is identity mapped, so the storage address is
    /// also the physical address the walker sees.
    pub fn from_region(storage: &'a mut [u64], granule: Granule) -> Result<Self> {
        let base = PhysicalAddress::new(storage.as_ptr() as usize);
        Self::new(storage, base, granule)
    }

    pub fn granule(&self) -> Granule {
        self.granule
    }

    pub fn capacity(&self) -> usize {
        self.storage.len() / self.granule.entries_per_table()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub(crate) fn alloc(&mut self) -> Result<TableId> {
        let id = match self.free_head {
            Some(id) => {
                let next = self.table(id)[0];
                self.free_head = (next != FREE_LIST_END).then_some(next as TableId);
                id
            }
            None if self.next_unused < self.capacity() => {
                self.next_unused += 1;
                self.next_unused - 1
            }
            None => return Err(Error::OutOfTranslationTables(self.capacity())),
        };

        self.table_mut(id).fill(0);
        self.in_use += 1;

        Ok(id)
    }

    pub(crate) fn free(&mut self, id: TableId) {
        debug_assert!(id < self.next_unused);

        let link = self.free_head.map_or(FREE_LIST_END, |next| next as u64);
        let table = self.table_mut(id);
        table.fill(0);
        table[0] = link;

        self.free_head = Some(id);
        self.in_use -= 1;
    }

    pub(crate) fn table(&self, id: TableId) -> &[u64] {
        let entries = self.granule.entries_per_table();
        &self.storage[id * entries..(id + 1) * entries]
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> &mut [u64] {
        let entries = self.granule.entries_per_table();
        &mut self.storage[id * entries..(id + 1) * entries]
    }

    pub fn address_of(&self, id: TableId) -> PhysicalAddress {
        self.base + id * self.granule.size()
    }

    /// Maps a next level table address found in a descriptor back to its slot.
    pub(crate) fn id_of(&self, paddr: PhysicalAddress) -> Result<TableId> {
        let raw = paddr.as_raw_ptr();
        let base = self.base.as_raw_ptr();

        if raw < base || !paddr.is_aligned(self.granule.size()) {
            return Err(Error::InvalidPhysicalAddress(raw));
        }

        let id = (raw - base) / self.granule.size();
        if id >= self.next_unused {
            return Err(Error::InvalidPhysicalAddress(raw));
        }

        Ok(id)
    }
}
