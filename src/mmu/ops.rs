use crate::{
    address::{PhysicalAddress, VirtualAddress},
    error::Result,
};

use super::MmuConfig;

/// Hardware side of the MMU: TLB and data cache maintenance plus the
/// translation control registers.
///
/// Ranges are half open, `[start, end)`.
pub trait MmuOps {
    fn tlb_invalidate_all(&mut self);

    /// Clean and invalidate to the point of coherency.
    fn flush_dcache_range(&mut self, start: VirtualAddress, end: VirtualAddress);

    fn invalidate_dcache_range(&mut self, start: VirtualAddress, end: VirtualAddress);

    fn flush_dcache_all(&mut self);

    /// Makes descriptor writes visible to the table walker. Tables live in
    /// identity mapped memory.
    fn clean_table_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        self.flush_dcache_range(VirtualAddress::identity(start), VirtualAddress::identity(end));
    }

    fn mmu_enabled(&self) -> bool;

    /// Programs the memory attributes, translation control and TTBR0, then
    /// turns on the MMU and caches.
    fn enable(&mut self, ttb: PhysicalAddress, config: &MmuConfig) -> Result<()>;

    fn disable(&mut self);
}
