//! AArch64 backend and the address space the running firmware uses.

mod mmu;

pub use mmu::Aarch64Mmu;

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    address_space::{ActiveAddressSpace, AddressSpace},
    boot::{self, EarlyLayout},
    error::Result,
    mmu::{MmuConfig, TableArena},
    vm::MapType,
};

pub static ADDRESS_SPACE: ActiveAddressSpace<Aarch64Mmu> = ActiveAddressSpace::new();

/// Builds the early identity map in `tables`, enables the MMU and installs
/// the result as [`ADDRESS_SPACE`]. `tables` must be identity mapped.
pub fn mmu_init(tables: &'static mut [u64], config: MmuConfig, layout: &EarlyLayout) -> Result<()> {
    let arena = TableArena::from_region(tables, config.granule)?;
    let mut space = AddressSpace::new(config, arena, Aarch64Mmu::new())?;

    boot::mmu_early_enable(&mut space, layout)?;
    ADDRESS_SPACE.install(space)
}

pub fn remap_range(
    vaddr: VirtualAddress,
    paddr: PhysicalAddress,
    size: usize,
    map_type: MapType,
) -> Result<()> {
    ADDRESS_SPACE.with(|space| space.remap_range(vaddr, paddr, size, map_type))?
}

pub fn dma_flush_range(start: VirtualAddress, size: usize) -> Result<()> {
    ADDRESS_SPACE.with(|space| space.dma_flush_range(start, size))
}

pub fn dma_inv_range(start: VirtualAddress, size: usize) -> Result<()> {
    ADDRESS_SPACE.with(|space| space.dma_inv_range(start, size))
}

pub fn mmu_disable() -> Result<()> {
    ADDRESS_SPACE.with(|space| boot::mmu_disable(space))
}
