use core::arch::asm;

use aarch64_cpu::{
    asm::barrier::{dsb, isb, ISH, ISHST, SY},
    registers::{MAIR_EL1, SCTLR_EL1, TCR_EL1, TTBR0_EL1},
};
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::{
    address::{Address, PhysicalAddress, VirtualAddress},
    error::Result,
    mmu::{Granule, MmuConfig, MmuOps, MEMORY_ATTRIBUTES},
};

/// EL1 MMU of the executing core.
#[derive(Debug, Default)]
pub struct Aarch64Mmu {
    _private: (),
}

impl Aarch64Mmu {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

/// Smallest data cache line in the system, from CTR_EL0.DminLine.
fn dcache_line_size() -> usize {
    let ctr: u64;
    // SAFETY: CTR_EL0 is readable at EL1.
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags)) };

    4 << ((ctr >> 16) & 0xf)
}

fn for_each_dcache_line(start: VirtualAddress, end: VirtualAddress, mut op: impl FnMut(usize)) {
    let line = dcache_line_size();
    let mut addr = start.align_down(line);

    while addr < end.as_raw_ptr() {
        op(addr);
        addr += line;
    }

    dsb(SY);
}

/// Clean and invalidate every data cache level by set/way, up to the level
/// of coherency.
fn flush_dcache_all_set_way() {
    let clidr: u64;
    // SAFETY: CLIDR_EL1 is readable at EL1.
    unsafe { asm!("mrs {}, clidr_el1", out(reg) clidr, options(nomem, nostack, preserves_flags)) };

    let level_of_coherency = (clidr >> 24) & 0x7;

    for level in 0..level_of_coherency {
        // 0b010 and above mean a data or unified cache is present.
        if ((clidr >> (level * 3)) & 0x7) < 0b010 {
            continue;
        }

        let ccsidr: u64;
        // SAFETY: selecting a cache level only affects the following CCSIDR_EL1 read.
        unsafe {
            asm!(
                "msr csselr_el1, {}",
                "isb",
                "mrs {}, ccsidr_el1",
                in(reg) level << 1,
                out(reg) ccsidr,
                options(nostack, preserves_flags)
            )
        };

        let line_shift = (ccsidr & 0x7) + 4;
        let ways = ((ccsidr >> 3) & 0x3ff) + 1;
        let sets = ((ccsidr >> 13) & 0x7fff) + 1;
        let way_shift = ((ways - 1) as u32).leading_zeros();

        for way in 0..ways {
            for set in 0..sets {
                let set_way = (way << way_shift) | (set << line_shift) | (level << 1);
                // SAFETY: clean and invalidate never loses data.
                unsafe { asm!("dc cisw, {}", in(reg) set_way, options(nostack, preserves_flags)) };
            }
        }
    }

    dsb(SY);
    isb(SY);
}

impl MmuOps for Aarch64Mmu {
    fn tlb_invalidate_all(&mut self) {
        dsb(ISHST);
        // SAFETY: TLB invalidations are always safe.
        unsafe { asm!("tlbi vmalle1", options(nostack, preserves_flags)) };
        dsb(ISH);
        isb(SY);
    }

    fn flush_dcache_range(&mut self, start: VirtualAddress, end: VirtualAddress) {
        for_each_dcache_line(start, end, |addr| {
            // SAFETY: clean and invalidate never loses data.
            unsafe { asm!("dc civac, {}", in(reg) addr, options(nostack, preserves_flags)) };
        });
    }

    fn invalidate_dcache_range(&mut self, start: VirtualAddress, end: VirtualAddress) {
        for_each_dcache_line(start, end, |addr| {
            // SAFETY: the caller hands over a range whose cached contents are stale.
            unsafe { asm!("dc ivac, {}", in(reg) addr, options(nostack, preserves_flags)) };
        });
    }

    fn flush_dcache_all(&mut self) {
        flush_dcache_all_set_way();
    }

    fn mmu_enabled(&self) -> bool {
        SCTLR_EL1.matches_all(SCTLR_EL1::M::Enable)
    }

    fn enable(&mut self, ttb: PhysicalAddress, config: &MmuConfig) -> Result<()> {
        let t0sz = config.t0sz()?;
        let tg0 = match config.granule {
            Granule::FourKiB => TCR_EL1::TG0::KiB_4,
            Granule::SixteenKiB => TCR_EL1::TG0::KiB_16,
            Granule::SixtyFourKiB => TCR_EL1::TG0::KiB_64,
        };

        MAIR_EL1.set(MEMORY_ATTRIBUTES);
        TCR_EL1.write(
            TCR_EL1::TBI0::Used
                + TCR_EL1::IPS::Bits_48
                + tg0
                + TCR_EL1::SH0::Inner
                + TCR_EL1::ORGN0::WriteBack_ReadAlloc_WriteAlloc_Cacheable
                + TCR_EL1::IRGN0::WriteBack_ReadAlloc_WriteAlloc_Cacheable
                + TCR_EL1::EPD0::EnableTTBR0Walks
                + TCR_EL1::EPD1::DisableTTBR1Walks
                + TCR_EL1::T0SZ.val(t0sz),
        );
        TTBR0_EL1.set_baddr(ttb.as_raw_ptr() as u64);

        self.tlb_invalidate_all();

        SCTLR_EL1.modify(SCTLR_EL1::M::Enable + SCTLR_EL1::C::Cacheable + SCTLR_EL1::I::Cacheable);
        isb(SY);

        Ok(())
    }

    fn disable(&mut self) {
        SCTLR_EL1.modify(SCTLR_EL1::M::Disable + SCTLR_EL1::C::NonCacheable);
        isb(SY);
        self.tlb_invalidate_all();
    }
}
