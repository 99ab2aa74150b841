use crate::{
    address::{Address, VirtualAddress},
    error::Result,
};

use super::{MmuOps, TranslationTable};

/// Flushes the data cache for the parts of `[start, start + size)` that are
/// mapped cacheable, widened to granule boundaries.
///
/// The range is walked one translation entry at a time, so a 1GiB block costs
/// a single lookup. Adjacent cacheable entries are merged into one flush.
/// Returns the number of flushes issued.
pub fn flush_cacheable_range<O: MmuOps>(
    table: &TranslationTable<'_>,
    ops: &mut O,
    start: VirtualAddress,
    size: usize,
) -> Result<usize> {
    if size == 0 {
        return Ok(0);
    }

    let geometry = table.geometry();
    geometry.check_range(start, size)?;

    let granule_size = geometry.granule().size();
    let end = (start + size).align_up(granule_size);
    let mut addr = start.align_down(granule_size);
    let mut run: Option<(usize, usize)> = None;
    let mut flushes = 0;

    let mut flush = |ops: &mut O, (run_start, run_end): (usize, usize)| {
        log::trace!("flushing cacheable 0x{run_start:X}..0x{run_end:X}");
        ops.flush_dcache_range(VirtualAddress::new(run_start), VirtualAddress::new(run_end));
        flushes += 1;
    };

    while addr < end {
        let entry = table.find_entry(VirtualAddress::new(addr))?;
        let next = (VirtualAddress::new(addr).align_down(entry.span()) + entry.span()).min(end);

        if entry.is_cacheable() {
            run = match run {
                Some((run_start, _)) => Some((run_start, next)),
                None => Some((addr, next)),
            };
        } else if let Some(pending) = run.take() {
            flush(ops, pending);
        }

        addr = next;
    }

    if let Some(pending) = run {
        flush(ops, pending);
    }

    Ok(flushes)
}

#[cfg(all(test, not(feature = "no_std")))]
mod tests {
    use super::flush_cacheable_range;
    use crate::{
        address::{PhysicalAddress, VirtualAddress},
        mmu::{
            sim::SimulatedMmu,
            translation_table::WriteContext,
            utils::consts::{FOUR_KIB, ONE_GIB, TWO_MIB},
            Geometry, Granule, TableArena, TranslationTable,
        },
        vm::{MapFlags, MapType},
    };

    fn va(addr: usize) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    fn map(tt: &mut TranslationTable<'_>, addr: usize, size: usize, map_type: MapType) {
        let mut mmu = SimulatedMmu::new();
        let mut ctx = WriteContext::new(&mut mmu, false);
        tt.map(&mut ctx, va(addr), PhysicalAddress::new(addr), size, map_type, MapFlags::empty())
            .unwrap();
    }

    fn table(storage: &mut [u64]) -> TranslationTable<'_> {
        let geometry = Geometry::new(Granule::FourKiB, 39).unwrap();
        let arena =
            TableArena::new(storage, PhysicalAddress::new(0x8000_0000), Granule::FourKiB).unwrap();
        TranslationTable::new(geometry, arena).unwrap()
    }

    #[test]
    fn contiguous_cacheable_entries_are_coalesced() {
        let mut storage = vec![0u64; 512 * 4];
        let mut tt = table(&mut storage);
        map(&mut tt, 0, ONE_GIB, MapType::Cached);
        map(&mut tt, ONE_GIB, TWO_MIB, MapType::Code);
        map(&mut tt, ONE_GIB + TWO_MIB, FOUR_KIB, MapType::CachedRo);

        let mut mmu = SimulatedMmu::new();
        let flushes =
            flush_cacheable_range(&tt, &mut mmu, va(ONE_GIB - TWO_MIB), 2 * TWO_MIB + FOUR_KIB)
                .unwrap();

        assert_eq!(flushes, 1);
        assert_eq!(
            mmu.flushes(),
            vec![(va(ONE_GIB - TWO_MIB), va(ONE_GIB + TWO_MIB + FOUR_KIB))]
        );
    }

    #[test]
    fn uncached_and_unmapped_holes_split_the_flush() {
        let mut storage = vec![0u64; 512 * 4];
        let mut tt = table(&mut storage);
        map(&mut tt, 0, TWO_MIB, MapType::Cached);
        map(&mut tt, 0x10_0000, FOUR_KIB, MapType::Uncached);
        map(&mut tt, 0x10_2000, FOUR_KIB, MapType::Fault);
        map(&mut tt, 0x10_4000, FOUR_KIB, MapType::WriteCombine);

        let mut mmu = SimulatedMmu::new();
        let flushes = flush_cacheable_range(&tt, &mut mmu, va(0xF_F000), 0x6000).unwrap();

        assert_eq!(flushes, 3);
        assert_eq!(
            mmu.flushes(),
            vec![
                (va(0xF_F000), va(0x10_0000)),
                (va(0x10_1000), va(0x10_2000)),
                (va(0x10_3000), va(0x10_4000)),
            ]
        );
    }

    #[test]
    fn range_is_widened_to_pages() {
        let mut storage = vec![0u64; 512 * 4];
        let mut tt = table(&mut storage);
        map(&mut tt, 0, TWO_MIB, MapType::Cached);

        let mut mmu = SimulatedMmu::new();
        flush_cacheable_range(&tt, &mut mmu, va(0x1234), 0x10).unwrap();

        assert_eq!(mmu.flushes(), vec![(va(0x1000), va(0x2000))]);
    }

    #[test]
    fn nothing_cacheable_means_no_flush() {
        let mut storage = vec![0u64; 512 * 4];
        let mut tt = table(&mut storage);
        map(&mut tt, 0, ONE_GIB, MapType::Uncached);

        let mut mmu = SimulatedMmu::new();

        assert_eq!(flush_cacheable_range(&tt, &mut mmu, va(0), 2 * ONE_GIB), Ok(0));
        assert_eq!(flush_cacheable_range(&tt, &mut mmu, va(0), 0), Ok(0));
        assert!(mmu.events().is_empty());
    }
}
