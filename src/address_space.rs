use spin::Mutex;

use crate::{
    address::{Address, AddressTranslationLevel, PhysicalAddress, VirtualAddress},
    error::{Error, Result},
    mmu::{
        flush, translation_table::WriteContext, Entry, Geometry, MmuConfig, MmuOps, TableArena,
        TranslationTable, OUTPUT_ADDR_BITS,
    },
    vm::{AccessPermissions, MapFlags, MapType, MemoryKind},
};

/// Where a virtual address ends up, as seen by the table walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub vaddr: VirtualAddress,
    pub paddr: PhysicalAddress,
    pub level: AddressTranslationLevel,
    pub memory_kind: MemoryKind,
    pub access_perms: AccessPermissions,
    pub map_type: MapType,
}

/// One translation regime: the TTBR0 tree, the region its tables come from
/// and the hardware it is loaded into.
pub struct AddressSpace<'a, O: MmuOps> {
    config: MmuConfig,
    table: TranslationTable<'a>,
    ops: O,
}

impl<'a, O: MmuOps> AddressSpace<'a, O> {
    pub fn new(config: MmuConfig, arena: TableArena<'a>, ops: O) -> Result<Self> {
        let table = TranslationTable::new(config.geometry()?, arena)?;

        log::debug!(
            "address space: {:?} granule, {} bit VA, ttb {}",
            config.granule,
            config.va_bits,
            table.root_address()
        );

        Ok(Self { config, table, ops })
    }

    pub fn config(&self) -> &MmuConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        self.table.geometry()
    }

    /// Root table address to program into TTBR0.
    pub fn ttb(&self) -> PhysicalAddress {
        self.table.root_address()
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut O {
        &mut self.ops
    }

    pub fn arena(&self) -> &TableArena<'a> {
        self.table.arena()
    }

    pub fn remap_range(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        size: usize,
        map_type: MapType,
    ) -> Result<()> {
        self.remap_range_with_flags(vaddr, paddr, size, map_type, MapFlags::empty())
    }

    /// Maps `[vaddr, vaddr + size)` to `paddr` as `map_type`. `size` is rounded
    /// up to the granule.
    ///
    /// Cacheable lines of the range are flushed first when the new type is
    /// not cached, and the TLB is invalidated once any descriptor changed,
    /// including when the remap fails half way.
    pub fn remap_range_with_flags(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        size: usize,
        map_type: MapType,
        flags: MapFlags,
    ) -> Result<()> {
        self.remap(vaddr, paddr, size, map_type, flags, true)
    }

    /// Like [`Self::remap_range_with_flags`] but without the cache flush.
    /// Only for building the tables while the MMU, and with it the data
    /// cache, is still off.
    pub(crate) fn early_remap_range(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        size: usize,
        map_type: MapType,
        flags: MapFlags,
    ) -> Result<()> {
        if self.ops.mmu_enabled() {
            return self.remap_range_with_flags(vaddr, paddr, size, map_type, flags);
        }
        self.remap(vaddr, paddr, size, map_type, flags, false)
    }

    fn remap(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        size: usize,
        map_type: MapType,
        flags: MapFlags,
        flush_cacheable: bool,
    ) -> Result<()> {
        let granule_size = self.config.granule.size();

        if !vaddr.is_aligned(granule_size) {
            return Err(Error::UnalignedAddress(vaddr.as_raw_ptr()));
        }
        if !paddr.is_aligned(granule_size) {
            return Err(Error::UnalignedAddress(paddr.as_raw_ptr()));
        }

        let size = match size.checked_add(granule_size - 1) {
            Some(size) => size & !(granule_size - 1),
            None => {
                return Err(Error::AddressOutOfRange {
                    start: vaddr.as_raw_ptr(),
                    size,
                })
            }
        };
        if size == 0 {
            return Ok(());
        }
        self.table.geometry().check_range(vaddr, size)?;

        // The output address of a faulting range is never written.
        let paddr = if map_type == MapType::Fault {
            PhysicalAddress::new(0)
        } else {
            check_output_range(paddr, size)?;
            paddr
        };

        log::debug!("remap {vaddr} +0x{size:X} -> {paddr} as {map_type}");

        if flush_cacheable && !map_type.is_compatible(MapType::Cached) {
            flush::flush_cacheable_range(&self.table, &mut self.ops, vaddr, size)?;
        }

        let map_type = if self.config.enforce_permissions {
            map_type
        } else {
            map_type.without_permissions()
        };

        let mut ctx = WriteContext::new(&mut self.ops, self.config.clean_table_writes);
        let res = self.table.map(&mut ctx, vaddr, paddr, size, map_type, flags);

        if ctx.is_dirty() {
            ctx.ops().tlb_invalidate_all();
        }

        res
    }

    pub fn find_entry(&self, vaddr: VirtualAddress) -> Result<Entry> {
        self.table.find_entry(vaddr)
    }

    pub fn translate(&self, vaddr: VirtualAddress) -> Option<Translation> {
        let entry = self.table.find_entry(vaddr).ok()?;
        let leaf = entry.leaf()?;

        Some(Translation {
            vaddr,
            paddr: leaf.output_address() + vaddr.align_offset(entry.span()),
            level: entry.level(),
            memory_kind: leaf.memory_kind(),
            access_perms: leaf.access_permissions(),
            map_type: leaf.map_type(),
        })
    }

    /// See [`flush::flush_cacheable_range`].
    pub fn flush_cacheable_range(&mut self, start: VirtualAddress, size: usize) -> Result<usize> {
        flush::flush_cacheable_range(&self.table, &mut self.ops, start, size)
    }

    /// Clean and invalidate `[start, start + size)` ahead of a device reading it.
    pub fn dma_flush_range(&mut self, start: VirtualAddress, size: usize) {
        if let Some(end) = dma_range_end(start, size) {
            self.ops.flush_dcache_range(start, end);
        }
    }

    /// Drop cached lines of `[start, start + size)` after a device wrote it.
    pub fn dma_inv_range(&mut self, start: VirtualAddress, size: usize) {
        if let Some(end) = dma_range_end(start, size) {
            self.ops.invalidate_dcache_range(start, end);
        }
    }

    /// Loads the tree into TTBR0 and turns the MMU on. No-op if it already is.
    pub fn enable(&mut self) -> Result<()> {
        if self.ops.mmu_enabled() {
            return Ok(());
        }

        log::debug!("enabling MMU, ttb @ {}", self.ttb());
        self.ops.tlb_invalidate_all();
        self.ops.enable(self.table.root_address(), &self.config)
    }

    /// Cleans and invalidates all data caches, then turns the MMU off.
    pub fn disable(&mut self) {
        self.ops.flush_dcache_all();
        self.ops.disable();
    }
}

/// Rejects ranges the output address field of a descriptor cannot hold.
fn check_output_range(paddr: PhysicalAddress, size: usize) -> Result<()> {
    match paddr.as_raw_ptr().checked_add(size) {
        Some(end) if end <= 1 << OUTPUT_ADDR_BITS => Ok(()),
        _ => Err(Error::PhysicalAddressOutOfRange {
            start: paddr.as_raw_ptr(),
            size,
        }),
    }
}

fn dma_range_end(start: VirtualAddress, size: usize) -> Option<VirtualAddress> {
    if size == 0 {
        return None;
    }

    match start.as_raw_ptr().checked_add(size) {
        Some(end) => Some(VirtualAddress::new(end)),
        None => {
            log::warn!("ignoring DMA maintenance on wrapping range {start} +0x{size:X}");
            None
        }
    }
}

/// The address space currently loaded into the MMU, shared between the code
/// paths that remap memory.
pub struct ActiveAddressSpace<O: MmuOps + 'static> {
    inner: Mutex<Option<AddressSpace<'static, O>>>,
}

impl<O: MmuOps + 'static> ActiveAddressSpace<O> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn install(&self, space: AddressSpace<'static, O>) -> Result<()> {
        let mut active = self.inner.lock();
        if active.is_some() {
            return Err(Error::AddressSpaceActive);
        }

        *active = Some(space);
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Runs `f` on the installed address space, holding the lock throughout.
    pub fn with<R>(&self, f: impl FnOnce(&mut AddressSpace<'static, O>) -> R) -> Result<R> {
        match self.inner.lock().as_mut() {
            Some(space) => Ok(f(space)),
            None => Err(Error::NoActiveAddressSpace),
        }
    }

    pub fn take(&self) -> Option<AddressSpace<'static, O>> {
        self.inner.lock().take()
    }
}

impl<O: MmuOps + 'static> Default for ActiveAddressSpace<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "no_std")))]
mod tests {
    use super::AddressSpace;
    use crate::{
        address::{AddressTranslationLevel, PhysicalAddress, VirtualAddress},
        address_space::Translation,
        error::Error,
        mmu::{
            sim::{MmuEvent, SimulatedMmu},
            utils::consts::{FOUR_KIB, ONE_GIB, TWO_MIB},
            Granule, MmuConfig, TableArena,
        },
        vm::{AccessPermissions, MapType, MemoryKind},
    };

    fn space(storage: &mut [u64], config: MmuConfig) -> AddressSpace<'_, SimulatedMmu> {
        let arena =
            TableArena::new(storage, PhysicalAddress::new(0x8000_0000), config.granule).unwrap();
        AddressSpace::new(config, arena, SimulatedMmu::new()).unwrap()
    }

    fn no_clean() -> MmuConfig {
        MmuConfig {
            clean_table_writes: false,
            ..MmuConfig::default()
        }
    }

    #[test]
    fn granule_of_arena_must_match() {
        let mut storage = vec![0u64; 2048];
        let arena =
            TableArena::new(&mut storage, PhysicalAddress::new(0), Granule::SixteenKiB).unwrap();

        assert!(matches!(
            AddressSpace::new(MmuConfig::default(), arena, SimulatedMmu::new()),
            Err(Error::GranuleMismatch)
        ));
    }

    #[test]
    fn remap_checks_arguments() {
        let mut storage = vec![0u64; 512 * 4];
        let mut space = space(&mut storage, no_clean());

        assert_eq!(
            space.remap_range(VirtualAddress::new(0x800), PhysicalAddress::new(0), 1, MapType::Cached),
            Err(Error::UnalignedAddress(0x800))
        );
        assert_eq!(
            space.remap_range(VirtualAddress::new(0), PhysicalAddress::new(0x10), 1, MapType::Cached),
            Err(Error::UnalignedAddress(0x10))
        );
        assert_eq!(
            space.remap_range(
                VirtualAddress::new(511 * ONE_GIB),
                PhysicalAddress::new(0),
                2 * ONE_GIB,
                MapType::Cached
            ),
            Err(Error::AddressOutOfRange {
                start: 511 * ONE_GIB,
                size: 2 * ONE_GIB
            })
        );
        assert_eq!(
            space.remap_range(VirtualAddress::new(0), PhysicalAddress::new(0), 0, MapType::Cached),
            Ok(())
        );
        assert!(space.ops().events().is_empty());
    }

    #[test]
    fn physical_range_must_fit_a_descriptor() {
        let mut storage = vec![0u64; 512 * 4];
        let mut space = space(&mut storage, no_clean());
        let above_oa = (1 << 48) + FOUR_KIB;
        let last_page = usize::MAX & !0xFFF;

        assert_eq!(
            space.remap_range(
                VirtualAddress::new(FOUR_KIB),
                PhysicalAddress::new(above_oa),
                FOUR_KIB,
                MapType::Cached
            ),
            Err(Error::PhysicalAddressOutOfRange {
                start: above_oa,
                size: FOUR_KIB
            })
        );
        assert_eq!(
            space.remap_range(
                VirtualAddress::new(0),
                PhysicalAddress::new(last_page),
                2 * FOUR_KIB,
                MapType::Cached
            ),
            Err(Error::PhysicalAddressOutOfRange {
                start: last_page,
                size: 2 * FOUR_KIB
            })
        );
        assert!(space.ops().events().is_empty());
        assert_eq!(space.translate(VirtualAddress::new(FOUR_KIB)), None);

        // Highest page the output address can hold.
        space
            .remap_range(
                VirtualAddress::new(FOUR_KIB),
                PhysicalAddress::new((1 << 48) - FOUR_KIB),
                FOUR_KIB,
                MapType::Cached,
            )
            .unwrap();
        assert_eq!(
            space.translate(VirtualAddress::new(FOUR_KIB + 0x10)).unwrap().paddr,
            PhysicalAddress::new((1 << 48) - FOUR_KIB + 0x10)
        );

        // Faulting ranges ignore the output address.
        space
            .remap_range(
                VirtualAddress::new(0),
                PhysicalAddress::new(last_page),
                2 * FOUR_KIB,
                MapType::Fault,
            )
            .unwrap();
        assert_eq!(space.translate(VirtualAddress::new(FOUR_KIB)), None);
    }

    #[test]
    fn size_is_rounded_up_to_the_granule() {
        let mut storage = vec![0u64; 512 * 4];
        let mut space = space(&mut storage, no_clean());

        space
            .remap_range(VirtualAddress::new(0), PhysicalAddress::new(0), 1, MapType::Cached)
            .unwrap();

        assert!(space.translate(VirtualAddress::new(0xFFF)).is_some());
        assert!(space.translate(VirtualAddress::new(FOUR_KIB)).is_none());
        assert_eq!(space.ops().tlb_invalidations(), 1);
    }

    #[test]
    fn uncaching_flushes_first_and_invalidates_last() {
        let mut storage = vec![0u64; 512 * 4];
        let mut space = space(&mut storage, no_clean());
        let base = VirtualAddress::new(ONE_GIB);

        space
            .remap_range(base, PhysicalAddress::new(ONE_GIB), TWO_MIB, MapType::Cached)
            .unwrap();
        space.ops_mut().clear();

        space
            .remap_range(base, PhysicalAddress::new(ONE_GIB), FOUR_KIB, MapType::Uncached)
            .unwrap();

        assert_eq!(
            space.ops().events(),
            &[
                MmuEvent::FlushDcache {
                    start: base,
                    end: base + FOUR_KIB
                },
                MmuEvent::TlbInvalidateAll,
            ]
        );
    }

    #[test]
    fn cached_flavours_do_not_flush() {
        let mut storage = vec![0u64; 512 * 4];
        let mut space = space(&mut storage, no_clean());

        space
            .remap_range(VirtualAddress::new(0), PhysicalAddress::new(0), TWO_MIB, MapType::Cached)
            .unwrap();
        space.ops_mut().clear();
        space
            .remap_range(VirtualAddress::new(0), PhysicalAddress::new(0), FOUR_KIB, MapType::Code)
            .unwrap();

        assert!(space.ops().flushes().is_empty());
    }

    #[test]
    fn permissions_can_be_skipped() {
        let mut storage = vec![0u64; 512 * 4];
        let config = MmuConfig {
            enforce_permissions: false,
            ..no_clean()
        };
        let mut space = space(&mut storage, config);

        space
            .remap_range(VirtualAddress::new(0), PhysicalAddress::new(0), FOUR_KIB, MapType::CachedRo)
            .unwrap();
        space
            .remap_range(
                VirtualAddress::new(FOUR_KIB),
                PhysicalAddress::new(FOUR_KIB),
                FOUR_KIB,
                MapType::WriteCombine,
            )
            .unwrap();

        let ro = space.translate(VirtualAddress::new(0)).unwrap();
        let wc = space.translate(VirtualAddress::new(FOUR_KIB)).unwrap();
        assert_eq!(ro.map_type, MapType::CachedRwx);
        assert_eq!(wc.map_type, MapType::WriteCombine);
    }

    #[test]
    fn translate_reports_the_leaf() {
        let mut storage = vec![0u64; 512 * 4];
        let mut space = space(&mut storage, no_clean());

        space
            .remap_range(
                VirtualAddress::new(2 * ONE_GIB),
                PhysicalAddress::new(ONE_GIB),
                ONE_GIB,
                MapType::Code,
            )
            .unwrap();

        assert_eq!(
            space.translate(VirtualAddress::new(2 * ONE_GIB + 0x1_2345)),
            Some(Translation {
                vaddr: VirtualAddress::new(2 * ONE_GIB + 0x1_2345),
                paddr: PhysicalAddress::new(ONE_GIB + 0x1_2345),
                level: AddressTranslationLevel::One,
                memory_kind: MemoryKind::Normal,
                access_perms: AccessPermissions::read_execute(),
                map_type: MapType::Code,
            })
        );
        assert_eq!(space.translate(VirtualAddress::new(0)), None);
        assert_eq!(space.translate(VirtualAddress::new(usize::MAX)), None);
    }

    #[test]
    fn failed_remap_still_invalidates_the_tlb() {
        let mut storage = vec![0u64; 512 * 2];
        let mut space = space(&mut storage, no_clean());

        let res = space.remap_range(
            VirtualAddress::new(0),
            PhysicalAddress::new(0),
            FOUR_KIB,
            MapType::Cached,
        );

        assert_eq!(res, Err(Error::OutOfTranslationTables(2)));
        assert_eq!(space.ops().tlb_invalidations(), 1);
    }

    #[test]
    fn enable_and_disable() {
        let mut storage = vec![0u64; 512 * 2];
        let mut space = space(&mut storage, no_clean());
        let ttb = space.ttb();

        space.enable().unwrap();
        space.enable().unwrap();
        space.disable();

        assert_eq!(
            space.ops().events(),
            &[
                MmuEvent::TlbInvalidateAll,
                MmuEvent::Enable { ttb },
                MmuEvent::FlushDcacheAll,
                MmuEvent::Disable,
            ]
        );
    }

    #[test]
    fn dma_helpers_pass_through() {
        let mut storage = vec![0u64; 512 * 2];
        let mut space = space(&mut storage, no_clean());
        let buf = VirtualAddress::new(0x4000_0040);

        space.dma_flush_range(buf, 0x80);
        space.dma_inv_range(buf, 0x80);
        space.dma_inv_range(buf, 0);

        assert_eq!(
            space.ops().events(),
            &[
                MmuEvent::FlushDcache {
                    start: buf,
                    end: buf + 0x80
                },
                MmuEvent::InvalidateDcache {
                    start: buf,
                    end: buf + 0x80
                },
            ]
        );
    }

    #[test]
    fn dma_on_a_wrapping_range_is_ignored() {
        let mut storage = vec![0u64; 512 * 2];
        let mut space = space(&mut storage, no_clean());
        let top = VirtualAddress::new(usize::MAX & !0xFFF);

        space.dma_flush_range(top, 2 * FOUR_KIB);
        space.dma_inv_range(top, 2 * FOUR_KIB);

        assert!(space.ops().events().is_empty());
    }
}
