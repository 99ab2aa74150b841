//! Bring-up sequences run once per boot on an [`AddressSpace`].

use heapless::Vec;

use crate::{
    address::{Address, AddressTranslationLevel, PhysicalAddress, VirtualAddress},
    address_map::{OPTEE_SIZE, ZERO_PAGE},
    address_space::AddressSpace,
    error::{Error, Result},
    mmu::MmuOps,
    vm::{MapFlags, MapType},
};

/// Flat mapping, bulk of DRAM, the image, the secure carve-out and the text.
pub const MAX_BOOT_REGIONS: usize = 5;

/// Memory layout handed over by the previous boot stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyLayout {
    pub membase: PhysicalAddress,
    pub memsize: usize,
    /// Where this image was loaded. Everything from here up to the secure
    /// carve-out is mapped page-wise so it can be remapped while running.
    pub image_start: PhysicalAddress,
    /// Code region, when it may lie outside of DRAM (e.g. executing from SRAM).
    pub text: Option<(PhysicalAddress, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRegion {
    pub start: PhysicalAddress,
    pub size: usize,
    pub map_type: MapType,
    pub flags: MapFlags,
}

impl BootRegion {
    fn new(start: PhysicalAddress, size: usize, map_type: MapType) -> Self {
        Self {
            start,
            size,
            map_type,
            flags: MapFlags::empty(),
        }
    }
}

impl EarlyLayout {
    pub fn optee_start(&self) -> PhysicalAddress {
        self.membase + (self.memsize - OPTEE_SIZE)
    }

    /// Everything is identity mapped, so every region has to end inside the
    /// VA space.
    fn validate(&self, granule_size: usize, va_bits: u32) -> Result<()> {
        let va_limit = 1usize << va_bits;
        let within = |start: usize, size: usize| {
            start
                .checked_add(size)
                .map_or(false, |end| end <= va_limit)
        };

        let aligned = self.membase.is_aligned(granule_size)
            && self.image_start.is_aligned(granule_size)
            && self.memsize % granule_size == 0;
        let fits = self.memsize >= OPTEE_SIZE
            && within(self.membase.as_raw_ptr(), self.memsize)
            && self.membase <= self.image_start
            && self.image_start <= self.optee_start();
        // The VA limit is granule aligned, so rounding the text out stays inside.
        let text_fits = self
            .text
            .map_or(true, |(start, size)| within(start.as_raw_ptr(), size));

        if aligned && fits && text_fits {
            Ok(())
        } else {
            Err(Error::InvalidBootLayout)
        }
    }

    /// The identity mappings the early MMU setup creates, in the order they
    /// are applied. Later entries override earlier ones.
    pub fn regions(
        &self,
        granule_size: usize,
        va_bits: u32,
    ) -> Result<Vec<BootRegion, MAX_BOOT_REGIONS>> {
        self.validate(granule_size, va_bits)?;

        let optee_start = self.optee_start();
        let mut regions = Vec::new();
        let mut push = |region: BootRegion| {
            if region.size == 0 {
                return Ok(());
            }
            regions.push(region).map_err(|_| Error::InvalidBootLayout)
        };

        // Uncached and execute-never unless mapped otherwise below.
        push(BootRegion::new(
            PhysicalAddress::new(0),
            1 << (va_bits - 1),
            MapType::Uncached,
        ))?;
        // Bulk of DRAM below the image, in blocks to keep the early table count low.
        push(BootRegion::new(
            self.membase,
            self.image_start - self.membase,
            MapType::CachedRwx,
        ))?;
        push(BootRegion {
            flags: MapFlags::PAGEWISE,
            ..BootRegion::new(self.image_start, optee_start - self.image_start, MapType::CachedRwx)
        })?;
        push(BootRegion::new(optee_start, OPTEE_SIZE, MapType::Fault))?;
        if let Some((text_start, text_size)) = self.text {
            let start = text_start.align_down(granule_size);
            let size = (text_start + text_size).align_up(granule_size) - start;
            push(BootRegion::new(
                PhysicalAddress::new(start),
                size,
                MapType::CachedRwx,
            ))?;
        }

        Ok(regions)
    }
}

/// Builds the identity map for `layout` and turns the MMU on. Does nothing
/// when an earlier stage already enabled it.
pub fn mmu_early_enable<O: MmuOps>(space: &mut AddressSpace<'_, O>, layout: &EarlyLayout) -> Result<()> {
    if space.ops().mmu_enabled() {
        log::debug!("MMU already enabled, keeping the current tables");
        return Ok(());
    }

    let config = *space.config();
    let regions = layout.regions(config.granule.size(), config.va_bits)?;

    for region in &regions {
        log::debug!(
            "early map {} +0x{:X} as {}",
            region.start,
            region.size,
            region.map_type
        );
        space.early_remap_range(
            VirtualAddress::identity(region.start),
            region.start,
            region.size,
            region.map_type,
            region.flags,
        )?;
    }

    space.enable()
}

/// Makes the zero page and the optional stack guard page fault on access.
pub fn setup_trap_pages<O: MmuOps>(
    space: &mut AddressSpace<'_, O>,
    guard_page: Option<VirtualAddress>,
) -> Result<()> {
    if let Some(guard_page) = guard_page {
        let page_size = space.config().granule.size();
        space.remap_range(
            guard_page,
            PhysicalAddress::new(guard_page.as_raw_ptr()),
            page_size,
            MapType::Fault,
        )?;
        log::debug!("Created guard page at {guard_page}");
    }

    zero_page_faulting(space)?;
    log::debug!("Created zero page");

    Ok(())
}

/// Temporarily allows access to the zero page, e.g. to read a boot vector.
pub fn zero_page_access<O: MmuOps>(space: &mut AddressSpace<'_, O>) -> Result<()> {
    let page_size = space.config().granule.size();
    space.remap_range(ZERO_PAGE, PhysicalAddress::new(0), page_size, MapType::Cached)
}

pub fn zero_page_faulting<O: MmuOps>(space: &mut AddressSpace<'_, O>) -> Result<()> {
    let page_size = space.config().granule.size();
    space.remap_range(ZERO_PAGE, PhysicalAddress::new(0), page_size, MapType::Fault)
}

/// Maps device memory uncached at level 2 block granularity and returns `virt`.
pub fn map_io_sections<O: MmuOps>(
    space: &mut AddressSpace<'_, O>,
    phys: PhysicalAddress,
    virt: VirtualAddress,
    size: usize,
) -> Result<VirtualAddress> {
    let section = space.geometry().block_size(AddressTranslationLevel::Two);

    if !virt.is_aligned(section) {
        return Err(Error::UnalignedAddress(virt.as_raw_ptr()));
    }
    if !phys.is_aligned(section) {
        return Err(Error::UnalignedAddress(phys.as_raw_ptr()));
    }

    let size = size
        .checked_add(section - 1)
        .map(|size| size & !(section - 1))
        .ok_or(Error::AddressOutOfRange {
            start: virt.as_raw_ptr(),
            size,
        })?;

    space.remap_range(virt, phys, size, MapType::Uncached)?;
    Ok(virt)
}

/// Writes back all cached data and turns the MMU off, e.g. before handing
/// control to the next stage.
pub fn mmu_disable<O: MmuOps>(space: &mut AddressSpace<'_, O>) {
    log::debug!("disabling MMU");
    space.disable();
}
