use crate::{
    address::{Address, AddressTranslationLevel, VirtualAddress},
    error::{Error, Result},
};

use super::{Granule, MAX_VA_BITS, MIN_VA_BITS};

pub mod consts {
    /// General consts
    pub const ONE_GIB: usize = 1024 * 1024 * 1024;
    pub const TWO_MIB: usize = 2 * 1024 * 1024;
    pub const FOUR_KIB: usize = 4 * 1024;
}

/// Shape of the translation tree: which levels exist, how much address
/// space each entry spans and where block mappings are allowed.
///
/// With a 4KiB granule and 48 bit VA:
///
/// ```text
///  [47:39] L0 index  [38:30] L1 index  [29:21] L2 index  [20:12] L3 index  [11:0] offset
/// ```
///
/// Narrower VA spaces drop leading levels; the root table then only uses as
/// many entries as the remaining top bits can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    granule: Granule,
    va_bits: u32,
    start_level: AddressTranslationLevel,
}

impl Geometry {
    pub fn new(granule: Granule, va_bits: u32) -> Result<Self> {
        if !(MIN_VA_BITS..=MAX_VA_BITS).contains(&va_bits) {
            return Err(Error::UnsupportedAddressWidth(va_bits));
        }

        let index_bits = va_bits - granule.shift();
        let levels = index_bits.div_ceil(granule.bits_per_level());
        // A single level walk cannot express the initial lookup level.
        if !(2..=4).contains(&levels) {
            return Err(Error::UnsupportedAddressWidth(va_bits));
        }

        Ok(Self {
            granule,
            va_bits,
            start_level: AddressTranslationLevel::from(4 - levels as usize),
        })
    }

    pub fn granule(&self) -> Granule {
        self.granule
    }

    pub fn va_bits(&self) -> u32 {
        self.va_bits
    }

    pub fn start_level(&self) -> AddressTranslationLevel {
        self.start_level
    }

    /// One past the highest mappable virtual address.
    pub fn va_limit(&self) -> usize {
        1 << self.va_bits
    }

    pub fn entries_per_table(&self) -> usize {
        self.granule.entries_per_table()
    }

    pub fn root_entries(&self) -> usize {
        1 << (self.va_bits - self.level_shift(self.start_level))
    }

    pub fn level_shift(&self, level: AddressTranslationLevel) -> u32 {
        self.granule.shift() + (3 - level.index() as u32) * self.granule.bits_per_level()
    }

    /// Bytes of address space covered by one entry at `level`.
    pub fn block_size(&self, level: AddressTranslationLevel) -> usize {
        1 << self.level_shift(level)
    }

    pub fn index(&self, vaddr: VirtualAddress, level: AddressTranslationLevel) -> usize {
        let entries = if level == self.start_level {
            self.root_entries()
        } else {
            self.entries_per_table()
        };
        (vaddr.as_raw_ptr() >> self.level_shift(level)) & (entries - 1)
    }

    /// Whether an entry at `level` may hold a block or page descriptor.
    pub fn supports_leaf(&self, level: AddressTranslationLevel) -> bool {
        match (self.granule, level) {
            (_, AddressTranslationLevel::Three) => true,
            (Granule::FourKiB, AddressTranslationLevel::One | AddressTranslationLevel::Two) => {
                true
            }
            (Granule::SixteenKiB | Granule::SixtyFourKiB, AddressTranslationLevel::Two) => true,
            _ => false,
        }
    }

    /// Checks that `[start, start + size)` lies inside the VA space.
    pub fn check_range(&self, start: VirtualAddress, size: usize) -> Result<()> {
        let start = start.as_raw_ptr();
        match start.checked_add(size) {
            Some(end) if end <= self.va_limit() => Ok(()),
            _ => Err(Error::AddressOutOfRange { start, size }),
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = AddressTranslationLevel> {
        (self.start_level.index()..=3).map(AddressTranslationLevel::from)
    }
}
