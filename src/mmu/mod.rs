use tock_registers::register_bitfields;

use crate::error::{Error, Result};

pub mod descriptor;
pub mod flush;
pub mod ops;
#[cfg(not(feature = "no_std"))]
pub mod sim;
pub mod table_arena;
pub mod translation_table;
pub mod utils;

pub use ops::MmuOps;
pub use table_arena::TableArena;
pub use translation_table::{Entry, TranslationTable};
pub use utils::Geometry;

/// Width of the output (physical) address of a descriptor.
pub const OUTPUT_ADDR_BITS: u32 = 48;
/// Bits [47:12] of a descriptor. Coarser granules ignore the low bits of this.
pub const OUTPUT_ADDR_MASK: u64 = ((1 << OUTPUT_ADDR_BITS) - 1) & !0xFFF;

/// Default VA width. Only the lower half is identity mapped at boot, which
/// keeps the flat mapping in one root table with a 4KiB granule.
pub const DEFAULT_VA_BITS: u32 = 39;
pub const MIN_VA_BITS: u32 = 25;
pub const MAX_VA_BITS: u32 = 48;

// MAIR attribute slots.
pub const MAIR_IDX_DEVICE_NGNRNE: u64 = 0;
pub const MAIR_IDX_DEVICE_NGNRE: u64 = 1;
pub const MAIR_IDX_DEVICE_GRE: u64 = 2;
pub const MAIR_IDX_NORMAL_NC: u64 = 3;
pub const MAIR_IDX_NORMAL: u64 = 4;

/// Value for MAIR_ELx matching the `MAIR_IDX_*` slots.
pub const MEMORY_ATTRIBUTES: u64 = (0x00 << (MAIR_IDX_DEVICE_NGNRNE * 8))
    | (0x04 << (MAIR_IDX_DEVICE_NGNRE * 8))
    | (0x0c << (MAIR_IDX_DEVICE_GRE * 8))
    | (0x44 << (MAIR_IDX_NORMAL_NC * 8))
    | (0xff << (MAIR_IDX_NORMAL * 8));

/// Translation granule: the page size all block sizes derive from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granule {
    FourKiB,
    SixteenKiB,
    SixtyFourKiB,
}

impl Granule {
    pub const fn shift(self) -> u32 {
        match self {
            Granule::FourKiB => 12,
            Granule::SixteenKiB => 14,
            Granule::SixtyFourKiB => 16,
        }
    }

    pub const fn size(self) -> usize {
        1 << self.shift()
    }

    /// Index bits resolved per lookup level (one table is one granule of u64s).
    pub const fn bits_per_level(self) -> u32 {
        self.shift() - 3
    }

    pub const fn entries_per_table(self) -> usize {
        self.size() / core::mem::size_of::<u64>()
    }
}

/// Runtime MMU configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuConfig {
    pub granule: Granule,
    /// Width of the TTBR0 virtual address space.
    pub va_bits: u32,
    /// When false every cacheable map type is widened to `CachedRwx`.
    pub enforce_permissions: bool,
    /// Clean descriptor writes to the point of coherency, for table walkers
    /// that do not snoop the data cache.
    pub clean_table_writes: bool,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self {
            granule: Granule::FourKiB,
            va_bits: DEFAULT_VA_BITS,
            enforce_permissions: true,
            clean_table_writes: true,
        }
    }
}

impl MmuConfig {
    pub fn with_granule(mut self, granule: Granule) -> Self {
        self.granule = granule;
        self
    }

    pub fn with_va_bits(mut self, va_bits: u32) -> Self {
        self.va_bits = va_bits;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry().map(|_| ())
    }

    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.granule, self.va_bits)
    }

    /// T0SZ field of TCR_ELx.
    pub fn t0sz(&self) -> Result<u64> {
        if !(MIN_VA_BITS..=MAX_VA_BITS).contains(&self.va_bits) {
            return Err(Error::UnsupportedAddressWidth(self.va_bits));
        }
        Ok((u64::BITS - self.va_bits) as u64)
    }
}

register_bitfields! {u64,
    // A table descriptor (levels 0-2), as per ARMv8-A Architecture Reference Manual Figure D8-12.
    pub STAGE1_TABLE_DESCRIPTOR [
        /// Non-secure table access for subsequent levels.
        NS_TABLE OFFSET(63) NUMBITS(1) [],

        /// Access permission limit for subsequent levels.
        AP_TABLE OFFSET(61) NUMBITS(2) [],

        UXN_TABLE OFFSET(60) NUMBITS(1) [],

        PXN_TABLE OFFSET(59) NUMBITS(1) [],

        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            Table = 1
        ],

        VALID OFFSET(0) NUMBITS(1) [
            False = 0,
            True = 1
        ]
    ],

    // A level 1/2 block or level 3 page descriptor.
    pub STAGE1_LAST_LEVEL_DESCRIPTOR [
        /// Bits for Software Use
        SWUSE OFFSET(55) NUMBITS(4) [],

        /// Unprivileged execute-never.
        UXN OFFSET(54) NUMBITS(1) [
            False = 0,
            True = 1
        ],

        /// Privileged execute-never.
        PXN OFFSET(53) NUMBITS(1) [
            False = 0,
            True = 1
        ],

        /// Contiguous hint. Never set by this crate.
        CONTIGUOUS OFFSET(52) NUMBITS(1) [],

        /// Not global.
        NG OFFSET(11) NUMBITS(1) [],

        /// Access flag.
        AF OFFSET(10) NUMBITS(1) [
            False = 0,
            True = 1
        ],

        /// Shareability field.
        SH OFFSET(8) NUMBITS(2) [
            NonShareable = 0b00,
            OuterShareable = 0b10,
            InnerShareable = 0b11
        ],

        /// Access Permissions.
        AP OFFSET(6) NUMBITS(2) [
            RW_EL1 = 0b00,
            RW_EL1_EL0 = 0b01,
            RO_EL1 = 0b10,
            RO_EL1_EL0 = 0b11
        ],

        NS OFFSET(5) NUMBITS(1) [],

        /// Memory attributes index into the MAIR_ELx register.
        AttrIndx OFFSET(2) NUMBITS(3) [],

        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            Page = 1
        ],

        VALID OFFSET(0) NUMBITS(1) [
            False = 0,
            True = 1
        ]
    ]
}
