use macros::AddressOps;

use crate::bug;

/// Base trait common to both Physical and Virtual Addresses
pub trait Address: Clone + Copy + Ord + core::fmt::Display {
    fn as_raw_ptr(&self) -> usize;

    fn as_ptr<T: Sized>(&self) -> *const T;

    fn as_mut_ptr<T: Sized>(&self) -> *mut T;

    fn align_offset(&self, align: usize) -> usize {
        debug_assert!(align.is_power_of_two());
        self.as_raw_ptr() & (align - 1)
    }

    fn is_aligned(&self, align: usize) -> bool {
        self.align_offset(align) == 0
    }

    fn align_up(&self, align: usize) -> usize {
        let offset = self.align_offset(align);
        if offset == 0 {
            self.as_raw_ptr()
        } else {
            (self.as_raw_ptr() - offset) + align
        }
    }

    fn align_down(&self, align: usize) -> usize {
        self.as_raw_ptr() - self.align_offset(align)
    }
}

/// Physical Address
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AddressOps)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    pub const fn new(val: usize) -> Self {
        Self(val)
    }
}

impl core::fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:X}_P", self.0)
    }
}

/// Virtual Address
///
/// Bootloader mappings live in the lower (TTBR0) half, so no sign extension
/// is applied. The upper bound depends on the configured VA width and is
/// checked by the translation table, not here.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AddressOps)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    pub const fn new(val: usize) -> Self {
        Self(val)
    }

    /// Virtual address of an identity mapped physical address.
    pub const fn identity(paddr: PhysicalAddress) -> Self {
        Self(paddr.0)
    }
}

impl core::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:X}_V", self.0)
    }
}

/// Lookup level of the translation walk. Level 3 always holds pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressTranslationLevel {
    Zero = 0,
    One = 1,
    Two = 2,
    Three = 3,
}

impl AddressTranslationLevel {
    pub const fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> AddressTranslationLevel {
        match self {
            AddressTranslationLevel::Zero => AddressTranslationLevel::One,
            AddressTranslationLevel::One => AddressTranslationLevel::Two,
            AddressTranslationLevel::Two => AddressTranslationLevel::Three,
            AddressTranslationLevel::Three => bug!("Max AddressTranslationLevel reached"),
        }
    }
}

impl From<usize> for AddressTranslationLevel {
    fn from(level: usize) -> Self {
        match level {
            0 => AddressTranslationLevel::Zero,
            1 => AddressTranslationLevel::One,
            2 => AddressTranslationLevel::Two,
            3 => AddressTranslationLevel::Three,
            _ => bug!("invalid level = {level}"),
        }
    }
}

impl core::fmt::Display for AddressTranslationLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "L{}", self.index())
    }
}

#[cfg(all(test, not(feature = "no_std")))]
mod tests {
    use super::{Address, AddressTranslationLevel, PhysicalAddress, VirtualAddress};

    #[test]
    fn alignment_helpers() {
        let addr = VirtualAddress::new(0x20_1234);

        assert_eq!(addr.align_offset(0x1000), 0x234);
        assert_eq!(addr.align_down(0x1000), 0x20_1000);
        assert_eq!(addr.align_up(0x1000), 0x20_2000);
        assert_eq!(addr.align_down(0x20_0000), 0x20_0000);
        assert!(!addr.is_aligned(0x1000));
        assert!(VirtualAddress::new(0x20_0000).is_aligned(0x20_0000));
    }

    #[test]
    fn address_arithmetic() {
        let mut paddr = PhysicalAddress::new(0x4000_0000);
        paddr += 0x1000;

        assert_eq!(paddr, PhysicalAddress::new(0x4000_1000));
        assert_eq!(paddr - PhysicalAddress::new(0x4000_0000), 0x1000);
        assert_eq!(usize::from(paddr - 0x1000usize), 0x4000_0000);
        assert_eq!(VirtualAddress::identity(paddr).as_raw_ptr(), 0x4000_1000);
        assert_eq!(format!("{paddr}"), "0x40001000_P");
    }

    #[test]
    fn level_walk_order() {
        let mut level = AddressTranslationLevel::from(0);
        let mut seen = vec![level];
        while level != AddressTranslationLevel::Three {
            level = level.next();
            seen.push(level);
        }

        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    #[should_panic]
    fn level_past_three_is_a_bug() {
        AddressTranslationLevel::Three.next();
    }
}
