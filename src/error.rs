#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Address is not aligned to the translation granule.
    UnalignedAddress(usize),
    /// Range `[start, start + size)` leaves the configured VA space.
    AddressOutOfRange { start: usize, size: usize },
    InvalidVirtualAddress(usize),
    InvalidPhysicalAddress(usize),
    /// Range `[start, start + size)` is not reachable through a descriptor.
    PhysicalAddressOutOfRange { start: usize, size: usize },
    /// Scratch region has no free table left. Holds the region capacity.
    OutOfTranslationTables(usize),
    CorruptedTranslationTable(u64),
    InvalidTableRegion,
    GranuleMismatch,
    UnsupportedAddressWidth(u32),
    InvalidBootLayout,
    AddressSpaceActive,
    NoActiveAddressSpace,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::UnalignedAddress(addr) => {
                write!(f, "Address `0x{addr:X}` is not aligned to the granule")
            }
            Error::AddressOutOfRange { start, size } => write!(
                f,
                "Range `0x{start:X}` + `0x{size:X}` is outside of the virtual address space"
            ),
            Error::InvalidVirtualAddress(addr) => write!(f, "Invalid Virtual Address `0x{addr:X}`"),
            Error::InvalidPhysicalAddress(addr) => {
                write!(f, "Invalid Physical Address `0x{addr:X}`")
            }
            Error::PhysicalAddressOutOfRange { start, size } => write!(
                f,
                "Range `0x{start:X}` + `0x{size:X}` is outside of the physical address space"
            ),
            Error::OutOfTranslationTables(capacity) => write!(
                f,
                "Translation table region exhausted. Configured Size = {capacity} tables"
            ),
            Error::CorruptedTranslationTable(desc) => {
                write!(f, "Corrupted translation table descriptor `0x{desc:016X}`")
            }
            Error::InvalidTableRegion => write!(
                f,
                "Translation table region must hold a whole number of granule sized tables"
            ),
            Error::GranuleMismatch => {
                write!(f, "Table region granule differs from the MMU configuration")
            }
            Error::UnsupportedAddressWidth(bits) => {
                write!(f, "Unsupported virtual address width of {bits} bits")
            }
            Error::InvalidBootLayout => write!(f, "Inconsistent early memory layout"),
            Error::AddressSpaceActive => write!(f, "An address space is already installed"),
            Error::NoActiveAddressSpace => write!(f, "No address space is installed"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
