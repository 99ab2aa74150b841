use crate::address::VirtualAddress;

/// Secure world carve-out at the top of DRAM. Never mapped.
pub const OPTEE_SIZE: usize = 0x0200_0000;

/// Page containing address zero. Kept faulting to catch NULL dereferences.
pub const ZERO_PAGE: VirtualAddress = VirtualAddress::new(0);

/// Default size of the region the boot stage hands over for translation tables.
pub const EARLY_TABLE_REGION_SIZE: usize = 64 * 4096;
