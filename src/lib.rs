#![cfg_attr(feature = "no_std", no_std)]

#[macro_use]
extern crate bitflags;

#[cfg(all(feature = "no_std", target_arch = "aarch64"))]
pub mod arch;

pub mod address;
pub mod address_map;
pub mod address_space;
pub mod boot;
pub mod bug;
pub mod error;
pub mod mmu;
pub mod vm;

pub use address::{Address, AddressTranslationLevel, PhysicalAddress, VirtualAddress};
pub use address_space::{ActiveAddressSpace, AddressSpace, Translation};
pub use error::{Error, Result};
pub use mmu::{Entry, Geometry, Granule, MmuConfig, MmuOps, TableArena};
pub use vm::{AccessPermissions, MapFlags, MapType, MemoryKind};

// Descriptors are read and written as `u64` and addresses converted through `usize`.
static_assertions::const_assert_eq!(usize::BITS, 64);
static_assertions::assert_eq_size!(u64, [u8; 8]);
