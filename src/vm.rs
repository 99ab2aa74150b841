use crate::mmu::{MAIR_IDX_DEVICE_NGNRNE, MAIR_IDX_NORMAL, MAIR_IDX_NORMAL_NC};

/// Memory type selected through the MAIR index of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// DRAM memory: write-back cache-able.
    Normal,

    /// Normal memory that bypasses the caches (write-combine).
    NormalNonCacheable,

    /// Device (Peripherals) memory: always non cache-able.
    Device,
}

impl MemoryKind {
    pub const fn attr_index(self) -> u64 {
        match self {
            MemoryKind::Normal => MAIR_IDX_NORMAL,
            MemoryKind::NormalNonCacheable => MAIR_IDX_NORMAL_NC,
            MemoryKind::Device => MAIR_IDX_DEVICE_NGNRNE,
        }
    }

    /// Every device flavour (nGnRnE, nGnRE, GRE) is reported as `Device`.
    pub const fn from_attr_index(idx: u64) -> Self {
        match idx {
            MAIR_IDX_NORMAL => MemoryKind::Normal,
            MAIR_IDX_NORMAL_NC => MemoryKind::NormalNonCacheable,
            _ => MemoryKind::Device,
        }
    }

    pub const fn is_cacheable(self) -> bool {
        matches!(self, MemoryKind::Normal)
    }
}

// AccessPermissions of a Mapped Region
bitflags! {
    pub struct AccessPermissions: u64 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const EXECUTE = 0b0000_0100;
    }
}

impl AccessPermissions {
    pub fn read_write() -> Self {
        AccessPermissions::READ | AccessPermissions::WRITE
    }

    pub fn read_execute() -> Self {
        AccessPermissions::READ | AccessPermissions::EXECUTE
    }
}

impl core::fmt::Display for AccessPermissions {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let flag = |perm, c| if self.contains(perm) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(AccessPermissions::READ, 'r'),
            flag(AccessPermissions::WRITE, 'w'),
            flag(AccessPermissions::EXECUTE, 'x')
        )
    }
}

/// How a range is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapType {
    /// Cached, read-write, execute-never.
    Cached,
    /// Strongly ordered device memory, execute-never.
    Uncached,
    /// Normal non-cacheable memory, execute-never.
    WriteCombine,
    /// Cached, read-only, executable.
    Code,
    /// Cached, read-only, execute-never.
    CachedRo,
    /// Cached, read-write, executable. Used before permissions are tightened.
    CachedRwx,
    /// No mapping: any access faults.
    Fault,
}

impl MapType {
    pub fn memory_kind(self) -> Option<MemoryKind> {
        match self {
            MapType::Cached | MapType::Code | MapType::CachedRo | MapType::CachedRwx => {
                Some(MemoryKind::Normal)
            }
            MapType::WriteCombine => Some(MemoryKind::NormalNonCacheable),
            MapType::Uncached => Some(MemoryKind::Device),
            MapType::Fault => None,
        }
    }

    pub fn access_permissions(self) -> AccessPermissions {
        match self {
            MapType::Cached | MapType::Uncached | MapType::WriteCombine => {
                AccessPermissions::read_write()
            }
            MapType::Code => AccessPermissions::read_execute(),
            MapType::CachedRo => AccessPermissions::READ,
            MapType::CachedRwx => AccessPermissions::all(),
            MapType::Fault => AccessPermissions::empty(),
        }
    }

    pub fn is_cacheable(self) -> bool {
        self.memory_kind().map_or(false, MemoryKind::is_cacheable)
    }

    /// Whether memory currently mapped as `self` may be treated as `check`.
    /// Any cacheable flavour is compatible with `Cached`.
    pub fn is_compatible(self, check: MapType) -> bool {
        self == check || (check == MapType::Cached && self.is_cacheable())
    }

    /// Collapses every cacheable flavour into `CachedRwx`, used when the
    /// MMU is not configured to enforce permissions.
    pub fn without_permissions(self) -> MapType {
        if self.is_cacheable() {
            MapType::CachedRwx
        } else {
            self
        }
    }

    /// Reconstructs the map type that produced a leaf descriptor.
    pub fn from_attributes(kind: MemoryKind, perms: AccessPermissions) -> MapType {
        match kind {
            MemoryKind::Device => MapType::Uncached,
            MemoryKind::NormalNonCacheable => MapType::WriteCombine,
            MemoryKind::Normal => match (
                perms.contains(AccessPermissions::WRITE),
                perms.contains(AccessPermissions::EXECUTE),
            ) {
                (true, true) => MapType::CachedRwx,
                (true, false) => MapType::Cached,
                (false, true) => MapType::Code,
                (false, false) => MapType::CachedRo,
            },
        }
    }
}

impl core::fmt::Display for MapType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            MapType::Cached => "cached",
            MapType::Uncached => "uncached",
            MapType::WriteCombine => "write-combine",
            MapType::Code => "code",
            MapType::CachedRo => "cached-ro",
            MapType::CachedRwx => "cached-rwx",
            MapType::Fault => "fault",
        };
        f.write_str(name)
    }
}

bitflags! {
    pub struct MapFlags: u32 {
        /// Map with last level pages only, so the range can later be
        /// remapped without splitting a block it executes from.
        const PAGEWISE = 0b0000_0001;
    }
}
