//! Encoding and decoding of stage 1 VMSAv8-64 descriptors.
//!
//! Table and page descriptors both have bits [1:0] set to 0b11. They can only
//! be told apart by the level they appear at, so every decode takes a level.

use tock_registers::{
    interfaces::{ReadWriteable, Readable},
    registers::InMemoryRegister,
};

use crate::{
    address::{Address, AddressTranslationLevel, PhysicalAddress},
    error::{Error, Result},
    vm::{AccessPermissions, MapType, MemoryKind},
};

use super::{
    Geometry, OUTPUT_ADDR_MASK, STAGE1_LAST_LEVEL_DESCRIPTOR, STAGE1_TABLE_DESCRIPTOR,
};

pub const INVALID_DESCRIPTOR: u64 = 0;

type Stage1TableDescriptor = InMemoryRegister<u64, STAGE1_TABLE_DESCRIPTOR::Register>;
type Stage1LastLevelDescriptor = InMemoryRegister<u64, STAGE1_LAST_LEVEL_DESCRIPTOR::Register>;

/// Bits of a leaf descriptor that are neither output address nor type.
const LEAF_ATTRIBUTE_MASK: u64 = !(OUTPUT_ADDR_MASK | 0b11);

/// A block or page mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf {
    output: PhysicalAddress,
    memory_kind: MemoryKind,
    access_perms: AccessPermissions,
}

impl Leaf {
    pub fn output_address(&self) -> PhysicalAddress {
        self.output
    }

    pub fn memory_kind(&self) -> MemoryKind {
        self.memory_kind
    }

    pub fn access_permissions(&self) -> AccessPermissions {
        self.access_perms
    }

    pub fn map_type(&self) -> MapType {
        MapType::from_attributes(self.memory_kind, self.access_perms)
    }

    pub fn is_cacheable(&self) -> bool {
        self.memory_kind.is_cacheable()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Invalid,
    /// Points to the next level table.
    Table(PhysicalAddress),
    Block(Leaf),
    Page(Leaf),
}

impl Descriptor {
    pub fn decode(raw: u64, level: AddressTranslationLevel, geometry: &Geometry) -> Result<Self> {
        let tbl_desc = Stage1TableDescriptor::new(raw);

        if !tbl_desc.is_set(STAGE1_TABLE_DESCRIPTOR::VALID) {
            return Ok(Descriptor::Invalid);
        }

        if tbl_desc.matches_all(STAGE1_TABLE_DESCRIPTOR::TYPE::Table) {
            return if level == AddressTranslationLevel::Three {
                Ok(Descriptor::Page(decode_leaf(raw)))
            } else {
                Ok(Descriptor::Table(output_address(raw)))
            };
        }

        // Block descriptors are only legal where the granule allows them.
        if level != AddressTranslationLevel::Three && geometry.supports_leaf(level) {
            Ok(Descriptor::Block(decode_leaf(raw)))
        } else {
            Err(Error::CorruptedTranslationTable(raw))
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Descriptor::Invalid)
    }

    pub fn leaf(&self) -> Option<&Leaf> {
        match self {
            Descriptor::Block(leaf) | Descriptor::Page(leaf) => Some(leaf),
            Descriptor::Invalid | Descriptor::Table(_) => None,
        }
    }
}

fn output_address(raw: u64) -> PhysicalAddress {
    PhysicalAddress::new((raw & OUTPUT_ADDR_MASK) as usize)
}

fn decode_leaf(raw: u64) -> Leaf {
    let desc = Stage1LastLevelDescriptor::new(raw);

    Leaf {
        output: output_address(raw),
        memory_kind: MemoryKind::from_attr_index(desc.read(STAGE1_LAST_LEVEL_DESCRIPTOR::AttrIndx)),
        access_perms: parse_access_perms(&desc),
    }
}

fn parse_access_perms(desc: &Stage1LastLevelDescriptor) -> AccessPermissions {
    let mut access_perms = AccessPermissions::READ;

    // AP[2] selects read-only, AP[1] only grants EL0 access.
    if desc.read(STAGE1_LAST_LEVEL_DESCRIPTOR::AP) & 0b10 == 0 {
        access_perms |= AccessPermissions::WRITE;
    }
    if !desc.is_set(STAGE1_LAST_LEVEL_DESCRIPTOR::PXN) {
        access_perms |= AccessPermissions::EXECUTE;
    }

    access_perms
}

/// Attribute bits for a leaf of `map_type`, or `None` if it must not be mapped.
pub fn leaf_attributes(map_type: MapType) -> Option<u64> {
    let memory_kind = map_type.memory_kind()?;
    let access_perms = map_type.access_permissions();
    let desc = Stage1LastLevelDescriptor::new(0);

    desc.modify(
        STAGE1_LAST_LEVEL_DESCRIPTOR::AttrIndx.val(memory_kind.attr_index())
            + STAGE1_LAST_LEVEL_DESCRIPTOR::SH::OuterShareable
            + STAGE1_LAST_LEVEL_DESCRIPTOR::AF::True,
    );

    if access_perms.contains(AccessPermissions::WRITE) {
        desc.modify(STAGE1_LAST_LEVEL_DESCRIPTOR::AP::RW_EL1);
    } else {
        desc.modify(STAGE1_LAST_LEVEL_DESCRIPTOR::AP::RO_EL1);
    }

    if !access_perms.contains(AccessPermissions::EXECUTE) {
        desc.modify(STAGE1_LAST_LEVEL_DESCRIPTOR::UXN::True + STAGE1_LAST_LEVEL_DESCRIPTOR::PXN::True);
    }

    Some(desc.get())
}

/// Attribute bits carried by an existing leaf, used to replicate it.
pub fn attributes_of(raw: u64) -> u64 {
    raw & LEAF_ATTRIBUTE_MASK
}

pub fn is_cacheable(raw: u64) -> bool {
    let desc = Stage1LastLevelDescriptor::new(raw);
    desc.is_set(STAGE1_LAST_LEVEL_DESCRIPTOR::VALID)
        && MemoryKind::from_attr_index(desc.read(STAGE1_LAST_LEVEL_DESCRIPTOR::AttrIndx))
            .is_cacheable()
}

pub fn new_stage1_table_desc(next_level_table: PhysicalAddress) -> u64 {
    let table_desc =
        Stage1TableDescriptor::new(next_level_table.as_raw_ptr() as u64 & OUTPUT_ADDR_MASK);

    table_desc.modify(STAGE1_TABLE_DESCRIPTOR::VALID::True + STAGE1_TABLE_DESCRIPTOR::TYPE::Table);

    table_desc.get()
}

/// Block descriptor for levels 0-2, page descriptor for level 3.
pub fn new_stage1_leaf_desc(
    level: AddressTranslationLevel,
    output_address: PhysicalAddress,
    attributes: u64,
) -> u64 {
    let desc = Stage1LastLevelDescriptor::new(
        (attributes & LEAF_ATTRIBUTE_MASK) | (output_address.as_raw_ptr() as u64 & OUTPUT_ADDR_MASK),
    );

    if level == AddressTranslationLevel::Three {
        desc.modify(STAGE1_LAST_LEVEL_DESCRIPTOR::VALID::True + STAGE1_LAST_LEVEL_DESCRIPTOR::TYPE::Page);
    } else {
        desc.modify(STAGE1_LAST_LEVEL_DESCRIPTOR::VALID::True + STAGE1_LAST_LEVEL_DESCRIPTOR::TYPE::Block);
    }

    desc.get()
}
