//! The TTBR0 translation tree.
//!
//! Mappings are written top-down: a range lands in the highest level whose
//! block size it is aligned to and covers. Anything finer goes one level
//! down, splitting an existing block on the way so the parts of it outside
//! the range keep their old mapping.
//!
//! ### Notes on alignment requirements on Virtual and Physical Address space:
//!
//! A block at level N needs both the virtual and the physical address aligned
//! to the block size of level N. A range that is only aligned at one side is
//! mapped with smaller blocks or pages.

use core::mem::size_of;

use crate::{
    address::{Address, AddressTranslationLevel, PhysicalAddress, VirtualAddress},
    bug,
    error::{Error, Result},
    vm::{MapFlags, MapType},
};

use super::{
    descriptor::{
        attributes_of, is_cacheable, leaf_attributes, new_stage1_leaf_desc,
        new_stage1_table_desc, Descriptor, Leaf, INVALID_DESCRIPTOR,
    },
    table_arena::{TableArena, TableId},
    Geometry, MmuOps,
};

const DESC_SIZE: usize = size_of::<u64>();

/// Result of a lookup: the deepest entry that translates an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    level: AddressTranslationLevel,
    /// Bytes of address space the entry covers.
    span: usize,
    raw: u64,
    descriptor: Descriptor,
}

impl Entry {
    pub fn level(&self) -> AddressTranslationLevel {
        self.level
    }

    pub fn span(&self) -> usize {
        self.span
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn leaf(&self) -> Option<&Leaf> {
        self.descriptor.leaf()
    }

    pub fn is_valid(&self) -> bool {
        self.descriptor.is_valid()
    }

    pub fn is_cacheable(&self) -> bool {
        self.leaf().is_some() && is_cacheable(self.raw)
    }
}

/// State shared by all descriptor writes of one remap.
pub(crate) struct WriteContext<'o, O: MmuOps> {
    ops: &'o mut O,
    /// Live tables need break-before-make.
    mmu_on: bool,
    clean: bool,
    /// Set once any descriptor changed, so the caller knows to flush the TLB.
    dirty: bool,
}

impl<'o, O: MmuOps> WriteContext<'o, O> {
    pub(crate) fn new(ops: &'o mut O, clean: bool) -> Self {
        let mmu_on = ops.mmu_enabled();
        Self {
            ops,
            mmu_on,
            clean,
            dirty: false,
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn ops(&mut self) -> &mut O {
        &mut *self.ops
    }
}

enum TraversalControl {
    /// A leaf was written (or already faults) for this many bytes.
    Done(usize),
    Descend(TableId),
}

pub struct TranslationTable<'a> {
    geometry: Geometry,
    arena: TableArena<'a>,
    root: TableId,
}

impl<'a> TranslationTable<'a> {
    pub fn new(geometry: Geometry, mut arena: TableArena<'a>) -> Result<Self> {
        if arena.granule() != geometry.granule() {
            return Err(Error::GranuleMismatch);
        }

        let root = arena.alloc()?;

        Ok(Self {
            geometry,
            arena,
            root,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn arena(&self) -> &TableArena<'a> {
        &self.arena
    }

    /// Value for TTBR0.
    pub fn root_address(&self) -> PhysicalAddress {
        self.arena.address_of(self.root)
    }

    /// Walk the translation table using `vaddr`, the way the CPU does after a
    /// TLB miss, and stop at the first entry that is not a table.
    pub fn find_entry(&self, vaddr: VirtualAddress) -> Result<Entry> {
        if vaddr.as_raw_ptr() >= self.geometry.va_limit() {
            return Err(Error::InvalidVirtualAddress(vaddr.as_raw_ptr()));
        }

        let mut table = self.root;

        for level in self.geometry.levels() {
            let raw = self.arena.table(table)[self.geometry.index(vaddr, level)];

            match Descriptor::decode(raw, level, &self.geometry)? {
                Descriptor::Table(next) => table = self.arena.id_of(next)?,
                descriptor => {
                    return Ok(Entry {
                        level,
                        span: self.geometry.block_size(level),
                        raw,
                        descriptor,
                    })
                }
            }
        }

        bug!("Table descriptor found at L3")
    }

    /// Maps `[vaddr, vaddr + size)` to `paddr` as `map_type`.
    ///
    /// Addresses must be granule aligned and `size` a granule multiple. The
    /// caller owns TLB invalidation; `ctx` records whether it is needed.
    pub(crate) fn map<O: MmuOps>(
        &mut self,
        ctx: &mut WriteContext<'_, O>,
        mut vaddr: VirtualAddress,
        mut paddr: PhysicalAddress,
        size: usize,
        map_type: MapType,
        flags: MapFlags,
    ) -> Result<()> {
        let attrs = leaf_attributes(map_type);
        let force_pages = flags.contains(MapFlags::PAGEWISE);
        let mut remaining = size;

        while remaining > 0 {
            let mapped = self.map_chunk(ctx, vaddr, paddr, remaining, attrs, force_pages)?;

            vaddr += mapped;
            paddr += mapped;
            remaining -= mapped;
        }

        Ok(())
    }

    fn map_chunk<O: MmuOps>(
        &mut self,
        ctx: &mut WriteContext<'_, O>,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        remaining: usize,
        attrs: Option<u64>,
        force_pages: bool,
    ) -> Result<usize> {
        let mut table = self.root;
        let mut level = self.geometry.start_level();

        loop {
            match self.visit(ctx, table, level, vaddr, paddr, remaining, attrs, force_pages)? {
                TraversalControl::Done(mapped) => return Ok(mapped),
                TraversalControl::Descend(next) => {
                    table = next;
                    level = level.next();
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit<O: MmuOps>(
        &mut self,
        ctx: &mut WriteContext<'_, O>,
        table: TableId,
        level: AddressTranslationLevel,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        remaining: usize,
        attrs: Option<u64>,
        force_pages: bool,
    ) -> Result<TraversalControl> {
        let idx = self.geometry.index(vaddr, level);
        let block_size = self.geometry.block_size(level);
        let raw = self.arena.table(table)[idx];
        let desc = Descriptor::decode(raw, level, &self.geometry)?;

        // The output address of a faulting entry is irrelevant.
        let paddr_aligned = attrs.is_none() || paddr.is_aligned(block_size);
        let fits = vaddr.is_aligned(block_size)
            && paddr_aligned
            && remaining >= block_size
            && self.geometry.supports_leaf(level)
            && (!force_pages || level == AddressTranslationLevel::Three);

        if fits {
            let new_raw = match attrs {
                Some(attrs) => new_stage1_leaf_desc(level, paddr, attrs),
                None => INVALID_DESCRIPTOR,
            };
            if let Descriptor::Table(_) = desc {
                log::trace!("collapsing {level} table at {vaddr} into a leaf");
            }
            self.replace_entry(ctx, table, idx, level, desc, new_raw)?;
            return Ok(TraversalControl::Done(block_size));
        }

        match desc {
            Descriptor::Table(next) => Ok(TraversalControl::Descend(self.arena.id_of(next)?)),
            Descriptor::Invalid if attrs.is_none() => {
                // Already faulting up to the end of this entry.
                let to_boundary = block_size - vaddr.align_offset(block_size);
                Ok(TraversalControl::Done(to_boundary.min(remaining)))
            }
            Descriptor::Invalid => {
                let next = self.alloc_table(ctx)?;
                let new_raw = new_stage1_table_desc(self.arena.address_of(next));
                self.replace_entry(ctx, table, idx, level, desc, new_raw)?;
                Ok(TraversalControl::Descend(next))
            }
            Descriptor::Block(leaf) => {
                let next = self.split_block(ctx, level, raw, &leaf)?;
                log::trace!(
                    "split {level} block at {} into {} entries",
                    VirtualAddress::new(vaddr.align_down(block_size)),
                    self.geometry.entries_per_table()
                );
                let new_raw = new_stage1_table_desc(self.arena.address_of(next));
                self.replace_entry(ctx, table, idx, level, desc, new_raw)?;
                Ok(TraversalControl::Descend(next))
            }
            // A granule aligned chunk always fits a page.
            Descriptor::Page(_) => bug!("Unable to place a page at {vaddr}"),
        }
    }

    fn alloc_table<O: MmuOps>(&mut self, ctx: &mut WriteContext<'_, O>) -> Result<TableId> {
        let id = self.arena.alloc()?;
        self.clean_table(ctx, id);
        Ok(id)
    }

    /// Builds a next level table that maps exactly what the block at `level`
    /// mapped, one finer entry at a time.
    fn split_block<O: MmuOps>(
        &mut self,
        ctx: &mut WriteContext<'_, O>,
        level: AddressTranslationLevel,
        raw: u64,
        leaf: &Leaf,
    ) -> Result<TableId> {
        let child_level = level.next();
        let child_size = self.geometry.block_size(child_level);
        let attrs = attributes_of(raw);
        let mut output = leaf.output_address();

        let id = self.arena.alloc()?;
        for desc in self.arena.table_mut(id).iter_mut() {
            *desc = new_stage1_leaf_desc(child_level, output, attrs);
            output += child_size;
        }
        self.clean_table(ctx, id);

        Ok(id)
    }

    fn replace_entry<O: MmuOps>(
        &mut self,
        ctx: &mut WriteContext<'_, O>,
        table: TableId,
        idx: usize,
        level: AddressTranslationLevel,
        old: Descriptor,
        new_raw: u64,
    ) -> Result<()> {
        if self.arena.table(table)[idx] == new_raw {
            return Ok(());
        }

        let orphan = match old {
            Descriptor::Table(next) => Some(self.arena.id_of(next)?),
            _ => None,
        };
        let new = Descriptor::decode(new_raw, level, &self.geometry)?;
        let shape_change = old.is_valid()
            && new.is_valid()
            && matches!(old, Descriptor::Table(_)) != matches!(new, Descriptor::Table(_));
        let break_before_make = ctx.mmu_on && shape_change;

        if break_before_make {
            self.write_entry(ctx, table, idx, INVALID_DESCRIPTOR);
            ctx.ops.tlb_invalidate_all();
        }
        self.write_entry(ctx, table, idx, new_raw);

        if let Some(orphan) = orphan {
            // Walk caches may still point into the old tables.
            if ctx.mmu_on && !break_before_make {
                ctx.ops.tlb_invalidate_all();
            }
            self.free_subtree(orphan, level.next());
        }

        Ok(())
    }

    fn write_entry<O: MmuOps>(
        &mut self,
        ctx: &mut WriteContext<'_, O>,
        table: TableId,
        idx: usize,
        raw: u64,
    ) {
        self.arena.table_mut(table)[idx] = raw;
        ctx.dirty = true;

        if ctx.clean {
            let start = self.arena.address_of(table) + idx * DESC_SIZE;
            ctx.ops.clean_table_range(start, start + DESC_SIZE);
        }
    }

    fn clean_table<O: MmuOps>(&self, ctx: &mut WriteContext<'_, O>, id: TableId) {
        if ctx.clean {
            let start = self.arena.address_of(id);
            ctx.ops
                .clean_table_range(start, start + self.geometry.granule().size());
        }
    }

    fn free_subtree(&mut self, id: TableId, level: AddressTranslationLevel) {
        if level != AddressTranslationLevel::Three {
            for idx in 0..self.geometry.entries_per_table() {
                let raw = self.arena.table(id)[idx];
                if let Ok(Descriptor::Table(next)) = Descriptor::decode(raw, level, &self.geometry)
                {
                    if let Ok(child) = self.arena.id_of(next) {
                        self.free_subtree(child, level.next());
                    }
                }
            }
        }

        self.arena.free(id);
    }
}
