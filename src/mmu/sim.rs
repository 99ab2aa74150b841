//! Host stand-in for the MMU that records every maintenance operation.

extern crate std;

use std::vec::Vec;

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    error::Result,
};

use super::{MmuConfig, MmuOps};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuEvent {
    TlbInvalidateAll,
    FlushDcache {
        start: VirtualAddress,
        end: VirtualAddress,
    },
    InvalidateDcache {
        start: VirtualAddress,
        end: VirtualAddress,
    },
    FlushDcacheAll,
    CleanTable {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    Enable {
        ttb: PhysicalAddress,
    },
    Disable,
}

#[derive(Debug, Default)]
pub struct SimulatedMmu {
    events: Vec<MmuEvent>,
    enabled: bool,
}

impl SimulatedMmu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends the MMU was already turned on by an earlier stage.
    pub fn enabled() -> Self {
        Self {
            events: Vec::new(),
            enabled: true,
        }
    }

    pub fn set_mmu_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn events(&self) -> &[MmuEvent] {
        &self.events
    }

    /// Data cache flushes in issue order, as `(start, end)`.
    pub fn flushes(&self) -> Vec<(VirtualAddress, VirtualAddress)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                MmuEvent::FlushDcache { start, end } => Some((*start, *end)),
                _ => None,
            })
            .collect()
    }

    pub fn tlb_invalidations(&self) -> usize {
        self.events
            .iter()
            .filter(|event| **event == MmuEvent::TlbInvalidateAll)
            .count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl MmuOps for SimulatedMmu {
    fn tlb_invalidate_all(&mut self) {
        self.events.push(MmuEvent::TlbInvalidateAll);
    }

    fn flush_dcache_range(&mut self, start: VirtualAddress, end: VirtualAddress) {
        self.events.push(MmuEvent::FlushDcache { start, end });
    }

    fn invalidate_dcache_range(&mut self, start: VirtualAddress, end: VirtualAddress) {
        self.events.push(MmuEvent::InvalidateDcache { start, end });
    }

    fn flush_dcache_all(&mut self) {
        self.events.push(MmuEvent::FlushDcacheAll);
    }

    fn clean_table_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        self.events.push(MmuEvent::CleanTable { start, end });
    }

    fn mmu_enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self, ttb: PhysicalAddress, config: &MmuConfig) -> Result<()> {
        config.validate()?;
        self.events.push(MmuEvent::Enable { ttb });
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) {
        self.events.push(MmuEvent::Disable);
        self.enabled = false;
    }
}
