use rayon::prelude::*;

use mmu64::{
    mmu::sim::SimulatedMmu, ActiveAddressSpace, AddressSpace, Error, MapType, MmuConfig,
    PhysicalAddress, TableArena, VirtualAddress,
};

const PAGE: usize = 4096;

fn leaked_address_space(tables: usize) -> AddressSpace<'static, SimulatedMmu> {
    let storage: &'static mut [u64] = Box::leak(vec![0u64; 512 * tables].into_boxed_slice());
    let config = MmuConfig::default();
    let arena = TableArena::new(storage, PhysicalAddress::new(0x8000_0000), config.granule).unwrap();

    AddressSpace::new(config, arena, SimulatedMmu::enabled()).unwrap()
}

#[test]
fn install_once_then_take() {
    static ACTIVE: ActiveAddressSpace<SimulatedMmu> = ActiveAddressSpace::new();

    assert!(!ACTIVE.is_installed());
    assert!(matches!(ACTIVE.with(|_| ()), Err(Error::NoActiveAddressSpace)));

    ACTIVE.install(leaked_address_space(2)).unwrap();
    assert_eq!(
        ACTIVE.install(leaked_address_space(2)),
        Err(Error::AddressSpaceActive)
    );

    let ttb = ACTIVE.with(|space| space.ttb()).unwrap();
    assert_eq!(ttb, PhysicalAddress::new(0x8000_0000));

    assert!(ACTIVE.take().is_some());
    assert!(!ACTIVE.is_installed());
    assert!(ACTIVE.take().is_none());
}

#[test]
fn concurrent_remaps_are_serialised() {
    static ACTIVE: ActiveAddressSpace<SimulatedMmu> = ActiveAddressSpace::new();
    const PAGES: usize = 256;

    ACTIVE.install(leaked_address_space(8)).unwrap();
    ACTIVE
        .with(|space| {
            space.remap_range(
                VirtualAddress::new(0),
                PhysicalAddress::new(0),
                PAGES * PAGE,
                MapType::Cached,
            )
        })
        .unwrap()
        .unwrap();

    (0..PAGES).into_par_iter().for_each(|page| {
        let map_type = if page % 3 == 0 {
            MapType::Uncached
        } else {
            MapType::Code
        };

        ACTIVE
            .with(|space| {
                space.remap_range(
                    VirtualAddress::new(page * PAGE),
                    PhysicalAddress::new(page * PAGE),
                    PAGE,
                    map_type,
                )
            })
            .unwrap()
            .unwrap();
    });

    ACTIVE
        .with(|space| {
            for page in 0..PAGES {
                let translation = space.translate(VirtualAddress::new(page * PAGE)).unwrap();
                let expected = if page % 3 == 0 {
                    MapType::Uncached
                } else {
                    MapType::Code
                };

                assert_eq!(translation.map_type, expected);
                assert_eq!(translation.paddr, PhysicalAddress::new(page * PAGE));
            }
            // Root, level 2 and a single level 3 table no matter the order.
            assert_eq!(space.arena().in_use(), 3);
        })
        .unwrap();
}
