//! Scenario tests run against every strategy on a 16-block device

use freespace_rs::{BlockDevice, Extent, FreespaceError, StrategyKind};

fn extents(pairs: &[(usize, usize)]) -> Vec<Extent> {
    pairs.iter().map(|&(s, l)| Extent::new(s, l)).collect()
}

#[test]
fn test_allocate_on_empty_device() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::new(16);
        let mut strategy = kind.build(&mut device);

        assert_eq!(strategy.allocate(5).unwrap(), Some(Extent::new(0, 5)), "{}", kind);
        assert_eq!(
            strategy.largest_free_run().unwrap(),
            Some(Extent::new(5, 11)),
            "{}",
            kind
        );
        assert_eq!(strategy.device().export_pattern(), "1111100000000000");
    }
}

#[test]
fn test_allocation_consumes_only_extent() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("1111000000111111").unwrap();
        let mut strategy = kind.build(&mut device);

        assert_eq!(strategy.free_extents(), extents(&[(4, 6)]));
        assert_eq!(strategy.allocate(6).unwrap(), Some(Extent::new(4, 6)), "{}", kind);
        assert!(strategy.free_extents().is_empty());
        assert_eq!(strategy.largest_free_run().unwrap(), None, "{}", kind);
        assert_eq!(strategy.allocate(1).unwrap(), None, "{}", kind);
        assert_eq!(strategy.device().stats().occupied, 16);
    }
}

#[test]
fn test_release_between_two_free_extents() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("0001100011111111").unwrap();
        let mut strategy = kind.build(&mut device);

        assert!(strategy.release(3, 2).unwrap(), "{}", kind);
        assert_eq!(strategy.free_extents(), extents(&[(0, 8)]), "{}", kind);
        assert_eq!(
            strategy.largest_free_run().unwrap(),
            Some(Extent::new(0, 8)),
            "{}",
            kind
        );
    }
}

#[test]
fn test_release_overlapping_free_space() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("1111000011111111").unwrap();
        let mut strategy = kind.build(&mut device);

        assert!(strategy.release(2, 4).unwrap(), "{}", kind);
        assert_eq!(strategy.device().export_pattern(), "1100000011111111", "{}", kind);
        assert_eq!(strategy.free_extents(), extents(&[(2, 6)]), "{}", kind);
        assert_eq!(
            strategy.largest_free_run().unwrap(),
            Some(Extent::new(2, 6)),
            "{}",
            kind
        );
    }
}

#[test]
fn test_release_covering_several_free_extents() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("0110011001100111").unwrap();
        let mut strategy = kind.build(&mut device);

        assert!(strategy.release(1, 10).unwrap(), "{}", kind);
        assert_eq!(strategy.device().export_pattern(), "0000000000000111", "{}", kind);
        assert_eq!(strategy.free_extents(), extents(&[(0, 13)]), "{}", kind);
    }
}

#[test]
fn test_release_out_of_range_changes_nothing() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("1100001111000011").unwrap();
        let mut strategy = kind.build(&mut device);
        let before = strategy.free_extents();

        assert!(!strategy.release(20, 3).unwrap(), "{}", kind);
        assert!(!strategy.release(14, 5).unwrap(), "{}", kind);
        assert_eq!(strategy.free_extents(), before);
        assert_eq!(strategy.device().export_pattern(), "1100001111000011");
        assert_eq!(strategy.device().stats().total_accesses(), 0);
    }
}

#[test]
fn test_short_pattern_import_rejected() {
    let mut device = BlockDevice::from_pattern("1010101010101010").unwrap();
    device.write(1, true).unwrap();

    let result = device.import_pattern("000000000000000");
    assert!(matches!(result, Err(FreespaceError::Format(_))));
    assert_eq!(device.export_pattern(), "1110101010101010");
    assert_eq!(device.stats().write_accesses, 1);
}

#[test]
fn test_allocate_release_restores_state() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("0110000111000001").unwrap();
        let mut strategy = kind.build(&mut device);
        let chain = strategy.free_extents();

        let extent = strategy.allocate(3).unwrap().unwrap();
        assert_eq!(extent, Extent::new(3, 3), "{}", kind);
        assert!(strategy.release(extent.start, extent.length).unwrap());

        assert_eq!(strategy.free_extents(), chain, "{}", kind);
        assert_eq!(strategy.device().export_pattern(), "0110000111000001");
    }
}

#[test]
fn test_list_strategies_never_read_device() {
    for kind in [StrategyKind::SinglyLinked, StrategyKind::DoublyLinked] {
        let mut device = BlockDevice::from_pattern("0011001100110011").unwrap();
        let mut strategy = kind.build(&mut device);

        strategy.allocate(2).unwrap();
        strategy.release(0, 2).unwrap();
        strategy.largest_free_run().unwrap();

        let stats = strategy.device().stats();
        assert_eq!(stats.read_accesses, 0, "{}", kind);
        assert_eq!(stats.write_accesses, 4, "{}", kind);
    }
}

#[test]
fn test_bitmap_pays_for_every_scan() {
    let mut device = BlockDevice::from_pattern("1111111111111110").unwrap();
    let mut strategy = StrategyKind::Bitmap.build(&mut device);

    assert_eq!(strategy.allocate(2).unwrap(), None);
    assert_eq!(strategy.device().stats().read_accesses, 16);
    assert_eq!(strategy.largest_free_run().unwrap(), Some(Extent::new(15, 1)));
    assert_eq!(strategy.device().stats().read_accesses, 32);
}

#[test]
fn test_release_records_latency_sample() {
    for kind in StrategyKind::ALL {
        let mut device = BlockDevice::from_pattern("1111111111111111").unwrap();
        let mut strategy = kind.build(&mut device);

        strategy.release(0, 4).unwrap();
        strategy.release(99, 1).unwrap();

        let stats = strategy.stats();
        assert_eq!(stats.name, kind.name());
        assert_eq!(stats.release.op_count, 1, "{}", kind);
    }
}
